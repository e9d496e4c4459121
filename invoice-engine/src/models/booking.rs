//! Booking model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Booking status as recorded by the rostering screens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Unassigned,
    Assigned,
    InProgress,
    Done,
    Completed,
    Missed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Unassigned => "unassigned",
            BookingStatus::Assigned => "assigned",
            BookingStatus::InProgress => "in_progress",
            BookingStatus::Done => "done",
            BookingStatus::Completed => "completed",
            BookingStatus::Missed => "missed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "assigned" => BookingStatus::Assigned,
            "in_progress" | "in-progress" => BookingStatus::InProgress,
            "done" => BookingStatus::Done,
            "completed" => BookingStatus::Completed,
            "missed" => BookingStatus::Missed,
            "cancelled" | "canceled" => BookingStatus::Cancelled,
            _ => BookingStatus::Unassigned,
        }
    }

    /// Cancelled visits are counted in previews but never charged.
    pub fn is_billable(&self) -> bool {
        !matches!(self, BookingStatus::Cancelled)
    }
}

/// Scheduled care visit.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Booking {
    pub booking_id: Uuid,
    pub client_id: Uuid,
    pub branch_id: Uuid,
    pub staff_id: Option<Uuid>,
    pub service_name: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: String,
}

impl Booking {
    pub fn status(&self) -> BookingStatus {
        BookingStatus::from_string(&self.status)
    }

    /// Visit length in hours, rounded to two decimal places.
    pub fn duration_hours(&self) -> Decimal {
        let minutes = (self.end_time - self.start_time).num_minutes().max(0);
        (Decimal::from(minutes) / Decimal::from(60)).round_dp(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn booking(minutes: i64) -> Booking {
        let start = Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap();
        Booking {
            booking_id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            branch_id: Uuid::new_v4(),
            staff_id: None,
            service_name: None,
            start_time: start,
            end_time: start + chrono::Duration::minutes(minutes),
            status: "completed".to_string(),
        }
    }

    #[test]
    fn duration_is_rounded_to_hundredths() {
        assert_eq!(booking(90).duration_hours(), Decimal::new(15, 1));
        assert_eq!(booking(20).duration_hours(), Decimal::new(33, 2));
    }

    #[test]
    fn inverted_times_have_zero_duration() {
        assert_eq!(booking(-30).duration_hours(), Decimal::ZERO);
    }

    #[test]
    fn cancelled_bookings_are_not_billable() {
        assert!(!BookingStatus::from_string("cancelled").is_billable());
        assert!(BookingStatus::from_string("assigned").is_billable());
    }
}
