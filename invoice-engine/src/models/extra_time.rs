//! Extra time record model.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Approved time worked beyond a booking's scheduled end.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExtraTimeRecord {
    pub extra_time_id: Uuid,
    pub client_id: Uuid,
    pub booking_id: Option<Uuid>,
    pub staff_id: Option<Uuid>,
    pub work_date: NaiveDate,
    pub extra_time_minutes: i32,
    pub hourly_rate: Decimal,
    pub total_cost: Decimal,
    pub invoiced: bool,
    pub invoice_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
}

impl ExtraTimeRecord {
    pub fn is_selectable(&self) -> bool {
        !self.invoiced
    }

    pub fn hours(&self) -> Decimal {
        (Decimal::from(self.extra_time_minutes.max(0)) / Decimal::from(60)).round_dp(2)
    }

    pub fn line_description(&self) -> String {
        format!(
            "Extra time {} min ({})",
            self.extra_time_minutes, self.work_date
        )
    }
}
