//! Billing period model.

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Period selection offered to administrators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodType {
    Weekly,
    Fortnightly,
    Monthly,
    Custom,
}

impl PeriodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::Weekly => "weekly",
            PeriodType::Fortnightly => "fortnightly",
            PeriodType::Monthly => "monthly",
            PeriodType::Custom => "custom",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "weekly" => Some(PeriodType::Weekly),
            "fortnightly" => Some(PeriodType::Fortnightly),
            "monthly" => Some(PeriodType::Monthly),
            "custom" => Some(PeriodType::Custom),
            _ => None,
        }
    }

    /// Fixed day count for preset periods; `None` for custom.
    pub fn preset_days(&self) -> Option<u64> {
        match self {
            PeriodType::Weekly => Some(7),
            PeriodType::Fortnightly => Some(14),
            PeriodType::Monthly => Some(30),
            PeriodType::Custom => None,
        }
    }
}

/// Caller-supplied bounds for a custom period (both inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// A resolved, calendar-day granular billing period.
///
/// `start_date <= end_date` always holds; both ends are inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    #[serde(rename = "type")]
    pub period_type: PeriodType,
    pub label: String,
    pub description: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub days: i64,
}

impl Period {
    pub fn contains_date(&self, date: NaiveDate) -> bool {
        date >= self.start_date && date <= self.end_date
    }

    pub fn contains_time(&self, at: DateTime<Utc>) -> bool {
        at >= self.starts_at() && at < self.ends_before()
    }

    /// Midnight UTC at the start of the first day.
    pub fn starts_at(&self) -> DateTime<Utc> {
        self.start_date.and_time(NaiveTime::MIN).and_utc()
    }

    /// Midnight UTC after the last day (exclusive bound).
    pub fn ends_before(&self) -> DateTime<Utc> {
        self.end_date
            .checked_add_days(Days::new(1))
            .unwrap_or(NaiveDate::MAX)
            .and_time(NaiveTime::MIN)
            .and_utc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn period(start: NaiveDate, end: NaiveDate) -> Period {
        Period {
            period_type: PeriodType::Custom,
            label: "Custom".to_string(),
            description: String::new(),
            start_date: start,
            end_date: end,
            days: (end - start).num_days() + 1,
        }
    }

    #[test]
    fn contains_time_covers_whole_last_day() {
        let day = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        let p = period(day, day);

        let late = day.and_hms_opt(23, 59, 59).unwrap().and_utc();
        let next = day.succ_opt().unwrap().and_hms_opt(0, 0, 0).unwrap().and_utc();

        assert!(p.contains_time(late));
        assert!(!p.contains_time(next));
    }

    #[test]
    fn period_type_round_trips_through_strings() {
        for t in [
            PeriodType::Weekly,
            PeriodType::Fortnightly,
            PeriodType::Monthly,
            PeriodType::Custom,
        ] {
            assert_eq!(PeriodType::from_string(t.as_str()), Some(t));
        }
        assert_eq!(PeriodType::from_string("quarterly"), None);
    }
}
