//! Period resolution.

use crate::error::EngineError;
use crate::models::{CustomRange, Period, PeriodType};
use chrono::{Days, NaiveDate, Utc};
use tracing::debug;

/// Resolve a period selection into concrete inclusive dates.
///
/// Presets end on `today` and cover a fixed number of days rather than
/// calendar weeks or months. A custom range is taken as given once
/// `start <= end` holds; presets ignore `custom`.
pub fn resolve_period(
    period_type: PeriodType,
    custom: Option<CustomRange>,
    today: NaiveDate,
) -> Result<Period, EngineError> {
    let period = match period_type.preset_days() {
        Some(days) => {
            let start_date = today
                .checked_sub_days(Days::new(days - 1))
                .unwrap_or(NaiveDate::MIN);
            Period {
                period_type,
                label: preset_label(period_type).to_string(),
                description: format!("Last {} days", days),
                start_date,
                end_date: today,
                days: days as i64,
            }
        }
        None => {
            let range = custom.ok_or(EngineError::MissingCustomRange)?;
            if range.start > range.end {
                return Err(EngineError::InvalidRange {
                    start: range.start,
                    end: range.end,
                });
            }
            Period {
                period_type,
                label: "Custom".to_string(),
                description: format!("{} to {}", range.start, range.end),
                start_date: range.start,
                end_date: range.end,
                days: (range.end - range.start).num_days() + 1,
            }
        }
    };

    debug!(
        period_type = period.period_type.as_str(),
        start_date = %period.start_date,
        end_date = %period.end_date,
        days = period.days,
        "Period resolved"
    );

    Ok(period)
}

/// [`resolve_period`] anchored on the current UTC date.
pub fn resolve_period_now(
    period_type: PeriodType,
    custom: Option<CustomRange>,
) -> Result<Period, EngineError> {
    resolve_period(period_type, custom, Utc::now().date_naive())
}

fn preset_label(period_type: PeriodType) -> &'static str {
    match period_type {
        PeriodType::Weekly => "Weekly",
        PeriodType::Fortnightly => "Fortnightly",
        PeriodType::Monthly => "Monthly",
        PeriodType::Custom => "Custom",
    }
}
