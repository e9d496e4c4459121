//! Client and rate basis models.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Care client.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Client {
    pub client_id: Uuid,
    pub branch_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub created_utc: DateTime<Utc>,
}

impl Client {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// Where a rate basis comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateMechanism {
    /// Ad-hoc rate schedule entered directly on the client.
    Schedule,
    /// Service rate assigned to the client from the branch catalogue.
    Assignment,
}

impl RateMechanism {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateMechanism::Schedule => "schedule",
            RateMechanism::Assignment => "assignment",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "assignment" => RateMechanism::Assignment,
            _ => RateMechanism::Schedule,
        }
    }
}

/// Pricing agreement for a client.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RateBasis {
    pub rate_basis_id: Uuid,
    pub client_id: Uuid,
    pub mechanism: String,
    pub description: String,
    pub hourly_rate: Decimal,
    pub is_active: bool,
    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
    pub created_utc: DateTime<Utc>,
}

impl RateBasis {
    pub fn mechanism(&self) -> RateMechanism {
        RateMechanism::from_string(&self.mechanism)
    }

    pub fn is_effective_on(&self, date: NaiveDate) -> bool {
        self.is_active
            && self.effective_from <= date
            && self.effective_to.map_or(true, |to| date <= to)
    }
}

/// Bulk eligibility of one client for a branch/period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientEligibility {
    pub client_id: Uuid,
    pub client_name: String,
    pub booking_count: usize,
    pub has_rate_basis: bool,
}
