//! Expense claim and manual expense models.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Categories that count as travel when no booking is linked.
pub const DEFAULT_TRAVEL_CATEGORIES: &[&str] = &["travel_expenses", "mileage"];

/// Approved expense claim that can be billed to a client.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExpenseClaim {
    pub expense_id: Uuid,
    pub client_id: Uuid,
    pub staff_id: Option<Uuid>,
    pub booking_id: Option<Uuid>,
    pub category: String,
    pub description: Option<String>,
    pub amount: Decimal,
    pub expense_date: NaiveDate,
    pub is_invoiced: bool,
    pub invoice_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
}

impl ExpenseClaim {
    pub fn is_selectable(&self) -> bool {
        !self.is_invoiced
    }

    /// Derived grouping; booking linkage takes precedence over category.
    pub fn group(&self, travel_categories: &[String]) -> ExpenseGroup {
        if self.booking_id.is_some() {
            ExpenseGroup::BookingLinked
        } else if travel_categories.iter().any(|c| c == &self.category) {
            ExpenseGroup::Travel
        } else {
            ExpenseGroup::Other
        }
    }

    pub fn line_description(&self) -> String {
        match self.description.as_deref().map(str::trim) {
            Some(d) if !d.is_empty() => format!("{} ({})", d, self.expense_date),
            _ => format!(
                "{} expense ({})",
                self.category.replace('_', " "),
                self.expense_date
            ),
        }
    }
}

/// Query-time partition of expense claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseGroup {
    BookingLinked,
    Travel,
    Other,
}

/// Expense line typed in by an administrator, not backed by a claim.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_staff_payment"))]
pub struct ManualExpenseEntry {
    #[validate(
        length(max = 255, message = "Description must be 1-255 characters"),
        custom(function = "validate_description")
    )]
    pub description: String,
    #[validate(custom(function = "validate_positive_amount"))]
    pub amount: Decimal,
    #[serde(default)]
    #[validate(custom(function = "validate_percentage"))]
    pub admin_cost_percentage: Decimal,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub expense_date: Option<NaiveDate>,
    #[serde(default)]
    pub staff_id: Option<Uuid>,
    #[serde(default)]
    pub pay_staff: bool,
    #[serde(default)]
    pub staff_payment_amount: Option<Decimal>,
}

impl ManualExpenseEntry {
    pub fn new(description: impl Into<String>, amount: Decimal) -> Self {
        Self {
            description: description.into(),
            amount,
            admin_cost_percentage: Decimal::ZERO,
            category: None,
            expense_date: None,
            staff_id: None,
            pay_staff: false,
            staff_payment_amount: None,
        }
    }
}

fn validate_description(description: &str) -> Result<(), ValidationError> {
    if description.trim().is_empty() {
        Err(ValidationError::new("description_blank"))
    } else {
        Ok(())
    }
}

fn validate_positive_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount > Decimal::ZERO {
        Ok(())
    } else {
        Err(ValidationError::new("amount_not_positive"))
    }
}

fn validate_staff_payment(entry: &ManualExpenseEntry) -> Result<(), ValidationError> {
    match entry.staff_payment_amount {
        Some(amount) if amount < Decimal::ZERO => {
            Err(ValidationError::new("staff_payment_negative"))
        }
        _ => Ok(()),
    }
}

fn validate_percentage(pct: &Decimal) -> Result<(), ValidationError> {
    if *pct >= Decimal::ZERO && *pct <= Decimal::ONE_HUNDRED {
        Ok(())
    } else {
        Err(ValidationError::new("percentage_out_of_range"))
    }
}
