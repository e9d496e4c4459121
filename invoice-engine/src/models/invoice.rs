//! Invoice and line item models.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Pending,
    ReadyToCharge,
    Confirmed,
    Locked,
    Sent,
    Paid,
    Overdue,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::ReadyToCharge => "ready_to_charge",
            InvoiceStatus::Confirmed => "confirmed",
            InvoiceStatus::Locked => "locked",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    /// Parse a stored status. Unknown values yield `None`.
    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(InvoiceStatus::Draft),
            "pending" => Some(InvoiceStatus::Pending),
            "ready_to_charge" => Some(InvoiceStatus::ReadyToCharge),
            "confirmed" => Some(InvoiceStatus::Confirmed),
            "locked" => Some(InvoiceStatus::Locked),
            "sent" => Some(InvoiceStatus::Sent),
            "paid" => Some(InvoiceStatus::Paid),
            "overdue" => Some(InvoiceStatus::Overdue),
            "cancelled" => Some(InvoiceStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_deletable(&self) -> bool {
        matches!(
            self,
            InvoiceStatus::Draft | InvoiceStatus::Pending | InvoiceStatus::Cancelled
        )
    }

    /// Whether further line items may be appended.
    pub fn is_editable(&self) -> bool {
        matches!(self, InvoiceStatus::Draft | InvoiceStatus::Pending)
    }
}

/// Invoice header.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub organization_id: Uuid,
    pub client_id: Uuid,
    pub branch_id: Uuid,
    pub invoice_number: String,
    pub status: String,
    pub total_amount: Decimal,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub generated_from_booking: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Invoice {
    pub fn status(&self) -> Option<InvoiceStatus> {
        InvoiceStatus::from_string(&self.status)
    }

    /// Unknown statuses are never deletable.
    pub fn is_deletable(&self) -> bool {
        self.status().is_some_and(|s| s.is_deletable())
    }

    /// Unknown statuses are never editable.
    pub fn is_editable(&self) -> bool {
        self.status().is_some_and(|s| s.is_editable())
    }
}

/// What a line item bills for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineItemKind {
    Service,
    ExpenseClaim,
    ExtraTime,
    ManualExpense,
}

impl LineItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineItemKind::Service => "service",
            LineItemKind::ExpenseClaim => "expense_claim",
            LineItemKind::ExtraTime => "extra_time",
            LineItemKind::ManualExpense => "manual_expense",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "expense_claim" => LineItemKind::ExpenseClaim,
            "extra_time" => LineItemKind::ExtraTime,
            "manual_expense" => LineItemKind::ManualExpense,
            _ => LineItemKind::Service,
        }
    }
}

/// Persisted line item.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LineItem {
    pub line_item_id: Uuid,
    pub invoice_id: Uuid,
    pub kind: String,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub amount: Decimal,
    pub booking_id: Option<Uuid>,
    pub source_expense_id: Option<Uuid>,
    pub source_extra_time_id: Option<Uuid>,
    pub staff_id: Option<Uuid>,
    pub admin_cost_percentage: Option<Decimal>,
    pub sort_order: i32,
    pub created_utc: DateTime<Utc>,
}

/// Line item not yet attached to an invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLineItem {
    pub kind: LineItemKind,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub amount: Decimal,
    pub booking_id: Option<Uuid>,
    pub source_expense_id: Option<Uuid>,
    pub source_extra_time_id: Option<Uuid>,
    pub staff_id: Option<Uuid>,
    pub admin_cost_percentage: Option<Decimal>,
}

impl NewLineItem {
    /// Single-quantity line at a flat amount.
    pub fn flat(kind: LineItemKind, description: impl Into<String>, amount: Decimal) -> Self {
        Self {
            kind,
            description: description.into(),
            quantity: Decimal::ONE,
            unit_price: amount,
            amount,
            booking_id: None,
            source_expense_id: None,
            source_extra_time_id: None,
            staff_id: None,
            admin_cost_percentage: None,
        }
    }
}

/// Input for creating an invoice together with its line items.
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub organization_id: Uuid,
    pub client_id: Uuid,
    pub branch_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub generated_from_booking: bool,
    pub line_items: Vec<NewLineItem>,
}

impl NewInvoice {
    pub fn total(&self) -> Decimal {
        sum_amounts(&self.line_items)
    }
}

/// Invoice header plus its line items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceDetail {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub line_items: Vec<LineItem>,
}

/// Summary returned by the invoice writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WrittenInvoice {
    pub invoice_id: Uuid,
    pub client_id: Uuid,
    pub invoice_number: String,
    pub amount: Decimal,
    pub line_item_count: usize,
}

pub fn sum_amounts(items: &[NewLineItem]) -> Decimal {
    items.iter().map(|item| item.amount).sum()
}

/// Render a per-organization sequence value as an invoice number.
pub fn format_invoice_number(sequence: i64) -> String {
    format!("INV-{:06}", sequence)
}
