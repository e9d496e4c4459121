//! Engine error taxonomy.

use chrono::NaiveDate;
use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid date range: start {start} is after end {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("A custom period needs both a start and an end date")]
    MissingCustomRange,

    #[error("Nothing selected: add a manual expense, an expense claim or extra time")]
    EmptySelection,

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("No billable items remain for client {client_id} in this period")]
    NoBillableFacts { client_id: Uuid },

    #[error("Invoice {invoice_number} already covers this period for client {client_id}")]
    DuplicateInvoice {
        client_id: Uuid,
        invoice_number: String,
    },

    #[error("Client {0} has no active rate basis")]
    NoRateBasis(Uuid),

    #[error("Client not found: {0}")]
    ClientNotFound(Uuid),

    #[error("Invoice not found: {0}")]
    InvoiceNotFound(Uuid),

    #[error("Invoice {invoice_id} cannot be changed while {status}")]
    InvoiceNotEditable { invoice_id: Uuid, status: String },

    #[error("Invoice {invoice_id} cannot be deleted while {status}")]
    InvoiceNotDeletable { invoice_id: Uuid, status: String },

    #[error("{count} clients exceed the bulk generation limit of {limit}")]
    BulkLimitExceeded { count: usize, limit: usize },

    #[error(transparent)]
    Store(#[from] AppError),
}

impl EngineError {
    /// Short, human-readable summary for per-client result rows.
    pub fn reason(&self) -> String {
        match self {
            EngineError::NoBillableFacts { .. } => "no billable bookings in period".to_string(),
            EngineError::DuplicateInvoice { invoice_number, .. } => format!(
                "duplicate invoice already exists for period ({})",
                invoice_number
            ),
            EngineError::NoRateBasis(_) => "no active rate basis".to_string(),
            EngineError::ClientNotFound(_) => "client record not found".to_string(),
            EngineError::Store(AppError::Conflict(_)) => {
                "items were invoiced by another request, refresh and retry".to_string()
            }
            EngineError::Store(AppError::NotFound(_)) => "record not found".to_string(),
            EngineError::Store(_) => "could not save the invoice, please retry".to_string(),
            other => other.to_string(),
        }
    }

    /// Label used for error metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidRange { .. }
            | EngineError::MissingCustomRange
            | EngineError::EmptySelection
            | EngineError::Validation(_) => "validation",
            EngineError::NoBillableFacts { .. } => "no_billable_facts",
            EngineError::DuplicateInvoice { .. } => "duplicate_invoice",
            EngineError::NoRateBasis(_) => "no_rate_basis",
            EngineError::ClientNotFound(_) | EngineError::InvoiceNotFound(_) => "not_found",
            EngineError::InvoiceNotEditable { .. } | EngineError::InvoiceNotDeletable { .. } => {
                "invalid_status"
            }
            EngineError::BulkLimitExceeded { .. } => "bulk_limit",
            EngineError::Store(AppError::Conflict(_)) => "conflict",
            EngineError::Store(_) => "store",
        }
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Validation(errors) => AppError::ValidationError(errors),
            EngineError::Store(inner) => inner,
            EngineError::ClientNotFound(_) | EngineError::InvoiceNotFound(_) => {
                AppError::NotFound(anyhow::anyhow!(err.to_string()))
            }
            EngineError::DuplicateInvoice { .. }
            | EngineError::InvoiceNotEditable { .. }
            | EngineError::InvoiceNotDeletable { .. } => {
                AppError::Conflict(anyhow::anyhow!(err.to_string()))
            }
            EngineError::InvalidRange { .. }
            | EngineError::MissingCustomRange
            | EngineError::EmptySelection
            | EngineError::NoBillableFacts { .. }
            | EngineError::NoRateBasis(_)
            | EngineError::BulkLimitExceeded { .. } => {
                AppError::BadRequest(anyhow::anyhow!(err.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_never_leak_backend_text() {
        let err = EngineError::Store(AppError::DatabaseError(anyhow::anyhow!(
            "relation \"invoices\" does not exist"
        )));
        assert!(!err.reason().contains("relation"));
    }

    #[test]
    fn duplicate_invoice_reason_names_the_invoice() {
        let err = EngineError::DuplicateInvoice {
            client_id: Uuid::nil(),
            invoice_number: "INV-000007".to_string(),
        };
        assert_eq!(
            err.reason(),
            "duplicate invoice already exists for period (INV-000007)"
        );
    }

    #[test]
    fn validation_maps_to_bad_request() {
        let app: AppError = EngineError::EmptySelection.into();
        assert!(matches!(app, AppError::BadRequest(_)));
    }
}
