//! Bulk generation models.

use super::{ClientEligibility, Period};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Message returned when a run has nothing to do.
pub const NO_ELIGIBLE_CLIENTS_MESSAGE: &str = "No eligible clients found";

/// Tenant scope for every engine entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingContext {
    pub organization_id: Uuid,
    pub branch_id: Uuid,
}

impl BillingContext {
    pub fn new(organization_id: Uuid, branch_id: Uuid) -> Self {
        Self {
            organization_id,
            branch_id,
        }
    }
}

/// Candidate client list computed before a bulk run is confirmed.
///
/// Dropping a preview is always safe: nothing has been written yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkPreview {
    pub context: BillingContext,
    pub period: Period,
    pub clients: Vec<ClientEligibility>,
}

impl BulkPreview {
    pub fn eligible(&self) -> impl Iterator<Item = &ClientEligibility> {
        self.clients.iter().filter(|c| c.has_rate_basis)
    }

    pub fn skipped(&self) -> impl Iterator<Item = &ClientEligibility> {
        self.clients.iter().filter(|c| !c.has_rate_basis)
    }

    pub fn eligible_count(&self) -> usize {
        self.eligible().count()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped().count()
    }
}

/// Progress pushed before each client is attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkGenerationProgress {
    pub current: usize,
    pub total: usize,
    pub current_client: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedInvoiceSummary {
    pub client_id: Uuid,
    pub client_name: String,
    pub invoice_number: String,
    pub amount: Decimal,
    pub line_item_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationFailure {
    pub client_name: String,
    pub booking_count: usize,
    pub reason: String,
    /// Client was never attempted (no rate basis).
    #[serde(default)]
    pub skipped: bool,
}

/// Aggregate outcome of a bulk run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkGenerationResult {
    pub success_count: usize,
    pub error_count: usize,
    pub skipped_count: usize,
    pub total_amount: Decimal,
    pub invoices: Vec<GeneratedInvoiceSummary>,
    pub errors: Vec<GenerationFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl BulkGenerationResult {
    pub fn no_eligible_clients() -> Self {
        Self {
            message: Some(NO_ELIGIBLE_CLIENTS_MESSAGE.to_string()),
            ..Self::default()
        }
    }

    pub fn record_success(&mut self, summary: GeneratedInvoiceSummary) {
        self.success_count += 1;
        self.total_amount += summary.amount;
        self.invoices.push(summary);
    }

    pub fn record_failure(&mut self, failure: GenerationFailure) {
        self.error_count += 1;
        self.errors.push(failure);
    }

    pub fn record_skipped(&mut self, client: &ClientEligibility) {
        self.skipped_count += 1;
        self.errors.push(GenerationFailure {
            client_name: client.client_name.clone(),
            booking_count: client.booking_count,
            reason: "no active rate basis".to_string(),
            skipped: true,
        });
    }

    pub fn outcome(&self) -> &'static str {
        match (self.success_count, self.error_count) {
            (0, 0) => "empty",
            (_, 0) => "completed",
            (0, _) => "failed",
            _ => "partial",
        }
    }
}

/// Persisted summary of one bulk run.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GenerationRun {
    pub run_id: Uuid,
    pub organization_id: Uuid,
    pub branch_id: Uuid,
    pub period_type: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub success_count: i32,
    pub error_count: i32,
    pub skipped_count: i32,
    pub total_amount: Decimal,
    pub started_utc: DateTime<Utc>,
    pub completed_utc: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(amount: i64) -> GeneratedInvoiceSummary {
        GeneratedInvoiceSummary {
            client_id: Uuid::new_v4(),
            client_name: "A".to_string(),
            invoice_number: "INV-000001".to_string(),
            amount: Decimal::from(amount),
            line_item_count: 1,
        }
    }

    #[test]
    fn totals_follow_recorded_invoices() {
        let mut result = BulkGenerationResult::default();
        result.record_success(summary(30));
        result.record_success(summary(12));

        assert_eq!(result.success_count, 2);
        assert_eq!(result.total_amount, Decimal::from(42));
        assert_eq!(result.outcome(), "completed");
    }

    #[test]
    fn skipped_clients_do_not_count_as_errors() {
        let mut result = BulkGenerationResult::default();
        result.record_skipped(&ClientEligibility {
            client_id: Uuid::new_v4(),
            client_name: "B".to_string(),
            booking_count: 2,
            has_rate_basis: false,
        });

        assert_eq!(result.error_count, 0);
        assert_eq!(result.skipped_count, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].skipped);
    }

    #[test]
    fn empty_result_is_informational() {
        let result = BulkGenerationResult::no_eligible_clients();
        assert_eq!(result.outcome(), "empty");
        assert_eq!(result.message.as_deref(), Some(NO_ELIGIBLE_CLIENTS_MESSAGE));
        assert!(result.invoices.is_empty() && result.errors.is_empty());
    }
}
