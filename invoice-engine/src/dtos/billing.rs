use crate::engine::{resolve_period_now, ClientBillables, Reconciliation};
use crate::error::EngineError;
use crate::models::{
    BulkGenerationProgress, BulkGenerationResult, BulkPreview, ClientEligibility, CustomRange,
    ManualExpenseEntry, Period, PeriodType, WrittenInvoice,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Period selection as sent in query strings and request bodies.
#[derive(Debug, Clone, Deserialize)]
pub struct PeriodParams {
    #[serde(rename = "type")]
    pub period_type: PeriodType,
    #[serde(default)]
    pub start: Option<NaiveDate>,
    #[serde(default)]
    pub end: Option<NaiveDate>,
}

impl PeriodParams {
    pub fn resolve(&self) -> Result<Period, EngineError> {
        let custom = match (self.start, self.end) {
            (Some(start), Some(end)) => Some(CustomRange { start, end }),
            _ => None,
        };
        resolve_period_now(self.period_type, custom)
    }
}

#[derive(Debug, Serialize)]
pub struct BulkPreviewResponse {
    pub period: Period,
    pub eligible_count: usize,
    pub skipped_count: usize,
    pub clients: Vec<ClientEligibility>,
}

impl From<BulkPreview> for BulkPreviewResponse {
    fn from(preview: BulkPreview) -> Self {
        Self {
            eligible_count: preview.eligible_count(),
            skipped_count: preview.skipped_count(),
            period: preview.period,
            clients: preview.clients,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BulkGenerateResponse {
    pub period: Period,
    #[serde(flatten)]
    pub result: BulkGenerationResult,
    pub progress: Vec<BulkGenerationProgress>,
}

#[derive(Debug, Serialize)]
pub struct ClientBillablesResponse {
    pub period: Period,
    #[serde(flatten)]
    pub billables: ClientBillables,
}

/// Manual entries plus selected source ids for one client.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileRequest {
    #[serde(flatten)]
    pub period: PeriodParams,
    #[serde(default)]
    pub manual_expenses: Vec<ManualExpenseEntry>,
    #[serde(default)]
    pub expense_claim_ids: Vec<Uuid>,
    #[serde(default)]
    pub extra_time_ids: Vec<Uuid>,
}

/// Selection appended to an existing invoice; its period is the invoice's.
#[derive(Debug, Clone, Deserialize)]
pub struct AppendExpensesRequest {
    #[serde(default)]
    pub manual_expenses: Vec<ManualExpenseEntry>,
    #[serde(default)]
    pub expense_claim_ids: Vec<Uuid>,
    #[serde(default)]
    pub extra_time_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct InvoiceWriteResponse {
    pub invoice: WrittenInvoice,
    pub reconciliation: Reconciliation,
}
