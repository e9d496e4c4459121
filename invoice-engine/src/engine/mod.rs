//! Invoice generation and reconciliation engine.

pub mod eligibility;
pub mod orchestrator;
pub mod period;
pub mod reconciler;
pub mod writer;

pub use eligibility::{ClientBillables, EligibilityEvaluator};
pub use orchestrator::{BulkGenerator, NoProgress, ProgressSink};
pub use period::{resolve_period, resolve_period_now};
pub use reconciler::{
    line_source, reconcile, DropReason, DroppedSource, Reconciliation, ReconciliationTotals, SourceKind,
};
pub use writer::{price_booking, select_rate, BillableFacts, InvoiceWriter};
