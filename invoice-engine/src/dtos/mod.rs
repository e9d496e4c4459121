pub mod billing;

pub use billing::{
    AppendExpensesRequest, BulkGenerateResponse, BulkPreviewResponse, ClientBillablesResponse,
    InvoiceWriteResponse, PeriodParams, ReconcileRequest,
};
