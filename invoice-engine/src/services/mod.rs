//! Services module for invoice-engine.

pub mod database;
pub mod memory;
pub mod metrics;
pub mod store;

pub use database::Database;
pub use memory::InMemoryStore;
pub use metrics::{
    get_metrics, init_metrics, record_bulk_client_outcome, record_bulk_run, record_error,
    record_http_request, record_invoice_written, record_sources_dropped,
};
pub use store::BillingStore;
