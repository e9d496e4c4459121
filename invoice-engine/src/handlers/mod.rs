pub mod bulk;
pub mod clients;
pub mod health;
pub mod invoices;
pub mod periods;

pub use bulk::{bulk_generate, bulk_preview};
pub use clients::{client_billables, create_client_invoice, reconcile_preview};
pub use health::{health_check, metrics_handler, readiness_check};
pub use invoices::{append_expenses, delete_invoice, get_invoice};
pub use periods::resolve_period;
