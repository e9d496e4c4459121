pub mod metrics;
pub mod tenant;

pub use metrics::http_metrics_middleware;
pub use tenant::{OrgContext, ORG_ID_HEADER};
