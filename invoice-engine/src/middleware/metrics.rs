use crate::services::record_http_request;
use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

/// Count and time every HTTP request by method and status.
pub async fn http_metrics_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();

    let response = next.run(req).await;

    record_http_request(
        &method,
        response.status().as_str(),
        start.elapsed().as_secs_f64(),
    );

    response
}
