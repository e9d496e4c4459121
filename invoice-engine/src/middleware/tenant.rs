//! Organization context extracted from request headers.
//!
//! The `X-Org-ID` header is set by the upstream gateway after it has
//! authenticated the caller.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;
use uuid::Uuid;

pub const ORG_ID_HEADER: &str = "X-Org-ID";

/// Organization every `/api/v1` request acts on behalf of.
#[derive(Debug, Clone, Copy)]
pub struct OrgContext {
    pub organization_id: Uuid,
}

#[async_trait]
impl<S> FromRequestParts<S> for OrgContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(ORG_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::Unauthorized(anyhow::anyhow!("Missing {} header", ORG_ID_HEADER))
            })?;

        let organization_id = Uuid::parse_str(raw.trim()).map_err(|_| {
            AppError::BadRequest(anyhow::anyhow!("{} must be a UUID", ORG_ID_HEADER))
        })?;

        tracing::Span::current().record("org_id", raw);

        Ok(OrgContext { organization_id })
    }
}
