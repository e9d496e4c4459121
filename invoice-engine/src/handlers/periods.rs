use crate::dtos::PeriodParams;
use crate::middleware::OrgContext;
use crate::models::Period;
use axum::{extract::Query, Json};
use service_core::error::AppError;

pub async fn resolve_period(
    _org: OrgContext,
    Query(params): Query<PeriodParams>,
) -> Result<Json<Period>, AppError> {
    Ok(Json(params.resolve()?))
}
