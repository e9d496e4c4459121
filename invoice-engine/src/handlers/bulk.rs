use crate::dtos::{BulkGenerateResponse, BulkPreviewResponse, PeriodParams};
use crate::middleware::OrgContext;
use crate::models::{BillingContext, BulkGenerationProgress};
use crate::startup::AppState;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use service_core::error::AppError;
use std::sync::Mutex;
use uuid::Uuid;

pub async fn bulk_preview(
    State(state): State<AppState>,
    org: OrgContext,
    Path(branch_id): Path<Uuid>,
    Query(params): Query<PeriodParams>,
) -> Result<Json<BulkPreviewResponse>, AppError> {
    let period = params.resolve()?;
    let ctx = BillingContext::new(org.organization_id, branch_id);
    let preview = state.generator.preview(ctx, period).await?;
    Ok(Json(preview.into()))
}

/// Runs the whole batch within the request and returns the summary along
/// with every progress update that was emitted.
pub async fn bulk_generate(
    State(state): State<AppState>,
    org: OrgContext,
    Path(branch_id): Path<Uuid>,
    Json(params): Json<PeriodParams>,
) -> Result<Json<BulkGenerateResponse>, AppError> {
    let period = params.resolve()?;
    let ctx = BillingContext::new(org.organization_id, branch_id);

    let updates: Mutex<Vec<BulkGenerationProgress>> = Mutex::new(Vec::new());
    let sink = |progress: &BulkGenerationProgress| {
        tracing::info!(
            current = progress.current,
            total = progress.total,
            client = progress.current_client.as_deref().unwrap_or_default(),
            "Bulk generation progress"
        );
        if let Ok(mut updates) = updates.lock() {
            updates.push(progress.clone());
        }
    };

    let result = state
        .generator
        .generate_for_period(ctx, period.clone(), &sink)
        .await?;
    let progress = updates.into_inner().unwrap_or_else(|e| e.into_inner());

    Ok(Json(BulkGenerateResponse {
        period,
        result,
        progress,
    }))
}
