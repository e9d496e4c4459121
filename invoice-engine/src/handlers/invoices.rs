use crate::dtos::{AppendExpensesRequest, InvoiceWriteResponse};
use crate::engine::{reconcile, resolve_period};
use crate::middleware::OrgContext;
use crate::models::{CustomRange, InvoiceDetail, PeriodType};
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use service_core::error::AppError;
use uuid::Uuid;

pub async fn get_invoice(
    State(state): State<AppState>,
    org: OrgContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<InvoiceDetail>, AppError> {
    let detail = state
        .writer
        .detail(org.organization_id, invoice_id)
        .await?;
    Ok(Json(detail))
}

/// Reconcile a selection against the invoice's own period and append it.
pub async fn append_expenses(
    State(state): State<AppState>,
    org: OrgContext,
    Path(invoice_id): Path<Uuid>,
    Json(request): Json<AppendExpensesRequest>,
) -> Result<Json<InvoiceWriteResponse>, AppError> {
    let detail = state
        .writer
        .detail(org.organization_id, invoice_id)
        .await?;
    let period = resolve_period(
        PeriodType::Custom,
        Some(CustomRange {
            start: detail.invoice.start_date,
            end: detail.invoice.end_date,
        }),
        Utc::now().date_naive(),
    )?;

    let catalog = state
        .evaluator
        .evaluate_client(detail.invoice.client_id, &period)
        .await?;
    let reconciliation = reconcile(
        &request.manual_expenses,
        &request.expense_claim_ids,
        &request.extra_time_ids,
        &catalog,
    )?;
    let (invoice, reconciliation) = state
        .writer
        .append_reconciliation(org.organization_id, invoice_id, reconciliation)
        .await?;

    Ok(Json(InvoiceWriteResponse {
        invoice,
        reconciliation,
    }))
}

pub async fn delete_invoice(
    State(state): State<AppState>,
    org: OrgContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state
        .writer
        .delete(org.organization_id, invoice_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
