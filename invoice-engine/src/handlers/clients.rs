use crate::dtos::{ClientBillablesResponse, InvoiceWriteResponse, PeriodParams, ReconcileRequest};
use crate::engine::{reconcile, Reconciliation};
use crate::middleware::OrgContext;
use crate::models::BillingContext;
use crate::startup::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

pub async fn client_billables(
    State(state): State<AppState>,
    _org: OrgContext,
    Path(client_id): Path<Uuid>,
    Query(params): Query<PeriodParams>,
) -> Result<Json<ClientBillablesResponse>, AppError> {
    let period = params.resolve()?;
    state.evaluator.client(client_id).await?;
    let billables = state.evaluator.evaluate_client(client_id, &period).await?;
    Ok(Json(ClientBillablesResponse { period, billables }))
}

/// Totals and drop list for a selection, without writing anything.
pub async fn reconcile_preview(
    State(state): State<AppState>,
    _org: OrgContext,
    Path(client_id): Path<Uuid>,
    Json(request): Json<ReconcileRequest>,
) -> Result<Json<Reconciliation>, AppError> {
    let period = request.period.resolve()?;
    state.evaluator.client(client_id).await?;
    let catalog = state.evaluator.evaluate_client(client_id, &period).await?;
    let reconciliation = reconcile(
        &request.manual_expenses,
        &request.expense_claim_ids,
        &request.extra_time_ids,
        &catalog,
    )?;
    Ok(Json(reconciliation))
}

pub async fn create_client_invoice(
    State(state): State<AppState>,
    org: OrgContext,
    Path(client_id): Path<Uuid>,
    Json(request): Json<ReconcileRequest>,
) -> Result<(StatusCode, Json<InvoiceWriteResponse>), AppError> {
    let period = request.period.resolve()?;
    let client = state.evaluator.client(client_id).await?;
    let ctx = BillingContext::new(org.organization_id, client.branch_id);

    let catalog = state.evaluator.evaluate_client(client_id, &period).await?;
    let reconciliation = reconcile(
        &request.manual_expenses,
        &request.expense_claim_ids,
        &request.extra_time_ids,
        &catalog,
    )?;
    let (invoice, reconciliation) = state
        .writer
        .write_reconciliation(&ctx, client_id, &period, reconciliation)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(InvoiceWriteResponse {
            invoice,
            reconciliation,
        }),
    ))
}
