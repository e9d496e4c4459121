//! Relational store interface consumed by the engine.

use crate::models::{
    Booking, Client, ExpenseClaim, ExtraTimeRecord, GenerationRun, Invoice, LineItem, NewInvoice,
    NewLineItem, Period, RateBasis,
};
use async_trait::async_trait;
use service_core::error::AppError;
use std::collections::HashSet;
use uuid::Uuid;

/// Query/insert/update operations over the billing tables.
///
/// Writes that consume sources (`create_invoice`, `append_line_items`) and
/// `delete_invoice` are atomic: line items and the `is_invoiced`/`invoiced`
/// flags they reference change together or not at all. A source that is
/// already flagged when the write commits, belongs to another client or
/// appears twice in one batch fails the whole call with
/// [`AppError::Conflict`]. Appends and deletes re-check the invoice status
/// under the same lock and fail with `Conflict` when it no longer allows
/// the change.
#[async_trait]
pub trait BillingStore: Send + Sync {
    async fn health_check(&self) -> Result<(), AppError>;

    /// Bookings of any status whose start time falls inside the period.
    async fn list_branch_bookings(
        &self,
        branch_id: Uuid,
        period: &Period,
    ) -> Result<Vec<Booking>, AppError>;

    async fn list_client_bookings(
        &self,
        client_id: Uuid,
        branch_id: Uuid,
        period: &Period,
    ) -> Result<Vec<Booking>, AppError>;

    async fn get_client(&self, client_id: Uuid) -> Result<Option<Client>, AppError>;

    async fn get_clients(&self, client_ids: &[Uuid]) -> Result<Vec<Client>, AppError>;

    /// Clients among `client_ids` with an active ad-hoc rate schedule.
    async fn clients_with_active_schedule(
        &self,
        client_ids: &[Uuid],
    ) -> Result<HashSet<Uuid>, AppError>;

    /// Clients among `client_ids` with an active assigned service rate.
    async fn clients_with_active_assignment(
        &self,
        client_ids: &[Uuid],
    ) -> Result<HashSet<Uuid>, AppError>;

    /// Active rate bases from both mechanisms.
    async fn list_active_rate_bases(&self, client_id: Uuid) -> Result<Vec<RateBasis>, AppError>;

    /// Approved expense claims dated inside the period, invoiced or not.
    async fn list_expense_claims(
        &self,
        client_id: Uuid,
        period: &Period,
    ) -> Result<Vec<ExpenseClaim>, AppError>;

    /// Approved extra time worked inside the period, invoiced or not.
    async fn list_extra_time(
        &self,
        client_id: Uuid,
        period: &Period,
    ) -> Result<Vec<ExtraTimeRecord>, AppError>;

    async fn get_expense_claims(&self, expense_ids: &[Uuid])
        -> Result<Vec<ExpenseClaim>, AppError>;

    async fn get_extra_time(
        &self,
        extra_time_ids: &[Uuid],
    ) -> Result<Vec<ExtraTimeRecord>, AppError>;

    async fn get_bookings(&self, booking_ids: &[Uuid]) -> Result<Vec<Booking>, AppError>;

    /// Bookings among `booking_ids` already referenced by a line item.
    async fn invoiced_booking_ids(&self, booking_ids: &[Uuid]) -> Result<HashSet<Uuid>, AppError>;

    /// Non-cancelled booking-generated invoice covering exactly this period.
    async fn find_period_invoice(
        &self,
        client_id: Uuid,
        period: &Period,
    ) -> Result<Option<Invoice>, AppError>;

    async fn create_invoice(&self, input: &NewInvoice) -> Result<Invoice, AppError>;

    async fn append_line_items(
        &self,
        organization_id: Uuid,
        invoice_id: Uuid,
        items: &[NewLineItem],
    ) -> Result<Invoice, AppError>;

    async fn get_invoice(
        &self,
        organization_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError>;

    async fn get_line_items(&self, invoice_id: Uuid) -> Result<Vec<LineItem>, AppError>;

    /// Delete an invoice and release every source it consumed.
    async fn delete_invoice(&self, organization_id: Uuid, invoice_id: Uuid)
        -> Result<bool, AppError>;

    async fn record_generation_run(&self, run: &GenerationRun) -> Result<(), AppError>;
}
