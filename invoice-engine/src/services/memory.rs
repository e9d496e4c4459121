//! In-memory billing store for local runs and tests.

use crate::models::{
    format_invoice_number, sum_amounts, Booking, Client, ExpenseClaim, ExtraTimeRecord,
    GenerationRun, Invoice, InvoiceStatus, LineItem, NewInvoice, NewLineItem, Period, RateBasis,
    RateMechanism,
};
use crate::services::store::BillingStore;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    clients: HashMap<Uuid, Client>,
    bookings: Vec<Booking>,
    rate_bases: Vec<RateBasis>,
    expense_claims: Vec<ExpenseClaim>,
    extra_time: Vec<ExtraTimeRecord>,
    invoices: Vec<Invoice>,
    line_items: Vec<LineItem>,
    sequences: HashMap<Uuid, i64>,
    generation_runs: Vec<GenerationRun>,
}

impl Tables {
    /// Fail unless every source referenced by `items` belongs to `client_id`,
    /// appears once in the batch and can still be consumed.
    fn ensure_sources_available(
        &self,
        client_id: Uuid,
        items: &[NewLineItem],
    ) -> Result<(), AppError> {
        let mut seen = HashSet::new();
        for item in items {
            for id in [item.source_expense_id, item.source_extra_time_id, item.booking_id]
                .into_iter()
                .flatten()
            {
                if !seen.insert(id) {
                    return Err(AppError::Conflict(anyhow::anyhow!(
                        "Source {} appears more than once",
                        id
                    )));
                }
            }

            if let Some(expense_id) = item.source_expense_id {
                let claim = self
                    .expense_claims
                    .iter()
                    .find(|c| c.expense_id == expense_id)
                    .ok_or_else(|| {
                        AppError::NotFound(anyhow::anyhow!("Expense claim {} not found", expense_id))
                    })?;
                if claim.client_id != client_id {
                    return Err(AppError::Conflict(anyhow::anyhow!(
                        "Expense claim {} belongs to another client",
                        expense_id
                    )));
                }
                if claim.is_invoiced {
                    return Err(AppError::Conflict(anyhow::anyhow!(
                        "Expense claim {} is already invoiced",
                        expense_id
                    )));
                }
            }
            if let Some(extra_time_id) = item.source_extra_time_id {
                let record = self
                    .extra_time
                    .iter()
                    .find(|r| r.extra_time_id == extra_time_id)
                    .ok_or_else(|| {
                        AppError::NotFound(anyhow::anyhow!("Extra time {} not found", extra_time_id))
                    })?;
                if record.client_id != client_id {
                    return Err(AppError::Conflict(anyhow::anyhow!(
                        "Extra time {} belongs to another client",
                        extra_time_id
                    )));
                }
                if record.invoiced {
                    return Err(AppError::Conflict(anyhow::anyhow!(
                        "Extra time {} is already invoiced",
                        extra_time_id
                    )));
                }
            }
            if let Some(booking_id) = item.booking_id {
                let owned = self
                    .bookings
                    .iter()
                    .any(|b| b.booking_id == booking_id && b.client_id == client_id);
                if !owned {
                    return Err(AppError::Conflict(anyhow::anyhow!(
                        "Booking {} does not belong to client {}",
                        booking_id,
                        client_id
                    )));
                }
                if self
                    .line_items
                    .iter()
                    .any(|li| li.booking_id == Some(booking_id))
                {
                    return Err(AppError::Conflict(anyhow::anyhow!(
                        "Booking {} is already invoiced",
                        booking_id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Invoice in `organization_id`, or NotFound.
    fn invoice(&self, organization_id: Uuid, invoice_id: Uuid) -> Result<&Invoice, AppError> {
        self.invoices
            .iter()
            .find(|i| i.invoice_id == invoice_id && i.organization_id == organization_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))
    }

    fn attach_line_items(&mut self, invoice_id: Uuid, items: &[NewLineItem]) {
        let now = Utc::now();
        let first_sort = self
            .line_items
            .iter()
            .filter(|li| li.invoice_id == invoice_id)
            .map(|li| li.sort_order + 1)
            .max()
            .unwrap_or(0);

        for (offset, item) in items.iter().enumerate() {
            self.line_items.push(LineItem {
                line_item_id: Uuid::new_v4(),
                invoice_id,
                kind: item.kind.as_str().to_string(),
                description: item.description.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
                amount: item.amount,
                booking_id: item.booking_id,
                source_expense_id: item.source_expense_id,
                source_extra_time_id: item.source_extra_time_id,
                staff_id: item.staff_id,
                admin_cost_percentage: item.admin_cost_percentage,
                sort_order: first_sort + offset as i32,
                created_utc: now,
            });

            if let Some(expense_id) = item.source_expense_id {
                if let Some(claim) = self
                    .expense_claims
                    .iter_mut()
                    .find(|c| c.expense_id == expense_id)
                {
                    claim.is_invoiced = true;
                    claim.invoice_id = Some(invoice_id);
                }
            }
            if let Some(extra_time_id) = item.source_extra_time_id {
                if let Some(record) = self
                    .extra_time
                    .iter_mut()
                    .find(|r| r.extra_time_id == extra_time_id)
                {
                    record.invoiced = true;
                    record.invoice_id = Some(invoice_id);
                }
            }
        }
    }

    fn invoice_total(&self, invoice_id: Uuid) -> Decimal {
        self.line_items
            .iter()
            .filter(|li| li.invoice_id == invoice_id)
            .map(|li| li.amount)
            .sum()
    }
}

/// Mutex-guarded tables implementing [`BillingStore`].
///
/// Every trait call takes the lock once, so multi-row writes are atomic.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, AppError> {
        self.tables
            .lock()
            .map_err(|_| AppError::InternalError(anyhow::anyhow!("In-memory store poisoned")))
    }

    pub fn insert_client(&self, client: Client) -> Result<(), AppError> {
        self.tables()?.clients.insert(client.client_id, client);
        Ok(())
    }

    pub fn insert_booking(&self, booking: Booking) -> Result<(), AppError> {
        self.tables()?.bookings.push(booking);
        Ok(())
    }

    pub fn insert_rate_basis(&self, basis: RateBasis) -> Result<(), AppError> {
        self.tables()?.rate_bases.push(basis);
        Ok(())
    }

    pub fn insert_expense_claim(&self, claim: ExpenseClaim) -> Result<(), AppError> {
        self.tables()?.expense_claims.push(claim);
        Ok(())
    }

    pub fn insert_extra_time(&self, record: ExtraTimeRecord) -> Result<(), AppError> {
        self.tables()?.extra_time.push(record);
        Ok(())
    }

    pub fn set_invoice_status(
        &self,
        invoice_id: Uuid,
        status: InvoiceStatus,
    ) -> Result<(), AppError> {
        let mut tables = self.tables()?;
        let invoice = tables
            .invoices
            .iter_mut()
            .find(|i| i.invoice_id == invoice_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;
        invoice.status = status.as_str().to_string();
        invoice.updated_utc = Utc::now();
        Ok(())
    }

    pub fn invoices(&self) -> Result<Vec<Invoice>, AppError> {
        Ok(self.tables()?.invoices.clone())
    }

    pub fn generation_runs(&self) -> Result<Vec<GenerationRun>, AppError> {
        Ok(self.tables()?.generation_runs.clone())
    }

    fn clients_with_active(
        &self,
        mechanism: RateMechanism,
        client_ids: &[Uuid],
    ) -> Result<HashSet<Uuid>, AppError> {
        let tables = self.tables()?;
        Ok(tables
            .rate_bases
            .iter()
            .filter(|b| b.is_active && b.mechanism() == mechanism)
            .filter(|b| client_ids.contains(&b.client_id))
            .map(|b| b.client_id)
            .collect())
    }
}

#[async_trait]
impl BillingStore for InMemoryStore {
    async fn health_check(&self) -> Result<(), AppError> {
        self.tables().map(|_| ())
    }

    async fn list_branch_bookings(
        &self,
        branch_id: Uuid,
        period: &Period,
    ) -> Result<Vec<Booking>, AppError> {
        let tables = self.tables()?;
        let mut bookings: Vec<Booking> = tables
            .bookings
            .iter()
            .filter(|b| b.branch_id == branch_id && period.contains_time(b.start_time))
            .cloned()
            .collect();
        bookings.sort_by_key(|b| b.start_time);
        Ok(bookings)
    }

    async fn list_client_bookings(
        &self,
        client_id: Uuid,
        branch_id: Uuid,
        period: &Period,
    ) -> Result<Vec<Booking>, AppError> {
        let tables = self.tables()?;
        let mut bookings: Vec<Booking> = tables
            .bookings
            .iter()
            .filter(|b| b.client_id == client_id && b.branch_id == branch_id)
            .filter(|b| period.contains_time(b.start_time))
            .cloned()
            .collect();
        bookings.sort_by_key(|b| b.start_time);
        Ok(bookings)
    }

    async fn get_client(&self, client_id: Uuid) -> Result<Option<Client>, AppError> {
        Ok(self.tables()?.clients.get(&client_id).cloned())
    }

    async fn get_clients(&self, client_ids: &[Uuid]) -> Result<Vec<Client>, AppError> {
        let tables = self.tables()?;
        Ok(client_ids
            .iter()
            .filter_map(|id| tables.clients.get(id).cloned())
            .collect())
    }

    async fn clients_with_active_schedule(
        &self,
        client_ids: &[Uuid],
    ) -> Result<HashSet<Uuid>, AppError> {
        self.clients_with_active(RateMechanism::Schedule, client_ids)
    }

    async fn clients_with_active_assignment(
        &self,
        client_ids: &[Uuid],
    ) -> Result<HashSet<Uuid>, AppError> {
        self.clients_with_active(RateMechanism::Assignment, client_ids)
    }

    async fn list_active_rate_bases(&self, client_id: Uuid) -> Result<Vec<RateBasis>, AppError> {
        let tables = self.tables()?;
        Ok(tables
            .rate_bases
            .iter()
            .filter(|b| b.client_id == client_id && b.is_active)
            .cloned()
            .collect())
    }

    async fn list_expense_claims(
        &self,
        client_id: Uuid,
        period: &Period,
    ) -> Result<Vec<ExpenseClaim>, AppError> {
        let tables = self.tables()?;
        let mut claims: Vec<ExpenseClaim> = tables
            .expense_claims
            .iter()
            .filter(|c| c.client_id == client_id && period.contains_date(c.expense_date))
            .cloned()
            .collect();
        claims.sort_by_key(|c| c.expense_date);
        Ok(claims)
    }

    async fn list_extra_time(
        &self,
        client_id: Uuid,
        period: &Period,
    ) -> Result<Vec<ExtraTimeRecord>, AppError> {
        let tables = self.tables()?;
        let mut records: Vec<ExtraTimeRecord> = tables
            .extra_time
            .iter()
            .filter(|r| r.client_id == client_id && period.contains_date(r.work_date))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.work_date);
        Ok(records)
    }

    async fn get_expense_claims(
        &self,
        expense_ids: &[Uuid],
    ) -> Result<Vec<ExpenseClaim>, AppError> {
        let tables = self.tables()?;
        Ok(tables
            .expense_claims
            .iter()
            .filter(|c| expense_ids.contains(&c.expense_id))
            .cloned()
            .collect())
    }

    async fn get_extra_time(
        &self,
        extra_time_ids: &[Uuid],
    ) -> Result<Vec<ExtraTimeRecord>, AppError> {
        let tables = self.tables()?;
        Ok(tables
            .extra_time
            .iter()
            .filter(|r| extra_time_ids.contains(&r.extra_time_id))
            .cloned()
            .collect())
    }

    async fn get_bookings(&self, booking_ids: &[Uuid]) -> Result<Vec<Booking>, AppError> {
        let tables = self.tables()?;
        Ok(tables
            .bookings
            .iter()
            .filter(|b| booking_ids.contains(&b.booking_id))
            .cloned()
            .collect())
    }

    async fn invoiced_booking_ids(&self, booking_ids: &[Uuid]) -> Result<HashSet<Uuid>, AppError> {
        let tables = self.tables()?;
        Ok(tables
            .line_items
            .iter()
            .filter_map(|li| li.booking_id)
            .filter(|id| booking_ids.contains(id))
            .collect())
    }

    async fn find_period_invoice(
        &self,
        client_id: Uuid,
        period: &Period,
    ) -> Result<Option<Invoice>, AppError> {
        let tables = self.tables()?;
        Ok(tables
            .invoices
            .iter()
            .find(|i| {
                i.client_id == client_id
                    && i.generated_from_booking
                    && i.start_date == period.start_date
                    && i.end_date == period.end_date
                    && i.status() != Some(InvoiceStatus::Cancelled)
            })
            .cloned())
    }

    async fn create_invoice(&self, input: &NewInvoice) -> Result<Invoice, AppError> {
        let mut tables = self.tables()?;
        tables.ensure_sources_available(input.client_id, &input.line_items)?;

        let sequence = {
            let value = tables.sequences.entry(input.organization_id).or_insert(0);
            *value += 1;
            *value
        };

        let now = Utc::now();
        let invoice = Invoice {
            invoice_id: Uuid::new_v4(),
            organization_id: input.organization_id,
            client_id: input.client_id,
            branch_id: input.branch_id,
            invoice_number: format_invoice_number(sequence),
            status: InvoiceStatus::Draft.as_str().to_string(),
            total_amount: sum_amounts(&input.line_items),
            start_date: input.start_date,
            end_date: input.end_date,
            generated_from_booking: input.generated_from_booking,
            created_utc: now,
            updated_utc: now,
        };

        tables.attach_line_items(invoice.invoice_id, &input.line_items);
        tables.invoices.push(invoice.clone());
        Ok(invoice)
    }

    async fn append_line_items(
        &self,
        organization_id: Uuid,
        invoice_id: Uuid,
        items: &[NewLineItem],
    ) -> Result<Invoice, AppError> {
        let mut tables = self.tables()?;
        let invoice = tables.invoice(organization_id, invoice_id)?;
        if !invoice.is_editable() {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Invoice {} is {} and cannot be changed",
                invoice_id,
                invoice.status
            )));
        }
        let client_id = invoice.client_id;
        tables.ensure_sources_available(client_id, items)?;
        tables.attach_line_items(invoice_id, items);

        let total = tables.invoice_total(invoice_id);
        let invoice = tables
            .invoices
            .iter_mut()
            .find(|i| i.invoice_id == invoice_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;
        invoice.total_amount = total;
        invoice.updated_utc = Utc::now();
        Ok(invoice.clone())
    }

    async fn get_invoice(
        &self,
        organization_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError> {
        let tables = self.tables()?;
        Ok(tables
            .invoices
            .iter()
            .find(|i| i.invoice_id == invoice_id && i.organization_id == organization_id)
            .cloned())
    }

    async fn get_line_items(&self, invoice_id: Uuid) -> Result<Vec<LineItem>, AppError> {
        let tables = self.tables()?;
        let mut items: Vec<LineItem> = tables
            .line_items
            .iter()
            .filter(|li| li.invoice_id == invoice_id)
            .cloned()
            .collect();
        items.sort_by_key(|li| li.sort_order);
        Ok(items)
    }

    async fn delete_invoice(
        &self,
        organization_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<bool, AppError> {
        let mut tables = self.tables()?;
        match tables.invoice(organization_id, invoice_id) {
            Ok(invoice) if !invoice.is_deletable() => {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Invoice {} is {} and cannot be deleted",
                    invoice_id,
                    invoice.status
                )))
            }
            Ok(_) => {}
            Err(AppError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        }
        tables.invoices.retain(|i| i.invoice_id != invoice_id);

        tables.line_items.retain(|li| li.invoice_id != invoice_id);
        for claim in tables
            .expense_claims
            .iter_mut()
            .filter(|c| c.invoice_id == Some(invoice_id))
        {
            claim.is_invoiced = false;
            claim.invoice_id = None;
        }
        for record in tables
            .extra_time
            .iter_mut()
            .filter(|r| r.invoice_id == Some(invoice_id))
        {
            record.invoiced = false;
            record.invoice_id = None;
        }
        Ok(true)
    }

    async fn record_generation_run(&self, run: &GenerationRun) -> Result<(), AppError> {
        self.tables()?.generation_runs.push(run.clone());
        Ok(())
    }
}
