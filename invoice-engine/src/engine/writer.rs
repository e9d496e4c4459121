//! Single invoice writer.

use crate::engine::reconciler::{
    line_source, DropReason, DroppedSource, Reconciliation, SourceKind,
};
use crate::error::EngineError;
use crate::models::{
    BillingContext, Booking, ExpenseClaim, ExtraTimeRecord, InvoiceDetail, LineItemKind,
    NewInvoice, NewLineItem, Period, RateBasis, WrittenInvoice,
};
use crate::services::{record_invoice_written, record_sources_dropped, BillingStore};
use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Line items ready to be written for one client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BillableFacts {
    pub line_items: Vec<NewLineItem>,
    /// Priced from bookings by the bulk path.
    pub generated_from_booking: bool,
}

impl BillableFacts {
    pub fn from_bookings(line_items: Vec<NewLineItem>) -> Self {
        Self {
            line_items,
            generated_from_booking: true,
        }
    }

    pub fn manual(line_items: Vec<NewLineItem>) -> Self {
        Self {
            line_items,
            generated_from_booking: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.line_items.is_empty()
    }

    fn path(&self) -> &'static str {
        if self.generated_from_booking {
            "bulk"
        } else {
            "manual"
        }
    }
}

/// Pick the rate for a booking on `on`.
///
/// Among bases effective on that date the latest `effective_from` wins;
/// with none effective, the most recent active basis is used.
pub fn select_rate(bases: &[RateBasis], on: NaiveDate) -> Option<&RateBasis> {
    let newest = |a: &&RateBasis, b: &&RateBasis| {
        a.effective_from
            .cmp(&b.effective_from)
            .then(a.created_utc.cmp(&b.created_utc))
    };

    bases
        .iter()
        .filter(|b| b.is_effective_on(on))
        .max_by(newest)
        .or_else(|| bases.iter().filter(|b| b.is_active).max_by(newest))
}

/// One service line per booking: hours to 2 dp at the hourly rate.
pub fn price_booking(booking: &Booking, rate: &RateBasis) -> NewLineItem {
    let quantity = booking.duration_hours();
    let amount = (quantity * rate.hourly_rate).round_dp(2);
    let service = booking
        .service_name
        .clone()
        .unwrap_or_else(|| rate.description.clone());

    NewLineItem {
        kind: LineItemKind::Service,
        description: format!(
            "{} on {} ({:.2} hrs)",
            service,
            booking.start_time.date_naive(),
            quantity
        ),
        quantity,
        unit_price: rate.hourly_rate,
        amount,
        booking_id: Some(booking.booking_id),
        source_expense_id: None,
        source_extra_time_id: None,
        staff_id: booking.staff_id,
        admin_cost_percentage: None,
    }
}

/// Writes one invoice (header, line items, source flags) per call.
#[derive(Clone)]
pub struct InvoiceWriter {
    store: Arc<dyn BillingStore>,
}

impl InvoiceWriter {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    /// Price the client's uninvoiced, non-cancelled bookings in the period.
    #[instrument(skip(self, ctx, period), fields(client_id = %client_id))]
    pub async fn booking_facts(
        &self,
        ctx: &BillingContext,
        client_id: Uuid,
        period: &Period,
    ) -> Result<BillableFacts, EngineError> {
        if let Some(existing) = self.store.find_period_invoice(client_id, period).await? {
            return Err(EngineError::DuplicateInvoice {
                client_id,
                invoice_number: existing.invoice_number,
            });
        }

        let bookings: Vec<Booking> = self
            .store
            .list_client_bookings(client_id, ctx.branch_id, period)
            .await?
            .into_iter()
            .filter(|b| b.status().is_billable())
            .collect();
        let ids: Vec<Uuid> = bookings.iter().map(|b| b.booking_id).collect();
        let invoiced = if ids.is_empty() {
            HashSet::new()
        } else {
            self.store.invoiced_booking_ids(&ids).await?
        };
        let bookings: Vec<Booking> = bookings
            .into_iter()
            .filter(|b| !invoiced.contains(&b.booking_id))
            .collect();
        if bookings.is_empty() {
            return Err(EngineError::NoBillableFacts { client_id });
        }

        let bases = self.store.list_active_rate_bases(client_id).await?;
        let mut line_items = Vec::with_capacity(bookings.len());
        for booking in &bookings {
            let rate = select_rate(&bases, booking.start_time.date_naive())
                .ok_or(EngineError::NoRateBasis(client_id))?;
            line_items.push(price_booking(booking, rate));
        }

        Ok(BillableFacts::from_bookings(line_items))
    }

    /// Create a new invoice for the client from `facts`.
    ///
    /// Repeated sources are billed once. Sources owned by another client,
    /// missing, or already consumed by another invoice are dropped before
    /// the write; if nothing is left the call fails with `NoBillableFacts`.
    /// The store write itself is atomic and rejects sources that were
    /// consumed in the meantime.
    pub async fn write(
        &self,
        ctx: &BillingContext,
        client_id: Uuid,
        period: &Period,
        facts: BillableFacts,
    ) -> Result<WrittenInvoice, EngineError> {
        let (written, _) = self.write_screened(ctx, client_id, period, facts).await?;
        Ok(written)
    }

    /// Write a reconciled body and return it narrowed to what was billed.
    pub async fn write_reconciliation(
        &self,
        ctx: &BillingContext,
        client_id: Uuid,
        period: &Period,
        reconciliation: Reconciliation,
    ) -> Result<(WrittenInvoice, Reconciliation), EngineError> {
        let (written, dropped) = self
            .write_screened(ctx, client_id, period, reconciliation.clone().into_facts())
            .await?;
        Ok((written, reconciliation.without(&dropped)))
    }

    #[instrument(skip(self, ctx, period, facts), fields(organization_id = %ctx.organization_id, client_id = %client_id))]
    async fn write_screened(
        &self,
        ctx: &BillingContext,
        client_id: Uuid,
        period: &Period,
        facts: BillableFacts,
    ) -> Result<(WrittenInvoice, Vec<DroppedSource>), EngineError> {
        let path = facts.path();
        let (facts, dropped) = self.screen_sources(client_id, facts).await?;
        if facts.is_empty() {
            return Err(EngineError::NoBillableFacts { client_id });
        }

        let input = NewInvoice {
            organization_id: ctx.organization_id,
            client_id,
            branch_id: ctx.branch_id,
            start_date: period.start_date,
            end_date: period.end_date,
            generated_from_booking: facts.generated_from_booking,
            line_items: facts.line_items,
        };
        let invoice = self.store.create_invoice(&input).await?;

        record_invoice_written(
            &ctx.organization_id.to_string(),
            path,
            invoice.total_amount.to_f64().unwrap_or(0.0),
        );
        info!(
            invoice_number = %invoice.invoice_number,
            amount = %invoice.total_amount,
            line_items = input.line_items.len(),
            "Invoice written"
        );

        let written = WrittenInvoice {
            invoice_id: invoice.invoice_id,
            client_id,
            invoice_number: invoice.invoice_number,
            amount: invoice.total_amount,
            line_item_count: input.line_items.len(),
        };
        Ok((written, dropped))
    }

    /// Add line items to an existing draft or pending invoice.
    ///
    /// Sources are screened against the invoice's own client.
    pub async fn append(
        &self,
        organization_id: Uuid,
        invoice_id: Uuid,
        facts: BillableFacts,
    ) -> Result<WrittenInvoice, EngineError> {
        let (written, _) = self
            .append_screened(organization_id, invoice_id, facts)
            .await?;
        Ok(written)
    }

    /// Append a reconciled body and return it narrowed to what was billed.
    pub async fn append_reconciliation(
        &self,
        organization_id: Uuid,
        invoice_id: Uuid,
        reconciliation: Reconciliation,
    ) -> Result<(WrittenInvoice, Reconciliation), EngineError> {
        let (written, dropped) = self
            .append_screened(organization_id, invoice_id, reconciliation.clone().into_facts())
            .await?;
        Ok((written, reconciliation.without(&dropped)))
    }

    #[instrument(skip(self, facts), fields(organization_id = %organization_id, invoice_id = %invoice_id))]
    async fn append_screened(
        &self,
        organization_id: Uuid,
        invoice_id: Uuid,
        facts: BillableFacts,
    ) -> Result<(WrittenInvoice, Vec<DroppedSource>), EngineError> {
        let invoice = self
            .store
            .get_invoice(organization_id, invoice_id)
            .await?
            .ok_or(EngineError::InvoiceNotFound(invoice_id))?;
        if !invoice.is_editable() {
            return Err(EngineError::InvoiceNotEditable {
                invoice_id,
                status: invoice.status,
            });
        }

        let (facts, dropped) = self.screen_sources(invoice.client_id, facts).await?;
        if facts.is_empty() {
            return Err(EngineError::NoBillableFacts {
                client_id: invoice.client_id,
            });
        }

        let updated = self
            .store
            .append_line_items(organization_id, invoice_id, &facts.line_items)
            .await?;
        let line_item_count = self.store.get_line_items(invoice_id).await?.len();

        record_invoice_written(
            &organization_id.to_string(),
            "append",
            sum_f64(&facts.line_items),
        );
        info!(
            invoice_number = %updated.invoice_number,
            added = facts.line_items.len(),
            total_amount = %updated.total_amount,
            "Line items appended"
        );

        let written = WrittenInvoice {
            invoice_id,
            client_id: updated.client_id,
            invoice_number: updated.invoice_number,
            amount: updated.total_amount,
            line_item_count,
        };
        Ok((written, dropped))
    }

    /// Delete a draft, pending or cancelled invoice and release its sources.
    #[instrument(skip(self), fields(organization_id = %organization_id, invoice_id = %invoice_id))]
    pub async fn delete(&self, organization_id: Uuid, invoice_id: Uuid) -> Result<(), EngineError> {
        let invoice = self
            .store
            .get_invoice(organization_id, invoice_id)
            .await?
            .ok_or(EngineError::InvoiceNotFound(invoice_id))?;
        if !invoice.is_deletable() {
            return Err(EngineError::InvoiceNotDeletable {
                invoice_id,
                status: invoice.status,
            });
        }

        if !self
            .store
            .delete_invoice(organization_id, invoice_id)
            .await?
        {
            return Err(EngineError::InvoiceNotFound(invoice_id));
        }

        info!(invoice_number = %invoice.invoice_number, "Invoice deleted");
        Ok(())
    }

    pub async fn detail(
        &self,
        organization_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<InvoiceDetail, EngineError> {
        let invoice = self
            .store
            .get_invoice(organization_id, invoice_id)
            .await?
            .ok_or(EngineError::InvoiceNotFound(invoice_id))?;
        let line_items = self.store.get_line_items(invoice_id).await?;
        Ok(InvoiceDetail {
            invoice,
            line_items,
        })
    }

    /// Re-read every source behind `facts` and keep only what `client_id`
    /// may still be billed for.
    ///
    /// A repeated source keeps its first line. Missing or foreign sources
    /// drop as `NotInCatalog`, consumed ones as `AlreadyInvoiced`.
    async fn screen_sources(
        &self,
        client_id: Uuid,
        facts: BillableFacts,
    ) -> Result<(BillableFacts, Vec<DroppedSource>), EngineError> {
        let BillableFacts {
            line_items,
            generated_from_booking,
        } = facts;

        let mut seen = HashSet::new();
        let mut repeated = 0;
        let line_items: Vec<NewLineItem> = line_items
            .into_iter()
            .filter(|item| match line_source(item) {
                Some(source) if !seen.insert(source) => {
                    repeated += 1;
                    false
                }
                _ => true,
            })
            .collect();
        if repeated > 0 {
            warn!(%client_id, repeated, "Ignoring repeated source lines");
        }

        let ids_of = |wanted: SourceKind| -> Vec<Uuid> {
            seen.iter()
                .filter(|(kind, _)| *kind == wanted)
                .map(|&(_, id)| id)
                .collect()
        };
        let expense_ids = ids_of(SourceKind::ExpenseClaim);
        let extra_time_ids = ids_of(SourceKind::ExtraTime);
        let booking_ids = ids_of(SourceKind::Booking);

        let claims: HashMap<Uuid, ExpenseClaim> = if expense_ids.is_empty() {
            HashMap::new()
        } else {
            self.store
                .get_expense_claims(&expense_ids)
                .await?
                .into_iter()
                .map(|c| (c.expense_id, c))
                .collect()
        };
        let extra_time: HashMap<Uuid, ExtraTimeRecord> = if extra_time_ids.is_empty() {
            HashMap::new()
        } else {
            self.store
                .get_extra_time(&extra_time_ids)
                .await?
                .into_iter()
                .map(|r| (r.extra_time_id, r))
                .collect()
        };
        let (bookings, invoiced_bookings): (HashMap<Uuid, Booking>, HashSet<Uuid>) =
            if booking_ids.is_empty() {
                (HashMap::new(), HashSet::new())
            } else {
                let bookings = self
                    .store
                    .get_bookings(&booking_ids)
                    .await?
                    .into_iter()
                    .map(|b| (b.booking_id, b))
                    .collect();
                (bookings, self.store.invoiced_booking_ids(&booking_ids).await?)
            };

        let verdict = |kind: SourceKind, id: Uuid| -> Option<DropReason> {
            let owned_and_consumed = match kind {
                SourceKind::ExpenseClaim => claims
                    .get(&id)
                    .filter(|c| c.client_id == client_id)
                    .map(|c| c.is_invoiced),
                SourceKind::ExtraTime => extra_time
                    .get(&id)
                    .filter(|r| r.client_id == client_id)
                    .map(|r| r.invoiced),
                SourceKind::Booking => bookings
                    .get(&id)
                    .filter(|b| b.client_id == client_id)
                    .map(|_| invoiced_bookings.contains(&id)),
            };
            match owned_and_consumed {
                None => Some(DropReason::NotInCatalog),
                Some(true) => Some(DropReason::AlreadyInvoiced),
                Some(false) => None,
            }
        };

        let mut dropped = Vec::new();
        let line_items: Vec<NewLineItem> = line_items
            .into_iter()
            .filter(|item| {
                let Some((kind, id)) = line_source(item) else {
                    return true;
                };
                match verdict(kind, id) {
                    Some(reason) => {
                        record_sources_dropped(kind.as_str(), reason.as_str(), 1);
                        dropped.push(DroppedSource { kind, id, reason });
                        false
                    }
                    None => true,
                }
            })
            .collect();

        if !dropped.is_empty() {
            warn!(
                %client_id,
                dropped = dropped.len(),
                "Dropping sources that are foreign or consumed since selection"
            );
        }

        Ok((
            BillableFacts {
                line_items,
                generated_from_booking,
            },
            dropped,
        ))
    }
}

fn sum_f64(items: &[NewLineItem]) -> f64 {
    items
        .iter()
        .map(|i| i.amount)
        .sum::<Decimal>()
        .to_f64()
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn basis(rate: i64, from: (i32, u32, u32), to: Option<(i32, u32, u32)>) -> RateBasis {
        let d = |(y, m, d): (i32, u32, u32)| NaiveDate::from_ymd_opt(y, m, d).unwrap();
        RateBasis {
            rate_basis_id: Uuid::new_v4(),
            client_id: Uuid::nil(),
            mechanism: "schedule".to_string(),
            description: "Personal care".to_string(),
            hourly_rate: Decimal::from(rate),
            is_active: true,
            effective_from: d(from),
            effective_to: to.map(d),
            created_utc: Utc::now(),
        }
    }

    #[test]
    fn latest_effective_rate_wins() {
        let bases = vec![
            basis(20, (2025, 1, 1), None),
            basis(25, (2026, 1, 1), None),
            basis(30, (2026, 6, 1), None),
        ];
        let on = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        assert_eq!(select_rate(&bases, on).unwrap().hourly_rate, Decimal::from(25));
    }

    #[test]
    fn falls_back_to_most_recent_when_none_effective() {
        let bases = vec![
            basis(20, (2025, 1, 1), Some((2025, 6, 30))),
            basis(30, (2027, 1, 1), None),
        ];
        let on = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        assert_eq!(select_rate(&bases, on).unwrap().hourly_rate, Decimal::from(30));
        assert!(select_rate(&[], on).is_none());
    }

    #[test]
    fn booking_priced_by_duration() {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let booking = Booking {
            booking_id: Uuid::new_v4(),
            client_id: Uuid::nil(),
            branch_id: Uuid::nil(),
            staff_id: None,
            service_name: Some("Home visit".to_string()),
            start_time: start,
            end_time: start + chrono::Duration::minutes(90),
            status: "completed".to_string(),
        };

        let item = price_booking(&booking, &basis(22, (2025, 1, 1), None));

        assert_eq!(item.kind, LineItemKind::Service);
        assert_eq!(item.quantity, Decimal::new(15, 1));
        assert_eq!(item.amount, Decimal::from(33));
        assert_eq!(item.booking_id, Some(booking.booking_id));
        assert_eq!(item.description, "Home visit on 2026-03-02 (1.50 hrs)");
    }
}
