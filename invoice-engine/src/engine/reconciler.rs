//! Merges manual expenses, expense claims and extra time into one invoice body.

use crate::engine::eligibility::ClientBillables;
use crate::engine::writer::BillableFacts;
use crate::error::EngineError;
use crate::models::{LineItemKind, ManualExpenseEntry, NewLineItem};
use crate::services::record_sources_dropped;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::warn;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    ExpenseClaim,
    ExtraTime,
    Booking,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::ExpenseClaim => "expense_claim",
            SourceKind::ExtraTime => "extra_time",
            SourceKind::Booking => "booking",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    AlreadyInvoiced,
    NotInCatalog,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::AlreadyInvoiced => "already_invoiced",
            DropReason::NotInCatalog => "not_in_catalog",
        }
    }
}

/// A selected id left out of the invoice body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedSource {
    pub kind: SourceKind,
    pub id: Uuid,
    pub reason: DropReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationTotals {
    pub manual: Decimal,
    pub claims: Decimal,
    pub extra_time: Decimal,
    pub grand: Decimal,
}

/// Candidate invoice body. Nothing is persisted until it is handed to the
/// invoice writer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub line_items: Vec<NewLineItem>,
    pub totals: ReconciliationTotals,
    pub source_expense_ids: Vec<Uuid>,
    pub source_extra_time_ids: Vec<Uuid>,
    pub dropped: Vec<DroppedSource>,
}

/// Billable source a line item consumes, if any.
pub fn line_source(item: &NewLineItem) -> Option<(SourceKind, Uuid)> {
    item.source_expense_id
        .map(|id| (SourceKind::ExpenseClaim, id))
        .or(item.source_extra_time_id.map(|id| (SourceKind::ExtraTime, id)))
        .or(item.booking_id.map(|id| (SourceKind::Booking, id)))
}

impl ReconciliationTotals {
    pub fn from_items(items: &[NewLineItem]) -> Self {
        let mut totals = Self::default();
        for item in items {
            match item.kind {
                LineItemKind::ManualExpense => totals.manual += item.amount,
                LineItemKind::ExpenseClaim => totals.claims += item.amount,
                LineItemKind::ExtraTime => totals.extra_time += item.amount,
                LineItemKind::Service => {}
            }
            totals.grand += item.amount;
        }
        totals
    }
}

impl Reconciliation {
    pub fn into_facts(self) -> BillableFacts {
        BillableFacts::manual(self.line_items)
    }

    /// The same body minus sources the writer dropped at write time.
    pub fn without(mut self, dropped: &[DroppedSource]) -> Self {
        if dropped.is_empty() {
            return self;
        }
        let is_dropped =
            |kind: SourceKind, id: Uuid| dropped.iter().any(|d| d.kind == kind && d.id == id);

        self.line_items.retain(|item| {
            line_source(item).map_or(true, |(kind, id)| !is_dropped(kind, id))
        });
        self.source_expense_ids
            .retain(|&id| !is_dropped(SourceKind::ExpenseClaim, id));
        self.source_extra_time_ids
            .retain(|&id| !is_dropped(SourceKind::ExtraTime, id));
        self.totals = ReconciliationTotals::from_items(&self.line_items);
        self.dropped.extend_from_slice(dropped);
        self
    }

    fn drop_source(&mut self, kind: SourceKind, id: Uuid, reason: DropReason) {
        record_sources_dropped(kind.as_str(), reason.as_str(), 1);
        self.dropped.push(DroppedSource { kind, id, reason });
    }
}

/// Build an invoice body from manual entries and selected source ids.
///
/// Manual entries are validated first. Selected ids that are already
/// invoiced or absent from `catalog` are dropped, not rejected. Repeated ids
/// are billed once.
pub fn reconcile(
    manual: &[ManualExpenseEntry],
    selected_claim_ids: &[Uuid],
    selected_extra_time_ids: &[Uuid],
    catalog: &ClientBillables,
) -> Result<Reconciliation, EngineError> {
    if manual.is_empty() && selected_claim_ids.is_empty() && selected_extra_time_ids.is_empty() {
        return Err(EngineError::EmptySelection);
    }
    for entry in manual {
        entry.validate()?;
    }

    let mut out = Reconciliation::default();

    for entry in manual {
        let mut item = NewLineItem::flat(
            LineItemKind::ManualExpense,
            entry.description.trim(),
            entry.amount,
        );
        item.staff_id = entry.staff_id;
        item.admin_cost_percentage = Some(entry.admin_cost_percentage);
        out.totals.manual += entry.amount;
        out.line_items.push(item);
    }

    let mut seen = HashSet::new();
    for &id in selected_claim_ids {
        if !seen.insert(id) {
            continue;
        }
        match catalog.find_claim(id) {
            Some(claim) if claim.is_selectable() => {
                let mut item = NewLineItem::flat(
                    LineItemKind::ExpenseClaim,
                    claim.line_description(),
                    claim.amount,
                );
                item.source_expense_id = Some(claim.expense_id);
                item.staff_id = claim.staff_id;
                out.totals.claims += claim.amount;
                out.source_expense_ids.push(claim.expense_id);
                out.line_items.push(item);
            }
            Some(_) => out.drop_source(SourceKind::ExpenseClaim, id, DropReason::AlreadyInvoiced),
            None => out.drop_source(SourceKind::ExpenseClaim, id, DropReason::NotInCatalog),
        }
    }

    let mut seen = HashSet::new();
    for &id in selected_extra_time_ids {
        if !seen.insert(id) {
            continue;
        }
        match catalog.find_extra_time(id) {
            Some(record) if record.is_selectable() => {
                let item = NewLineItem {
                    kind: LineItemKind::ExtraTime,
                    description: record.line_description(),
                    quantity: record.hours(),
                    unit_price: record.hourly_rate,
                    amount: record.total_cost,
                    booking_id: None,
                    source_expense_id: None,
                    source_extra_time_id: Some(record.extra_time_id),
                    staff_id: record.staff_id,
                    admin_cost_percentage: None,
                };
                out.totals.extra_time += record.total_cost;
                out.source_extra_time_ids.push(record.extra_time_id);
                out.line_items.push(item);
            }
            Some(_) => out.drop_source(SourceKind::ExtraTime, id, DropReason::AlreadyInvoiced),
            None => out.drop_source(SourceKind::ExtraTime, id, DropReason::NotInCatalog),
        }
    }

    out.totals.grand = out.totals.manual + out.totals.claims + out.totals.extra_time;

    if !out.dropped.is_empty() {
        warn!(
            client_id = %catalog.client_id,
            dropped = out.dropped.len(),
            "Dropped stale or unknown selections"
        );
    }

    Ok(out)
}
