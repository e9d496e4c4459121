//! Eligibility evaluation for bulk and per-client billing.

use crate::error::EngineError;
use crate::models::{Client, ClientEligibility, ExpenseClaim, ExpenseGroup, ExtraTimeRecord, Period};
use crate::services::BillingStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Expense claims and extra time for one client and period.
///
/// Nothing is filtered on the invoiced flags; already-invoiced rows are kept
/// so callers can show them as non-selectable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientBillables {
    pub client_id: Uuid,
    pub booking_linked: Vec<ExpenseClaim>,
    pub travel: Vec<ExpenseClaim>,
    pub other: Vec<ExpenseClaim>,
    pub extra_time: Vec<ExtraTimeRecord>,
}

impl ClientBillables {
    pub fn claims(&self) -> impl Iterator<Item = &ExpenseClaim> {
        self.booking_linked
            .iter()
            .chain(self.travel.iter())
            .chain(self.other.iter())
    }

    pub fn find_claim(&self, expense_id: Uuid) -> Option<&ExpenseClaim> {
        self.claims().find(|c| c.expense_id == expense_id)
    }

    pub fn find_extra_time(&self, extra_time_id: Uuid) -> Option<&ExtraTimeRecord> {
        self.extra_time
            .iter()
            .find(|r| r.extra_time_id == extra_time_id)
    }

    pub fn selectable_claim_count(&self) -> usize {
        self.claims().filter(|c| c.is_selectable()).count()
    }

    pub fn selectable_extra_time_count(&self) -> usize {
        self.extra_time.iter().filter(|r| r.is_selectable()).count()
    }
}

/// Computes which clients and billable facts are in play for a period.
#[derive(Clone)]
pub struct EligibilityEvaluator {
    store: Arc<dyn BillingStore>,
    travel_categories: Vec<String>,
}

impl EligibilityEvaluator {
    pub fn new(store: Arc<dyn BillingStore>, travel_categories: Vec<String>) -> Self {
        Self {
            store,
            travel_categories,
        }
    }

    pub async fn client(&self, client_id: Uuid) -> Result<Client, EngineError> {
        self.store
            .get_client(client_id)
            .await?
            .ok_or(EngineError::ClientNotFound(client_id))
    }

    /// Clients with bookings of any status in the period, with their booking
    /// counts and whether either rate mechanism has an active basis.
    ///
    /// Ordered by client name, then id.
    #[instrument(skip(self, period), fields(branch_id = %branch_id))]
    pub async fn evaluate_branch(
        &self,
        branch_id: Uuid,
        period: &Period,
    ) -> Result<Vec<ClientEligibility>, EngineError> {
        let bookings = self.store.list_branch_bookings(branch_id, period).await?;

        let mut counts: HashMap<Uuid, usize> = HashMap::new();
        for booking in &bookings {
            *counts.entry(booking.client_id).or_default() += 1;
        }
        if counts.is_empty() {
            info!("No bookings in period");
            return Ok(Vec::new());
        }

        let client_ids: Vec<Uuid> = counts.keys().copied().collect();
        let with_schedule = self.store.clients_with_active_schedule(&client_ids).await?;
        let with_assignment = self
            .store
            .clients_with_active_assignment(&client_ids)
            .await?;
        let names: HashMap<Uuid, String> = self
            .store
            .get_clients(&client_ids)
            .await?
            .into_iter()
            .map(|c| (c.client_id, c.display_name()))
            .collect();

        let mut clients: Vec<ClientEligibility> = counts
            .into_iter()
            .map(|(client_id, booking_count)| ClientEligibility {
                client_id,
                client_name: names
                    .get(&client_id)
                    .cloned()
                    .unwrap_or_else(|| "Unknown client".to_string()),
                booking_count,
                has_rate_basis: with_schedule.contains(&client_id)
                    || with_assignment.contains(&client_id),
            })
            .collect();
        clients.sort_by(|a, b| {
            a.client_name
                .cmp(&b.client_name)
                .then(a.client_id.cmp(&b.client_id))
        });

        info!(
            bookings = bookings.len(),
            clients = clients.len(),
            rate_eligible = clients.iter().filter(|c| c.has_rate_basis).count(),
            "Branch eligibility evaluated"
        );

        Ok(clients)
    }

    /// Expense claims grouped by booking link, travel category or other, plus
    /// extra time, for one client.
    #[instrument(skip(self, period), fields(client_id = %client_id))]
    pub async fn evaluate_client(
        &self,
        client_id: Uuid,
        period: &Period,
    ) -> Result<ClientBillables, EngineError> {
        let claims = self.store.list_expense_claims(client_id, period).await?;
        let extra_time = self.store.list_extra_time(client_id, period).await?;

        let mut billables = ClientBillables {
            client_id,
            extra_time,
            ..ClientBillables::default()
        };
        for claim in claims {
            match claim.group(&self.travel_categories) {
                ExpenseGroup::BookingLinked => billables.booking_linked.push(claim),
                ExpenseGroup::Travel => billables.travel.push(claim),
                ExpenseGroup::Other => billables.other.push(claim),
            }
        }

        info!(
            claims = billables.claims().count(),
            selectable_claims = billables.selectable_claim_count(),
            extra_time = billables.extra_time.len(),
            selectable_extra_time = billables.selectable_extra_time_count(),
            "Client billables evaluated"
        );

        Ok(billables)
    }
}
