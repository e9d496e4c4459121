//! Test helper module for invoice-engine integration tests.
//!
//! Provides an in-memory billing fixture, a failure-injecting store and an
//! HTTP test application.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use invoice_engine::config::InvoiceEngineConfig;
use invoice_engine::engine::{resolve_period, BulkGenerator, EligibilityEvaluator, InvoiceWriter};
use invoice_engine::models::{
    BillingContext, Booking, Client, CustomRange, ExpenseClaim, ExtraTimeRecord, GenerationRun,
    Invoice, LineItem, NewInvoice, NewLineItem, Period, PeriodType, RateBasis,
    DEFAULT_TRAVEL_CATEGORIES,
};
use invoice_engine::services::{init_metrics, BillingStore, InMemoryStore};
use invoice_engine::startup::Application;
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

// Test constants for tenant context
pub const TEST_ORG_ID: &str = "11111111-1111-1111-1111-111111111111";
pub const TEST_BRANCH_ID: &str = "22222222-2222-2222-2222-222222222222";

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub const PERIOD_START: (i32, u32, u32) = (2026, 3, 1);
pub const PERIOD_END: (i32, u32, u32) = (2026, 3, 7);

/// First week of March 2026 as a custom period.
pub fn test_period() -> Period {
    let (sy, sm, sd) = PERIOD_START;
    let (ey, em, ed) = PERIOD_END;
    resolve_period(
        PeriodType::Custom,
        Some(CustomRange {
            start: date(sy, sm, sd),
            end: date(ey, em, ed),
        }),
        date(2026, 3, 10),
    )
    .unwrap()
}

/// Query string selecting [`test_period`].
pub fn test_period_query() -> &'static str {
    "type=custom&start=2026-03-01&end=2026-03-07"
}

pub fn travel_categories() -> Vec<String> {
    DEFAULT_TRAVEL_CATEGORIES
        .iter()
        .map(|c| c.to_string())
        .collect()
}

/// In-memory billing data for one organization and branch.
pub struct Fixture {
    pub store: Arc<InMemoryStore>,
    pub organization_id: Uuid,
    pub branch_id: Uuid,
}

impl Fixture {
    pub fn new() -> Self {
        init_metrics();
        Self {
            store: Arc::new(InMemoryStore::new()),
            organization_id: Uuid::parse_str(TEST_ORG_ID).unwrap(),
            branch_id: Uuid::parse_str(TEST_BRANCH_ID).unwrap(),
        }
    }

    pub fn context(&self) -> BillingContext {
        BillingContext::new(self.organization_id, self.branch_id)
    }

    pub fn dyn_store(&self) -> Arc<dyn BillingStore> {
        self.store.clone()
    }

    pub fn evaluator(&self) -> EligibilityEvaluator {
        EligibilityEvaluator::new(self.dyn_store(), travel_categories())
    }

    pub fn writer(&self) -> InvoiceWriter {
        InvoiceWriter::new(self.dyn_store())
    }

    pub fn generator(&self) -> BulkGenerator {
        generator_over(self.dyn_store(), 500)
    }

    pub fn add_client(&self, first_name: &str, last_name: &str) -> Uuid {
        let client_id = Uuid::new_v4();
        self.store
            .insert_client(Client {
                client_id,
                branch_id: self.branch_id,
                first_name: first_name.to_string(),
                last_name: last_name.to_string(),
                created_utc: Utc::now(),
            })
            .unwrap();
        client_id
    }

    /// Booking at 09:00 UTC on `day` lasting `minutes`.
    pub fn add_booking(&self, client_id: Uuid, day: NaiveDate, minutes: i64, status: &str) -> Uuid {
        let booking_id = Uuid::new_v4();
        let start = Utc.from_utc_datetime(&day.and_hms_opt(9, 0, 0).unwrap());
        self.store
            .insert_booking(Booking {
                booking_id,
                client_id,
                branch_id: self.branch_id,
                staff_id: Some(Uuid::new_v4()),
                service_name: Some("Home care visit".to_string()),
                start_time: start,
                end_time: start + Duration::minutes(minutes),
                status: status.to_string(),
            })
            .unwrap();
        booking_id
    }

    pub fn add_rate(&self, client_id: Uuid, mechanism: &str, hourly_rate: i64) -> Uuid {
        let rate_basis_id = Uuid::new_v4();
        self.store
            .insert_rate_basis(RateBasis {
                rate_basis_id,
                client_id,
                mechanism: mechanism.to_string(),
                description: "Standard care".to_string(),
                hourly_rate: Decimal::from(hourly_rate),
                is_active: true,
                effective_from: date(2025, 1, 1),
                effective_to: None,
                created_utc: Utc::now(),
            })
            .unwrap();
        rate_basis_id
    }

    pub fn add_inactive_rate(&self, client_id: Uuid, mechanism: &str) {
        self.store
            .insert_rate_basis(RateBasis {
                rate_basis_id: Uuid::new_v4(),
                client_id,
                mechanism: mechanism.to_string(),
                description: "Old rate".to_string(),
                hourly_rate: Decimal::from(10),
                is_active: false,
                effective_from: date(2024, 1, 1),
                effective_to: Some(date(2024, 12, 31)),
                created_utc: Utc::now(),
            })
            .unwrap();
    }

    pub fn add_claim(
        &self,
        client_id: Uuid,
        category: &str,
        amount: i64,
        day: NaiveDate,
        booking_id: Option<Uuid>,
    ) -> Uuid {
        let expense_id = Uuid::new_v4();
        self.store
            .insert_expense_claim(ExpenseClaim {
                expense_id,
                client_id,
                staff_id: None,
                booking_id,
                category: category.to_string(),
                description: None,
                amount: Decimal::from(amount),
                expense_date: day,
                is_invoiced: false,
                invoice_id: None,
                created_utc: Utc::now(),
            })
            .unwrap();
        expense_id
    }

    pub fn add_extra_time(&self, client_id: Uuid, minutes: i32, cost: i64, day: NaiveDate) -> Uuid {
        let extra_time_id = Uuid::new_v4();
        self.store
            .insert_extra_time(ExtraTimeRecord {
                extra_time_id,
                client_id,
                booking_id: None,
                staff_id: None,
                work_date: day,
                extra_time_minutes: minutes,
                hourly_rate: Decimal::from(30),
                total_cost: Decimal::from(cost),
                invoiced: false,
                invoice_id: None,
                created_utc: Utc::now(),
            })
            .unwrap();
        extra_time_id
    }
}

pub fn generator_over(store: Arc<dyn BillingStore>, limit: usize) -> BulkGenerator {
    let evaluator = EligibilityEvaluator::new(store.clone(), travel_categories());
    let writer = InvoiceWriter::new(store.clone());
    BulkGenerator::new(store, evaluator, writer, limit)
}

/// Store wrapper that fails invoice creation for chosen clients and can
/// fail run recording.
pub struct FailingStore {
    inner: Arc<InMemoryStore>,
    fail_create_for: Mutex<HashSet<Uuid>>,
    fail_run_recording: bool,
}

impl FailingStore {
    pub fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            fail_create_for: Mutex::new(HashSet::new()),
            fail_run_recording: false,
        }
    }

    pub fn fail_create_for(self, client_id: Uuid) -> Self {
        self.fail_create_for.lock().unwrap().insert(client_id);
        self
    }

    pub fn fail_run_recording(mut self) -> Self {
        self.fail_run_recording = true;
        self
    }
}

#[async_trait]
impl BillingStore for FailingStore {
    async fn health_check(&self) -> Result<(), AppError> {
        self.inner.health_check().await
    }

    async fn list_branch_bookings(
        &self,
        branch_id: Uuid,
        period: &Period,
    ) -> Result<Vec<Booking>, AppError> {
        self.inner.list_branch_bookings(branch_id, period).await
    }

    async fn list_client_bookings(
        &self,
        client_id: Uuid,
        branch_id: Uuid,
        period: &Period,
    ) -> Result<Vec<Booking>, AppError> {
        self.inner
            .list_client_bookings(client_id, branch_id, period)
            .await
    }

    async fn get_client(&self, client_id: Uuid) -> Result<Option<Client>, AppError> {
        self.inner.get_client(client_id).await
    }

    async fn get_clients(&self, client_ids: &[Uuid]) -> Result<Vec<Client>, AppError> {
        self.inner.get_clients(client_ids).await
    }

    async fn clients_with_active_schedule(
        &self,
        client_ids: &[Uuid],
    ) -> Result<HashSet<Uuid>, AppError> {
        self.inner.clients_with_active_schedule(client_ids).await
    }

    async fn clients_with_active_assignment(
        &self,
        client_ids: &[Uuid],
    ) -> Result<HashSet<Uuid>, AppError> {
        self.inner.clients_with_active_assignment(client_ids).await
    }

    async fn list_active_rate_bases(&self, client_id: Uuid) -> Result<Vec<RateBasis>, AppError> {
        self.inner.list_active_rate_bases(client_id).await
    }

    async fn list_expense_claims(
        &self,
        client_id: Uuid,
        period: &Period,
    ) -> Result<Vec<ExpenseClaim>, AppError> {
        self.inner.list_expense_claims(client_id, period).await
    }

    async fn list_extra_time(
        &self,
        client_id: Uuid,
        period: &Period,
    ) -> Result<Vec<ExtraTimeRecord>, AppError> {
        self.inner.list_extra_time(client_id, period).await
    }

    async fn get_expense_claims(
        &self,
        expense_ids: &[Uuid],
    ) -> Result<Vec<ExpenseClaim>, AppError> {
        self.inner.get_expense_claims(expense_ids).await
    }

    async fn get_extra_time(
        &self,
        extra_time_ids: &[Uuid],
    ) -> Result<Vec<ExtraTimeRecord>, AppError> {
        self.inner.get_extra_time(extra_time_ids).await
    }

    async fn get_bookings(&self, booking_ids: &[Uuid]) -> Result<Vec<Booking>, AppError> {
        self.inner.get_bookings(booking_ids).await
    }

    async fn invoiced_booking_ids(&self, booking_ids: &[Uuid]) -> Result<HashSet<Uuid>, AppError> {
        self.inner.invoiced_booking_ids(booking_ids).await
    }

    async fn find_period_invoice(
        &self,
        client_id: Uuid,
        period: &Period,
    ) -> Result<Option<Invoice>, AppError> {
        self.inner.find_period_invoice(client_id, period).await
    }

    async fn create_invoice(&self, input: &NewInvoice) -> Result<Invoice, AppError> {
        if self
            .fail_create_for
            .lock()
            .unwrap()
            .contains(&input.client_id)
        {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "connection reset by peer"
            )));
        }
        self.inner.create_invoice(input).await
    }

    async fn append_line_items(
        &self,
        organization_id: Uuid,
        invoice_id: Uuid,
        items: &[NewLineItem],
    ) -> Result<Invoice, AppError> {
        self.inner
            .append_line_items(organization_id, invoice_id, items)
            .await
    }

    async fn get_invoice(
        &self,
        organization_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError> {
        self.inner.get_invoice(organization_id, invoice_id).await
    }

    async fn get_line_items(&self, invoice_id: Uuid) -> Result<Vec<LineItem>, AppError> {
        self.inner.get_line_items(invoice_id).await
    }

    async fn delete_invoice(
        &self,
        organization_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<bool, AppError> {
        self.inner.delete_invoice(organization_id, invoice_id).await
    }

    async fn record_generation_run(&self, run: &GenerationRun) -> Result<(), AppError> {
        if self.fail_run_recording {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "relation \"generation_runs\" does not exist"
            )));
        }
        self.inner.record_generation_run(run).await
    }
}

/// Test application wrapper for HTTP integration tests.
pub struct TestApp {
    pub http_address: String,
    pub http_port: u16,
    pub fixture: Fixture,
    pub client: reqwest::Client,
}

impl TestApp {
    /// Spawn a new test application on a random port over a fresh fixture.
    pub async fn spawn() -> Self {
        let fixture = Fixture::new();

        let app = Application::build_with_store(InvoiceEngineConfig::ephemeral(), fixture.dyn_store())
            .await
            .expect("Failed to build test application");

        let http_port = app.http_port();
        let http_address = format!("http://127.0.0.1:{}", http_port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for HTTP server to be ready by polling health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", http_address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            http_address,
            http_port,
            fixture,
            client,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.http_address, path)
    }

    /// GET with the test organization header.
    pub fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(self.url(path))
            .header("X-Org-ID", TEST_ORG_ID)
    }

    /// POST with the test organization header.
    pub fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(self.url(path))
            .header("X-Org-ID", TEST_ORG_ID)
    }

    /// DELETE with the test organization header.
    pub fn delete(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .delete(self.url(path))
            .header("X-Org-ID", TEST_ORG_ID)
    }
}
