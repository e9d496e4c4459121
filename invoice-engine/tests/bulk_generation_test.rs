//! Bulk generation runs over the in-memory store.

mod common;

use common::{date, generator_over, test_period, FailingStore, Fixture};
use invoice_engine::engine::NoProgress;
use invoice_engine::error::EngineError;
use invoice_engine::models::{BulkGenerationProgress, NO_ELIGIBLE_CLIENTS_MESSAGE};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn rate_eligible_clients_are_invoiced_and_others_skipped() {
    let fixture = Fixture::new();
    let alice = fixture.add_client("Alice", "Adams");
    let bob = fixture.add_client("Bob", "Brown");
    fixture.add_rate(alice, "schedule", 20);
    for day in 2..=4 {
        fixture.add_booking(alice, date(2026, 3, day), 60, "completed");
    }
    fixture.add_booking(bob, date(2026, 3, 2), 60, "completed");
    fixture.add_booking(bob, date(2026, 3, 3), 60, "completed");

    let result = fixture
        .generator()
        .generate_for_period(fixture.context(), test_period(), &NoProgress)
        .await
        .unwrap();

    assert_eq!(result.success_count, 1);
    assert_eq!(result.error_count, 0);
    assert_eq!(result.skipped_count, 1);
    assert_eq!(result.total_amount, Decimal::from(60));

    assert_eq!(result.invoices.len(), 1);
    assert_eq!(result.invoices[0].client_id, alice);
    assert_eq!(result.invoices[0].line_item_count, 3);
    assert_eq!(result.invoices[0].invoice_number, "INV-000001");

    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].client_name, "Bob Brown");
    assert_eq!(result.errors[0].booking_count, 2);
    assert!(result.errors[0].skipped);

    let invoices = fixture.store.invoices().unwrap();
    assert_eq!(invoices.len(), 1);
    assert_eq!(invoices[0].client_id, alice);
    assert!(invoices[0].generated_from_booking);
    assert_eq!(invoices[0].status, "draft");
}

#[tokio::test]
async fn no_eligible_clients_is_an_informational_result() {
    let fixture = Fixture::new();
    let bob = fixture.add_client("Bob", "Brown");
    fixture.add_booking(bob, date(2026, 3, 2), 60, "completed");

    let result = fixture
        .generator()
        .generate_for_period(fixture.context(), test_period(), &NoProgress)
        .await
        .unwrap();

    assert_eq!(result.message.as_deref(), Some(NO_ELIGIBLE_CLIENTS_MESSAGE));
    assert_eq!(result.success_count, 0);
    assert!(result.invoices.is_empty());
    assert!(fixture.store.invoices().unwrap().is_empty());
}

#[tokio::test]
async fn one_failing_client_does_not_stop_the_run() {
    let fixture = Fixture::new();
    let alice = fixture.add_client("Alice", "Adams");
    let bob = fixture.add_client("Bob", "Brown");
    let cara = fixture.add_client("Cara", "Cole");
    for client in [alice, bob, cara] {
        fixture.add_rate(client, "assignment", 30);
        fixture.add_booking(client, date(2026, 3, 5), 120, "assigned");
    }

    let store = FailingStore::new(fixture.store.clone()).fail_create_for(bob);
    let generator = generator_over(Arc::new(store), 500);

    let result = generator
        .generate_for_period(fixture.context(), test_period(), &NoProgress)
        .await
        .unwrap();

    assert_eq!(result.success_count, 2);
    assert_eq!(result.error_count, 1);
    assert_eq!(result.total_amount, Decimal::from(120));
    assert_eq!(result.errors[0].client_name, "Bob Brown");
    assert_eq!(result.errors[0].booking_count, 1);
    assert_eq!(
        result.errors[0].reason,
        "could not save the invoice, please retry"
    );
    assert!(!result.errors[0].skipped);

    // Nothing was written for the failing client
    let invoices = fixture.store.invoices().unwrap();
    assert_eq!(invoices.len(), 2);
    assert!(invoices.iter().all(|i| i.client_id != bob));
}

#[tokio::test]
async fn progress_is_reported_before_each_client() {
    let fixture = Fixture::new();
    let alice = fixture.add_client("Alice", "Adams");
    let bob = fixture.add_client("Bob", "Brown");
    let skipped = fixture.add_client("Sam", "Skip");
    for client in [alice, bob] {
        fixture.add_rate(client, "schedule", 20);
    }
    for client in [alice, bob, skipped] {
        fixture.add_booking(client, date(2026, 3, 6), 60, "completed");
    }

    let seen: Mutex<Vec<BulkGenerationProgress>> = Mutex::new(Vec::new());
    let sink = |p: &BulkGenerationProgress| seen.lock().unwrap().push(p.clone());

    fixture
        .generator()
        .generate_for_period(fixture.context(), test_period(), &sink)
        .await
        .unwrap();

    let seen = seen.into_inner().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].current, 1);
    assert_eq!(seen[0].total, 2);
    assert_eq!(seen[0].current_client.as_deref(), Some("Alice Adams"));
    assert_eq!(seen[1].current, 2);
    assert_eq!(seen[1].current_client.as_deref(), Some("Bob Brown"));
}

#[tokio::test]
async fn rerunning_a_period_reports_duplicates() {
    let fixture = Fixture::new();
    let alice = fixture.add_client("Alice", "Adams");
    fixture.add_rate(alice, "schedule", 20);
    fixture.add_booking(alice, date(2026, 3, 2), 60, "completed");

    let generator = fixture.generator();
    let first = generator
        .generate_for_period(fixture.context(), test_period(), &NoProgress)
        .await
        .unwrap();
    assert_eq!(first.success_count, 1);

    let second = generator
        .generate_for_period(fixture.context(), test_period(), &NoProgress)
        .await
        .unwrap();
    assert_eq!(second.success_count, 0);
    assert_eq!(second.error_count, 1);
    assert_eq!(
        second.errors[0].reason,
        "duplicate invoice already exists for period (INV-000001)"
    );
    assert_eq!(fixture.store.invoices().unwrap().len(), 1);
}

#[tokio::test]
async fn cancelled_only_clients_fail_with_no_billable_bookings() {
    let fixture = Fixture::new();
    let alice = fixture.add_client("Alice", "Adams");
    fixture.add_rate(alice, "schedule", 20);
    fixture.add_booking(alice, date(2026, 3, 2), 60, "cancelled");

    let result = fixture
        .generator()
        .generate_for_period(fixture.context(), test_period(), &NoProgress)
        .await
        .unwrap();

    assert_eq!(result.error_count, 1);
    assert_eq!(result.errors[0].reason, "no billable bookings in period");
    assert!(fixture.store.invoices().unwrap().is_empty());
}

#[tokio::test]
async fn runs_are_recorded() {
    let fixture = Fixture::new();
    let alice = fixture.add_client("Alice", "Adams");
    fixture.add_rate(alice, "schedule", 20);
    fixture.add_booking(alice, date(2026, 3, 2), 90, "completed");

    fixture
        .generator()
        .generate_for_period(fixture.context(), test_period(), &NoProgress)
        .await
        .unwrap();

    let runs = fixture.store.generation_runs().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].branch_id, fixture.branch_id);
    assert_eq!(runs[0].period_type, "custom");
    assert_eq!(runs[0].start_date, date(2026, 3, 1));
    assert_eq!(runs[0].success_count, 1);
    assert_eq!(runs[0].total_amount, Decimal::from(30));
}

#[tokio::test]
async fn run_recording_failure_does_not_change_the_result() {
    let fixture = Fixture::new();
    let alice = fixture.add_client("Alice", "Adams");
    fixture.add_rate(alice, "schedule", 20);
    fixture.add_booking(alice, date(2026, 3, 2), 60, "completed");

    let store = FailingStore::new(fixture.store.clone()).fail_run_recording();
    let result = generator_over(Arc::new(store), 500)
        .generate_for_period(fixture.context(), test_period(), &NoProgress)
        .await
        .unwrap();

    assert_eq!(result.success_count, 1);
    assert!(fixture.store.generation_runs().unwrap().is_empty());
}

#[tokio::test]
async fn runs_over_the_client_limit_are_rejected() {
    let fixture = Fixture::new();
    for name in ["Alice", "Bob", "Cara"] {
        let client = fixture.add_client(name, "Limit");
        fixture.add_rate(client, "schedule", 20);
        fixture.add_booking(client, date(2026, 3, 2), 60, "completed");
    }

    let generator = generator_over(fixture.dyn_store(), 2);
    let preview = generator
        .preview(fixture.context(), test_period())
        .await
        .unwrap();
    assert_eq!(preview.eligible_count(), 3);

    let err = generator.generate(preview, &NoProgress).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::BulkLimitExceeded { count: 3, limit: 2 }
    ));
    assert!(fixture.store.invoices().unwrap().is_empty());
}

#[tokio::test]
async fn dropping_a_preview_writes_nothing() {
    let fixture = Fixture::new();
    let alice = fixture.add_client("Alice", "Adams");
    fixture.add_rate(alice, "schedule", 20);
    fixture.add_booking(alice, date(2026, 3, 2), 60, "completed");

    let preview = fixture
        .generator()
        .preview(fixture.context(), test_period())
        .await
        .unwrap();
    assert_eq!(preview.eligible_count(), 1);
    drop(preview);

    assert!(fixture.store.invoices().unwrap().is_empty());
    assert!(fixture.store.generation_runs().unwrap().is_empty());
}
