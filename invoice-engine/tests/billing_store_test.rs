//! Guarantees the store enforces inside its own write, independent of the writer.

mod common;

use common::{date, test_period, Fixture};
use invoice_engine::models::{InvoiceStatus, LineItemKind, NewInvoice, NewLineItem};
use invoice_engine::services::BillingStore;
use rust_decimal::Decimal;
use service_core::error::AppError;
use uuid::Uuid;

fn claim_line(expense_id: Uuid, amount: i64) -> NewLineItem {
    let mut item = NewLineItem::flat(LineItemKind::ExpenseClaim, "Meals", Decimal::from(amount));
    item.source_expense_id = Some(expense_id);
    item
}

fn new_invoice(fixture: &Fixture, client_id: Uuid, line_items: Vec<NewLineItem>) -> NewInvoice {
    let period = test_period();
    NewInvoice {
        organization_id: fixture.organization_id,
        client_id,
        branch_id: fixture.branch_id,
        start_date: period.start_date,
        end_date: period.end_date,
        generated_from_booking: false,
        line_items,
    }
}

#[tokio::test]
async fn a_source_repeated_within_one_write_is_rejected() {
    let fixture = Fixture::new();
    let client = fixture.add_client("Ada", "Lovelace");
    let claim = fixture.add_claim(client, "meals", 20, date(2026, 3, 2), None);

    let input = new_invoice(
        &fixture,
        client,
        vec![claim_line(claim, 20), claim_line(claim, 20)],
    );
    let err = fixture.store.create_invoice(&input).await.unwrap_err();

    assert!(matches!(err, AppError::Conflict(_)));
    assert!(fixture.store.invoices().unwrap().is_empty());
    let claims = fixture.store.get_expense_claims(&[claim]).await.unwrap();
    assert!(!claims[0].is_invoiced);
}

#[tokio::test]
async fn a_foreign_source_is_rejected() {
    let fixture = Fixture::new();
    let ada = fixture.add_client("Ada", "Lovelace");
    let bea = fixture.add_client("Bea", "Other");
    let claim = fixture.add_claim(bea, "meals", 20, date(2026, 3, 2), None);
    let booking = fixture.add_booking(bea, date(2026, 3, 3), 60, "completed");

    let err = fixture
        .store
        .create_invoice(&new_invoice(&fixture, ada, vec![claim_line(claim, 20)]))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let mut service = NewLineItem::flat(LineItemKind::Service, "Care visit", Decimal::from(20));
    service.booking_id = Some(booking);
    let err = fixture
        .store
        .create_invoice(&new_invoice(&fixture, ada, vec![service]))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    assert!(fixture.store.invoices().unwrap().is_empty());
}

#[tokio::test]
async fn a_sent_invoice_is_locked_inside_the_store() {
    let fixture = Fixture::new();
    let client = fixture.add_client("Ada", "Lovelace");
    let claim = fixture.add_claim(client, "meals", 20, date(2026, 3, 2), None);
    let later = fixture.add_claim(client, "mileage", 5, date(2026, 3, 4), None);

    let invoice = fixture
        .store
        .create_invoice(&new_invoice(&fixture, client, vec![claim_line(claim, 20)]))
        .await
        .unwrap();
    fixture
        .store
        .set_invoice_status(invoice.invoice_id, InvoiceStatus::Sent)
        .unwrap();

    let err = fixture
        .store
        .delete_invoice(fixture.organization_id, invoice.invoice_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let err = fixture
        .store
        .append_line_items(
            fixture.organization_id,
            invoice.invoice_id,
            &[claim_line(later, 5)],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let claims = fixture
        .store
        .get_expense_claims(&[claim, later])
        .await
        .unwrap();
    let flagged = claims.iter().find(|c| c.expense_id == claim).unwrap();
    assert!(flagged.is_invoiced);
    assert_eq!(flagged.invoice_id, Some(invoice.invoice_id));
    assert!(!claims.iter().find(|c| c.expense_id == later).unwrap().is_invoiced);
    assert_eq!(
        fixture
            .store
            .get_line_items(invoice.invoice_id)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn deleting_an_unknown_invoice_reports_nothing_deleted() {
    let fixture = Fixture::new();
    let deleted = fixture
        .store
        .delete_invoice(fixture.organization_id, Uuid::new_v4())
        .await
        .unwrap();
    assert!(!deleted);
}
