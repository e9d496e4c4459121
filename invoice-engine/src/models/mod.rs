//! Domain models for invoice-engine.

mod booking;
mod client;
mod expense;
mod extra_time;
mod generation;
mod invoice;
mod period;

pub use booking::{Booking, BookingStatus};
pub use client::{Client, ClientEligibility, RateBasis, RateMechanism};
pub use expense::{ExpenseClaim, ExpenseGroup, ManualExpenseEntry, DEFAULT_TRAVEL_CATEGORIES};
pub use extra_time::ExtraTimeRecord;
pub use generation::{
    BillingContext, BulkGenerationProgress, BulkGenerationResult, BulkPreview,
    GeneratedInvoiceSummary, GenerationFailure, GenerationRun, NO_ELIGIBLE_CLIENTS_MESSAGE,
};
pub use invoice::{
    format_invoice_number, sum_amounts, Invoice, InvoiceDetail, InvoiceStatus, LineItem,
    LineItemKind, NewInvoice, NewLineItem, WrittenInvoice,
};
pub use period::{CustomRange, Period, PeriodType};
