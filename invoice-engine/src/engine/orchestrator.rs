//! Bulk invoice generation across a branch.

use crate::engine::eligibility::EligibilityEvaluator;
use crate::engine::writer::InvoiceWriter;
use crate::error::EngineError;
use crate::models::{
    BillingContext, BulkGenerationProgress, BulkGenerationResult, BulkPreview, ClientEligibility,
    GeneratedInvoiceSummary, GenerationFailure, GenerationRun, Period, WrittenInvoice,
};
use crate::services::{record_bulk_client_outcome, record_bulk_run, record_error, BillingStore};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Receives a progress update before each client is attempted.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, progress: &BulkGenerationProgress);
}

impl<F> ProgressSink for F
where
    F: Fn(&BulkGenerationProgress) + Send + Sync,
{
    fn on_progress(&self, progress: &BulkGenerationProgress) {
        self(progress)
    }
}

/// Sink that discards progress.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&self, _progress: &BulkGenerationProgress) {}
}

/// Generates one invoice per rate-eligible client, one client at a time.
///
/// A run starts from a [`BulkPreview`]; dropping the preview abandons the
/// run without side effects. Once [`BulkGenerator::generate`] is called
/// every eligible client is attempted and a failure for one client never
/// stops the others.
#[derive(Clone)]
pub struct BulkGenerator {
    store: Arc<dyn BillingStore>,
    evaluator: EligibilityEvaluator,
    writer: InvoiceWriter,
    bulk_client_limit: usize,
}

impl BulkGenerator {
    pub fn new(
        store: Arc<dyn BillingStore>,
        evaluator: EligibilityEvaluator,
        writer: InvoiceWriter,
        bulk_client_limit: usize,
    ) -> Self {
        Self {
            store,
            evaluator,
            writer,
            bulk_client_limit,
        }
    }

    #[instrument(skip(self, ctx, period), fields(organization_id = %ctx.organization_id, branch_id = %ctx.branch_id))]
    pub async fn preview(
        &self,
        ctx: BillingContext,
        period: Period,
    ) -> Result<BulkPreview, EngineError> {
        let clients = self.evaluator.evaluate_branch(ctx.branch_id, &period).await?;
        Ok(BulkPreview {
            context: ctx,
            period,
            clients,
        })
    }

    /// Run a confirmed preview to completion.
    ///
    /// Only a preview over the configured client limit is rejected; every
    /// error after that is recorded against the client it happened for.
    #[instrument(skip(self, preview, progress), fields(organization_id = %preview.context.organization_id, branch_id = %preview.context.branch_id))]
    pub async fn generate(
        &self,
        preview: BulkPreview,
        progress: &dyn ProgressSink,
    ) -> Result<BulkGenerationResult, EngineError> {
        let eligible: Vec<&ClientEligibility> = preview.eligible().collect();
        if eligible.len() > self.bulk_client_limit {
            return Err(EngineError::BulkLimitExceeded {
                count: eligible.len(),
                limit: self.bulk_client_limit,
            });
        }

        let ctx = preview.context;
        let org = ctx.organization_id.to_string();
        let started_utc = Utc::now();

        if eligible.is_empty() {
            info!(
                candidates = preview.clients.len(),
                "No eligible clients for bulk generation"
            );
            let result = BulkGenerationResult::no_eligible_clients();
            record_bulk_run(&org, result.outcome());
            self.record_run(&preview, &result, started_utc).await;
            return Ok(result);
        }

        let total = eligible.len();
        let mut result = BulkGenerationResult::default();

        for (index, client) in eligible.iter().enumerate() {
            progress.on_progress(&BulkGenerationProgress {
                current: index + 1,
                total,
                current_client: Some(client.client_name.clone()),
            });

            match self.generate_one(&ctx, client.client_id, &preview.period).await {
                Ok(written) => {
                    record_bulk_client_outcome("success");
                    result.record_success(GeneratedInvoiceSummary {
                        client_id: client.client_id,
                        client_name: client.client_name.clone(),
                        invoice_number: written.invoice_number,
                        amount: written.amount,
                        line_item_count: written.line_item_count,
                    });
                }
                Err(e) => {
                    warn!(
                        client_id = %client.client_id,
                        error = %e,
                        "Invoice generation failed for client"
                    );
                    record_bulk_client_outcome("failed");
                    record_error(e.kind(), "bulk_generate");
                    result.record_failure(GenerationFailure {
                        client_name: client.client_name.clone(),
                        booking_count: client.booking_count,
                        reason: e.reason(),
                        skipped: false,
                    });
                }
            }
        }

        for client in preview.skipped() {
            record_bulk_client_outcome("skipped");
            result.record_skipped(client);
        }

        record_bulk_run(&org, result.outcome());
        info!(
            success_count = result.success_count,
            error_count = result.error_count,
            skipped_count = result.skipped_count,
            total_amount = %result.total_amount,
            outcome = result.outcome(),
            "Bulk generation completed"
        );

        self.record_run(&preview, &result, started_utc).await;
        Ok(result)
    }

    /// Preview and generate in one step.
    pub async fn generate_for_period(
        &self,
        ctx: BillingContext,
        period: Period,
        progress: &dyn ProgressSink,
    ) -> Result<BulkGenerationResult, EngineError> {
        let preview = self.preview(ctx, period).await?;
        self.generate(preview, progress).await
    }

    async fn generate_one(
        &self,
        ctx: &BillingContext,
        client_id: Uuid,
        period: &Period,
    ) -> Result<WrittenInvoice, EngineError> {
        let facts = self.writer.booking_facts(ctx, client_id, period).await?;
        self.writer.write(ctx, client_id, period, facts).await
    }

    async fn record_run(
        &self,
        preview: &BulkPreview,
        result: &BulkGenerationResult,
        started_utc: chrono::DateTime<Utc>,
    ) {
        let run = GenerationRun {
            run_id: Uuid::new_v4(),
            organization_id: preview.context.organization_id,
            branch_id: preview.context.branch_id,
            period_type: preview.period.period_type.as_str().to_string(),
            start_date: preview.period.start_date,
            end_date: preview.period.end_date,
            success_count: result.success_count as i32,
            error_count: result.error_count as i32,
            skipped_count: result.skipped_count as i32,
            total_amount: result.total_amount,
            started_utc,
            completed_utc: Utc::now(),
        };

        if let Err(e) = self.store.record_generation_run(&run).await {
            error!(run_id = %run.run_id, error = %e, "Failed to record generation run");
        }
    }
}
