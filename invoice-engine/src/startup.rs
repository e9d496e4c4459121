//! Application startup and lifecycle management.

use crate::config::InvoiceEngineConfig;
use crate::engine::{BulkGenerator, EligibilityEvaluator, InvoiceWriter};
use crate::handlers;
use crate::middleware::http_metrics_middleware;
use crate::services::{init_metrics, BillingStore, Database};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::request_id_middleware;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: InvoiceEngineConfig,
    pub store: Arc<dyn BillingStore>,
    pub evaluator: EligibilityEvaluator,
    pub writer: InvoiceWriter,
    pub generator: BulkGenerator,
}

impl AppState {
    pub fn new(config: InvoiceEngineConfig, store: Arc<dyn BillingStore>) -> Self {
        let evaluator =
            EligibilityEvaluator::new(store.clone(), config.billing.travel_categories.clone());
        let writer = InvoiceWriter::new(store.clone());
        let generator = BulkGenerator::new(
            store.clone(),
            evaluator.clone(),
            writer.clone(),
            config.billing.bulk_client_limit,
        );

        Self {
            config,
            store,
            evaluator,
            writer,
            generator,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/periods", get(handlers::resolve_period))
        .route("/branches/:branch_id/bulk-preview", get(handlers::bulk_preview))
        .route("/branches/:branch_id/bulk-generate", post(handlers::bulk_generate))
        .route("/clients/:client_id/billables", get(handlers::client_billables))
        .route("/clients/:client_id/reconcile", post(handlers::reconcile_preview))
        .route("/clients/:client_id/invoices", post(handlers::create_client_invoice))
        .route(
            "/invoices/:invoice_id",
            get(handlers::get_invoice).delete(handlers::delete_invoice),
        )
        .route("/invoices/:invoice_id/expenses", post(handlers::append_expenses));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_handler))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(http_metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: InvoiceEngineConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    /// Use this when migrations are already applied by the deployment.
    pub async fn build_without_migrations(config: InvoiceEngineConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(
        config: InvoiceEngineConfig,
        run_migrations: bool,
    ) -> Result<Self, AppError> {
        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        Self::build_with_store(config, Arc::new(db)).await
    }

    /// Build the application on top of an existing store.
    pub async fn build_with_store(
        config: InvoiceEngineConfig,
        store: Arc<dyn BillingStore>,
    ) -> Result<Self, AppError> {
        init_metrics();

        let http_addr = format!("{}:{}", config.common.host, config.common.port);
        let http_listener = TcpListener::bind(&http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        tracing::info!(http_port = http_port, "Invoice engine listener bound");

        Ok(Self {
            http_port,
            http_listener,
            state: AppState::new(config, store),
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        tracing::info!(
            service = %self.state.config.service_name,
            version = %self.state.config.service_version,
            http_port = self.http_port,
            "Service ready to accept connections"
        );

        axum::serve(self.http_listener, router(self.state)).await
    }
}
