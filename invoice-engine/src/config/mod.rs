//! Configuration module for invoice-engine.

use crate::models::DEFAULT_TRAVEL_CATEGORIES;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone)]
pub struct InvoiceEngineConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub billing: BillingRulesConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct BillingRulesConfig {
    /// Expense categories grouped as travel when no booking is linked.
    pub travel_categories: Vec<String>,
    /// Upper bound on rate-eligible clients in one bulk run.
    pub bulk_client_limit: usize,
}

impl Default for BillingRulesConfig {
    fn default() -> Self {
        Self {
            travel_categories: DEFAULT_TRAVEL_CATEGORIES
                .iter()
                .map(|c| c.to_string())
                .collect(),
            bulk_client_limit: 500,
        }
    }
}

fn parse_categories(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

impl InvoiceEngineConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let defaults = BillingRulesConfig::default();

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "invoice-engine".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
                min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2),
            },
            billing: BillingRulesConfig {
                travel_categories: env::var("BILLING_TRAVEL_CATEGORIES")
                    .ok()
                    .map(|raw| parse_categories(&raw))
                    .filter(|c| !c.is_empty())
                    .unwrap_or(defaults.travel_categories),
                bulk_client_limit: env::var("BILLING_BULK_CLIENT_LIMIT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.bulk_client_limit),
            },
        })
    }

    /// Localhost config on an OS-assigned port with no database.
    pub fn ephemeral() -> Self {
        Self {
            common: core_config::Config::ephemeral(),
            service_name: "invoice-engine".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            database: DatabaseConfig {
                url: String::new(),
                max_connections: 1,
                min_connections: 0,
            },
            billing: BillingRulesConfig::default(),
        }
    }
}
