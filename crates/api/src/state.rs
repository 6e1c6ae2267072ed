//! Application state

use sqlx::PgPool;
use std::sync::Arc;

use tenlic_billing::BillingService;

use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub billing: Arc<BillingService>,
}

impl AppState {
    pub async fn new(pool: PgPool, config: Config) -> anyhow::Result<Self> {
        let billing = BillingService::from_env(pool.clone())
            .await
            .map_err(|e| anyhow::anyhow!("billing service initialization failed: {}", e))?;
        tracing::info!("Stripe billing service initialized");

        Ok(Self {
            pool,
            config,
            billing: Arc::new(billing),
        })
    }
}
