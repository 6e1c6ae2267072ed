//! Stripe client wrapper.
//!
//! `StripeConfig` is constructed once at startup and threaded into every
//! service that talks to the gateway; nothing reads credentials from ambient
//! state after boot.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{BillingError, BillingResult};

const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 15;

/// Stripe credentials and gateway tuning.
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub publishable_key: String,
    pub webhook_secret: String,
    /// Base URL of the frontend, used for default checkout/portal redirects.
    pub app_base_url: String,
    /// Upper bound applied to every gateway call.
    pub gateway_timeout: Duration,
}

impl StripeConfig {
    pub fn from_env() -> BillingResult<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")
            .map_err(|_| BillingError::Config("STRIPE_SECRET_KEY not set".to_string()))?;
        let webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET")
            .map_err(|_| BillingError::Config("STRIPE_WEBHOOK_SECRET not set".to_string()))?;
        let publishable_key = std::env::var("STRIPE_PUBLISHABLE_KEY").unwrap_or_default();
        let app_base_url = std::env::var("APP_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());
        let gateway_timeout = std::env::var("GATEWAY_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_GATEWAY_TIMEOUT_SECS));

        Ok(Self {
            secret_key,
            publishable_key,
            webhook_secret,
            app_base_url,
            gateway_timeout,
        })
    }
}

/// Shared Stripe client handle.
#[derive(Clone)]
pub struct StripeClient {
    client: stripe::Client,
    config: Arc<StripeConfig>,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        let client = stripe::Client::new(config.secret_key.clone());
        Self {
            client,
            config: Arc::new(config),
        }
    }

    pub fn inner(&self) -> &stripe::Client {
        &self.client
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }

    /// Run a gateway call under the configured timeout. Mutating calls go
    /// through here exactly once; retries are reserved for idempotent reads
    /// (the processor's webhook redelivery covers inbound transients).
    pub async fn bounded<T, F>(&self, op: &'static str, fut: F) -> BillingResult<T>
    where
        F: Future<Output = Result<T, stripe::StripeError>>,
    {
        match tokio::time::timeout(self.config.gateway_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(BillingError::from(err)),
            Err(_) => {
                tracing::error!(
                    op,
                    timeout_secs = self.config.gateway_timeout.as_secs(),
                    "Stripe call exceeded gateway timeout"
                );
                Err(BillingError::GatewayTimeout(op))
            }
        }
    }
}
