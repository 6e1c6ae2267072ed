// Billing crate clippy configuration
#![allow(clippy::result_large_err)] // BillingError carries descriptive payloads
#![allow(clippy::too_many_arguments)] // Some ledger operations require many parameters
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! tenlic Billing Module
//!
//! Tenant subscription licensing reconciled against Stripe billing state,
//! plus the student verification workflow gating the free tier.
//!
//! ## Components
//!
//! - **Plan Catalog**: purchasable tiers with external price references
//! - **License Ledger**: the authoritative per-tenant subscription record
//! - **Webhook Reconciler**: applies Stripe events to the ledger under
//!   idempotency and ordering rules
//! - **Plan Change Orchestrator**: checkout, portal, proration preview,
//!   plan changes, cancel/reactivate
//! - **Student Verification**: document review gating the student plan
//! - **Invariants**: runnable consistency checks over the ledger

pub mod catalog;
pub mod client;
pub mod error;
pub mod events;
pub mod invariants;
pub mod ledger;
pub mod storage;
pub mod subscriptions;
pub mod verification;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

// Catalog
pub use catalog::{PaymentPlan, PlanCatalog};

// Client
pub use client::{StripeClient, StripeConfig};

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{
    Notifier, PlanUpdatedEvent, SubscriptionStatusChangedEvent, PLAN_UPDATED_CHANNEL,
    SUBSCRIPTION_STATUS_CHANGED_CHANNEL,
};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Ledger
pub use ledger::{
    LicenseLedger, PaymentInvoice, TenantLicense, CHECKOUT_INITIAL_PERIOD,
    FREE_TIER_NON_EXPIRING_HORIZON, PAYMENT_GRACE_WINDOW,
};

// Storage
pub use storage::{DocumentStorage, S3DocumentStorage, StorageError, StorageResult};

// Subscriptions
pub use subscriptions::{
    CancelOutcome, CheckoutOutcome, PlanChangePreview, PlanChangeResult, PlanSummary,
    SubscriptionService, SubscriptionView,
};

// Verification
pub use verification::{
    BlockStatus, DocumentUpload, PendingPage, StudentVerification, StudentVerificationService,
    SubmissionProfile, VerificationOverview, BLOCK_DURATION, MAX_DOCUMENT_SIZE_BYTES,
    MAX_REJECTIONS_PER_MONTH,
};

// Webhooks
pub use webhooks::{map_subscription_status, WebhookHandler};

use std::sync::Arc;

use sqlx::PgPool;

/// Main billing service that combines all billing functionality.
pub struct BillingService {
    pub catalog: PlanCatalog,
    pub ledger: LicenseLedger,
    pub subscriptions: SubscriptionService,
    pub verification: StudentVerificationService,
    pub webhooks: WebhookHandler,
    pub invariants: InvariantChecker,
    config: Arc<StripeConfig>,
}

impl BillingService {
    /// Create a billing service from environment variables.
    pub async fn from_env(pool: PgPool) -> BillingResult<Self> {
        let config = StripeConfig::from_env()?;

        let storage: Arc<dyn DocumentStorage> = Arc::new(
            S3DocumentStorage::from_env().map_err(|e| BillingError::Config(e.to_string()))?,
        );

        let notifier = match std::env::var("REDIS_URL") {
            Ok(url) => Notifier::connect(&url).await,
            Err(_) => {
                tracing::warn!("REDIS_URL not set, outbound notifications disabled");
                Notifier::disabled()
            }
        };

        Ok(Self::new(config, pool, storage, notifier))
    }

    /// Create a billing service with explicit collaborators.
    pub fn new(
        config: StripeConfig,
        pool: PgPool,
        storage: Arc<dyn DocumentStorage>,
        notifier: Notifier,
    ) -> Self {
        let config = Arc::new(config);
        let stripe = StripeClient::new((*config).clone());
        let catalog = PlanCatalog::new(pool.clone());
        let ledger = LicenseLedger::new(pool.clone());

        Self {
            catalog: catalog.clone(),
            ledger: ledger.clone(),
            subscriptions: SubscriptionService::new(
                stripe,
                catalog.clone(),
                ledger.clone(),
                notifier.clone(),
            ),
            verification: StudentVerificationService::new(
                pool.clone(),
                storage,
                catalog,
                ledger.clone(),
            ),
            webhooks: WebhookHandler::new(config.clone(), ledger, notifier),
            invariants: InvariantChecker::new(pool),
            config,
        }
    }

    /// Publishable key served to the frontend.
    pub fn publishable_key(&self) -> &str {
        &self.config.publishable_key
    }
}
