//! Billing error taxonomy.
//!
//! Variants group into the categories the API layer maps onto HTTP statuses:
//! authentication failures (webhook signature), not-found, validation,
//! gateway failures (surfaced verbatim to synchronous callers), and
//! conflicts (verification workflow).

use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Webhook signature verification failed")]
    WebhookSignatureInvalid,

    #[error("Unsupported webhook payload: {0}")]
    WebhookEventNotSupported(String),

    #[error("Payment plan not found: {0}")]
    PlanNotFound(Uuid),

    #[error("No active license found for tenant {0}")]
    LicenseNotFound(String),

    #[error("Verification not found: {0}")]
    VerificationNotFound(Uuid),

    #[error("No price configured for plan {plan_id} ({period})")]
    PlanPricingNotConfigured { plan_id: Uuid, period: &'static str },

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Verification has already been reviewed")]
    AlreadyReviewed(Uuid),

    #[error("A pending verification already exists for this user")]
    PendingVerificationExists(Uuid),

    #[error("Submissions are blocked until {0}")]
    VerificationBlocked(OffsetDateTime),

    #[error("Stripe API error: {0}")]
    StripeApi(String),

    #[error("Gateway call timed out: {0}")]
    GatewayTimeout(&'static str),

    #[error("Document upload failed: {0}")]
    Upload(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        BillingError::StripeApi(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
