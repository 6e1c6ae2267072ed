//! API error type and HTTP status mapping.
//!
//! Gateway failures surface the processor's message verbatim to the caller;
//! everything internal collapses to a generic 500 body so nothing sensitive
//! leaks.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use time::OffsetDateTime;

use tenlic_billing::BillingError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Submissions are blocked")]
    Blocked { blocked_until: OffsetDateTime },

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Gateway timeout")]
    GatewayTimeout,

    #[error("{0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, json!({ "error": msg }))
            }
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, json!({ "error": msg })),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, json!({ "error": msg })),
            ApiError::Blocked { blocked_until } => (
                StatusCode::BAD_REQUEST,
                json!({
                    "error": "blocked",
                    "message": "Submissions are blocked due to repeated rejections",
                    "blocked_until": blocked_until
                        .format(&time::format_description::well_known::Rfc3339)
                        .unwrap_or_default(),
                }),
            ),
            ApiError::Gateway(msg) => (StatusCode::BAD_GATEWAY, json!({ "error": msg })),
            ApiError::GatewayTimeout => (
                StatusCode::GATEWAY_TIMEOUT,
                json!({ "error": "The billing gateway did not respond in time" }),
            ),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal server error" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::WebhookSignatureInvalid => {
                ApiError::Unauthorized("Webhook signature verification failed".to_string())
            }
            BillingError::PlanNotFound(_) => {
                ApiError::NotFound("Payment plan not found".to_string())
            }
            BillingError::LicenseNotFound(_) => {
                ApiError::NotFound("No active subscription found".to_string())
            }
            BillingError::VerificationNotFound(_) => {
                ApiError::NotFound("Verification not found".to_string())
            }
            BillingError::PlanPricingNotConfigured { .. } => {
                ApiError::Validation("Plan pricing not configured".to_string())
            }
            BillingError::InvalidDocument(msg) => ApiError::Validation(msg),
            BillingError::AlreadyReviewed(_) => {
                ApiError::Conflict("This verification has already been reviewed".to_string())
            }
            BillingError::PendingVerificationExists(_) => ApiError::Conflict(
                "A verification request is already under review".to_string(),
            ),
            BillingError::VerificationBlocked(blocked_until) => {
                ApiError::Blocked { blocked_until }
            }
            BillingError::StripeApi(msg) => ApiError::Gateway(msg),
            BillingError::GatewayTimeout(_) => ApiError::GatewayTimeout,
            BillingError::WebhookEventNotSupported(msg)
            | BillingError::Upload(msg)
            | BillingError::Database(msg)
            | BillingError::Config(msg)
            | BillingError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use uuid::Uuid;

    fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn billing_errors_map_to_expected_statuses() {
        assert_eq!(
            status_of(BillingError::WebhookSignatureInvalid.into()),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_of(BillingError::PlanNotFound(Uuid::new_v4()).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(BillingError::LicenseNotFound("t".to_string()).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(
                BillingError::PlanPricingNotConfigured {
                    plan_id: Uuid::new_v4(),
                    period: "annual",
                }
                .into()
            ),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(BillingError::AlreadyReviewed(Uuid::new_v4()).into()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(BillingError::PendingVerificationExists(Uuid::new_v4()).into()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(BillingError::StripeApi("boom".to_string()).into()),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(BillingError::GatewayTimeout("subscription.update").into()),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_of(BillingError::Database("oops".to_string()).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn gateway_message_is_surfaced_verbatim() {
        let err: ApiError = BillingError::StripeApi("card_declined: insufficient funds".into()).into();
        match err {
            ApiError::Gateway(msg) => assert_eq!(msg, "card_declined: insufficient funds"),
            other => panic!("expected Gateway, got {:?}", other),
        }
    }
}
