//! Stripe webhook endpoint.
//!
//! Signature failures return 400 and are not retried by the processor;
//! internal failures return 500 so the processor retries with backoff.
//! Handlers are idempotent, so the retry is safe.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::state::AppState;

pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let event = match state.billing.webhooks.verify_event(&body, signature) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "Stripe webhook signature verification failed");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Webhook signature verification failed" })),
            )
                .into_response();
        }
    };

    match state.billing.webhooks.handle_event(event).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "received": true }))).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Error processing Stripe webhook");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Internal server error processing webhook" })),
            )
                .into_response()
        }
    }
}
