//! HTTP routing.

pub mod billing;
pub mod verification;
pub mod webhook;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Public billing surface
        .route("/api/stripe/config", get(billing::get_config))
        .route("/api/stripe/plans", get(billing::list_plans))
        .route("/api/stripe/webhook", post(webhook::handle_webhook))
        // Tenant-scoped billing operations
        .route(
            "/api/stripe/create-checkout-session",
            post(billing::create_checkout_session),
        )
        .route(
            "/api/stripe/create-portal-session",
            post(billing::create_portal_session),
        )
        .route("/api/stripe/subscription", get(billing::get_subscription))
        .route(
            "/api/stripe/preview-plan-change",
            post(billing::preview_plan_change),
        )
        .route("/api/stripe/change-plan", post(billing::change_plan))
        .route(
            "/api/stripe/cancel-subscription",
            post(billing::cancel_subscription),
        )
        .route(
            "/api/stripe/reactivate-subscription",
            post(billing::reactivate_subscription),
        )
        .route("/api/stripe/invoices", get(billing::list_invoices))
        .route(
            "/api/stripe/admin/invariants",
            get(billing::check_invariants),
        )
        // Student verification workflow
        .route(
            "/api/stripe/student-verification/submit",
            post(verification::submit),
        )
        .route(
            "/api/stripe/student-verification/status",
            get(verification::status),
        )
        .route(
            "/api/stripe/student-verification/history",
            get(verification::history),
        )
        .route(
            "/api/stripe/student-verification/admin/pending",
            get(verification::list_pending),
        )
        .route(
            "/api/stripe/student-verification/admin/review/{verification_id}",
            post(verification::review),
        )
        .with_state(state)
}
