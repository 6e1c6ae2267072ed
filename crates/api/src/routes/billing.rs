//! Billing routes: catalog, checkout, portal, plan changes.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use tenlic_billing::{CheckoutOutcome, PlanChangePreview, PlanChangeResult, SubscriptionView};
use tenlic_shared::BillingPeriod;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateCheckoutSessionRequest {
    pub plan_id: Uuid,
    pub period: Option<String>,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePortalSessionRequest {
    pub return_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PlanChangeRequest {
    pub plan_id: Uuid,
    pub period: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PlanListItem {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub tier: String,
    pub monthly_price_cents: i64,
    pub yearly_price_cents: Option<i64>,
    pub included_seats: i32,
}

/// Publishable key for the frontend. Public.
pub async fn get_config(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "publishable_key": state.billing.publishable_key() }))
}

/// Active plans, cheapest first. Public.
pub async fn list_plans(State(state): State<AppState>) -> ApiResult<Json<Vec<PlanListItem>>> {
    let plans = state.billing.catalog.list_active().await?;
    let items = plans
        .into_iter()
        .map(|p| PlanListItem {
            id: p.id,
            name: p.name,
            description: p.description,
            tier: p.tier,
            monthly_price_cents: p.monthly_price_cents,
            yearly_price_cents: p.yearly_price_cents,
            included_seats: p.included_seats,
        })
        .collect();

    Ok(Json(items))
}

pub async fn create_checkout_session(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateCheckoutSessionRequest>,
) -> ApiResult<Json<CheckoutOutcome>> {
    let tenant_id = auth.require_tenant()?;
    let period = BillingPeriod::parse_or_monthly(req.period.as_deref().unwrap_or("monthly"));

    let outcome = state
        .billing
        .subscriptions
        .create_checkout_session(
            tenant_id,
            req.plan_id,
            period,
            req.success_url.as_deref(),
            req.cancel_url.as_deref(),
            auth.email.as_deref(),
        )
        .await?;

    Ok(Json(outcome))
}

pub async fn create_portal_session(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreatePortalSessionRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let tenant_id = auth.require_tenant()?;
    let url = state
        .billing
        .subscriptions
        .create_portal_session(tenant_id, req.return_url.as_deref())
        .await?;

    Ok(Json(json!({ "url": url })))
}

pub async fn get_subscription(
    State(state): State<AppState>,
    auth: AuthUser,
) -> ApiResult<Json<SubscriptionView>> {
    let tenant_id = auth.require_tenant()?;
    let view = state
        .billing
        .subscriptions
        .current_subscription(tenant_id)
        .await?;

    Ok(Json(view))
}

pub async fn preview_plan_change(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<PlanChangeRequest>,
) -> ApiResult<Json<PlanChangePreview>> {
    let tenant_id = auth.require_tenant()?;
    let period = BillingPeriod::parse_or_monthly(req.period.as_deref().unwrap_or("monthly"));

    let preview = state
        .billing
        .subscriptions
        .preview_plan_change(tenant_id, req.plan_id, period)
        .await?;

    Ok(Json(preview))
}

pub async fn change_plan(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<PlanChangeRequest>,
) -> ApiResult<Json<PlanChangeResult>> {
    let tenant_id = auth.require_tenant()?;
    let period = BillingPeriod::parse_or_monthly(req.period.as_deref().unwrap_or("monthly"));

    let result = state
        .billing
        .subscriptions
        .change_plan(tenant_id, req.plan_id, period)
        .await?;

    Ok(Json(result))
}

pub async fn cancel_subscription(
    State(state): State<AppState>,
    auth: AuthUser,
) -> ApiResult<Json<serde_json::Value>> {
    let tenant_id = auth.require_tenant()?;
    let outcome = state
        .billing
        .subscriptions
        .cancel_subscription(tenant_id)
        .await?;

    Ok(Json(json!({
        "success": true,
        "cancel_at": outcome.cancel_at.map(|t| t
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default()),
        "message": "Subscription will be cancelled at the end of the current billing period",
    })))
}

pub async fn reactivate_subscription(
    State(state): State<AppState>,
    auth: AuthUser,
) -> ApiResult<Json<serde_json::Value>> {
    let tenant_id = auth.require_tenant()?;
    state
        .billing
        .subscriptions
        .reactivate_subscription(tenant_id)
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Subscription reactivated successfully",
    })))
}

#[derive(Debug, Serialize)]
pub struct InvoiceListItem {
    pub id: Uuid,
    pub stripe_invoice_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub status: String,
    pub paid_at: Option<String>,
}

/// Payment history for the tenant, newest first.
pub async fn list_invoices(
    State(state): State<AppState>,
    auth: AuthUser,
) -> ApiResult<Json<Vec<InvoiceListItem>>> {
    let tenant_id = auth.require_tenant()?;
    let invoices = state.billing.ledger.list_invoices(tenant_id).await?;

    let items = invoices
        .into_iter()
        .map(|inv| InvoiceListItem {
            id: inv.id,
            stripe_invoice_id: inv.stripe_invoice_id,
            amount_cents: inv.amount_cents,
            currency: inv.currency,
            status: inv.status,
            paid_at: inv.paid_at.and_then(|t| {
                t.format(&time::format_description::well_known::Rfc3339).ok()
            }),
        })
        .collect();

    Ok(Json(items))
}

/// Run the ledger consistency checks. Reviewer/admin only; handy after a
/// webhook replay.
pub async fn check_invariants(
    State(state): State<AppState>,
    auth: AuthUser,
) -> ApiResult<Json<tenlic_billing::InvariantCheckSummary>> {
    auth.require_reviewer()?;
    let summary = state.billing.invariants.run_all_checks().await?;
    Ok(Json(summary))
}
