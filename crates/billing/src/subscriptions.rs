//! Plan change orchestration.
//!
//! Synchronous user-initiated billing actions: checkout, billing portal,
//! proration preview, plan changes, cancel/reactivate. Every flow calls the
//! gateway first and mutates the ledger only after gateway success, so a
//! crash in between leaves the ledger stale until the next
//! customer.subscription.updated event corrects it - a bounded
//! inconsistency window, not an error path.

use serde::Serialize;
use stripe::generated::billing::subscription::SubscriptionProrationBehavior;
use stripe::{
    BillingPortalSession, CheckoutSession, CheckoutSessionMode, CreateBillingPortalSession,
    CreateCheckoutSession, CreateCheckoutSessionLineItems, Subscription, SubscriptionId,
    UpdateSubscription, UpdateSubscriptionItems,
};
use time::OffsetDateTime;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use uuid::Uuid;

use tenlic_shared::{BillingPeriod, LicenseStatus};

use crate::catalog::{PaymentPlan, PlanCatalog};
use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::events::{Notifier, PlanUpdatedEvent};
use crate::ledger::{LicenseLedger, TenantLicense};

/// Retries applied to idempotent gateway reads. Mutating calls are never
/// retried; duplicate side effects on the processor are worse than a
/// surfaced error.
const GATEWAY_READ_RETRIES: usize = 2;

/// Payment method recorded when the free plan is activated via checkout.
pub const PAYMENT_METHOD_FREE: &str = "free";

/// Outcome of a checkout request.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckoutOutcome {
    /// Free-tier plan: activated directly, no gateway involvement.
    FreePlanActivated { redirect_url: String },
    /// Paid plan: redirect the user to the hosted checkout page.
    Redirect { session_id: String, url: String },
}

#[derive(Debug, Serialize)]
pub struct PlanSummary {
    pub id: Uuid,
    pub name: String,
    pub tier: String,
    pub monthly_price_cents: i64,
    pub included_seats: i32,
}

impl From<&PaymentPlan> for PlanSummary {
    fn from(plan: &PaymentPlan) -> Self {
        Self {
            id: plan.id,
            name: plan.name.clone(),
            tier: plan.tier.clone(),
            monthly_price_cents: plan.monthly_price_cents,
            included_seats: plan.included_seats,
        }
    }
}

/// Current subscription state as served to the frontend.
#[derive(Debug, Serialize)]
pub struct SubscriptionView {
    pub id: Uuid,
    pub tenant_id: String,
    pub status: String,
    #[serde(with = "time::serde::rfc3339")]
    pub license_start_date: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub license_end_date: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    pub auto_renew: bool,
    pub payment_method: String,
    pub payment_method_last4: Option<String>,
    pub plan: Option<PlanSummary>,
}

/// Read-only proration preview for a plan change.
#[derive(Debug, Serialize)]
pub struct PlanChangePreview {
    pub current_plan: Option<String>,
    pub current_tier: Option<String>,
    pub new_plan: String,
    pub new_tier: String,
    pub prorated_amount_cents: i64,
    pub currency: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub next_billing_date: Option<OffsetDateTime>,
    pub immediate_charge: bool,
}

/// Result of an executed plan change.
#[derive(Debug, Serialize)]
pub struct PlanChangeResult {
    pub subscription_id: String,
    pub subscription_status: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub current_period_end: Option<OffsetDateTime>,
    pub new_plan: PlanSummary,
}

#[derive(Debug, Serialize)]
pub struct CancelOutcome {
    #[serde(with = "time::serde::rfc3339::option")]
    pub cancel_at: Option<OffsetDateTime>,
}

/// Orchestrates gateway-first plan operations.
pub struct SubscriptionService {
    stripe: StripeClient,
    catalog: PlanCatalog,
    ledger: LicenseLedger,
    notifier: Notifier,
    http: reqwest::Client,
}

impl SubscriptionService {
    pub fn new(
        stripe: StripeClient,
        catalog: PlanCatalog,
        ledger: LicenseLedger,
        notifier: Notifier,
    ) -> Self {
        Self {
            stripe,
            catalog,
            ledger,
            notifier,
            http: reqwest::Client::new(),
        }
    }

    /// Create a hosted checkout session for a plan, or activate the free
    /// plan directly when no external billing is required. Repeated free
    /// activations simply re-assert the same state.
    pub async fn create_checkout_session(
        &self,
        tenant_id: &str,
        plan_id: Uuid,
        period: BillingPeriod,
        success_url: Option<&str>,
        cancel_url: Option<&str>,
        customer_email: Option<&str>,
    ) -> BillingResult<CheckoutOutcome> {
        let plan = self.catalog.find_active(plan_id).await?;

        if plan.is_student_tier() || plan.is_free() {
            let license = self
                .ledger
                .activate_free_plan(tenant_id, plan.id, PAYMENT_METHOD_FREE)
                .await?;
            tracing::info!(
                tenant_id = %tenant_id,
                plan_id = %plan.id,
                license_id = %license.id,
                "Activated free plan without external billing"
            );
            return Ok(CheckoutOutcome::FreePlanActivated {
                redirect_url: "/dashboard?plan=activated".to_string(),
            });
        }

        let price_id = plan
            .price_id_for(period)
            .ok_or(BillingError::PlanPricingNotConfigured {
                plan_id: plan.id,
                period: period.as_str(),
            })?
            .to_string();

        let base_url = &self.stripe.config().app_base_url;
        let default_success = format!("{}/dashboard?payment=success", base_url);
        let default_cancel = format!("{}/upgrade?payment=cancelled", base_url);
        let success_url = success_url.unwrap_or(&default_success);
        let cancel_url = cancel_url.unwrap_or(&default_cancel);

        let mut metadata = std::collections::HashMap::new();
        metadata.insert("tenant_id".to_string(), tenant_id.to_string());
        metadata.insert("plan_id".to_string(), plan.id.to_string());
        metadata.insert("period".to_string(), period.as_str().to_string());

        let params = CreateCheckoutSession {
            mode: Some(CheckoutSessionMode::Subscription),
            line_items: Some(vec![CreateCheckoutSessionLineItems {
                price: Some(price_id),
                quantity: Some(1),
                ..Default::default()
            }]),
            success_url: Some(success_url),
            cancel_url: Some(cancel_url),
            metadata: Some(metadata),
            customer_email,
            ..Default::default()
        };

        let session = self
            .stripe
            .bounded(
                "checkout_session.create",
                CheckoutSession::create(self.stripe.inner(), params),
            )
            .await?;

        let url = session.url.clone().ok_or_else(|| {
            BillingError::Internal("checkout session has no redirect URL".to_string())
        })?;

        tracing::info!(
            tenant_id = %tenant_id,
            session_id = %session.id,
            plan_id = %plan.id,
            period = period.as_str(),
            "Created checkout session"
        );

        Ok(CheckoutOutcome::Redirect {
            session_id: session.id.to_string(),
            url,
        })
    }

    /// Create a billing-portal session for subscription self-management.
    pub async fn create_portal_session(
        &self,
        tenant_id: &str,
        return_url: Option<&str>,
    ) -> BillingResult<String> {
        let license = self.require_active_license(tenant_id).await?;
        let customer_ref = license
            .stripe_customer_id
            .as_deref()
            .ok_or_else(|| BillingError::LicenseNotFound(tenant_id.to_string()))?;

        let customer_id = customer_ref
            .parse::<stripe::CustomerId>()
            .map_err(|e| BillingError::Internal(format!("invalid customer ref: {}", e)))?;

        let default_return = format!(
            "{}/dashboard/settings/billing",
            self.stripe.config().app_base_url
        );
        let return_url = return_url.unwrap_or(&default_return);

        let mut params = CreateBillingPortalSession::new(customer_id);
        params.return_url = Some(return_url);

        let session = self
            .stripe
            .bounded(
                "billing_portal_session.create",
                BillingPortalSession::create(self.stripe.inner(), params),
            )
            .await?;

        Ok(session.url)
    }

    /// Current subscription state for the tenant.
    pub async fn current_subscription(&self, tenant_id: &str) -> BillingResult<SubscriptionView> {
        let license = self.require_active_license(tenant_id).await?;

        let plan = match license.plan_id {
            Some(plan_id) => self.catalog.find(plan_id).await?,
            None => None,
        };

        Ok(SubscriptionView {
            id: license.id,
            tenant_id: license.tenant_id,
            status: license.status,
            license_start_date: license.license_start_date,
            license_end_date: license.license_end_date,
            expires_at: license.expires_at,
            auto_renew: license.auto_renew,
            payment_method: license.payment_method,
            payment_method_last4: license.payment_method_last4,
            plan: plan.as_ref().map(PlanSummary::from),
        })
    }

    /// Preview the proration for swapping the subscription to a new plan.
    /// Read-only: no ledger mutation.
    pub async fn preview_plan_change(
        &self,
        tenant_id: &str,
        plan_id: Uuid,
        period: BillingPeriod,
    ) -> BillingResult<PlanChangePreview> {
        let license = self.require_subscribed_license(tenant_id).await?;
        let new_plan = self.catalog.find_active(plan_id).await?;
        let new_price_id = new_plan
            .price_id_for(period)
            .ok_or(BillingError::PlanPricingNotConfigured {
                plan_id: new_plan.id,
                period: period.as_str(),
            })?
            .to_string();

        let sub_ref = license
            .stripe_subscription_id
            .as_deref()
            .unwrap_or_default()
            .to_string();
        let subscription = self.retrieve_subscription(&sub_ref).await?;
        let item_id = subscription
            .items
            .data
            .first()
            .map(|item| item.id.to_string())
            .ok_or_else(|| BillingError::Internal("no subscription items found".to_string()))?;

        let current_plan = match license.plan_id {
            Some(id) => self.catalog.find(id).await?,
            None => None,
        };

        // The typed client has no binding for invoice previews; call the
        // endpoint directly with Stripe's nested form encoding.
        let customer_ref = license.stripe_customer_id.as_deref().unwrap_or_default();
        let form_params = [
            ("customer", customer_ref),
            ("subscription", sub_ref.as_str()),
            ("subscription_details[items][0][id]", item_id.as_str()),
            ("subscription_details[items][0][price]", new_price_id.as_str()),
            ("subscription_details[proration_behavior]", "create_prorations"),
        ];

        let response = self
            .http
            .post("https://api.stripe.com/v1/invoices/create_preview")
            .bearer_auth(&self.stripe.config().secret_key)
            .form(&form_params)
            .timeout(self.stripe.config().gateway_timeout)
            .send()
            .await
            .map_err(|e| BillingError::StripeApi(format!("invoice preview request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Stripe invoice preview failed");
            return Err(BillingError::StripeApi(format!(
                "invoice preview failed ({}): {}",
                status, body
            )));
        }

        let preview: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BillingError::StripeApi(format!("invalid preview response: {}", e)))?;

        let prorated_amount_cents = preview["amount_due"].as_i64().unwrap_or(0);
        let currency = preview["currency"]
            .as_str()
            .unwrap_or("usd")
            .to_string();
        let next_billing_date =
            OffsetDateTime::from_unix_timestamp(subscription.current_period_end).ok();

        tracing::info!(
            tenant_id = %tenant_id,
            new_plan_id = %new_plan.id,
            prorated_amount_cents,
            "Previewed plan change"
        );

        Ok(PlanChangePreview {
            current_plan: current_plan.as_ref().map(|p| p.name.clone()),
            current_tier: current_plan.as_ref().map(|p| p.tier.clone()),
            new_plan: new_plan.name.clone(),
            new_tier: new_plan.tier.clone(),
            prorated_amount_cents,
            currency,
            next_billing_date,
            immediate_charge: prorated_amount_cents > 0,
        })
    }

    /// Execute a plan change: swap the subscription item at the gateway,
    /// then point the ledger at the new plan and notify downstream. A
    /// gateway failure leaves the ledger untouched and surfaces unchanged.
    pub async fn change_plan(
        &self,
        tenant_id: &str,
        plan_id: Uuid,
        period: BillingPeriod,
    ) -> BillingResult<PlanChangeResult> {
        let license = self.require_subscribed_license(tenant_id).await?;
        let new_plan = self.catalog.find_active(plan_id).await?;
        let new_price_id = new_plan
            .price_id_for(period)
            .ok_or(BillingError::PlanPricingNotConfigured {
                plan_id: new_plan.id,
                period: period.as_str(),
            })?
            .to_string();

        let sub_ref = license
            .stripe_subscription_id
            .as_deref()
            .unwrap_or_default()
            .to_string();
        let subscription = self.retrieve_subscription(&sub_ref).await?;
        let item_id = subscription
            .items
            .data
            .first()
            .map(|item| item.id.to_string())
            .ok_or_else(|| BillingError::Internal("no subscription items found".to_string()))?;

        let sub_id = parse_subscription_id(&sub_ref)?;
        let params = UpdateSubscription {
            items: Some(vec![UpdateSubscriptionItems {
                id: Some(item_id),
                price: Some(new_price_id),
                ..Default::default()
            }]),
            proration_behavior: Some(SubscriptionProrationBehavior::CreateProrations),
            ..Default::default()
        };

        let updated = self
            .stripe
            .bounded(
                "subscription.update",
                Subscription::update(self.stripe.inner(), &sub_id, params),
            )
            .await?;

        // Gateway accepted the swap; only now does the ledger move.
        self.ledger.change_plan(tenant_id, new_plan.id).await?;

        self.notifier
            .publish_plan_updated(&PlanUpdatedEvent {
                tenant_id: tenant_id.to_string(),
                plan_id: new_plan.id,
                plan_tier: new_plan.tier.clone(),
                updated_at: OffsetDateTime::now_utc(),
            })
            .await;

        tracing::info!(
            tenant_id = %tenant_id,
            subscription_id = %updated.id,
            new_plan = %new_plan.name,
            "Plan changed"
        );

        Ok(PlanChangeResult {
            subscription_id: updated.id.to_string(),
            subscription_status: updated.status.to_string(),
            current_period_end: OffsetDateTime::from_unix_timestamp(updated.current_period_end)
                .ok(),
            new_plan: PlanSummary::from(&new_plan),
        })
    }

    /// Schedule cancellation at period end. The subscription stays live
    /// until then; customer.subscription.deleted finishes the job.
    pub async fn cancel_subscription(&self, tenant_id: &str) -> BillingResult<CancelOutcome> {
        let license = self.require_subscribed_license(tenant_id).await?;
        let sub_ref = license.stripe_subscription_id.as_deref().unwrap_or_default();
        let sub_id = parse_subscription_id(sub_ref)?;

        let params = UpdateSubscription {
            cancel_at_period_end: Some(true),
            ..Default::default()
        };
        let subscription = self
            .stripe
            .bounded(
                "subscription.update",
                Subscription::update(self.stripe.inner(), &sub_id, params),
            )
            .await?;

        self.ledger
            .set_status(tenant_id, LicenseStatus::Cancelling)
            .await?;

        let cancel_at = OffsetDateTime::from_unix_timestamp(subscription.current_period_end).ok();

        tracing::info!(
            tenant_id = %tenant_id,
            subscription_id = %subscription.id,
            cancel_at = ?cancel_at,
            "Subscription cancellation scheduled"
        );

        Ok(CancelOutcome { cancel_at })
    }

    /// Undo a scheduled cancellation. Only permitted while the license is
    /// still active or cancelling.
    pub async fn reactivate_subscription(&self, tenant_id: &str) -> BillingResult<()> {
        let license = self.require_subscribed_license(tenant_id).await?;
        match license.status() {
            Some(LicenseStatus::Active) | Some(LicenseStatus::Cancelling) => {}
            _ => return Err(BillingError::LicenseNotFound(tenant_id.to_string())),
        }

        let sub_ref = license.stripe_subscription_id.as_deref().unwrap_or_default();
        let sub_id = parse_subscription_id(sub_ref)?;

        let params = UpdateSubscription {
            cancel_at_period_end: Some(false),
            ..Default::default()
        };
        let subscription = self
            .stripe
            .bounded(
                "subscription.update",
                Subscription::update(self.stripe.inner(), &sub_id, params),
            )
            .await?;

        self.ledger
            .set_status(tenant_id, LicenseStatus::Active)
            .await?;

        tracing::info!(
            tenant_id = %tenant_id,
            subscription_id = %subscription.id,
            "Subscription reactivated"
        );

        Ok(())
    }

    async fn require_active_license(&self, tenant_id: &str) -> BillingResult<TenantLicense> {
        self.ledger
            .get_active_license(tenant_id)
            .await?
            .ok_or_else(|| BillingError::LicenseNotFound(tenant_id.to_string()))
    }

    /// An active license that also carries a gateway subscription reference.
    async fn require_subscribed_license(&self, tenant_id: &str) -> BillingResult<TenantLicense> {
        let license = self.require_active_license(tenant_id).await?;
        if license.stripe_subscription_id.is_none() {
            return Err(BillingError::LicenseNotFound(tenant_id.to_string()));
        }
        Ok(license)
    }

    /// Idempotent gateway read with bounded retry.
    async fn retrieve_subscription(&self, sub_ref: &str) -> BillingResult<Subscription> {
        let sub_id = parse_subscription_id(sub_ref)?;
        let strategy = ExponentialBackoff::from_millis(250)
            .map(jitter)
            .take(GATEWAY_READ_RETRIES);

        Retry::spawn(strategy, || {
            self.stripe.bounded(
                "subscription.retrieve",
                Subscription::retrieve(self.stripe.inner(), &sub_id, &[]),
            )
        })
        .await
    }
}

fn parse_subscription_id(sub_ref: &str) -> BillingResult<SubscriptionId> {
    sub_ref
        .parse::<SubscriptionId>()
        .map_err(|e| BillingError::Internal(format!("invalid subscription ref: {}", e)))
}
