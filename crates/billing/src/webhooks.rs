//! Stripe webhook reconciliation.
//!
//! Translates inbound payment events into license ledger mutations under
//! at-least-once, out-of-order delivery. Signature verification happens
//! before any parsing; events that reference unknown tenants, customers or
//! subscriptions are logged and acknowledged so the processor stops
//! retrying them, and every handler is safe to re-run with identical input.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use stripe::{Event, EventObject, EventType, Invoice, Subscription, Webhook};
use time::OffsetDateTime;
use uuid::Uuid;

use tenlic_shared::LicenseStatus;

use crate::client::StripeConfig;
use crate::error::{BillingError, BillingResult};
use crate::events::{Notifier, SubscriptionStatusChangedEvent};
use crate::ledger::LicenseLedger;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a webhook signature timestamp.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Map Stripe's subscription status onto the license status table.
/// Unrecognized values return `None`, which leaves the stored status
/// untouched.
pub fn map_subscription_status(status: stripe::SubscriptionStatus) -> Option<LicenseStatus> {
    use stripe::SubscriptionStatus as S;
    match status {
        S::Active => Some(LicenseStatus::Active),
        S::PastDue => Some(LicenseStatus::PastDue),
        S::Canceled => Some(LicenseStatus::Cancelled),
        S::Unpaid => Some(LicenseStatus::PaymentFailed),
        S::Trialing => Some(LicenseStatus::Trial),
        _ => None,
    }
}

/// Reconciles verified Stripe events against the license ledger.
pub struct WebhookHandler {
    config: Arc<StripeConfig>,
    ledger: LicenseLedger,
    notifier: Notifier,
}

impl WebhookHandler {
    pub fn new(config: Arc<StripeConfig>, ledger: LicenseLedger, notifier: Notifier) -> Self {
        Self {
            config,
            ledger,
            notifier,
        }
    }

    /// Verify and parse a Stripe webhook payload.
    ///
    /// Tries the library's verification first, then falls back to manual
    /// HMAC-SHA256 verification for payloads from newer Stripe API versions
    /// the typed parser rejects. Either way, nothing is parsed before the
    /// signature checks out.
    pub fn verify_event(&self, payload: &str, signature: &str) -> BillingResult<Event> {
        let webhook_secret = &self.config.webhook_secret;

        match Webhook::construct_event(payload, signature, webhook_secret) {
            Ok(event) => return Ok(event),
            Err(e) => {
                tracing::debug!(error = %e, "Library webhook verification failed, trying manual verification");
            }
        }

        // Signature header format: t=<unix>,v1=<hex>,v0=<hex>
        let mut timestamp: Option<i64> = None;
        let mut v1_signature: Option<&str> = None;
        for part in signature.split(',') {
            match part.split_once('=') {
                Some(("t", value)) => timestamp = value.parse().ok(),
                Some(("v1", value)) => v1_signature = Some(value),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(BillingError::WebhookSignatureInvalid)?;
        let v1_signature = v1_signature.ok_or(BillingError::WebhookSignatureInvalid)?;

        let now = OffsetDateTime::now_utc().unix_timestamp();
        if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            tracing::warn!(timestamp, now, "Webhook signature timestamp outside tolerance");
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let secret_key = webhook_secret
            .strip_prefix("whsec_")
            .unwrap_or(webhook_secret);
        let signed_payload = format!("{}.{}", timestamp, payload);

        let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
            .map_err(|_| BillingError::WebhookSignatureInvalid)?;
        mac.update(signed_payload.as_bytes());
        let computed = hex::encode(mac.finalize().into_bytes());

        if computed != v1_signature {
            tracing::warn!("Webhook signature mismatch");
            return Err(BillingError::WebhookSignatureInvalid);
        }

        serde_json::from_str(payload).map_err(|e| {
            tracing::error!(error = %e, "Verified webhook payload failed to parse");
            BillingError::WebhookSignatureInvalid
        })
    }

    /// Dispatch a verified event. Unhandled event kinds are acknowledged so
    /// the processor does not retry events we intentionally ignore.
    pub async fn handle_event(&self, event: Event) -> BillingResult<()> {
        tracing::info!(
            event_type = %event.type_,
            event_id = %event.id,
            "Processing Stripe webhook event"
        );

        match event.type_ {
            EventType::CheckoutSessionCompleted => self.handle_checkout_completed(event).await,
            EventType::InvoicePaymentSucceeded => self.handle_invoice_payment_succeeded(event).await,
            EventType::InvoicePaymentFailed => self.handle_invoice_payment_failed(event).await,
            EventType::CustomerSubscriptionDeleted => self.handle_subscription_deleted(event).await,
            EventType::CustomerSubscriptionUpdated => self.handle_subscription_updated(event).await,
            _ => {
                tracing::info!(
                    event_type = %event.type_,
                    event_id = %event.id,
                    "Unhandled Stripe event type - acknowledged without action"
                );
                Ok(())
            }
        }
    }

    /// checkout.session.completed: attach gateway references to the
    /// tenant's license, creating it if the event wins the race against the
    /// synchronous checkout flow. Idempotent per tenant.
    async fn handle_checkout_completed(&self, event: Event) -> BillingResult<()> {
        let session = match event.data.object {
            EventObject::CheckoutSession(session) => session,
            _ => {
                return Err(BillingError::WebhookEventNotSupported(
                    "expected CheckoutSession".to_string(),
                ))
            }
        };

        let Some(tenant_id) = session
            .metadata
            .as_ref()
            .and_then(|m| m.get("tenant_id"))
            .cloned()
        else {
            tracing::warn!(session_id = %session.id, "checkout.session.completed without tenant_id metadata - dropped");
            return Ok(());
        };

        let plan_id = session
            .metadata
            .as_ref()
            .and_then(|m| m.get("plan_id"))
            .and_then(|raw| Uuid::parse_str(raw).ok());

        let customer_ref = session.customer.as_ref().map(expandable_customer_id);
        let subscription_ref = session.subscription.as_ref().map(|s| s.id().to_string());

        let license = self
            .ledger
            .upsert_on_checkout(
                &tenant_id,
                plan_id,
                customer_ref.as_deref(),
                subscription_ref.as_deref(),
            )
            .await?;

        tracing::info!(
            tenant_id = %tenant_id,
            license_id = %license.id,
            subscription_id = ?subscription_ref,
            "Checkout completed, license activated"
        );

        Ok(())
    }

    /// invoice.payment_succeeded: refresh the license expiry and append the
    /// invoice record. Idempotent on the external invoice id.
    async fn handle_invoice_payment_succeeded(&self, event: Event) -> BillingResult<()> {
        let invoice = self.extract_invoice(event)?;

        let Some(customer_ref) = invoice.customer.as_ref().map(expandable_customer_id) else {
            tracing::warn!(invoice_id = %invoice.id, "invoice.payment_succeeded without customer - dropped");
            return Ok(());
        };

        let period_end = invoice
            .period_end
            .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok());

        let Some(license) = self
            .ledger
            .record_successful_payment(&customer_ref, period_end)
            .await?
        else {
            tracing::warn!(
                invoice_id = %invoice.id,
                customer_ref = %customer_ref,
                "invoice.payment_succeeded for unknown customer - dropped"
            );
            return Ok(());
        };

        let payment_intent_id = invoice
            .payment_intent
            .as_ref()
            .map(|pi| pi.id().to_string());
        let amount_cents = invoice.amount_paid.unwrap_or(0);
        let currency = invoice
            .currency
            .map(|c| c.to_string())
            .unwrap_or_else(|| "usd".to_string());

        let inserted = self
            .ledger
            .append_invoice(
                &license,
                invoice.id.as_str(),
                payment_intent_id.as_deref(),
                amount_cents,
                &currency,
            )
            .await?;

        if inserted {
            tracing::info!(
                tenant_id = %license.tenant_id,
                invoice_id = %invoice.id,
                amount_cents,
                "Invoice payment recorded"
            );
        } else {
            tracing::info!(
                tenant_id = %license.tenant_id,
                invoice_id = %invoice.id,
                "Duplicate invoice.payment_succeeded delivery - invoice already recorded"
            );
        }

        Ok(())
    }

    /// invoice.payment_failed: flag the license. Idempotent by construction.
    async fn handle_invoice_payment_failed(&self, event: Event) -> BillingResult<()> {
        let invoice = self.extract_invoice(event)?;

        let Some(customer_ref) = invoice.customer.as_ref().map(expandable_customer_id) else {
            tracing::warn!(invoice_id = %invoice.id, "invoice.payment_failed without customer - dropped");
            return Ok(());
        };

        match self.ledger.mark_payment_failed(&customer_ref).await? {
            Some(license) => {
                tracing::warn!(
                    tenant_id = %license.tenant_id,
                    invoice_id = %invoice.id,
                    "Invoice payment failed, license flagged"
                );
            }
            None => {
                tracing::warn!(
                    invoice_id = %invoice.id,
                    customer_ref = %customer_ref,
                    "invoice.payment_failed for unknown customer - dropped"
                );
            }
        }

        Ok(())
    }

    /// customer.subscription.deleted: terminal cancellation.
    async fn handle_subscription_deleted(&self, event: Event) -> BillingResult<()> {
        let subscription = self.extract_subscription(event)?;

        match self
            .ledger
            .mark_subscription_deleted(subscription.id.as_str())
            .await?
        {
            Some(license) => {
                tracing::info!(
                    tenant_id = %license.tenant_id,
                    subscription_id = %subscription.id,
                    "Subscription deleted, license cancelled"
                );
            }
            None => {
                tracing::warn!(
                    subscription_id = %subscription.id,
                    "customer.subscription.deleted for unknown subscription - dropped"
                );
            }
        }

        Ok(())
    }

    /// customer.subscription.updated: map the external status through the
    /// fixed lookup table and refresh expiry, then emit a status-changed
    /// notification. Safe to replay.
    async fn handle_subscription_updated(&self, event: Event) -> BillingResult<()> {
        let subscription = self.extract_subscription(event)?;

        let mapped = map_subscription_status(subscription.status);
        let ended_at = subscription
            .ended_at
            .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok());

        let Some(license) = self
            .ledger
            .apply_status_transition(subscription.id.as_str(), mapped, ended_at)
            .await?
        else {
            tracing::warn!(
                subscription_id = %subscription.id,
                "customer.subscription.updated for unknown subscription - dropped"
            );
            return Ok(());
        };

        tracing::info!(
            tenant_id = %license.tenant_id,
            subscription_id = %subscription.id,
            external_status = ?subscription.status,
            status = %license.status,
            "Subscription updated"
        );

        self.notifier
            .publish_subscription_status_changed(&SubscriptionStatusChangedEvent {
                stripe_subscription_id: subscription.id.to_string(),
                stripe_customer_id: Some(expandable_customer_id(&subscription.customer)),
                status: license.status.clone(),
                ended_at,
                occurred_at: OffsetDateTime::now_utc(),
            })
            .await;

        Ok(())
    }

    fn extract_subscription(&self, event: Event) -> BillingResult<Subscription> {
        match event.data.object {
            EventObject::Subscription(subscription) => Ok(subscription),
            _ => Err(BillingError::WebhookEventNotSupported(
                "expected Subscription".to_string(),
            )),
        }
    }

    fn extract_invoice(&self, event: Event) -> BillingResult<Invoice> {
        match event.data.object {
            EventObject::Invoice(invoice) => Ok(invoice),
            _ => Err(BillingError::WebhookEventNotSupported(
                "expected Invoice".to_string(),
            )),
        }
    }
}

fn expandable_customer_id(customer: &stripe::Expandable<stripe::Customer>) -> String {
    match customer {
        stripe::Expandable::Id(id) => id.to_string(),
        stripe::Expandable::Object(c) => c.id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_follows_fixed_table() {
        use stripe::SubscriptionStatus as S;

        assert_eq!(map_subscription_status(S::Active), Some(LicenseStatus::Active));
        assert_eq!(map_subscription_status(S::PastDue), Some(LicenseStatus::PastDue));
        assert_eq!(map_subscription_status(S::Canceled), Some(LicenseStatus::Cancelled));
        assert_eq!(
            map_subscription_status(S::Unpaid),
            Some(LicenseStatus::PaymentFailed)
        );
        assert_eq!(map_subscription_status(S::Trialing), Some(LicenseStatus::Trial));
    }

    #[test]
    fn unrecognized_statuses_leave_license_unchanged() {
        use stripe::SubscriptionStatus as S;

        assert_eq!(map_subscription_status(S::Incomplete), None);
        assert_eq!(map_subscription_status(S::IncompleteExpired), None);
        assert_eq!(map_subscription_status(S::Paused), None);
    }

    #[test]
    fn signature_tolerance_is_five_minutes() {
        assert_eq!(SIGNATURE_TOLERANCE_SECS, 300);
    }
}
