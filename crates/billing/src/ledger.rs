//! License ledger.
//!
//! The authoritative per-tenant subscription record. The ledger is a
//! projection of the gateway's billing state: webhook handlers and the plan
//! change orchestrator both write here, so every mutation is a single
//! atomic INSERT-ON-CONFLICT or UPDATE statement. No read-modify-write
//! cycles exist; concurrent writers resolve to last-write-wins at the row
//! level, and the `version` column records how many mutations a row has
//! absorbed. The partial unique index on `(tenant_id) WHERE is_active`
//! enforces at most one active license per tenant.

use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use tenlic_shared::LicenseStatus;

use crate::error::BillingResult;

/// Extra time past a billing period's end before a license is treated as
/// expired, absorbing webhook and settlement delay.
pub const PAYMENT_GRACE_WINDOW: Duration = Duration::days(3);

/// Sentinel expiry for free-tier licenses; far enough out to never trip
/// expiry checks.
pub const FREE_TIER_NON_EXPIRING_HORIZON: Duration = Duration::days(365 * 100);

/// Provisional license period granted when checkout-completed creates a row
/// before the first invoice event has arrived.
pub const CHECKOUT_INITIAL_PERIOD: Duration = Duration::days(30);

/// One tenant's entitlement record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TenantLicense {
    pub id: Uuid,
    pub tenant_id: String,
    pub plan_id: Option<Uuid>,
    pub status: String,
    pub is_active: bool,
    pub license_start_date: OffsetDateTime,
    pub license_end_date: Option<OffsetDateTime>,
    pub auto_renew: bool,
    pub payment_method: String,
    pub payment_method_last4: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub expires_at: Option<OffsetDateTime>,
    pub last_payment_at: Option<OffsetDateTime>,
    pub cancelled_at: Option<OffsetDateTime>,
    pub version: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl TenantLicense {
    pub fn status(&self) -> Option<LicenseStatus> {
        LicenseStatus::parse(&self.status)
    }
}

/// Append-only record of a successful charge.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PaymentInvoice {
    pub id: Uuid,
    pub tenant_id: String,
    pub license_id: Uuid,
    pub stripe_invoice_id: Option<String>,
    pub stripe_payment_intent_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub status: String,
    pub paid_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Single-row upsert access to `tenant_licenses` and `payment_invoices`.
#[derive(Clone)]
pub struct LicenseLedger {
    pool: PgPool,
}

impl LicenseLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_active_license(&self, tenant_id: &str) -> BillingResult<Option<TenantLicense>> {
        let license = sqlx::query_as::<_, TenantLicense>(
            "SELECT * FROM tenant_licenses WHERE tenant_id = $1 AND is_active",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(license)
    }

    /// Apply a completed checkout: attach gateway references and activate.
    ///
    /// Creating the row here covers the race where checkout-completed lands
    /// before any license exists; re-delivery only re-asserts the same
    /// values. A NULL incoming plan preserves whatever plan the row already
    /// carries.
    pub async fn upsert_on_checkout(
        &self,
        tenant_id: &str,
        plan_id: Option<Uuid>,
        customer_ref: Option<&str>,
        subscription_ref: Option<&str>,
    ) -> BillingResult<TenantLicense> {
        let now = OffsetDateTime::now_utc();
        let license = sqlx::query_as::<_, TenantLicense>(
            r#"
            INSERT INTO tenant_licenses (
                tenant_id, plan_id, status, is_active, license_start_date,
                license_end_date, payment_method, stripe_customer_id,
                stripe_subscription_id, expires_at
            )
            VALUES ($1, $2, $3, TRUE, $4, $5, 'card', $6, $7, $8)
            ON CONFLICT (tenant_id) WHERE is_active DO UPDATE SET
                plan_id = COALESCE(EXCLUDED.plan_id, tenant_licenses.plan_id),
                status = EXCLUDED.status,
                stripe_customer_id = EXCLUDED.stripe_customer_id,
                stripe_subscription_id = EXCLUDED.stripe_subscription_id,
                version = tenant_licenses.version + 1,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(plan_id)
        .bind(LicenseStatus::Active.as_str())
        .bind(now)
        .bind(now + CHECKOUT_INITIAL_PERIOD)
        .bind(customer_ref)
        .bind(subscription_ref)
        .bind(now + CHECKOUT_INITIAL_PERIOD + PAYMENT_GRACE_WINDOW)
        .fetch_one(&self.pool)
        .await?;

        Ok(license)
    }

    /// Record a successful invoice payment against the license owning the
    /// gateway customer. Returns `None` when no active license matches (an
    /// orphaned event the caller logs and drops).
    pub async fn record_successful_payment(
        &self,
        customer_ref: &str,
        period_end: Option<OffsetDateTime>,
    ) -> BillingResult<Option<TenantLicense>> {
        let expires_at = period_end.map(|end| end + PAYMENT_GRACE_WINDOW);
        let license = sqlx::query_as::<_, TenantLicense>(
            r#"
            UPDATE tenant_licenses SET
                status = $2,
                last_payment_at = NOW(),
                expires_at = COALESCE($3, expires_at),
                version = version + 1,
                updated_at = NOW()
            WHERE stripe_customer_id = $1 AND is_active
            RETURNING *
            "#,
        )
        .bind(customer_ref)
        .bind(LicenseStatus::Active.as_str())
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(license)
    }

    /// Append the PaymentInvoice row for a successful charge. Keyed on the
    /// external invoice id: re-delivered events insert nothing and return
    /// `false`.
    pub async fn append_invoice(
        &self,
        license: &TenantLicense,
        stripe_invoice_id: &str,
        stripe_payment_intent_id: Option<&str>,
        amount_cents: i64,
        currency: &str,
    ) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO payment_invoices (
                tenant_id, license_id, stripe_invoice_id,
                stripe_payment_intent_id, amount_cents, currency, status, paid_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'paid', NOW())
            ON CONFLICT (stripe_invoice_id) DO NOTHING
            "#,
        )
        .bind(&license.tenant_id)
        .bind(license.id)
        .bind(stripe_invoice_id)
        .bind(stripe_payment_intent_id)
        .bind(amount_cents)
        .bind(currency)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Flag a failed payment. Re-delivery is idempotent by construction.
    pub async fn mark_payment_failed(
        &self,
        customer_ref: &str,
    ) -> BillingResult<Option<TenantLicense>> {
        let license = sqlx::query_as::<_, TenantLicense>(
            r#"
            UPDATE tenant_licenses SET
                status = $2,
                version = version + 1,
                updated_at = NOW()
            WHERE stripe_customer_id = $1 AND is_active
            RETURNING *
            "#,
        )
        .bind(customer_ref)
        .bind(LicenseStatus::PaymentFailed.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(license)
    }

    /// Terminal cancellation from the gateway. Clears `is_active`, keeping
    /// the row as history.
    pub async fn mark_subscription_deleted(
        &self,
        subscription_ref: &str,
    ) -> BillingResult<Option<TenantLicense>> {
        let license = sqlx::query_as::<_, TenantLicense>(
            r#"
            UPDATE tenant_licenses SET
                status = $2,
                is_active = FALSE,
                cancelled_at = NOW(),
                version = version + 1,
                updated_at = NOW()
            WHERE stripe_subscription_id = $1
            RETURNING *
            "#,
        )
        .bind(subscription_ref)
        .bind(LicenseStatus::Cancelled.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(license)
    }

    /// Apply a gateway-driven status transition by subscription reference.
    /// `status = None` leaves the stored status untouched (unrecognized
    /// external statuses map to "unchanged").
    pub async fn apply_status_transition(
        &self,
        subscription_ref: &str,
        status: Option<LicenseStatus>,
        ended_at: Option<OffsetDateTime>,
    ) -> BillingResult<Option<TenantLicense>> {
        let expires_at = ended_at.map(|end| end + PAYMENT_GRACE_WINDOW);
        let license = sqlx::query_as::<_, TenantLicense>(
            r#"
            UPDATE tenant_licenses SET
                status = COALESCE($2, status),
                expires_at = COALESCE($3, expires_at),
                version = version + 1,
                updated_at = NOW()
            WHERE stripe_subscription_id = $1
            RETURNING *
            "#,
        )
        .bind(subscription_ref)
        .bind(status.map(|s| s.as_str()))
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(license)
    }

    /// Activate a free plan for a tenant, creating the license if absent.
    /// Repeated calls re-assert the same non-expiring state.
    pub async fn activate_free_plan(
        &self,
        tenant_id: &str,
        plan_id: Uuid,
        payment_method: &str,
    ) -> BillingResult<TenantLicense> {
        let horizon = OffsetDateTime::now_utc() + FREE_TIER_NON_EXPIRING_HORIZON;
        let license = sqlx::query_as::<_, TenantLicense>(
            r#"
            INSERT INTO tenant_licenses (
                tenant_id, plan_id, status, is_active, license_start_date,
                license_end_date, auto_renew, payment_method, expires_at
            )
            VALUES ($1, $2, $3, TRUE, NOW(), $4, FALSE, $5, $4)
            ON CONFLICT (tenant_id) WHERE is_active DO UPDATE SET
                plan_id = EXCLUDED.plan_id,
                status = EXCLUDED.status,
                payment_method = EXCLUDED.payment_method,
                license_end_date = EXCLUDED.license_end_date,
                expires_at = EXCLUDED.expires_at,
                version = tenant_licenses.version + 1,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(plan_id)
        .bind(LicenseStatus::Active.as_str())
        .bind(horizon)
        .bind(payment_method)
        .fetch_one(&self.pool)
        .await?;

        Ok(license)
    }

    /// Point the active license at a different plan. Used by the plan change
    /// orchestrator strictly after gateway confirmation.
    pub async fn change_plan(
        &self,
        tenant_id: &str,
        plan_id: Uuid,
    ) -> BillingResult<Option<TenantLicense>> {
        let license = sqlx::query_as::<_, TenantLicense>(
            r#"
            UPDATE tenant_licenses SET
                plan_id = $2,
                version = version + 1,
                updated_at = NOW()
            WHERE tenant_id = $1 AND is_active
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(license)
    }

    /// Set the active license's status. Used for cancel/reactivate flows.
    pub async fn set_status(
        &self,
        tenant_id: &str,
        status: LicenseStatus,
    ) -> BillingResult<Option<TenantLicense>> {
        let license = sqlx::query_as::<_, TenantLicense>(
            r#"
            UPDATE tenant_licenses SET
                status = $2,
                version = version + 1,
                updated_at = NOW()
            WHERE tenant_id = $1 AND is_active
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(license)
    }

    /// Invoice history for a tenant, newest first.
    pub async fn list_invoices(&self, tenant_id: &str) -> BillingResult<Vec<PaymentInvoice>> {
        let invoices = sqlx::query_as::<_, PaymentInvoice>(
            "SELECT * FROM payment_invoices WHERE tenant_id = $1 ORDER BY created_at DESC",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(invoices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grace_window_is_three_days() {
        assert_eq!(PAYMENT_GRACE_WINDOW, Duration::days(3));
    }

    #[test]
    fn non_expiring_horizon_is_a_century() {
        assert_eq!(FREE_TIER_NON_EXPIRING_HORIZON.whole_days(), 36_500);
    }

    #[test]
    fn expiry_adds_grace_to_period_end() {
        let period_end = OffsetDateTime::UNIX_EPOCH + Duration::days(30);
        let expires = period_end + PAYMENT_GRACE_WINDOW;
        assert_eq!(expires - period_end, Duration::days(3));
    }
}
