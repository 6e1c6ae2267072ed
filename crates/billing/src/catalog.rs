//! Plan catalog.
//!
//! Catalog rows are immutable per request; administrative edits and the
//! one-time Stripe product sync happen out of band.

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use tenlic_shared::{BillingPeriod, PlanTier};

use crate::error::{BillingError, BillingResult};

/// A purchasable plan tier.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PaymentPlan {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub tier: String,
    pub monthly_price_cents: i64,
    pub yearly_price_cents: Option<i64>,
    pub included_seats: i32,
    pub extra_seat_price_cents: Option<i64>,
    pub stripe_product_id: Option<String>,
    pub stripe_price_id_monthly: Option<String>,
    pub stripe_price_id_yearly: Option<String>,
    pub stripe_price_id_per_seat: Option<String>,
    pub is_active: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl PaymentPlan {
    /// Free/student plans never touch the external gateway.
    pub fn is_free(&self) -> bool {
        self.monthly_price_cents == 0 && self.yearly_price_cents.unwrap_or(0) == 0
    }

    pub fn tier(&self) -> Option<PlanTier> {
        PlanTier::parse(&self.tier)
    }

    pub fn is_student_tier(&self) -> bool {
        self.tier() == Some(PlanTier::Student)
    }

    /// Stripe price reference for the requested billing period, if the sync
    /// has populated one.
    pub fn price_id_for(&self, period: BillingPeriod) -> Option<&str> {
        match period {
            BillingPeriod::Monthly => self.stripe_price_id_monthly.as_deref(),
            BillingPeriod::Annual => self.stripe_price_id_yearly.as_deref(),
        }
    }
}

/// Read access to the plan catalog.
#[derive(Clone)]
pub struct PlanCatalog {
    pool: PgPool,
}

impl PlanCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// All active plans, cheapest first.
    pub async fn list_active(&self) -> BillingResult<Vec<PaymentPlan>> {
        let plans = sqlx::query_as::<_, PaymentPlan>(
            "SELECT * FROM payment_plans WHERE is_active ORDER BY monthly_price_cents",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(plans)
    }

    pub async fn find_active(&self, plan_id: Uuid) -> BillingResult<PaymentPlan> {
        sqlx::query_as::<_, PaymentPlan>(
            "SELECT * FROM payment_plans WHERE id = $1 AND is_active",
        )
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(BillingError::PlanNotFound(plan_id))
    }

    pub async fn find(&self, plan_id: Uuid) -> BillingResult<Option<PaymentPlan>> {
        let plan = sqlx::query_as::<_, PaymentPlan>("SELECT * FROM payment_plans WHERE id = $1")
            .bind(plan_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(plan)
    }

    /// The active student-tier plan, if the catalog has one.
    pub async fn find_student_plan(&self) -> BillingResult<Option<PaymentPlan>> {
        let plan = sqlx::query_as::<_, PaymentPlan>(
            "SELECT * FROM payment_plans WHERE tier = $1 AND is_active LIMIT 1",
        )
        .bind(PlanTier::Student.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(plan)
    }
}
