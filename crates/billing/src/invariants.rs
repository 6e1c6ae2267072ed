//! Licensing invariants.
//!
//! Runnable consistency checks over the license ledger and the verification
//! workflow. Checks only read, never write, and each violation carries
//! enough context to debug. Useful after webhook replays or manual data
//! surgery.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// Result of a single failed invariant check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    /// Severity level
    pub severity: ViolationSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Critical - entitlement may be wrong
    Critical,
    /// High - data inconsistency that needs attention
    High,
    /// Medium - potential issue, should investigate
    Medium,
    /// Low - minor inconsistency, informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of a full invariant run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct MultipleActiveRow {
    tenant_id: String,
    license_count: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct MissingCustomerRow {
    id: Uuid,
    tenant_id: String,
    status: String,
}

#[derive(Debug, sqlx::FromRow)]
struct CancelledNoTimestampRow {
    id: Uuid,
    tenant_id: String,
}

#[derive(Debug, sqlx::FromRow)]
struct ShortFreeHorizonRow {
    id: Uuid,
    tenant_id: String,
    payment_method: String,
    expires_at: Option<OffsetDateTime>,
}

#[derive(Debug, sqlx::FromRow)]
struct UnstampedBlockRow {
    user_id: String,
    rejection_count: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct BlockWithoutUntilRow {
    id: Uuid,
    user_id: String,
}

/// Service for running licensing invariant checks.
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return a summary.
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_single_active_license().await?);
        violations.extend(self.check_paid_license_has_customer_ref().await?);
        violations.extend(self.check_cancelled_has_timestamp().await?);
        violations.extend(self.check_free_plan_non_expiring().await?);
        violations.extend(self.check_block_stamp_matches_rejections().await?);
        violations.extend(self.check_block_has_deadline().await?);

        let checks_run = 6;
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();
        let checks_passed = checks_run - checks_failed;

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Invariant 1: at most one active license per tenant.
    ///
    /// The partial unique index enforces this going forward; the check
    /// catches rows that predate it or arrived through manual surgery.
    async fn check_single_active_license(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<MultipleActiveRow> = sqlx::query_as(
            r#"
            SELECT tenant_id, COUNT(*) as license_count
            FROM tenant_licenses
            WHERE is_active
            GROUP BY tenant_id
            HAVING COUNT(*) > 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "single_active_license".to_string(),
                description: format!(
                    "Tenant '{}' has {} active licenses (expected at most 1)",
                    row.tenant_id, row.license_count
                ),
                context: serde_json::json!({
                    "tenant_id": row.tenant_id,
                    "license_count": row.license_count,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 2: card-paid licenses in billing states carry a gateway
    /// customer reference.
    async fn check_paid_license_has_customer_ref(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<MissingCustomerRow> = sqlx::query_as(
            r#"
            SELECT id, tenant_id, status
            FROM tenant_licenses
            WHERE is_active
              AND payment_method = 'card'
              AND status IN ('active', 'cancelling', 'past_due', 'payment_failed')
              AND stripe_customer_id IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "paid_license_has_customer_ref".to_string(),
                description: format!(
                    "License for tenant '{}' is in status '{}' with no Stripe customer",
                    row.tenant_id, row.status
                ),
                context: serde_json::json!({
                    "license_id": row.id,
                    "tenant_id": row.tenant_id,
                    "status": row.status,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 3: cancelled licenses record when they were cancelled.
    async fn check_cancelled_has_timestamp(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<CancelledNoTimestampRow> = sqlx::query_as(
            r#"
            SELECT id, tenant_id
            FROM tenant_licenses
            WHERE status = 'cancelled' AND cancelled_at IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "cancelled_has_timestamp".to_string(),
                description: format!(
                    "Cancelled license for tenant '{}' has no cancellation timestamp",
                    row.tenant_id
                ),
                context: serde_json::json!({
                    "license_id": row.id,
                    "tenant_id": row.tenant_id,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 4: free-tier licenses carry the non-expiring horizon.
    async fn check_free_plan_non_expiring(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<ShortFreeHorizonRow> = sqlx::query_as(
            r#"
            SELECT id, tenant_id, payment_method, expires_at
            FROM tenant_licenses
            WHERE is_active
              AND payment_method IN ('free', 'student_verification')
              AND (expires_at IS NULL OR expires_at < NOW() + INTERVAL '50 years')
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "free_plan_non_expiring".to_string(),
                description: format!(
                    "Free-tier license for tenant '{}' ({}) lacks the non-expiring horizon",
                    row.tenant_id, row.payment_method
                ),
                context: serde_json::json!({
                    "license_id": row.id,
                    "tenant_id": row.tenant_id,
                    "expires_at": row.expires_at,
                }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    /// Invariant 5: users at or past the monthly rejection threshold have a
    /// stamped block. The stored stamp and the recomputed count must agree.
    async fn check_block_stamp_matches_rejections(
        &self,
    ) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<UnstampedBlockRow> = sqlx::query_as(
            r#"
            SELECT user_id, COUNT(*) as rejection_count
            FROM student_verifications
            WHERE status = 'rejected'
              AND created_at >= date_trunc('month', NOW())
            GROUP BY user_id
            HAVING COUNT(*) >= 3 AND BOOL_OR(is_blocked) = FALSE
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "block_stamp_matches_rejections".to_string(),
                description: format!(
                    "User '{}' has {} rejections this month but no stamped block",
                    row.user_id, row.rejection_count
                ),
                context: serde_json::json!({
                    "user_id": row.user_id,
                    "rejection_count": row.rejection_count,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 6: a stamped block always carries its deadline.
    async fn check_block_has_deadline(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<BlockWithoutUntilRow> = sqlx::query_as(
            r#"
            SELECT id, user_id
            FROM student_verifications
            WHERE is_blocked AND blocked_until IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "block_has_deadline".to_string(),
                description: format!("Blocked verification for user '{}' has no blocked_until", row.user_id),
                context: serde_json::json!({
                    "verification_id": row.id,
                    "user_id": row.user_id,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Run a single invariant check by name.
    pub async fn run_check(&self, name: &str) -> BillingResult<Vec<InvariantViolation>> {
        match name {
            "single_active_license" => self.check_single_active_license().await,
            "paid_license_has_customer_ref" => self.check_paid_license_has_customer_ref().await,
            "cancelled_has_timestamp" => self.check_cancelled_has_timestamp().await,
            "free_plan_non_expiring" => self.check_free_plan_non_expiring().await,
            "block_stamp_matches_rejections" => self.check_block_stamp_matches_rejections().await,
            "block_has_deadline" => self.check_block_has_deadline().await,
            _ => Ok(vec![]),
        }
    }

    /// Get list of all available invariant checks.
    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "single_active_license",
            "paid_license_has_customer_ref",
            "cancelled_has_timestamp",
            "free_plan_non_expiring",
            "block_stamp_matches_rejections",
            "block_has_deadline",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_severity_display() {
        assert_eq!(ViolationSeverity::Critical.to_string(), "CRITICAL");
        assert_eq!(ViolationSeverity::High.to_string(), "HIGH");
        assert_eq!(ViolationSeverity::Medium.to_string(), "MEDIUM");
        assert_eq!(ViolationSeverity::Low.to_string(), "LOW");
    }

    #[test]
    fn test_available_checks() {
        let checks = InvariantChecker::available_checks();
        assert_eq!(checks.len(), 6);
        assert!(checks.contains(&"single_active_license"));
        assert!(checks.contains(&"block_stamp_matches_rejections"));
    }
}
