//! Student verification workflow.
//!
//! A per-submission state machine: `pending -> approved` or
//! `pending -> rejected`, both terminal. Rejections are rate-limited per
//! calendar month; the rejection that crosses the threshold stamps a
//! 30-day block on its own row. Block status is also recomputed on read
//! from the rejection history, and the two computations must agree.

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use sqlx::PgPool;
use time::{Date, Duration, OffsetDateTime, PrimitiveDateTime, Time};
use uuid::Uuid;

use tenlic_shared::VerificationStatus;

use crate::catalog::PlanCatalog;
use crate::error::{BillingError, BillingResult};
use crate::ledger::LicenseLedger;
use crate::storage::DocumentStorage;

/// Rejections within one calendar month before submissions are blocked.
pub const MAX_REJECTIONS_PER_MONTH: i64 = 3;

/// How long a block lasts once the threshold is crossed.
pub const BLOCK_DURATION: Duration = Duration::days(30);

/// Upload ceiling for enrollment documents.
pub const MAX_DOCUMENT_SIZE_BYTES: u64 = 10 * 1024 * 1024;

pub const ALLOWED_CONTENT_TYPES: [&str; 4] =
    ["application/pdf", "image/jpeg", "image/png", "image/webp"];

/// Payment method recorded when approval assigns the student plan.
pub const PAYMENT_METHOD_STUDENT: &str = "student_verification";

/// One submission attempt.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct StudentVerification {
    pub id: Uuid,
    pub tenant_id: String,
    pub user_id: String,
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub institution_name: String,
    pub course_name: String,
    pub expected_graduation_year: Option<i32>,
    pub document_file_name: String,
    pub document_storage_path: String,
    pub document_content_type: String,
    pub document_size_bytes: i64,
    pub status: String,
    pub rejection_reason: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub reviewed_at: Option<OffsetDateTime>,
    pub reviewed_by: Option<String>,
    pub is_blocked: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub blocked_until: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Profile fields captured with a submission.
#[derive(Debug, Clone)]
pub struct SubmissionProfile {
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub institution_name: String,
    pub course_name: String,
    pub expected_graduation_year: Option<i32>,
}

/// The uploaded enrollment document.
#[derive(Debug, Clone)]
pub struct DocumentUpload {
    pub filename: String,
    pub content_type: String,
    pub data: Bytes,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct BlockStatus {
    pub is_blocked: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub blocked_until: Option<OffsetDateTime>,
}

/// Aggregate view served by the status endpoint.
#[derive(Debug, Serialize)]
pub struct VerificationOverview {
    pub verification: Option<StudentVerification>,
    pub is_blocked: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub blocked_until: Option<OffsetDateTime>,
    pub rejections_this_month: i64,
    pub max_rejections_allowed: i64,
}

#[derive(Debug, Serialize)]
pub struct PendingPage {
    pub items: Vec<StudentVerification>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

/// Reject documents before any upload happens; a verification row is only
/// created for uploads that succeeded.
pub fn validate_document(content_type: &str, size_bytes: u64) -> BillingResult<()> {
    if size_bytes == 0 {
        return Err(BillingError::InvalidDocument("document is required".to_string()));
    }
    if size_bytes > MAX_DOCUMENT_SIZE_BYTES {
        return Err(BillingError::InvalidDocument(
            "document exceeds the 10 MB limit".to_string(),
        ));
    }
    let normalized = content_type.to_ascii_lowercase();
    if !ALLOWED_CONTENT_TYPES.contains(&normalized.as_str()) {
        return Err(BillingError::InvalidDocument(format!(
            "unsupported document type '{}'; use PDF, JPEG, PNG or WebP",
            content_type
        )));
    }
    Ok(())
}

/// Start of the calendar month containing `now`, in UTC.
pub fn month_start(now: OffsetDateTime) -> OffsetDateTime {
    let first = Date::from_calendar_date(now.year(), now.month(), 1).unwrap_or(now.date());
    PrimitiveDateTime::new(first, Time::MIDNIGHT).assume_utc()
}

/// Runs the review workflow and its blocking rules.
pub struct StudentVerificationService {
    pool: PgPool,
    storage: Arc<dyn DocumentStorage>,
    catalog: PlanCatalog,
    ledger: LicenseLedger,
}

impl StudentVerificationService {
    pub fn new(
        pool: PgPool,
        storage: Arc<dyn DocumentStorage>,
        catalog: PlanCatalog,
        ledger: LicenseLedger,
    ) -> Self {
        Self {
            pool,
            storage,
            catalog,
            ledger,
        }
    }

    /// Submit an enrollment document for review.
    pub async fn submit(
        &self,
        tenant_id: &str,
        user_id: &str,
        profile: SubmissionProfile,
        document: DocumentUpload,
    ) -> BillingResult<StudentVerification> {
        let block = self.block_status(user_id).await?;
        if block.is_blocked {
            let until = block.blocked_until.unwrap_or_else(OffsetDateTime::now_utc);
            return Err(BillingError::VerificationBlocked(until));
        }

        if let Some(pending) = self.find_pending(user_id).await? {
            return Err(BillingError::PendingVerificationExists(pending.id));
        }

        validate_document(&document.content_type, document.data.len() as u64)?;

        let folder = format!("student-verifications/{}/{}", tenant_id, user_id);
        let size_bytes = document.data.len() as i64;
        let storage_path = self
            .storage
            .upload(
                document.data,
                &document.filename,
                &document.content_type,
                &folder,
            )
            .await
            .map_err(|e| BillingError::Upload(e.to_string()))?;

        let verification = sqlx::query_as::<_, StudentVerification>(
            r#"
            INSERT INTO student_verifications (
                tenant_id, user_id, full_name, email, phone,
                institution_name, course_name, expected_graduation_year,
                document_file_name, document_storage_path,
                document_content_type, document_size_bytes, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(&profile.full_name)
        .bind(&profile.email)
        .bind(&profile.phone)
        .bind(&profile.institution_name)
        .bind(&profile.course_name)
        .bind(profile.expected_graduation_year)
        .bind(&document.filename)
        .bind(&storage_path)
        .bind(&document.content_type)
        .bind(size_bytes)
        .bind(VerificationStatus::Pending.as_str())
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            verification_id = %verification.id,
            tenant_id = %tenant_id,
            user_id = %user_id,
            "Student verification submitted"
        );

        Ok(verification)
    }

    /// Latest submission plus derived block state for the user.
    pub async fn overview(&self, user_id: &str) -> BillingResult<VerificationOverview> {
        let verification = sqlx::query_as::<_, StudentVerification>(
            "SELECT * FROM student_verifications WHERE user_id = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let block = self.block_status(user_id).await?;
        let rejections = self
            .rejections_this_month(user_id, OffsetDateTime::now_utc())
            .await?;

        Ok(VerificationOverview {
            verification,
            is_blocked: block.is_blocked,
            blocked_until: block.blocked_until,
            rejections_this_month: rejections,
            max_rejections_allowed: MAX_REJECTIONS_PER_MONTH,
        })
    }

    pub async fn history(&self, user_id: &str) -> BillingResult<Vec<StudentVerification>> {
        let rows = sqlx::query_as::<_, StudentVerification>(
            "SELECT * FROM student_verifications WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Pending submissions for reviewers, oldest first.
    pub async fn list_pending(&self, page: i64, page_size: i64) -> BillingResult<PendingPage> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, 100);

        let (total,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM student_verifications WHERE status = 'pending'",
        )
        .fetch_one(&self.pool)
        .await?;

        let items = sqlx::query_as::<_, StudentVerification>(
            r#"
            SELECT * FROM student_verifications
            WHERE status = 'pending'
            ORDER BY created_at
            OFFSET $1 LIMIT $2
            "#,
        )
        .bind((page - 1) * page_size)
        .bind(page_size)
        .fetch_all(&self.pool)
        .await?;

        Ok(PendingPage {
            items,
            total,
            page,
            page_size,
        })
    }

    /// Decide a pending submission. The status guard in the UPDATE makes the
    /// transition exactly-once: a decided row can never be re-reviewed.
    pub async fn review(
        &self,
        verification_id: Uuid,
        reviewer_id: &str,
        approved: bool,
        rejection_reason: Option<&str>,
    ) -> BillingResult<StudentVerification> {
        let new_status = if approved {
            VerificationStatus::Approved
        } else {
            VerificationStatus::Rejected
        };

        let updated = sqlx::query_as::<_, StudentVerification>(
            r#"
            UPDATE student_verifications SET
                status = $2,
                rejection_reason = $3,
                reviewed_at = NOW(),
                reviewed_by = $4,
                updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(verification_id)
        .bind(new_status.as_str())
        .bind(if approved { None } else { rejection_reason })
        .bind(reviewer_id)
        .fetch_optional(&self.pool)
        .await?;

        let mut verification = match updated {
            Some(v) => v,
            None => {
                // Either missing or already decided; a second lookup tells
                // the caller which.
                let existing = sqlx::query_as::<_, StudentVerification>(
                    "SELECT * FROM student_verifications WHERE id = $1",
                )
                .bind(verification_id)
                .fetch_optional(&self.pool)
                .await?;

                return Err(match existing {
                    Some(_) => BillingError::AlreadyReviewed(verification_id),
                    None => BillingError::VerificationNotFound(verification_id),
                });
            }
        };

        if approved {
            self.activate_student_plan(&verification.tenant_id).await?;
        } else {
            verification = self.apply_block_if_threshold(verification).await?;
        }

        tracing::info!(
            verification_id = %verification.id,
            status = %verification.status,
            reviewer_id = %reviewer_id,
            "Verification reviewed"
        );

        Ok(verification)
    }

    /// Blocked when a stamped block is still in force, or when the monthly
    /// rejection count already sits at the threshold. The stored stamp and
    /// the recount must agree; the invariant checker asserts it.
    pub async fn block_status(&self, user_id: &str) -> BillingResult<BlockStatus> {
        let now = OffsetDateTime::now_utc();

        let stamped: Option<(OffsetDateTime,)> = sqlx::query_as(
            r#"
            SELECT blocked_until FROM student_verifications
            WHERE user_id = $1 AND is_blocked AND blocked_until > NOW()
            ORDER BY blocked_until DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some((blocked_until,)) = stamped {
            return Ok(BlockStatus {
                is_blocked: true,
                blocked_until: Some(blocked_until),
            });
        }

        let rejections = self.rejections_this_month(user_id, now).await?;
        if rejections >= MAX_REJECTIONS_PER_MONTH {
            return Ok(BlockStatus {
                is_blocked: true,
                blocked_until: Some(now + BLOCK_DURATION),
            });
        }

        Ok(BlockStatus {
            is_blocked: false,
            blocked_until: None,
        })
    }

    async fn rejections_this_month(
        &self,
        user_id: &str,
        now: OffsetDateTime,
    ) -> BillingResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM student_verifications
            WHERE user_id = $1 AND status = 'rejected' AND created_at >= $2
            "#,
        )
        .bind(user_id)
        .bind(month_start(now))
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn find_pending(&self, user_id: &str) -> BillingResult<Option<StudentVerification>> {
        let pending = sqlx::query_as::<_, StudentVerification>(
            "SELECT * FROM student_verifications WHERE user_id = $1 AND status = 'pending' LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(pending)
    }

    /// Stamp the block on the rejection that crosses the monthly threshold.
    async fn apply_block_if_threshold(
        &self,
        verification: StudentVerification,
    ) -> BillingResult<StudentVerification> {
        let rejections = self
            .rejections_this_month(&verification.user_id, OffsetDateTime::now_utc())
            .await?;

        if rejections < MAX_REJECTIONS_PER_MONTH {
            return Ok(verification);
        }

        let blocked_until = OffsetDateTime::now_utc() + BLOCK_DURATION;
        let stamped = sqlx::query_as::<_, StudentVerification>(
            r#"
            UPDATE student_verifications SET
                is_blocked = TRUE,
                blocked_until = $2,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(verification.id)
        .bind(blocked_until)
        .fetch_one(&self.pool)
        .await?;

        tracing::warn!(
            user_id = %stamped.user_id,
            rejections_this_month = rejections,
            blocked_until = %blocked_until,
            "User blocked after repeated verification rejections"
        );

        Ok(stamped)
    }

    /// Approval assigns the student plan to the tenant's license with the
    /// non-expiring sentinel.
    async fn activate_student_plan(&self, tenant_id: &str) -> BillingResult<()> {
        let Some(plan) = self.catalog.find_student_plan().await? else {
            tracing::warn!(tenant_id = %tenant_id, "No active student plan in catalog; approval recorded without license change");
            return Ok(());
        };

        let license = self
            .ledger
            .activate_free_plan(tenant_id, plan.id, PAYMENT_METHOD_STUDENT)
            .await?;

        tracing::info!(
            tenant_id = %tenant_id,
            plan_id = %plan.id,
            license_id = %license.id,
            "Student plan activated after verification approval"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn document_validation_accepts_allowed_types() {
        for ct in ALLOWED_CONTENT_TYPES {
            assert!(validate_document(ct, 1024).is_ok(), "{} should be allowed", ct);
        }
        assert!(validate_document("APPLICATION/PDF", 1024).is_ok());
    }

    #[test]
    fn document_validation_rejects_bad_inputs() {
        assert!(validate_document("application/pdf", 0).is_err());
        assert!(validate_document("application/pdf", MAX_DOCUMENT_SIZE_BYTES + 1).is_err());
        assert!(validate_document("application/pdf", MAX_DOCUMENT_SIZE_BYTES).is_ok());
        assert!(validate_document("image/gif", 1024).is_err());
        assert!(validate_document("text/plain", 1024).is_err());
    }

    #[test]
    fn month_start_truncates_to_first_midnight() {
        let now = datetime!(2026-03-17 14:35:02 UTC);
        assert_eq!(month_start(now), datetime!(2026-03-01 0:00 UTC));

        let first = datetime!(2026-03-01 0:00 UTC);
        assert_eq!(month_start(first), first);
    }

    #[test]
    fn block_lasts_thirty_days() {
        assert_eq!(BLOCK_DURATION, Duration::days(30));
        let third_rejection_at = datetime!(2026-05-10 9:00 UTC);
        assert_eq!(
            third_rejection_at + BLOCK_DURATION,
            datetime!(2026-06-09 9:00 UTC)
        );
    }
}
