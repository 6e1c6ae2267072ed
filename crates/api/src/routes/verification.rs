//! Student verification routes.

use axum::extract::{Multipart, Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use tenlic_billing::{
    DocumentUpload, PendingPage, StudentVerification, SubmissionProfile, VerificationOverview,
};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PendingQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub approved: bool,
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Default)]
struct SubmitForm {
    full_name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    institution_name: Option<String>,
    course_name: Option<String>,
    expected_graduation_year: Option<i32>,
    document: Option<DocumentUpload>,
}

impl SubmitForm {
    fn require(self) -> Result<(SubmissionProfile, DocumentUpload), ApiError> {
        let profile = SubmissionProfile {
            full_name: self
                .full_name
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ApiError::Validation("full_name is required".to_string()))?,
            email: self
                .email
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ApiError::Validation("email is required".to_string()))?,
            phone: self.phone,
            institution_name: self
                .institution_name
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ApiError::Validation("institution_name is required".to_string()))?,
            course_name: self
                .course_name
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ApiError::Validation("course_name is required".to_string()))?,
            expected_graduation_year: self.expected_graduation_year,
        };
        let document = self
            .document
            .ok_or_else(|| ApiError::Validation("document is required".to_string()))?;

        Ok((profile, document))
    }
}

async fn parse_submit_form(mut multipart: Multipart) -> Result<SubmitForm, ApiError> {
    let mut form = SubmitForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("invalid multipart payload: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "document" => {
                let filename = field.file_name().unwrap_or("document").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::Validation(format!("failed to read document: {}", e)))?;
                form.document = Some(DocumentUpload {
                    filename,
                    content_type,
                    data,
                });
            }
            "full_name" => form.full_name = Some(read_text(field).await?),
            "email" => form.email = Some(read_text(field).await?),
            "phone" => form.phone = Some(read_text(field).await?),
            "institution_name" => form.institution_name = Some(read_text(field).await?),
            "course_name" => form.course_name = Some(read_text(field).await?),
            "expected_graduation_year" => {
                form.expected_graduation_year = read_text(field).await?.parse().ok();
            }
            _ => {}
        }
    }

    Ok(form)
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::Validation(format!("invalid form field: {}", e)))
}

/// Submit an enrollment document for student-plan verification.
pub async fn submit(
    State(state): State<AppState>,
    auth: AuthUser,
    multipart: Multipart,
) -> ApiResult<Json<serde_json::Value>> {
    let tenant_id = auth.require_tenant()?.to_string();
    let (profile, document) = parse_submit_form(multipart).await?.require()?;

    let verification = state
        .billing
        .verification
        .submit(&tenant_id, &auth.user_id, profile, document)
        .await?;

    Ok(Json(json!({
        "verification_id": verification.id,
        "status": verification.status,
        "message": "Verification submitted; the document is awaiting review",
    })))
}

/// Latest verification and block status for the caller.
pub async fn status(
    State(state): State<AppState>,
    auth: AuthUser,
) -> ApiResult<Json<VerificationOverview>> {
    let overview = state.billing.verification.overview(&auth.user_id).await?;
    Ok(Json(overview))
}

/// All submissions for the caller, newest first.
pub async fn history(
    State(state): State<AppState>,
    auth: AuthUser,
) -> ApiResult<Json<Vec<StudentVerification>>> {
    let rows = state.billing.verification.history(&auth.user_id).await?;
    Ok(Json(rows))
}

/// Reviewer queue, oldest first.
pub async fn list_pending(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<PendingQuery>,
) -> ApiResult<Json<PendingPage>> {
    auth.require_reviewer()?;

    let page = state
        .billing
        .verification
        .list_pending(query.page.unwrap_or(1), query.page_size.unwrap_or(20))
        .await?;

    Ok(Json(page))
}

/// Decide a pending verification.
pub async fn review(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(verification_id): Path<Uuid>,
    Json(req): Json<ReviewRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    auth.require_reviewer()?;

    let verification = state
        .billing
        .verification
        .review(
            verification_id,
            &auth.user_id,
            req.approved,
            req.rejection_reason.as_deref(),
        )
        .await?;

    Ok(Json(json!({
        "verification_id": verification.id,
        "status": verification.status,
        "message": if req.approved { "Verification approved" } else { "Verification rejected" },
    })))
}
