use crate::api::types::*;
use crate::database::sqlite::SqliteDatabase;
use crate::errors::{AppError, Result};
use crate::models::audit::{Actor, ActorType};
use crate::models::beneficial_owner::BeneficialOwner;
use crate::models::organization::{DocumentType, KycStatus, Organization};
use crate::services::completeness::evaluate_completeness;
use crate::services::jwt::{AuthenticatedAdmin, JwtManager};
use crate::services::kyc_service::KycService;
use crate::services::review_service::ReviewService;
use crate::services::stripe_gateway::ProcessorAccountStatus;
use crate::utils::validation::Validator;
use crate::utils::webhook::verify_signature;
use axum::extract::{Path, Query};
use axum::http::{header::AUTHORIZATION, request::Parts, HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{extract::FromRequestParts, Extension, Json, Router};
use chrono::{Duration, Utc};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Shared handler state, injected as an axum Extension.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<SqliteDatabase>,
    pub kyc: Arc<KycService>,
    pub review: Arc<ReviewService>,
    pub jwt: Arc<JwtManager>,
    pub webhook_secret: String,
}

// Bearer token extractor for Authorization: Bearer ...
pub struct AuthBearer(pub String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthBearer
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> std::result::Result<Self, Self::Rejection> {
        if let Some(auth) = parts.headers.get(AUTHORIZATION) {
            if let Ok(auth_str) = auth.to_str() {
                if let Some(token) = auth_str.strip_prefix("Bearer ") {
                    return Ok(AuthBearer(token.to_string()));
                }
            }
        }
        Err((StatusCode::UNAUTHORIZED, "Missing or invalid Authorization header".to_string()))
    }
}

fn require_admin(state: &AppState, bearer: &AuthBearer) -> Result<AuthenticatedAdmin> {
    state.jwt.validate_admin(&bearer.0)
}

fn parse_doc_type(raw: &str) -> Result<DocumentType> {
    DocumentType::from_str(raw).map_err(AppError::Validation)
}

pub fn onboarding_router() -> Router {
    Router::new().route("/submit", post(onboarding_submit))
}

pub fn org_router() -> Router {
    Router::new()
        .route("/:org_id/kyc/init", post(org_init_kyc))
        .route("/:org_id/kyc/submit", post(org_submit_kyc))
        .route("/:org_id/kyc/link", get(org_kyc_link))
        .route("/:org_id/kyc/status", get(org_kyc_status))
}

pub fn admin_kyc_router() -> Router {
    Router::new()
        .route("/pending", get(admin_kyc_pending))
        .route("/stats", get(admin_kyc_stats))
        .route("/:org_id", get(admin_kyc_detail))
        .route("/:org_id/approve", post(admin_approve))
        .route("/:org_id/reject", post(admin_reject))
        .route("/:org_id/request-info", post(admin_request_info))
        .route("/:org_id/documents/request", post(admin_request_documents))
        .route("/:org_id/documents/:doc_type/approve", post(admin_approve_document))
        .route("/:org_id/documents/:doc_type/reject", post(admin_reject_document))
        .route("/:org_id/notes", post(admin_add_notes))
        .route("/:org_id/payouts/pause", post(admin_pause_payouts))
        .route("/:org_id/payouts/resume", post(admin_resume_payouts))
        .route("/:org_id/link", post(admin_onboarding_link))
}

pub fn webhook_router() -> Router {
    Router::new().route("/processor", post(processor_webhook))
}

// ---- org-facing handlers ----

/// One-shot intake: creates the organization and its owners, provisions the
/// processor account, and pushes the compliance package.
#[utoipa::path(post, path = "/api/onboarding/submit", request_body = OnboardingSubmitRequest,
    responses((status = 200, body = OnboardingSubmitResponse)))]
pub async fn onboarding_submit(
    Extension(state): Extension<AppState>,
    Json(req): Json<OnboardingSubmitRequest>,
) -> Result<Json<OnboardingSubmitResponse>> {
    Validator::validate_organization_name(&req.name)?;
    if let Some(email) = &req.email {
        Validator::validate_email(email)?;
    }
    if let Some(ein) = &req.ein {
        Validator::validate_ein(ein)?;
        if let Some(existing) = state.db.find_organization_by_ein(ein).await? {
            info!(action = "onboarding_duplicate_ein", existing = %existing.id);
            return Err(AppError::Validation(
                "An organization with this EIN is already registered".to_string(),
            ));
        }
    }
    if let Some(phone) = &req.phone {
        Validator::validate_phone(phone)?;
    }
    if let Some(zip) = &req.zip_code {
        Validator::validate_zip_code(zip)?;
    }

    let mut org = Organization::new(req.name.clone());
    org.legal_name = req.legal_name;
    org.ein = req.ein;
    org.website = req.website;
    org.phone = req.phone;
    org.email = req.email;
    org.address_line_1 = req.address_line_1;
    org.address_line_2 = req.address_line_2;
    org.city = req.city;
    org.state = req.state;
    org.zip_code = req.zip_code;
    if let Some(country) = req.country {
        org.country = country;
    }
    org.primary_purpose = req.primary_purpose;
    org.attestations = req.attestations;
    org.articles_of_incorporation = req.documents.articles_of_incorporation;
    org.tax_exempt_letter = req.documents.tax_exempt_letter;
    org.bank_statement = req.documents.bank_statement;
    org.board_resolution = req.documents.board_resolution;

    let owners: Vec<BeneficialOwner> = req
        .beneficial_owners
        .into_iter()
        .map(|input| owner_from_input(org.id, input))
        .collect();

    state.db.create_organization(&org).await?;
    state.db.replace_beneficial_owners(&org.id, &owners).await?;

    let actor = Actor { actor_type: ActorType::OrganizationUser, id: None };
    state.kyc.init_kyc(&org.id, actor).await?;
    let org = state.kyc.submit_compliance_package(&org.id, actor).await?;

    let completeness = evaluate_completeness(&org, &owners);
    Ok(Json(OnboardingSubmitResponse {
        organization_id: org.id,
        kyc_state: org.kyc_state,
        kyc_status: org.kyc_status,
        processor_account_id: org.processor_account_id.clone(),
        completeness,
        message: "Compliance application submitted for review".to_string(),
    }))
}

#[utoipa::path(post, path = "/api/orgs/{org_id}/kyc/init", params(("org_id" = Uuid, Path,)),
    responses((status = 200, body = InitKycResponse)))]
pub async fn org_init_kyc(
    Extension(state): Extension<AppState>,
    Path(org_id): Path<Uuid>,
) -> Result<Json<InitKycResponse>> {
    let actor = Actor { actor_type: ActorType::OrganizationUser, id: None };
    let org = state.kyc.init_kyc(&org_id, actor).await?;
    Ok(Json(InitKycResponse {
        organization_id: org.id,
        processor_account_id: org.processor_account_id.clone(),
        kyc_state: org.kyc_state,
    }))
}

#[utoipa::path(post, path = "/api/orgs/{org_id}/kyc/submit", params(("org_id" = Uuid, Path,)),
    responses((status = 200, body = KycStatusResponse)))]
pub async fn org_submit_kyc(
    Extension(state): Extension<AppState>,
    Path(org_id): Path<Uuid>,
) -> Result<Json<KycStatusResponse>> {
    let actor = Actor { actor_type: ActorType::OrganizationUser, id: None };
    let org = state.kyc.submit_compliance_package(&org_id, actor).await?;
    status_response(&state, org).await
}

#[utoipa::path(get, path = "/api/orgs/{org_id}/kyc/link", params(("org_id" = Uuid, Path,)),
    responses((status = 200, body = OnboardingLinkResponse)))]
pub async fn org_kyc_link(
    Extension(state): Extension<AppState>,
    Path(org_id): Path<Uuid>,
) -> Result<Json<OnboardingLinkResponse>> {
    let actor = Actor { actor_type: ActorType::OrganizationUser, id: None };
    let url = state.kyc.onboarding_link(&org_id, actor).await?;
    Ok(Json(OnboardingLinkResponse { url }))
}

/// Syncs against the processor, then returns the reconciled snapshot.
#[utoipa::path(get, path = "/api/orgs/{org_id}/kyc/status", params(("org_id" = Uuid, Path,)),
    responses((status = 200, body = KycStatusResponse)))]
pub async fn org_kyc_status(
    Extension(state): Extension<AppState>,
    Path(org_id): Path<Uuid>,
) -> Result<Json<KycStatusResponse>> {
    let org = state.db.require_organization(&org_id).await?;
    let org = if org.processor_account_id.is_some() {
        state.kyc.sync_processor_status(&org_id, Actor::system()).await?
    } else {
        org
    };
    status_response(&state, org).await
}

async fn status_response(
    state: &AppState,
    org: Organization,
) -> Result<Json<KycStatusResponse>> {
    let owners = state.db.list_beneficial_owners(&org.id).await?;
    let completeness = evaluate_completeness(&org, &owners);
    Ok(Json(KycStatusResponse {
        organization_id: org.id,
        kyc_state: org.kyc_state,
        kyc_status: org.kyc_status,
        status: org.status,
        charges_enabled: org.charges_enabled,
        payouts_enabled: org.payouts_enabled,
        disabled_reason: org.disabled_reason.clone(),
        requirements: org.requirements.clone(),
        completeness,
        submitted_at: org.kyc_submitted_at,
        verified_at: org.verified_at,
        rejection_reason: org.kyc_rejection_reason.clone(),
        outstanding_document_request: org.document_request.clone(),
    }))
}

fn owner_from_input(org_id: Uuid, input: BeneficialOwnerInput) -> BeneficialOwner {
    let mut owner = BeneficialOwner::new(org_id, input.first_name, input.last_name);
    owner.title = input.title;
    owner.is_primary = input.is_primary;
    owner.date_of_birth = input.date_of_birth;
    owner.email = input.email;
    owner.phone = input.phone;
    owner.gov_id_number = input.gov_id_number;
    owner.gov_id_type = input.gov_id_type;
    owner.id_front_ref = input.id_front_ref;
    owner.id_back_ref = input.id_back_ref;
    owner.address_line_1 = input.address_line_1;
    owner.address_line_2 = input.address_line_2;
    owner.city = input.city;
    owner.state = input.state;
    owner.zip_code = input.zip_code;
    owner.country = input.country;
    owner
}

// ---- admin handlers ----

#[utoipa::path(get, path = "/api/admin/kyc/pending",
    params(("page" = Option<u32>, Query,), ("limit" = Option<u32>, Query,), ("status" = Option<String>, Query,)),
    responses((status = 200, body = PendingListResponse)), security(("bearerAuth" = [])))]
pub async fn admin_kyc_pending(
    Extension(state): Extension<AppState>,
    bearer: AuthBearer,
    Query(query): Query<PendingQuery>,
) -> Result<Json<PendingListResponse>> {
    require_admin(&state, &bearer)?;
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).clamp(1, 100);

    let (orgs, total) = state.db.list_review_queue(query.status, page, limit).await?;
    let mut organizations = Vec::with_capacity(orgs.len());
    for org in orgs {
        let owners = state.db.list_beneficial_owners(&org.id).await?;
        organizations.push(PendingSummary {
            id: org.id,
            name: org.name.clone(),
            email: org.email.clone(),
            kyc_status: org.kyc_status,
            kyc_state: org.kyc_state,
            submitted_at: org.kyc_submitted_at,
            completeness: evaluate_completeness(&org, &owners),
        });
    }
    Ok(Json(PendingListResponse { organizations, total, page, limit }))
}

#[utoipa::path(get, path = "/api/admin/kyc/stats",
    responses((status = 200, body = KycStatsResponse)), security(("bearerAuth" = [])))]
pub async fn admin_kyc_stats(
    Extension(state): Extension<AppState>,
    bearer: AuthBearer,
) -> Result<Json<KycStatsResponse>> {
    require_admin(&state, &bearer)?;
    let since = Utc::now() - Duration::days(30);
    Ok(Json(KycStatsResponse {
        not_submitted: state.db.count_by_kyc_status(KycStatus::NotSubmitted).await?,
        pending_review: state.db.count_by_kyc_status(KycStatus::PendingReview).await?,
        under_review: state.db.count_by_kyc_status(KycStatus::UnderReview).await?,
        needs_info: state.db.count_by_kyc_status(KycStatus::NeedsInfo).await?,
        approved: state.db.count_by_kyc_status(KycStatus::Approved).await?,
        rejected: state.db.count_by_kyc_status(KycStatus::Rejected).await?,
        recent_submissions_30d: state.db.count_submitted_since(since).await?,
    }))
}

#[utoipa::path(get, path = "/api/admin/kyc/{org_id}", params(("org_id" = Uuid, Path,)),
    responses((status = 200, body = KycDetailResponse)), security(("bearerAuth" = [])))]
pub async fn admin_kyc_detail(
    Extension(state): Extension<AppState>,
    bearer: AuthBearer,
    Path(org_id): Path<Uuid>,
) -> Result<Json<KycDetailResponse>> {
    require_admin(&state, &bearer)?;
    let org = state.db.require_organization(&org_id).await?;
    let owners = state.db.list_beneficial_owners(&org_id).await?;
    let audit_trail = state.db.recent_audit_entries(&org_id, 50).await?;

    let documents = DocumentType::ALL
        .iter()
        .map(|doc| {
            let review = org.document_reviews.get(doc);
            DocumentInfo {
                document_type: *doc,
                display_name: doc.display_name().to_string(),
                status: org.document_status(*doc),
                uploaded: org.document_ref(*doc).is_some(),
                review_notes: review.and_then(|r| r.notes.clone()),
                rejection_reason: review.and_then(|r| r.reason.clone()),
            }
        })
        .collect();

    let completeness = evaluate_completeness(&org, &owners);
    Ok(Json(KycDetailResponse {
        beneficial_owners: owners.iter().map(OwnerSummary::from).collect(),
        documents,
        attestations: org.attestations,
        completeness,
        processor: ProcessorInfo {
            account_id: org.processor_account_id.clone(),
            charges_enabled: org.charges_enabled,
            payouts_enabled: org.payouts_enabled,
            disabled_reason: org.disabled_reason.clone(),
            requirements: org.requirements.clone(),
        },
        audit_trail,
        organization: org,
    }))
}

#[utoipa::path(post, path = "/api/admin/kyc/{org_id}/approve", params(("org_id" = Uuid, Path,)),
    request_body = ApproveRequest, responses((status = 200, body = ReviewActionResponse)),
    security(("bearerAuth" = [])))]
pub async fn admin_approve(
    Extension(state): Extension<AppState>,
    bearer: AuthBearer,
    Path(org_id): Path<Uuid>,
    Json(req): Json<ApproveRequest>,
) -> Result<Json<ReviewActionResponse>> {
    let admin = require_admin(&state, &bearer)?;
    let org = state.review.approve(&org_id, admin.admin_id, req.notes).await?;
    Ok(Json(review_response(&org, "Submission approved")))
}

#[utoipa::path(post, path = "/api/admin/kyc/{org_id}/reject", params(("org_id" = Uuid, Path,)),
    request_body = RejectRequest, responses((status = 200, body = ReviewActionResponse)),
    security(("bearerAuth" = [])))]
pub async fn admin_reject(
    Extension(state): Extension<AppState>,
    bearer: AuthBearer,
    Path(org_id): Path<Uuid>,
    Json(req): Json<RejectRequest>,
) -> Result<Json<ReviewActionResponse>> {
    let admin = require_admin(&state, &bearer)?;
    let org = state.review.reject(&org_id, admin.admin_id, &req.reason).await?;
    Ok(Json(review_response(&org, "Submission rejected")))
}

#[utoipa::path(post, path = "/api/admin/kyc/{org_id}/request-info", params(("org_id" = Uuid, Path,)),
    request_body = RequestInfoRequest, responses((status = 200, body = ReviewActionResponse)),
    security(("bearerAuth" = [])))]
pub async fn admin_request_info(
    Extension(state): Extension<AppState>,
    bearer: AuthBearer,
    Path(org_id): Path<Uuid>,
    Json(req): Json<RequestInfoRequest>,
) -> Result<Json<ReviewActionResponse>> {
    let admin = require_admin(&state, &bearer)?;
    let org = state
        .review
        .request_info(&org_id, admin.admin_id, &req.required_info)
        .await?;
    Ok(Json(review_response(&org, "Additional information requested")))
}

#[utoipa::path(post, path = "/api/admin/kyc/{org_id}/documents/{doc_type}/approve",
    params(("org_id" = Uuid, Path,), ("doc_type" = String, Path,)),
    request_body = DocumentApproveRequest, responses((status = 200, body = ReviewActionResponse)),
    security(("bearerAuth" = [])))]
pub async fn admin_approve_document(
    Extension(state): Extension<AppState>,
    bearer: AuthBearer,
    Path((org_id, doc_type)): Path<(Uuid, String)>,
    Json(req): Json<DocumentApproveRequest>,
) -> Result<Json<ReviewActionResponse>> {
    let admin = require_admin(&state, &bearer)?;
    let doc_type = parse_doc_type(&doc_type)?;
    let org = state
        .review
        .approve_document(&org_id, doc_type, admin.admin_id, req.notes)
        .await?;
    Ok(Json(review_response(&org, "Document approved")))
}

#[utoipa::path(post, path = "/api/admin/kyc/{org_id}/documents/{doc_type}/reject",
    params(("org_id" = Uuid, Path,), ("doc_type" = String, Path,)),
    request_body = DocumentRejectRequest, responses((status = 200, body = ReviewActionResponse)),
    security(("bearerAuth" = [])))]
pub async fn admin_reject_document(
    Extension(state): Extension<AppState>,
    bearer: AuthBearer,
    Path((org_id, doc_type)): Path<(Uuid, String)>,
    Json(req): Json<DocumentRejectRequest>,
) -> Result<Json<ReviewActionResponse>> {
    let admin = require_admin(&state, &bearer)?;
    let doc_type = parse_doc_type(&doc_type)?;
    let org = state
        .review
        .reject_document(&org_id, doc_type, admin.admin_id, &req.reason, req.notes)
        .await?;
    Ok(Json(review_response(&org, "Document rejected")))
}

#[utoipa::path(post, path = "/api/admin/kyc/{org_id}/documents/request", params(("org_id" = Uuid, Path,)),
    request_body = RequestDocumentsRequest, responses((status = 200, body = ReviewActionResponse)),
    security(("bearerAuth" = [])))]
pub async fn admin_request_documents(
    Extension(state): Extension<AppState>,
    bearer: AuthBearer,
    Path(org_id): Path<Uuid>,
    Json(req): Json<RequestDocumentsRequest>,
) -> Result<Json<ReviewActionResponse>> {
    let admin = require_admin(&state, &bearer)?;
    let org = state
        .review
        .request_documents(&org_id, admin.admin_id, &req.document_types, req.notes)
        .await?;
    Ok(Json(review_response(&org, "Documents requested")))
}

#[utoipa::path(post, path = "/api/admin/kyc/{org_id}/notes", params(("org_id" = Uuid, Path,)),
    request_body = NotesRequest, responses((status = 200, body = ReviewActionResponse)),
    security(("bearerAuth" = [])))]
pub async fn admin_add_notes(
    Extension(state): Extension<AppState>,
    bearer: AuthBearer,
    Path(org_id): Path<Uuid>,
    Json(req): Json<NotesRequest>,
) -> Result<Json<ReviewActionResponse>> {
    let admin = require_admin(&state, &bearer)?;
    let org = state.review.add_admin_notes(&org_id, admin.admin_id, &req.notes).await?;
    Ok(Json(review_response(&org, "Notes added")))
}

#[utoipa::path(post, path = "/api/admin/kyc/{org_id}/payouts/pause", params(("org_id" = Uuid, Path,)),
    responses((status = 200, body = ReviewActionResponse)), security(("bearerAuth" = [])))]
pub async fn admin_pause_payouts(
    Extension(state): Extension<AppState>,
    bearer: AuthBearer,
    Path(org_id): Path<Uuid>,
) -> Result<Json<ReviewActionResponse>> {
    let admin = require_admin(&state, &bearer)?;
    let org = state.kyc.pause_payouts(&org_id, Actor::admin(admin.admin_id)).await?;
    Ok(Json(review_response(&org, "Payouts paused")))
}

#[utoipa::path(post, path = "/api/admin/kyc/{org_id}/payouts/resume", params(("org_id" = Uuid, Path,)),
    responses((status = 200, body = ReviewActionResponse)), security(("bearerAuth" = [])))]
pub async fn admin_resume_payouts(
    Extension(state): Extension<AppState>,
    bearer: AuthBearer,
    Path(org_id): Path<Uuid>,
) -> Result<Json<ReviewActionResponse>> {
    let admin = require_admin(&state, &bearer)?;
    let org = state.kyc.resume_payouts(&org_id, Actor::admin(admin.admin_id)).await?;
    Ok(Json(review_response(&org, "Payouts resumed")))
}

#[utoipa::path(post, path = "/api/admin/kyc/{org_id}/link", params(("org_id" = Uuid, Path,)),
    responses((status = 200, body = OnboardingLinkResponse)), security(("bearerAuth" = [])))]
pub async fn admin_onboarding_link(
    Extension(state): Extension<AppState>,
    bearer: AuthBearer,
    Path(org_id): Path<Uuid>,
) -> Result<Json<OnboardingLinkResponse>> {
    let admin = require_admin(&state, &bearer)?;
    let url = state.kyc.onboarding_link(&org_id, Actor::admin(admin.admin_id)).await?;
    Ok(Json(OnboardingLinkResponse { url }))
}

fn review_response(org: &Organization, message: &str) -> ReviewActionResponse {
    ReviewActionResponse {
        organization_id: org.id,
        kyc_status: org.kyc_status,
        kyc_state: org.kyc_state,
        message: message.to_string(),
    }
}

// ---- webhook handler ----

/// Signature is verified over the raw body before any parsing. Unknown
/// accounts and unhandled event types are acknowledged, not errors, so the
/// processor does not retry them forever.
#[utoipa::path(post, path = "/api/webhooks/processor",
    responses((status = 200, body = WebhookResponse)))]
pub async fn processor_webhook(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>> {
    let signature = headers
        .get("Stripe-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Auth("Missing webhook signature header".to_string()))?;
    verify_signature(&state.webhook_secret, signature, &body)?;

    let event: WebhookEvent = serde_json::from_str(&body)
        .map_err(|e| AppError::Validation(format!("Malformed webhook payload: {}", e)))?;

    if event.event_type != "account.updated" {
        info!(action = "webhook_ignored", event_type = %event.event_type);
        return Ok(Json(WebhookResponse { status: "ignored".to_string() }));
    }

    let Some(status) = ProcessorAccountStatus::from_event_object(&event.data.object) else {
        info!(action = "webhook_ignored", reason = "unparseable account object");
        return Ok(Json(WebhookResponse { status: "ignored".to_string() }));
    };

    match state.kyc.sync_from_webhook(&status.account_id, &status).await? {
        Some(org) => {
            info!(action = "webhook_processed", org = %org.id, state = %org.kyc_state);
            Ok(Json(WebhookResponse { status: "processed".to_string() }))
        }
        None => Ok(Json(WebhookResponse { status: "ignored".to_string() })),
    }
}
