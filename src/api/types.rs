use crate::models::audit::AuditLogEntry;
use crate::models::beneficial_owner::BeneficialOwner;
use crate::models::organization::{
    Attestations, DocumentRequest, DocumentStatus, DocumentType, KycState, KycStatus,
    Organization, OrgStatus, Requirements,
};
use crate::services::completeness::CompletenessReport;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

// ---- org-facing onboarding ----

#[derive(Debug, Deserialize, ToSchema)]
pub struct OnboardingSubmitRequest {
    pub name: String,
    pub legal_name: Option<String>,
    pub ein: Option<String>,
    pub website: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address_line_1: Option<String>,
    pub address_line_2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    pub primary_purpose: Option<String>,
    #[serde(default)]
    pub attestations: Attestations,
    #[serde(default)]
    pub documents: DocumentRefs,
    #[serde(default)]
    pub beneficial_owners: Vec<BeneficialOwnerInput>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct DocumentRefs {
    pub articles_of_incorporation: Option<String>,
    pub tax_exempt_letter: Option<String>,
    pub bank_statement: Option<String>,
    pub board_resolution: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BeneficialOwnerInput {
    pub first_name: String,
    pub last_name: String,
    pub title: Option<String>,
    #[serde(default)]
    pub is_primary: bool,
    pub date_of_birth: Option<NaiveDate>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub gov_id_number: Option<String>,
    pub gov_id_type: Option<String>,
    pub id_front_ref: Option<String>,
    pub id_back_ref: Option<String>,
    pub address_line_1: Option<String>,
    pub address_line_2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OnboardingSubmitResponse {
    pub organization_id: Uuid,
    pub kyc_state: KycState,
    pub kyc_status: KycStatus,
    pub processor_account_id: Option<String>,
    pub completeness: CompletenessReport,
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InitKycResponse {
    pub organization_id: Uuid,
    pub processor_account_id: Option<String>,
    pub kyc_state: KycState,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OnboardingLinkResponse {
    pub url: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct KycStatusResponse {
    pub organization_id: Uuid,
    pub kyc_state: KycState,
    pub kyc_status: KycStatus,
    pub status: OrgStatus,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub disabled_reason: Option<String>,
    pub requirements: Requirements,
    pub completeness: CompletenessReport,
    pub submitted_at: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub outstanding_document_request: Option<DocumentRequest>,
}

// ---- admin review ----

#[derive(Debug, Deserialize, ToSchema)]
pub struct PendingQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub status: Option<KycStatus>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PendingListResponse {
    pub organizations: Vec<PendingSummary>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PendingSummary {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub kyc_status: KycStatus,
    pub kyc_state: KycState,
    pub submitted_at: Option<DateTime<Utc>>,
    pub completeness: CompletenessReport,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct KycStatsResponse {
    pub not_submitted: i64,
    pub pending_review: i64,
    pub under_review: i64,
    pub needs_info: i64,
    pub approved: i64,
    pub rejected: i64,
    pub recent_submissions_30d: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct KycDetailResponse {
    pub organization: Organization,
    pub beneficial_owners: Vec<OwnerSummary>,
    pub documents: Vec<DocumentInfo>,
    pub attestations: Attestations,
    pub completeness: CompletenessReport,
    pub processor: ProcessorInfo,
    pub audit_trail: Vec<AuditLogEntry>,
}

/// Projection of an owner safe to show reviewers: the government ID never
/// leaves the store, only its last four digits.
#[derive(Debug, Serialize, ToSchema)]
pub struct OwnerSummary {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub title: Option<String>,
    pub is_primary: bool,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gov_id_last4: Option<String>,
    pub has_id_front: bool,
    pub has_id_back: bool,
}

impl From<&BeneficialOwner> for OwnerSummary {
    fn from(owner: &BeneficialOwner) -> Self {
        Self {
            id: owner.id,
            first_name: owner.first_name.clone(),
            last_name: owner.last_name.clone(),
            title: owner.title.clone(),
            is_primary: owner.is_primary,
            email: owner.email.clone(),
            phone: owner.phone.clone(),
            date_of_birth: owner.date_of_birth,
            gov_id_last4: owner.gov_id_last4(),
            has_id_front: owner.id_front_ref.is_some(),
            has_id_back: owner.id_back_ref.is_some(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DocumentInfo {
    pub document_type: DocumentType,
    pub display_name: String,
    pub status: DocumentStatus,
    pub uploaded: bool,
    pub review_notes: Option<String>,
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProcessorInfo {
    pub account_id: Option<String>,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub disabled_reason: Option<String>,
    pub requirements: Requirements,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ApproveRequest {
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RejectRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RequestInfoRequest {
    pub required_info: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DocumentApproveRequest {
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DocumentRejectRequest {
    pub reason: String,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RequestDocumentsRequest {
    pub document_types: Vec<DocumentType>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct NotesRequest {
    pub notes: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReviewActionResponse {
    pub organization_id: Uuid,
    pub kyc_status: KycStatus,
    pub kyc_state: KycState,
    pub message: String,
}

// ---- webhook ----

#[derive(Debug, Deserialize, ToSchema)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookData,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct WebhookData {
    #[schema(value_type = Object)]
    pub object: serde_json::Value,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookResponse {
    pub status: String,
}
