use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// Processor-lifecycle state of an organization's compliance onboarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum KycState {
    #[serde(rename = "REGISTERED")]
    Registered,
    #[serde(rename = "KYC_STARTED")]
    KycStarted,
    #[serde(rename = "KYC_SUBMITTED")]
    KycSubmitted,
    #[serde(rename = "KYC_IN_REVIEW")]
    KycInReview,
    #[serde(rename = "KYC_NEEDS_INFO")]
    KycNeedsInfo,
    #[serde(rename = "VERIFIED")]
    Verified,
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "REJECTED")]
    Rejected,
    #[serde(rename = "SUSPENDED")]
    Suspended,
}

impl KycState {
    pub fn as_str(&self) -> &'static str {
        match self {
            KycState::Registered => "REGISTERED",
            KycState::KycStarted => "KYC_STARTED",
            KycState::KycSubmitted => "KYC_SUBMITTED",
            KycState::KycInReview => "KYC_IN_REVIEW",
            KycState::KycNeedsInfo => "KYC_NEEDS_INFO",
            KycState::Verified => "VERIFIED",
            KycState::Active => "ACTIVE",
            KycState::Rejected => "REJECTED",
            KycState::Suspended => "SUSPENDED",
        }
    }
}

impl fmt::Display for KycState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KycState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REGISTERED" => Ok(KycState::Registered),
            "KYC_STARTED" => Ok(KycState::KycStarted),
            "KYC_SUBMITTED" => Ok(KycState::KycSubmitted),
            "KYC_IN_REVIEW" => Ok(KycState::KycInReview),
            "KYC_NEEDS_INFO" => Ok(KycState::KycNeedsInfo),
            "VERIFIED" => Ok(KycState::Verified),
            "ACTIVE" => Ok(KycState::Active),
            "REJECTED" => Ok(KycState::Rejected),
            "SUSPENDED" => Ok(KycState::Suspended),
            other => Err(format!("unknown kyc state: {}", other)),
        }
    }
}

/// Submission-facing review status, driven by the admin review loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum KycStatus {
    NotSubmitted,
    PendingReview,
    UnderReview,
    NeedsInfo,
    Approved,
    Rejected,
}

impl KycStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KycStatus::NotSubmitted => "not_submitted",
            KycStatus::PendingReview => "pending_review",
            KycStatus::UnderReview => "under_review",
            KycStatus::NeedsInfo => "needs_info",
            KycStatus::Approved => "approved",
            KycStatus::Rejected => "rejected",
        }
    }

    /// Whether an admin decision (approve/reject) is still possible.
    pub fn is_reviewable(&self) -> bool {
        matches!(
            self,
            KycStatus::PendingReview | KycStatus::UnderReview | KycStatus::NeedsInfo
        )
    }
}

impl fmt::Display for KycStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KycStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_submitted" => Ok(KycStatus::NotSubmitted),
            "pending_review" => Ok(KycStatus::PendingReview),
            "under_review" => Ok(KycStatus::UnderReview),
            "needs_info" => Ok(KycStatus::NeedsInfo),
            "approved" => Ok(KycStatus::Approved),
            "rejected" => Ok(KycStatus::Rejected),
            other => Err(format!("unknown kyc status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OrgStatus {
    Pending,
    Active,
    KycRejected,
    Suspended,
}

impl OrgStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrgStatus::Pending => "pending",
            OrgStatus::Active => "active",
            OrgStatus::KycRejected => "kyc_rejected",
            OrgStatus::Suspended => "suspended",
        }
    }
}

impl FromStr for OrgStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrgStatus::Pending),
            "active" => Ok(OrgStatus::Active),
            "kyc_rejected" => Ok(OrgStatus::KycRejected),
            "suspended" => Ok(OrgStatus::Suspended),
            other => Err(format!("unknown org status: {}", other)),
        }
    }
}

/// The four compliance documents every organization must supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    ArticlesOfIncorporation,
    TaxExemptLetter,
    BankStatement,
    BoardResolution,
}

impl DocumentType {
    pub const ALL: [DocumentType; 4] = [
        DocumentType::ArticlesOfIncorporation,
        DocumentType::TaxExemptLetter,
        DocumentType::BankStatement,
        DocumentType::BoardResolution,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::ArticlesOfIncorporation => "articles_of_incorporation",
            DocumentType::TaxExemptLetter => "tax_exempt_letter",
            DocumentType::BankStatement => "bank_statement",
            DocumentType::BoardResolution => "board_resolution",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            DocumentType::ArticlesOfIncorporation => "Articles of Incorporation",
            DocumentType::TaxExemptLetter => "IRS Tax Exempt Letter",
            DocumentType::BankStatement => "Bank Statement",
            DocumentType::BoardResolution => "Board Resolution",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "articles_of_incorporation" => Ok(DocumentType::ArticlesOfIncorporation),
            "tax_exempt_letter" => Ok(DocumentType::TaxExemptLetter),
            "bank_statement" => Ok(DocumentType::BankStatement),
            "board_resolution" => Ok(DocumentType::BoardResolution),
            other => Err(format!("unknown document type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    NotUploaded,
    Uploaded,
    Approved,
    Rejected,
}

/// Reviewer verdict on a single document, kept in the per-org review map.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DocumentReview {
    pub status: DocumentStatus,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
    pub notes: Option<String>,
}

/// An outstanding admin request for additional documents. A new request
/// replaces the previous one; history lives in the audit log.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DocumentRequest {
    pub request_id: Uuid,
    pub required_documents: Vec<DocumentType>,
    pub requested_by: Uuid,
    pub requested_at: DateTime<Utc>,
    pub notes: Option<String>,
}

/// Attestations the submitter affirms during onboarding.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, ToSchema)]
pub struct Attestations {
    pub tax_exempt: bool,
    pub anti_terrorism: bool,
    pub legitimate_entity: bool,
    pub consent_checks: bool,
    pub beneficial_ownership_disclosure: bool,
    pub information_accuracy: bool,
    pub penalty_of_perjury: bool,
}

/// Processor-reported requirements, cached locally on every sync.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct Requirements {
    #[serde(default)]
    pub currently_due: Vec<String>,
    #[serde(default)]
    pub eventually_due: Vec<String>,
    #[serde(default)]
    pub past_due: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Organization {
    pub id: Uuid,
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
    pub country: String,
    pub primary_purpose: Option<String>,

    pub attestations: Attestations,

    // Opaque file references for the four required documents.
    pub articles_of_incorporation: Option<String>,
    pub tax_exempt_letter: Option<String>,
    pub bank_statement: Option<String>,
    pub board_resolution: Option<String>,
    pub document_reviews: BTreeMap<DocumentType, DocumentReview>,
    pub document_request: Option<DocumentRequest>,

    pub processor_account_id: Option<String>,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub disabled_reason: Option<String>,
    pub requirements: Requirements,

    pub kyc_status: KycStatus,
    pub kyc_state: KycState,
    pub status: OrgStatus,

    pub admin_notes: Option<String>,
    pub kyc_rejection_reason: Option<String>,
    pub kyc_submitted_at: Option<DateTime<Utc>>,
    pub kyc_approved_at: Option<DateTime<Utc>>,
    pub kyc_rejected_at: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic-concurrency guard; bumped on every state mutation.
    pub version: i64,
}

impl Organization {
    pub fn new(name: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            legal_name: None,
            ein: None,
            website: None,
            phone: None,
            email: None,
            address_line_1: None,
            address_line_2: None,
            city: None,
            state: None,
            zip_code: None,
            country: "US".to_string(),
            primary_purpose: None,
            attestations: Attestations::default(),
            articles_of_incorporation: None,
            tax_exempt_letter: None,
            bank_statement: None,
            board_resolution: None,
            document_reviews: BTreeMap::new(),
            document_request: None,
            processor_account_id: None,
            charges_enabled: false,
            payouts_enabled: false,
            disabled_reason: None,
            requirements: Requirements::default(),
            kyc_status: KycStatus::NotSubmitted,
            kyc_state: KycState::Registered,
            status: OrgStatus::Pending,
            admin_notes: None,
            kyc_rejection_reason: None,
            kyc_submitted_at: None,
            kyc_approved_at: None,
            kyc_rejected_at: None,
            verified_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn document_ref(&self, doc: DocumentType) -> Option<&str> {
        match doc {
            DocumentType::ArticlesOfIncorporation => self.articles_of_incorporation.as_deref(),
            DocumentType::TaxExemptLetter => self.tax_exempt_letter.as_deref(),
            DocumentType::BankStatement => self.bank_statement.as_deref(),
            DocumentType::BoardResolution => self.board_resolution.as_deref(),
        }
    }

    /// Review verdict wins over the raw upload flag.
    pub fn document_status(&self, doc: DocumentType) -> DocumentStatus {
        if let Some(review) = self.document_reviews.get(&doc) {
            return review.status;
        }
        if self.document_ref(doc).is_some() {
            DocumentStatus::Uploaded
        } else {
            DocumentStatus::NotUploaded
        }
    }

    pub fn uploaded_document_count(&self) -> usize {
        DocumentType::ALL
            .iter()
            .filter(|d| self.document_ref(**d).is_some())
            .count()
    }

    pub fn can_receive_payouts(&self) -> bool {
        self.kyc_status == KycStatus::Approved
            && self.charges_enabled
            && self.payouts_enabled
            && self.processor_account_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_str() {
        for state in [
            KycState::Registered,
            KycState::KycStarted,
            KycState::KycSubmitted,
            KycState::KycInReview,
            KycState::KycNeedsInfo,
            KycState::Verified,
            KycState::Active,
            KycState::Rejected,
            KycState::Suspended,
        ] {
            assert_eq!(state.as_str().parse::<KycState>().unwrap(), state);
        }
    }

    #[test]
    fn review_verdict_overrides_upload_flag() {
        let mut org = Organization::new("First Church".to_string());
        org.bank_statement = Some("uploads/bank.pdf".to_string());
        assert_eq!(org.document_status(DocumentType::BankStatement), DocumentStatus::Uploaded);
        org.document_reviews.insert(
            DocumentType::BankStatement,
            DocumentReview {
                status: DocumentStatus::Rejected,
                reviewed_by: Some(Uuid::new_v4()),
                reviewed_at: Some(Utc::now()),
                reason: Some("illegible".to_string()),
                notes: None,
            },
        );
        assert_eq!(org.document_status(DocumentType::BankStatement), DocumentStatus::Rejected);
    }

    #[test]
    fn payouts_require_approval_and_account() {
        let mut org = Organization::new("First Church".to_string());
        org.charges_enabled = true;
        org.payouts_enabled = true;
        assert!(!org.can_receive_payouts());
        org.kyc_status = KycStatus::Approved;
        org.processor_account_id = Some("acct_1".to_string());
        assert!(org.can_receive_payouts());
    }
}
