use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    System,
    OrganizationUser,
    InternalAdmin,
    Webhook,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorType::System => "system",
            ActorType::OrganizationUser => "organization_user",
            ActorType::InternalAdmin => "internal_admin",
            ActorType::Webhook => "webhook",
        }
    }
}

impl FromStr for ActorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(ActorType::System),
            "organization_user" => Ok(ActorType::OrganizationUser),
            "internal_admin" => Ok(ActorType::InternalAdmin),
            "webhook" => Ok(ActorType::Webhook),
            other => Err(format!("unknown actor type: {}", other)),
        }
    }
}

/// Who performed an operation, threaded from the HTTP layer down into every
/// audit entry.
#[derive(Debug, Clone, Copy)]
pub struct Actor {
    pub actor_type: ActorType,
    pub id: Option<Uuid>,
}

impl Actor {
    pub fn system() -> Self {
        Self { actor_type: ActorType::System, id: None }
    }

    pub fn webhook() -> Self {
        Self { actor_type: ActorType::Webhook, id: None }
    }

    pub fn admin(id: Uuid) -> Self {
        Self { actor_type: ActorType::InternalAdmin, id: Some(id) }
    }

    pub fn organization_user(id: Uuid) -> Self {
        Self { actor_type: ActorType::OrganizationUser, id: Some(id) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum AuditAction {
    #[serde(rename = "KYC_STARTED")]
    KycStarted,
    #[serde(rename = "KYC_SUBMITTED")]
    KycSubmitted,
    #[serde(rename = "KYC_STATE_CHANGED")]
    KycStateChanged,
    #[serde(rename = "KYC_APPROVED")]
    KycApproved,
    #[serde(rename = "KYC_REJECTED")]
    KycRejected,
    #[serde(rename = "KYC_INFO_REQUESTED")]
    KycInfoRequested,
    #[serde(rename = "DOCUMENT_APPROVED")]
    DocumentApproved,
    #[serde(rename = "DOCUMENT_REJECTED")]
    DocumentRejected,
    #[serde(rename = "DOCUMENTS_REQUESTED")]
    DocumentsRequested,
    #[serde(rename = "ONBOARDING_LINK_GENERATED")]
    OnboardingLinkGenerated,
    #[serde(rename = "PAYOUTS_PAUSED")]
    PayoutsPaused,
    #[serde(rename = "PAYOUTS_RESUMED")]
    PayoutsResumed,
    #[serde(rename = "NOTES_ADDED")]
    NotesAdded,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::KycStarted => "KYC_STARTED",
            AuditAction::KycSubmitted => "KYC_SUBMITTED",
            AuditAction::KycStateChanged => "KYC_STATE_CHANGED",
            AuditAction::KycApproved => "KYC_APPROVED",
            AuditAction::KycRejected => "KYC_REJECTED",
            AuditAction::KycInfoRequested => "KYC_INFO_REQUESTED",
            AuditAction::DocumentApproved => "DOCUMENT_APPROVED",
            AuditAction::DocumentRejected => "DOCUMENT_REJECTED",
            AuditAction::DocumentsRequested => "DOCUMENTS_REQUESTED",
            AuditAction::OnboardingLinkGenerated => "ONBOARDING_LINK_GENERATED",
            AuditAction::PayoutsPaused => "PAYOUTS_PAUSED",
            AuditAction::PayoutsResumed => "PAYOUTS_RESUMED",
            AuditAction::NotesAdded => "NOTES_ADDED",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "KYC_STARTED" => Ok(AuditAction::KycStarted),
            "KYC_SUBMITTED" => Ok(AuditAction::KycSubmitted),
            "KYC_STATE_CHANGED" => Ok(AuditAction::KycStateChanged),
            "KYC_APPROVED" => Ok(AuditAction::KycApproved),
            "KYC_REJECTED" => Ok(AuditAction::KycRejected),
            "KYC_INFO_REQUESTED" => Ok(AuditAction::KycInfoRequested),
            "DOCUMENT_APPROVED" => Ok(AuditAction::DocumentApproved),
            "DOCUMENT_REJECTED" => Ok(AuditAction::DocumentRejected),
            "DOCUMENTS_REQUESTED" => Ok(AuditAction::DocumentsRequested),
            "ONBOARDING_LINK_GENERATED" => Ok(AuditAction::OnboardingLinkGenerated),
            "PAYOUTS_PAUSED" => Ok(AuditAction::PayoutsPaused),
            "PAYOUTS_RESUMED" => Ok(AuditAction::PayoutsResumed),
            "NOTES_ADDED" => Ok(AuditAction::NotesAdded),
            other => Err(format!("unknown audit action: {}", other)),
        }
    }
}

/// One immutable audit record. Rows are only ever inserted; there is no
/// update or delete path anywhere in the crate.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub actor_type: ActorType,
    pub actor_id: Option<Uuid>,
    pub action: AuditAction,
    #[schema(value_type = Object)]
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn new(
        organization_id: Uuid,
        actor_type: ActorType,
        actor_id: Option<Uuid>,
        action: AuditAction,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id,
            actor_type,
            actor_id,
            action,
            details,
            created_at: Utc::now(),
        }
    }
}
