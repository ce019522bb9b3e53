use crate::database::sqlite::SqliteDatabase;
use crate::errors::{AppError, Result};
use crate::models::audit::{Actor, AuditAction, AuditLogEntry};
use crate::models::organization::{
    DocumentRequest, DocumentReview, DocumentStatus, DocumentType, KycState, KycStatus,
    Organization, OrgStatus,
};
use crate::services::notification_service::NotificationService;
use chrono::Utc;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Human review loop: approvals, rejections, info and document requests.
/// Processor state is never touched here; only local status and the audit
/// trail move.
pub struct ReviewService {
    db: Arc<SqliteDatabase>,
    notifier: Arc<NotificationService>,
}

impl ReviewService {
    pub fn new(db: Arc<SqliteDatabase>, notifier: Arc<NotificationService>) -> Self {
        Self { db, notifier }
    }

    pub async fn approve(
        &self,
        org_id: &Uuid,
        admin_id: Uuid,
        notes: Option<String>,
    ) -> Result<Organization> {
        let mut org = self.db.require_organization(org_id).await?;
        guard_reviewable(&org)?;

        org.kyc_status = KycStatus::Approved;
        org.kyc_state = KycState::Active;
        org.status = OrgStatus::Active;
        org.kyc_approved_at = Some(Utc::now());
        if org.verified_at.is_none() {
            org.verified_at = Some(Utc::now());
        }
        if let Some(notes) = &notes {
            org.admin_notes = Some(notes.clone());
        }
        self.commit(
            &org,
            Actor::admin(admin_id),
            AuditAction::KycApproved,
            json!({ "notes": notes }),
        )
        .await?;
        self.notifier.notify_approved(&org);
        tracing::info!(action = "kyc_approved", org = %org.id, admin = %admin_id, "submission approved");
        self.db.require_organization(org_id).await
    }

    pub async fn reject(
        &self,
        org_id: &Uuid,
        admin_id: Uuid,
        reason: &str,
    ) -> Result<Organization> {
        if reason.trim().is_empty() {
            return Err(AppError::Validation("Rejection reason is required".to_string()));
        }
        let mut org = self.db.require_organization(org_id).await?;
        guard_reviewable(&org)?;

        org.kyc_status = KycStatus::Rejected;
        org.kyc_state = KycState::Rejected;
        org.status = OrgStatus::KycRejected;
        org.kyc_rejected_at = Some(Utc::now());
        org.kyc_rejection_reason = Some(reason.to_string());
        self.commit(
            &org,
            Actor::admin(admin_id),
            AuditAction::KycRejected,
            json!({ "reason": reason }),
        )
        .await?;
        self.notifier.notify_rejected(&org, reason);
        tracing::info!(action = "kyc_rejected", org = %org.id, admin = %admin_id, "submission rejected");
        self.db.require_organization(org_id).await
    }

    /// Sends the application back to the organization. Repeated calls each
    /// write their own audit row; there is no dedup on purpose, the trail
    /// should show every ask.
    pub async fn request_info(
        &self,
        org_id: &Uuid,
        admin_id: Uuid,
        required_info: &str,
    ) -> Result<Organization> {
        if required_info.trim().is_empty() {
            return Err(AppError::Validation("Required info description is required".to_string()));
        }
        let mut org = self.db.require_organization(org_id).await?;
        if !matches!(org.kyc_status, KycStatus::PendingReview | KycStatus::UnderReview) {
            return Err(AppError::Precondition(format!(
                "Cannot request info while KYC status is {}",
                org.kyc_status
            )));
        }

        org.kyc_status = KycStatus::NeedsInfo;
        org.kyc_state = KycState::KycNeedsInfo;
        self.commit(
            &org,
            Actor::admin(admin_id),
            AuditAction::KycInfoRequested,
            json!({ "required_info": required_info }),
        )
        .await?;
        self.notifier.notify_info_requested(&org, required_info);
        self.db.require_organization(org_id).await
    }

    pub async fn approve_document(
        &self,
        org_id: &Uuid,
        doc_type: DocumentType,
        admin_id: Uuid,
        notes: Option<String>,
    ) -> Result<Organization> {
        self.review_document(org_id, doc_type, admin_id, DocumentStatus::Approved, None, notes)
            .await
    }

    pub async fn reject_document(
        &self,
        org_id: &Uuid,
        doc_type: DocumentType,
        admin_id: Uuid,
        reason: &str,
        notes: Option<String>,
    ) -> Result<Organization> {
        if reason.trim().is_empty() {
            return Err(AppError::Validation("Document rejection reason is required".to_string()));
        }
        self.review_document(
            org_id,
            doc_type,
            admin_id,
            DocumentStatus::Rejected,
            Some(reason.to_string()),
            notes,
        )
        .await
    }

    async fn review_document(
        &self,
        org_id: &Uuid,
        doc_type: DocumentType,
        admin_id: Uuid,
        status: DocumentStatus,
        reason: Option<String>,
        notes: Option<String>,
    ) -> Result<Organization> {
        let mut org = self.db.require_organization(org_id).await?;
        org.document_reviews.insert(
            doc_type,
            DocumentReview {
                status,
                reviewed_by: Some(admin_id),
                reviewed_at: Some(Utc::now()),
                reason: reason.clone(),
                notes: notes.clone(),
            },
        );
        let approved = status == DocumentStatus::Approved;
        let action = if approved {
            AuditAction::DocumentApproved
        } else {
            AuditAction::DocumentRejected
        };
        self.commit(
            &org,
            Actor::admin(admin_id),
            action,
            json!({
                "document_type": doc_type.as_str(),
                "reason": reason,
                "notes": notes,
            }),
        )
        .await?;
        self.notifier
            .notify_document_reviewed(&org, doc_type.display_name(), approved);
        self.db.require_organization(org_id).await
    }

    /// Replaces any outstanding document request wholesale. A new request
    /// supersedes the previous one rather than merging into it.
    pub async fn request_documents(
        &self,
        org_id: &Uuid,
        admin_id: Uuid,
        document_types: &[DocumentType],
        notes: Option<String>,
    ) -> Result<Organization> {
        if document_types.is_empty() {
            return Err(AppError::Validation("At least one document type is required".to_string()));
        }
        let mut org = self.db.require_organization(org_id).await?;

        let requested: Vec<String> = document_types.iter().map(|d| d.as_str().to_string()).collect();
        org.document_request = Some(DocumentRequest {
            request_id: Uuid::new_v4(),
            required_documents: document_types.to_vec(),
            requested_by: admin_id,
            requested_at: Utc::now(),
            notes: notes.clone(),
        });
        let mut reviews = BTreeMap::new();
        for doc_type in document_types {
            reviews.insert(
                *doc_type,
                DocumentReview {
                    status: DocumentStatus::NotUploaded,
                    reviewed_by: Some(admin_id),
                    reviewed_at: Some(Utc::now()),
                    reason: None,
                    notes: notes.clone(),
                },
            );
        }
        org.document_reviews = reviews;
        self.commit(
            &org,
            Actor::admin(admin_id),
            AuditAction::DocumentsRequested,
            json!({ "document_types": requested, "notes": notes }),
        )
        .await?;
        let display: Vec<String> = document_types
            .iter()
            .map(|d| d.display_name().to_string())
            .collect();
        self.notifier.notify_documents_requested(&org, &display);
        self.db.require_organization(org_id).await
    }

    pub async fn add_admin_notes(
        &self,
        org_id: &Uuid,
        admin_id: Uuid,
        notes: &str,
    ) -> Result<Organization> {
        if notes.trim().is_empty() {
            return Err(AppError::Validation("Notes are required".to_string()));
        }
        let mut org = self.db.require_organization(org_id).await?;
        org.admin_notes = Some(notes.to_string());
        self.commit(
            &org,
            Actor::admin(admin_id),
            AuditAction::NotesAdded,
            json!({ "notes": notes }),
        )
        .await?;
        self.db.require_organization(org_id).await
    }

    /// Commits the status change and its audit row in one transaction.
    async fn commit(
        &self,
        org: &Organization,
        actor: Actor,
        action: AuditAction,
        details: serde_json::Value,
    ) -> Result<()> {
        let entry = AuditLogEntry::new(org.id, actor.actor_type, actor.id, action, details);
        self.db.update_organization_with_audit(org, &entry).await
    }
}

fn guard_reviewable(org: &Organization) -> Result<()> {
    if !org.kyc_status.is_reviewable() {
        return Err(AppError::Precondition(format!(
            "KYC status is {}, not reviewable",
            org.kyc_status
        )));
    }
    Ok(())
}
