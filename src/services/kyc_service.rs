use crate::database::sqlite::SqliteDatabase;
use crate::errors::{AppError, Result};
use crate::models::audit::{Actor, AuditAction, AuditLogEntry};
use crate::models::beneficial_owner::BeneficialOwner;
use crate::models::organization::{KycState, KycStatus, Organization, OrgStatus};
use crate::services::completeness::validate_for_submission;
use crate::services::notification_service::NotificationService;
use crate::services::stripe_gateway::{
    AddressLines, CompliancePackage, IndividualProfile, ProcessorAccountStatus, ProcessorGateway,
    PAYOUT_DELAY_NORMAL, PAYOUT_DELAY_PAUSED,
};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Drives an organization through the compliance lifecycle. Every mutation
/// follows the same shape: guard locally, call the processor, then commit the
/// version-checked state change and its audit row in a single transaction.
pub struct KycService {
    db: Arc<SqliteDatabase>,
    gateway: Arc<dyn ProcessorGateway>,
    notifier: Arc<NotificationService>,
    frontend_url: String,
}

impl KycService {
    pub fn new(
        db: Arc<SqliteDatabase>,
        gateway: Arc<dyn ProcessorGateway>,
        notifier: Arc<NotificationService>,
        frontend_url: String,
    ) -> Self {
        Self { db, gateway, notifier, frontend_url }
    }

    /// REGISTERED -> KYC_STARTED. Provisions the processor sub-account; a
    /// gateway failure leaves the organization untouched.
    pub async fn init_kyc(&self, org_id: &Uuid, actor: Actor) -> Result<Organization> {
        let mut org = self.db.require_organization(org_id).await?;
        if org.kyc_state != KycState::Registered || org.processor_account_id.is_some() {
            return Err(AppError::Precondition(format!(
                "KYC already started for organization {} (state {})",
                org.id, org.kyc_state
            )));
        }

        let idempotency_key = format!("org-{}-create-account", org.id);
        let account_id = self
            .gateway
            .create_account(&org.name, org.email.as_deref(), org.website.as_deref(), &idempotency_key)
            .await?;

        org.processor_account_id = Some(account_id.clone());
        org.kyc_state = KycState::KycStarted;
        let entry = audit_entry(
            &org,
            actor,
            AuditAction::KycStarted,
            json!({ "processor_account_id": account_id }),
        );
        self.persist_after_gateway(&org, &entry).await?;
        tracing::info!(action = "kyc_started", org = %org.id, account = %account_id, "processor account created");
        self.db.require_organization(org_id).await
    }

    /// KYC_STARTED/KYC_NEEDS_INFO -> KYC_SUBMITTED. Validates the package
    /// locally before any external call, then pushes company and owner data
    /// to the processor.
    pub async fn submit_compliance_package(
        &self,
        org_id: &Uuid,
        actor: Actor,
    ) -> Result<Organization> {
        let mut org = self.db.require_organization(org_id).await?;
        let account_id = org.processor_account_id.clone().ok_or_else(|| {
            AppError::Precondition("KYC has not been initialized for this organization".to_string())
        })?;
        if !matches!(
            org.kyc_state,
            KycState::KycStarted | KycState::KycNeedsInfo | KycState::KycSubmitted
        ) {
            return Err(AppError::Precondition(format!(
                "Cannot submit compliance package in state {}",
                org.kyc_state
            )));
        }

        let owners = self.db.list_beneficial_owners(org_id).await?;
        let validation = validate_for_submission(&org, &owners);
        if !validation.valid {
            return Err(AppError::Validation(validation.errors.join("; ")));
        }

        let package = build_compliance_package(&org, &owners)?;
        let idempotency_key = format!("org-{}-submit-{}", org.id, org.version);
        let status = self
            .gateway
            .modify_account(&account_id, &package, &idempotency_key)
            .await?;

        org.kyc_status = KycStatus::PendingReview;
        org.kyc_state = KycState::KycSubmitted;
        org.kyc_submitted_at = Some(Utc::now());
        apply_processor_snapshot(&mut org, &status);
        let entry = audit_entry(
            &org,
            actor,
            AuditAction::KycSubmitted,
            json!({
                "processor_account_id": account_id,
                "owners": owners.len(),
                "processor_snapshot": {
                    "charges_enabled": status.charges_enabled,
                    "payouts_enabled": status.payouts_enabled,
                    "currently_due": status.requirements.currently_due,
                },
            }),
        );
        self.persist_after_gateway(&org, &entry).await?;
        self.notifier.notify_submission_received(&org);
        tracing::info!(action = "kyc_submitted", org = %org.id, "compliance package submitted");
        self.db.require_organization(org_id).await
    }

    /// Fresh hosted-onboarding URL; previous links expire processor-side.
    pub async fn onboarding_link(&self, org_id: &Uuid, actor: Actor) -> Result<String> {
        let org = self.db.require_organization(org_id).await?;
        let account_id = org.processor_account_id.clone().ok_or_else(|| {
            AppError::Precondition("No processor account found for organization".to_string())
        })?;

        let refresh_url = format!("{}/kyc/refresh", self.frontend_url);
        let return_url = format!("{}/kyc/complete", self.frontend_url);
        let url = self
            .gateway
            .create_onboarding_link(&account_id, &refresh_url, &return_url)
            .await?;

        let entry = audit_entry(
            &org,
            actor,
            AuditAction::OnboardingLinkGenerated,
            json!({ "processor_account_id": account_id, "link_url": url }),
        );
        self.db.append_audit(&entry).await?;
        Ok(url)
    }

    /// Pulls the processor's view and reconciles local state. Idempotent:
    /// when the derived state matches, no audit row is written; cached
    /// processor flags are still refreshed if they drifted.
    pub async fn sync_processor_status(&self, org_id: &Uuid, actor: Actor) -> Result<Organization> {
        let org = self.db.require_organization(org_id).await?;
        let account_id = org.processor_account_id.clone().ok_or_else(|| {
            AppError::Precondition("No processor account found for organization".to_string())
        })?;

        let status = self.gateway.retrieve_account(&account_id).await?;
        self.apply_sync(org, &status, actor).await
    }

    /// Same reconciliation, driven by an `account.updated` webhook payload
    /// instead of an outbound retrieve.
    pub async fn sync_from_webhook(
        &self,
        processor_account_id: &str,
        status: &ProcessorAccountStatus,
    ) -> Result<Option<Organization>> {
        let Some(org) = self
            .db
            .get_organization_by_processor_account(processor_account_id)
            .await?
        else {
            tracing::info!(account = %processor_account_id, "webhook for unknown processor account, ignoring");
            return Ok(None);
        };
        let org = self.apply_sync(org, status, Actor::webhook()).await?;
        Ok(Some(org))
    }

    async fn apply_sync(
        &self,
        mut org: Organization,
        status: &ProcessorAccountStatus,
        actor: Actor,
    ) -> Result<Organization> {
        let previous_state = org.kyc_state;
        let next_state = derive_kyc_state(status);

        let flags_changed = org.charges_enabled != status.charges_enabled
            || org.payouts_enabled != status.payouts_enabled
            || org.disabled_reason != status.disabled_reason
            || org.requirements.currently_due != status.requirements.currently_due;

        if next_state == previous_state {
            if flags_changed {
                apply_processor_snapshot(&mut org, status);
                self.db.update_organization(&org).await?;
            }
            return self.db.require_organization(&org.id).await;
        }

        apply_processor_snapshot(&mut org, status);
        org.kyc_state = next_state;
        match next_state {
            KycState::Active => {
                org.status = OrgStatus::Active;
                org.kyc_status = KycStatus::Approved;
                if org.verified_at.is_none() {
                    org.verified_at = Some(Utc::now());
                }
            }
            KycState::Suspended => {
                org.status = OrgStatus::Suspended;
            }
            KycState::KycNeedsInfo => {
                org.kyc_status = KycStatus::NeedsInfo;
            }
            _ => {}
        }
        let entry = audit_entry(
            &org,
            actor,
            AuditAction::KycStateChanged,
            json!({
                "previous_state": previous_state,
                "new_state": next_state,
                "charges_enabled": status.charges_enabled,
                "payouts_enabled": status.payouts_enabled,
                "disabled_reason": status.disabled_reason,
                "currently_due": status.requirements.currently_due,
            }),
        );
        self.db.update_organization_with_audit(&org, &entry).await?;
        tracing::info!(
            action = "kyc_state_changed",
            org = %org.id,
            previous = %previous_state,
            next = %next_state,
            "processor status reconciled"
        );
        self.db.require_organization(&org.id).await
    }

    pub async fn pause_payouts(&self, org_id: &Uuid, actor: Actor) -> Result<Organization> {
        self.toggle_payouts(org_id, actor, false).await
    }

    pub async fn resume_payouts(&self, org_id: &Uuid, actor: Actor) -> Result<Organization> {
        self.toggle_payouts(org_id, actor, true).await
    }

    async fn toggle_payouts(
        &self,
        org_id: &Uuid,
        actor: Actor,
        enable: bool,
    ) -> Result<Organization> {
        let mut org = self.db.require_organization(org_id).await?;
        let account_id = org.processor_account_id.clone().ok_or_else(|| {
            AppError::Precondition("No processor account found for organization".to_string())
        })?;

        let delay_days = if enable { PAYOUT_DELAY_NORMAL } else { PAYOUT_DELAY_PAUSED };
        let operation = if enable { "resume-payouts" } else { "pause-payouts" };
        let idempotency_key = format!("org-{}-{}-{}", org.id, operation, org.version);
        self.gateway
            .modify_payout_schedule(&account_id, delay_days, &idempotency_key)
            .await?;

        let previous = org.payouts_enabled;
        org.payouts_enabled = enable;
        let action = if enable { AuditAction::PayoutsResumed } else { AuditAction::PayoutsPaused };
        let entry = audit_entry(
            &org,
            actor,
            action,
            json!({
                "processor_account_id": account_id,
                "previous_payouts_enabled": previous,
            }),
        );
        self.persist_after_gateway(&org, &entry).await?;
        self.db.require_organization(org_id).await
    }

    /// Local write after a successful gateway write; the state change and
    /// its audit row commit together. A failure here leaves the processor
    /// ahead of us; the next sync reconciles, so we log it loudly and
    /// surface the error.
    async fn persist_after_gateway(&self, org: &Organization, entry: &AuditLogEntry) -> Result<()> {
        if let Err(e) = self.db.update_organization_with_audit(org, entry).await {
            tracing::error!(
                action = "persist_after_processor_write_failed",
                org = %org.id,
                error = %e,
                "local state is behind the processor until the next sync"
            );
            return Err(e);
        }
        Ok(())
    }
}

fn audit_entry(
    org: &Organization,
    actor: Actor,
    action: AuditAction,
    details: serde_json::Value,
) -> AuditLogEntry {
    AuditLogEntry::new(org.id, actor.actor_type, actor.id, action, details)
}

/// Decision table for the processor-reported account shape.
pub fn derive_kyc_state(status: &ProcessorAccountStatus) -> KycState {
    if status.disabled_reason.is_some() {
        KycState::Suspended
    } else if !status.requirements.currently_due.is_empty() {
        KycState::KycNeedsInfo
    } else if status.charges_enabled && !status.payouts_enabled {
        KycState::Verified
    } else if status.payouts_enabled {
        KycState::Active
    } else {
        KycState::KycInReview
    }
}

fn apply_processor_snapshot(org: &mut Organization, status: &ProcessorAccountStatus) {
    org.charges_enabled = status.charges_enabled;
    org.payouts_enabled = status.payouts_enabled;
    org.disabled_reason = status.disabled_reason.clone();
    org.requirements = status.requirements.clone();
}

fn build_compliance_package(
    org: &Organization,
    owners: &[BeneficialOwner],
) -> Result<CompliancePackage> {
    let company_name = org
        .legal_name
        .clone()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| org.name.clone());
    let tax_id = org
        .ein
        .clone()
        .ok_or_else(|| AppError::Validation("EIN is required".to_string()))?;

    let mut individuals = Vec::with_capacity(owners.len());
    for owner in owners {
        let email = owner
            .email
            .clone()
            .ok_or_else(|| AppError::Validation(format!("Beneficial owner {} missing email", owner.id)))?;
        let date_of_birth = owner.date_of_birth.ok_or_else(|| {
            AppError::Validation(format!("Beneficial owner {} missing date of birth", owner.id))
        })?;
        individuals.push(IndividualProfile {
            first_name: owner.first_name.clone(),
            last_name: owner.last_name.clone(),
            email,
            phone: owner.phone.clone(),
            date_of_birth,
            gov_id_last4: owner.gov_id_last4(),
            id_front_ref: owner.id_front_ref.clone(),
            id_back_ref: owner.id_back_ref.clone(),
            title: owner.title.clone(),
            is_primary: owner.is_primary,
            address: AddressLines {
                line1: owner.address_line_1.clone(),
                line2: owner.address_line_2.clone(),
                city: owner.city.clone(),
                state: owner.state.clone(),
                postal_code: owner.zip_code.clone(),
                country: owner.country.clone(),
            },
        });
    }

    Ok(CompliancePackage {
        company_name,
        tax_id,
        phone: org.phone.clone(),
        website: org.website.clone(),
        address: AddressLines {
            line1: org.address_line_1.clone(),
            line2: org.address_line_2.clone(),
            city: org.city.clone(),
            state: org.state.clone(),
            postal_code: org.zip_code.clone(),
            country: Some(org.country.clone()),
        },
        individuals,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::organization::Requirements;

    fn status(
        charges: bool,
        payouts: bool,
        disabled: Option<&str>,
        currently_due: &[&str],
    ) -> ProcessorAccountStatus {
        ProcessorAccountStatus {
            account_id: "acct_test".to_string(),
            charges_enabled: charges,
            payouts_enabled: payouts,
            disabled_reason: disabled.map(String::from),
            requirements: Requirements {
                currently_due: currently_due.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            },
        }
    }

    #[test]
    fn disabled_reason_wins_over_everything() {
        let s = status(true, true, Some("rejected.fraud"), &["company.tax_id"]);
        assert_eq!(derive_kyc_state(&s), KycState::Suspended);
    }

    #[test]
    fn outstanding_requirements_need_info() {
        let s = status(true, true, None, &["individual.dob"]);
        assert_eq!(derive_kyc_state(&s), KycState::KycNeedsInfo);
    }

    #[test]
    fn charges_without_payouts_is_verified() {
        let s = status(true, false, None, &[]);
        assert_eq!(derive_kyc_state(&s), KycState::Verified);
    }

    #[test]
    fn payouts_enabled_is_active() {
        let s = status(true, true, None, &[]);
        assert_eq!(derive_kyc_state(&s), KycState::Active);
    }

    #[test]
    fn nothing_enabled_stays_in_review() {
        let s = status(false, false, None, &[]);
        assert_eq!(derive_kyc_state(&s), KycState::KycInReview);
    }
}
