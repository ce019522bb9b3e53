use async_trait::async_trait;
use chrono::NaiveDate;
use offertory::database::sqlite::SqliteDatabase;
use offertory::errors::{AppError, Result};
use offertory::models::audit::{Actor, AuditAction};
use offertory::models::beneficial_owner::BeneficialOwner;
use offertory::models::organization::{
    KycState, KycStatus, Organization, OrgStatus, Requirements,
};
use offertory::services::kyc_service::KycService;
use offertory::services::notification_service::NotificationService;
use offertory::services::review_service::ReviewService;
use offertory::services::stripe_gateway::{
    CompliancePackage, ProcessorAccountStatus, ProcessorGateway,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// In-process stand-in for the payment processor. Tests drive the reported
/// account shape through `set_status`.
struct MockGateway {
    status: Mutex<ProcessorAccountStatus>,
    fail_all: AtomicBool,
}

impl MockGateway {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            status: Mutex::new(ProcessorAccountStatus {
                account_id: "acct_mock_1".to_string(),
                charges_enabled: false,
                payouts_enabled: false,
                disabled_reason: None,
                requirements: Requirements::default(),
            }),
            fail_all: AtomicBool::new(false),
        })
    }

    fn set_status(&self, charges: bool, payouts: bool, disabled: Option<&str>, due: &[&str]) {
        let mut status = self.status.lock().unwrap();
        status.charges_enabled = charges;
        status.payouts_enabled = payouts;
        status.disabled_reason = disabled.map(String::from);
        status.requirements.currently_due = due.iter().map(|s| s.to_string()).collect();
    }

    fn fail_all(&self) {
        self.fail_all.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(AppError::processor_retryable("mock gateway down".to_string()));
        }
        Ok(())
    }

    fn current(&self) -> ProcessorAccountStatus {
        self.status.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessorGateway for MockGateway {
    async fn create_account(
        &self,
        _org_name: &str,
        _email: Option<&str>,
        _website: Option<&str>,
        _idempotency_key: &str,
    ) -> Result<String> {
        self.check()?;
        Ok("acct_mock_1".to_string())
    }

    async fn modify_account(
        &self,
        _account_id: &str,
        _package: &CompliancePackage,
        _idempotency_key: &str,
    ) -> Result<ProcessorAccountStatus> {
        self.check()?;
        Ok(self.current())
    }

    async fn create_onboarding_link(
        &self,
        account_id: &str,
        _refresh_url: &str,
        _return_url: &str,
    ) -> Result<String> {
        self.check()?;
        Ok(format!("https://onboarding.example/{}", account_id))
    }

    async fn retrieve_account(&self, _account_id: &str) -> Result<ProcessorAccountStatus> {
        self.check()?;
        Ok(self.current())
    }

    async fn modify_payout_schedule(
        &self,
        _account_id: &str,
        _delay_days: u32,
        _idempotency_key: &str,
    ) -> Result<()> {
        self.check()
    }
}

struct Harness {
    db: Arc<SqliteDatabase>,
    gateway: Arc<MockGateway>,
    kyc: KycService,
    review: ReviewService,
}

async fn harness() -> Harness {
    let db = Arc::new(SqliteDatabase::in_memory().await.unwrap());
    let gateway = MockGateway::new();
    let notifier = Arc::new(NotificationService::disabled());
    let kyc = KycService::new(
        db.clone(),
        gateway.clone(),
        notifier.clone(),
        "http://localhost:3000".to_string(),
    );
    let review = ReviewService::new(db.clone(), notifier);
    Harness { db, gateway, kyc, review }
}

fn complete_org() -> Organization {
    let mut org = Organization::new("Grace Fellowship".to_string());
    org.legal_name = Some("Grace Fellowship Inc".to_string());
    org.ein = Some("12-3456789".to_string());
    org.phone = Some("+15551234567".to_string());
    org.email = Some("office@gracefellowship.org".to_string());
    org.address_line_1 = Some("1 Chapel Way".to_string());
    org.city = Some("Austin".to_string());
    org.state = Some("TX".to_string());
    org.zip_code = Some("78701".to_string());
    org.primary_purpose = Some("Religious services".to_string());
    org.articles_of_incorporation = Some("docs/articles.pdf".to_string());
    org.tax_exempt_letter = Some("docs/irs.pdf".to_string());
    org.bank_statement = Some("docs/bank.pdf".to_string());
    org.board_resolution = Some("docs/board.pdf".to_string());
    org
}

fn complete_owner(org_id: Uuid) -> BeneficialOwner {
    let mut owner = BeneficialOwner::new(org_id, "Jane".to_string(), "Doe".to_string());
    owner.is_primary = true;
    owner.email = Some("jane@gracefellowship.org".to_string());
    owner.date_of_birth = NaiveDate::from_ymd_opt(1980, 4, 12);
    owner.gov_id_number = Some("123-45-6789".to_string());
    owner.address_line_1 = Some("2 Elm St".to_string());
    owner.id_front_ref = Some("docs/id-front.png".to_string());
    owner
}

/// Seeds a complete org and walks it to KYC_SUBMITTED.
async fn submitted_org(h: &Harness) -> Organization {
    let org = complete_org();
    h.db.create_organization(&org).await.unwrap();
    h.db.insert_beneficial_owner(&complete_owner(org.id)).await.unwrap();
    h.kyc.init_kyc(&org.id, Actor::system()).await.unwrap();
    h.kyc.submit_compliance_package(&org.id, Actor::system()).await.unwrap()
}

async fn audit_count(h: &Harness, org_id: &Uuid, action: AuditAction) -> i64 {
    h.db.count_audit_entries(org_id, action).await.unwrap()
}

#[tokio::test]
async fn init_and_submit_walk_the_states() {
    let h = harness().await;
    let org = complete_org();
    h.db.create_organization(&org).await.unwrap();
    h.db.insert_beneficial_owner(&complete_owner(org.id)).await.unwrap();

    let org = h.kyc.init_kyc(&org.id, Actor::system()).await.unwrap();
    assert_eq!(org.kyc_state, KycState::KycStarted);
    assert_eq!(org.processor_account_id.as_deref(), Some("acct_mock_1"));
    assert_eq!(audit_count(&h, &org.id, AuditAction::KycStarted).await, 1);

    let org = h.kyc.submit_compliance_package(&org.id, Actor::system()).await.unwrap();
    assert_eq!(org.kyc_state, KycState::KycSubmitted);
    assert_eq!(org.kyc_status, KycStatus::PendingReview);
    assert!(org.kyc_submitted_at.is_some());
    assert_eq!(audit_count(&h, &org.id, AuditAction::KycSubmitted).await, 1);
}

#[tokio::test]
async fn init_twice_is_a_precondition_error() {
    let h = harness().await;
    let org = complete_org();
    h.db.create_organization(&org).await.unwrap();
    h.kyc.init_kyc(&org.id, Actor::system()).await.unwrap();

    let err = h.kyc.init_kyc(&org.id, Actor::system()).await.unwrap_err();
    assert!(matches!(err, AppError::Precondition(_)));
    assert_eq!(audit_count(&h, &org.id, AuditAction::KycStarted).await, 1);
}

#[tokio::test]
async fn gateway_failure_leaves_state_untouched() {
    let h = harness().await;
    let org = complete_org();
    h.db.create_organization(&org).await.unwrap();
    h.gateway.fail_all();

    let err = h.kyc.init_kyc(&org.id, Actor::system()).await.unwrap_err();
    assert!(err.is_retryable());

    let org = h.db.require_organization(&org.id).await.unwrap();
    assert_eq!(org.kyc_state, KycState::Registered);
    assert!(org.processor_account_id.is_none());
    assert_eq!(audit_count(&h, &org.id, AuditAction::KycStarted).await, 0);
}

#[tokio::test]
async fn submission_without_owners_is_rejected_before_the_gateway() {
    let h = harness().await;
    let org = complete_org();
    h.db.create_organization(&org).await.unwrap();
    h.kyc.init_kyc(&org.id, Actor::system()).await.unwrap();

    let err = h.kyc.submit_compliance_package(&org.id, Actor::system()).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert!(err.to_string().contains("beneficial owner"));
    assert_eq!(audit_count(&h, &org.id, AuditAction::KycSubmitted).await, 0);
}

#[tokio::test]
async fn sync_maps_payouts_enabled_to_active() {
    let h = harness().await;
    let org = submitted_org(&h).await;

    h.gateway.set_status(true, true, None, &[]);
    let org = h.kyc.sync_processor_status(&org.id, Actor::system()).await.unwrap();

    // ACTIVE if and only if payouts are enabled.
    assert_eq!(org.kyc_state, KycState::Active);
    assert!(org.payouts_enabled);
    assert_eq!(org.status, OrgStatus::Active);
    assert!(org.verified_at.is_some());
    assert_eq!(audit_count(&h, &org.id, AuditAction::KycStateChanged).await, 1);
}

#[tokio::test]
async fn sync_decision_table_covers_every_branch() {
    let h = harness().await;
    let org = submitted_org(&h).await;

    h.gateway.set_status(true, false, None, &[]);
    let synced = h.kyc.sync_processor_status(&org.id, Actor::system()).await.unwrap();
    assert_eq!(synced.kyc_state, KycState::Verified);

    h.gateway.set_status(true, true, None, &["company.tax_id"]);
    let synced = h.kyc.sync_processor_status(&org.id, Actor::system()).await.unwrap();
    assert_eq!(synced.kyc_state, KycState::KycNeedsInfo);
    assert_eq!(synced.kyc_status, KycStatus::NeedsInfo);

    h.gateway.set_status(true, true, Some("rejected.fraud"), &[]);
    let synced = h.kyc.sync_processor_status(&org.id, Actor::system()).await.unwrap();
    assert_eq!(synced.kyc_state, KycState::Suspended);
    assert_eq!(synced.status, OrgStatus::Suspended);

    h.gateway.set_status(false, false, None, &[]);
    let synced = h.kyc.sync_processor_status(&org.id, Actor::system()).await.unwrap();
    assert_eq!(synced.kyc_state, KycState::KycInReview);
}

#[tokio::test]
async fn double_sync_with_unchanged_data_writes_no_extra_audit_rows() {
    let h = harness().await;
    let org = submitted_org(&h).await;

    h.gateway.set_status(true, true, None, &[]);
    h.kyc.sync_processor_status(&org.id, Actor::system()).await.unwrap();
    let after_first = audit_count(&h, &org.id, AuditAction::KycStateChanged).await;

    h.kyc.sync_processor_status(&org.id, Actor::system()).await.unwrap();
    let after_second = audit_count(&h, &org.id, AuditAction::KycStateChanged).await;

    assert_eq!(after_first, 1);
    assert_eq!(after_second, after_first);
}

#[tokio::test]
async fn verified_at_is_stamped_once() {
    let h = harness().await;
    let org = submitted_org(&h).await;

    h.gateway.set_status(true, true, None, &[]);
    let first = h.kyc.sync_processor_status(&org.id, Actor::system()).await.unwrap();
    let stamped = first.verified_at.unwrap();

    h.gateway.set_status(true, true, None, &["company.tax_id"]);
    h.kyc.sync_processor_status(&org.id, Actor::system()).await.unwrap();
    h.gateway.set_status(true, true, None, &[]);
    let again = h.kyc.sync_processor_status(&org.id, Actor::system()).await.unwrap();

    assert_eq!(again.verified_at.unwrap(), stamped);
}

#[tokio::test]
async fn webhook_sync_moves_in_review_to_active() {
    let h = harness().await;
    let org = submitted_org(&h).await;

    h.gateway.set_status(false, false, None, &[]);
    let org = h.kyc.sync_processor_status(&org.id, Actor::system()).await.unwrap();
    assert_eq!(org.kyc_state, KycState::KycInReview);
    let baseline = audit_count(&h, &org.id, AuditAction::KycStateChanged).await;

    let status = ProcessorAccountStatus {
        account_id: "acct_mock_1".to_string(),
        charges_enabled: true,
        payouts_enabled: true,
        disabled_reason: None,
        requirements: Requirements::default(),
    };
    let synced = h
        .kyc
        .sync_from_webhook("acct_mock_1", &status)
        .await
        .unwrap()
        .expect("known account should resolve");

    assert_eq!(synced.kyc_state, KycState::Active);
    assert!(synced.verified_at.is_some());
    assert_eq!(
        audit_count(&h, &org.id, AuditAction::KycStateChanged).await,
        baseline + 1
    );
}

#[tokio::test]
async fn webhook_for_unknown_account_is_ignored_not_an_error() {
    let h = harness().await;
    let status = ProcessorAccountStatus {
        account_id: "acct_unknown".to_string(),
        charges_enabled: true,
        payouts_enabled: true,
        disabled_reason: None,
        requirements: Requirements::default(),
    };
    let outcome = h.kyc.sync_from_webhook("acct_unknown", &status).await.unwrap();
    assert!(outcome.is_none());
}

#[tokio::test]
async fn approve_moves_to_active_with_one_audit_row() {
    let h = harness().await;
    let org = submitted_org(&h).await;
    let admin = Uuid::new_v4();

    let org = h
        .review
        .approve(&org.id, admin, Some("Looks complete".to_string()))
        .await
        .unwrap();

    assert_eq!(org.kyc_status, KycStatus::Approved);
    assert_eq!(org.kyc_state, KycState::Active);
    assert_eq!(org.status, OrgStatus::Active);
    assert!(org.kyc_approved_at.is_some());
    assert!(org.verified_at.is_some());
    assert_eq!(audit_count(&h, &org.id, AuditAction::KycApproved).await, 1);
}

#[tokio::test]
async fn terminal_status_rejects_further_decisions_without_audit_rows() {
    let h = harness().await;
    let org = submitted_org(&h).await;
    let admin = Uuid::new_v4();
    h.review.approve(&org.id, admin, None).await.unwrap();

    let err = h.review.approve(&org.id, admin, None).await.unwrap_err();
    assert!(matches!(err, AppError::Precondition(_)));
    let err = h.review.reject(&org.id, admin, "changed my mind").await.unwrap_err();
    assert!(matches!(err, AppError::Precondition(_)));

    assert_eq!(audit_count(&h, &org.id, AuditAction::KycApproved).await, 1);
    assert_eq!(audit_count(&h, &org.id, AuditAction::KycRejected).await, 0);
}

#[tokio::test]
async fn reject_with_empty_reason_is_a_validation_error() {
    let h = harness().await;
    let org = submitted_org(&h).await;

    let err = h.review.reject(&org.id, Uuid::new_v4(), "   ").await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(audit_count(&h, &org.id, AuditAction::KycRejected).await, 0);
}

#[tokio::test]
async fn reject_stores_the_reason() {
    let h = harness().await;
    let org = submitted_org(&h).await;

    let org = h
        .review
        .reject(&org.id, Uuid::new_v4(), "EIN does not match IRS records")
        .await
        .unwrap();

    assert_eq!(org.kyc_status, KycStatus::Rejected);
    assert_eq!(org.kyc_state, KycState::Rejected);
    assert_eq!(org.status, OrgStatus::KycRejected);
    assert_eq!(
        org.kyc_rejection_reason.as_deref(),
        Some("EIN does not match IRS records")
    );
    assert_eq!(audit_count(&h, &org.id, AuditAction::KycRejected).await, 1);
}

#[tokio::test]
async fn request_info_audits_every_ask() {
    let h = harness().await;
    let org = submitted_org(&h).await;
    let admin = Uuid::new_v4();

    let org2 = h
        .review
        .request_info(&org.id, admin, "Need the board resolution")
        .await
        .unwrap();
    assert_eq!(org2.kyc_status, KycStatus::NeedsInfo);
    assert_eq!(org2.kyc_state, KycState::KycNeedsInfo);

    // needs_info is outside the request-info guard, so a second ask fails.
    let err = h
        .review
        .request_info(&org.id, admin, "Also the bank statement")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Precondition(_)));
    assert_eq!(audit_count(&h, &org.id, AuditAction::KycInfoRequested).await, 1);
}

#[tokio::test]
async fn document_review_updates_status_and_audits() {
    let h = harness().await;
    let org = submitted_org(&h).await;
    let admin = Uuid::new_v4();
    use offertory::models::organization::{DocumentStatus, DocumentType};

    let org2 = h
        .review
        .approve_document(&org.id, DocumentType::BankStatement, admin, None)
        .await
        .unwrap();
    assert_eq!(
        org2.document_status(DocumentType::BankStatement),
        DocumentStatus::Approved
    );

    let org3 = h
        .review
        .reject_document(
            &org.id,
            DocumentType::TaxExemptLetter,
            admin,
            "Letter is expired",
            None,
        )
        .await
        .unwrap();
    assert_eq!(
        org3.document_status(DocumentType::TaxExemptLetter),
        DocumentStatus::Rejected
    );

    assert_eq!(audit_count(&h, &org.id, AuditAction::DocumentApproved).await, 1);
    assert_eq!(audit_count(&h, &org.id, AuditAction::DocumentRejected).await, 1);
}

#[tokio::test]
async fn new_document_request_replaces_the_previous_one() {
    let h = harness().await;
    let org = submitted_org(&h).await;
    let admin = Uuid::new_v4();
    use offertory::models::organization::DocumentType;

    h.review
        .request_documents(
            &org.id,
            admin,
            &[DocumentType::BankStatement, DocumentType::BoardResolution],
            Some("Most recent versions please".to_string()),
        )
        .await
        .unwrap();

    let org2 = h
        .review
        .request_documents(&org.id, admin, &[DocumentType::TaxExemptLetter], None)
        .await
        .unwrap();

    let request = org2.document_request.expect("request should be outstanding");
    assert_eq!(request.required_documents, vec![DocumentType::TaxExemptLetter]);
    assert_eq!(org2.document_reviews.len(), 1);
    assert_eq!(audit_count(&h, &org.id, AuditAction::DocumentsRequested).await, 2);
}

#[tokio::test]
async fn payout_toggle_round_trip() {
    let h = harness().await;
    let org = submitted_org(&h).await;
    let admin = Uuid::new_v4();
    h.gateway.set_status(true, true, None, &[]);
    h.kyc.sync_processor_status(&org.id, Actor::system()).await.unwrap();

    let org = h.kyc.pause_payouts(&org.id, Actor::admin(admin)).await.unwrap();
    assert!(!org.payouts_enabled);
    let org = h.kyc.resume_payouts(&org.id, Actor::admin(admin)).await.unwrap();
    assert!(org.payouts_enabled);

    assert_eq!(audit_count(&h, &org.id, AuditAction::PayoutsPaused).await, 1);
    assert_eq!(audit_count(&h, &org.id, AuditAction::PayoutsResumed).await, 1);
}

#[tokio::test]
async fn stale_version_update_is_a_precondition_error() {
    let h = harness().await;
    let org = complete_org();
    h.db.create_organization(&org).await.unwrap();

    let mut first = h.db.require_organization(&org.id).await.unwrap();
    let mut second = first.clone();

    first.admin_notes = Some("first writer".to_string());
    h.db.update_organization(&first).await.unwrap();

    second.admin_notes = Some("second writer".to_string());
    let err = h.db.update_organization(&second).await.unwrap_err();
    assert!(matches!(err, AppError::Precondition(_)));
}

#[tokio::test]
async fn onboarding_link_is_audited() {
    let h = harness().await;
    let org = submitted_org(&h).await;

    let url = h.kyc.onboarding_link(&org.id, Actor::system()).await.unwrap();
    assert!(url.starts_with("https://onboarding.example/"));
    assert_eq!(
        audit_count(&h, &org.id, AuditAction::OnboardingLinkGenerated).await,
        1
    );
}
