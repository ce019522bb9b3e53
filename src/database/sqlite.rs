use crate::errors::{AppError, Result};
use crate::models::audit::{ActorType, AuditAction, AuditLogEntry};
use crate::models::beneficial_owner::BeneficialOwner;
use crate::models::organization::{
    Attestations, KycState, KycStatus, Organization, OrgStatus,
};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

/// The compliance record store. All mutation of organizations, owners, and
/// audit rows goes through here; state-changing organization updates are
/// guarded by a compare-and-swap on the row version.
#[derive(Debug)]
pub struct SqliteDatabase {
    pool: SqlitePool,
}

impl SqliteDatabase {
    pub async fn new(database_path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(database_path).parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AppError::Persistence(format!("Failed to create database directory: {}", e)))?;
        }
        if !Path::new(database_path).exists() {
            std::fs::File::create(database_path)
                .map_err(|e| AppError::Persistence(format!("Failed to create database file: {}", e)))?;
        }
        let database_url = format!("sqlite:{}", database_path);
        let pool = SqlitePool::connect(&database_url)
            .await
            .map_err(|e| AppError::Persistence(format!("Failed to connect to database: {}", e)))?;

        let db = Self { pool };
        db.create_tables().await?;
        tracing::info!(path = %database_path, "connected to sqlite database");
        Ok(db)
    }

    /// In-memory database for tests. Capped at one connection: every pooled
    /// connection to `sqlite::memory:` would otherwise open its own empty
    /// database.
    pub async fn in_memory() -> Result<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| AppError::Persistence(format!("Failed to open in-memory database: {}", e)))?;
        let db = Self { pool };
        db.create_tables().await?;
        Ok(db)
    }

    async fn create_tables(&self) -> Result<()> {
        let query = r#"
            CREATE TABLE IF NOT EXISTS organizations (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                legal_name TEXT,
                ein TEXT,
                website TEXT,
                phone TEXT,
                email TEXT,
                address_line_1 TEXT,
                address_line_2 TEXT,
                city TEXT,
                state TEXT,
                zip_code TEXT,
                country TEXT NOT NULL DEFAULT 'US',
                primary_purpose TEXT,

                tax_exempt BOOLEAN NOT NULL DEFAULT FALSE,
                anti_terrorism BOOLEAN NOT NULL DEFAULT FALSE,
                legitimate_entity BOOLEAN NOT NULL DEFAULT FALSE,
                consent_checks BOOLEAN NOT NULL DEFAULT FALSE,
                beneficial_ownership_disclosure BOOLEAN NOT NULL DEFAULT FALSE,
                information_accuracy BOOLEAN NOT NULL DEFAULT FALSE,
                penalty_of_perjury BOOLEAN NOT NULL DEFAULT FALSE,

                articles_of_incorporation TEXT,
                tax_exempt_letter TEXT,
                bank_statement TEXT,
                board_resolution TEXT,
                document_reviews TEXT NOT NULL DEFAULT '{}',
                document_request TEXT,

                processor_account_id TEXT UNIQUE,
                charges_enabled BOOLEAN NOT NULL DEFAULT FALSE,
                payouts_enabled BOOLEAN NOT NULL DEFAULT FALSE,
                disabled_reason TEXT,
                requirements TEXT NOT NULL DEFAULT '{}',

                kyc_status TEXT NOT NULL DEFAULT 'not_submitted',
                kyc_state TEXT NOT NULL DEFAULT 'REGISTERED',
                status TEXT NOT NULL DEFAULT 'pending',

                admin_notes TEXT,
                kyc_rejection_reason TEXT,
                kyc_submitted_at TEXT,
                kyc_approved_at TEXT,
                kyc_rejected_at TEXT,
                verified_at TEXT,

                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_orgs_processor_account
                ON organizations (processor_account_id);
            CREATE INDEX IF NOT EXISTS idx_orgs_kyc_status
                ON organizations (kyc_status);

            CREATE TABLE IF NOT EXISTS beneficial_owners (
                id TEXT PRIMARY KEY,
                organization_id TEXT NOT NULL,
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                title TEXT,
                is_primary BOOLEAN NOT NULL DEFAULT FALSE,
                date_of_birth TEXT,
                email TEXT,
                phone TEXT,
                gov_id_number TEXT,
                gov_id_type TEXT,
                id_front_ref TEXT,
                id_back_ref TEXT,
                address_line_1 TEXT,
                address_line_2 TEXT,
                city TEXT,
                state TEXT,
                zip_code TEXT,
                country TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (organization_id) REFERENCES organizations (id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_owners_org
                ON beneficial_owners (organization_id);

            CREATE TABLE IF NOT EXISTS audit_logs (
                id TEXT PRIMARY KEY,
                organization_id TEXT NOT NULL,
                actor_type TEXT NOT NULL,
                actor_id TEXT,
                action TEXT NOT NULL,
                details TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_audit_org_time
                ON audit_logs (organization_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_audit_actor
                ON audit_logs (actor_type, actor_id, action, created_at);
        "#;

        sqlx::query(query)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Persistence(format!("Failed to create tables: {}", e)))?;
        Ok(())
    }

    // ---- organizations ----

    pub async fn create_organization(&self, org: &Organization) -> Result<()> {
        let query = r#"
            INSERT INTO organizations (
                id, name, legal_name, ein, website, phone, email,
                address_line_1, address_line_2, city, state, zip_code, country, primary_purpose,
                tax_exempt, anti_terrorism, legitimate_entity, consent_checks,
                beneficial_ownership_disclosure, information_accuracy, penalty_of_perjury,
                articles_of_incorporation, tax_exempt_letter, bank_statement, board_resolution,
                document_reviews, document_request,
                processor_account_id, charges_enabled, payouts_enabled, disabled_reason, requirements,
                kyc_status, kyc_state, status,
                admin_notes, kyc_rejection_reason,
                kyc_submitted_at, kyc_approved_at, kyc_rejected_at, verified_at,
                created_at, updated_at, version
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7,
                ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                ?15, ?16, ?17, ?18, ?19, ?20, ?21,
                ?22, ?23, ?24, ?25, ?26, ?27,
                ?28, ?29, ?30, ?31, ?32,
                ?33, ?34, ?35,
                ?36, ?37, ?38, ?39, ?40, ?41,
                ?42, ?43, ?44
            )
        "#;
        sqlx::query(query)
            .bind(org.id.to_string())
            .bind(&org.name)
            .bind(&org.legal_name)
            .bind(&org.ein)
            .bind(&org.website)
            .bind(&org.phone)
            .bind(&org.email)
            .bind(&org.address_line_1)
            .bind(&org.address_line_2)
            .bind(&org.city)
            .bind(&org.state)
            .bind(&org.zip_code)
            .bind(&org.country)
            .bind(&org.primary_purpose)
            .bind(org.attestations.tax_exempt)
            .bind(org.attestations.anti_terrorism)
            .bind(org.attestations.legitimate_entity)
            .bind(org.attestations.consent_checks)
            .bind(org.attestations.beneficial_ownership_disclosure)
            .bind(org.attestations.information_accuracy)
            .bind(org.attestations.penalty_of_perjury)
            .bind(&org.articles_of_incorporation)
            .bind(&org.tax_exempt_letter)
            .bind(&org.bank_statement)
            .bind(&org.board_resolution)
            .bind(serde_json::to_string(&org.document_reviews)?)
            .bind(org.document_request.as_ref().map(serde_json::to_string).transpose()?)
            .bind(&org.processor_account_id)
            .bind(org.charges_enabled)
            .bind(org.payouts_enabled)
            .bind(&org.disabled_reason)
            .bind(serde_json::to_string(&org.requirements)?)
            .bind(org.kyc_status.as_str())
            .bind(org.kyc_state.as_str())
            .bind(org.status.as_str())
            .bind(&org.admin_notes)
            .bind(&org.kyc_rejection_reason)
            .bind(org.kyc_submitted_at.map(|dt| dt.to_rfc3339()))
            .bind(org.kyc_approved_at.map(|dt| dt.to_rfc3339()))
            .bind(org.kyc_rejected_at.map(|dt| dt.to_rfc3339()))
            .bind(org.verified_at.map(|dt| dt.to_rfc3339()))
            .bind(org.created_at.to_rfc3339())
            .bind(org.updated_at.to_rfc3339())
            .bind(org.version)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Persistence(format!("Failed to create organization: {}", e)))?;
        Ok(())
    }

    pub async fn get_organization(&self, id: &Uuid) -> Result<Option<Organization>> {
        let row = sqlx::query("SELECT * FROM organizations WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Persistence(format!("Failed to fetch organization: {}", e)))?;
        row.map(row_to_organization).transpose()
    }

    /// Fetch-or-404 convenience used by every service entry point.
    pub async fn require_organization(&self, id: &Uuid) -> Result<Organization> {
        self.get_organization(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Organization {} not found", id)))
    }

    pub async fn get_organization_by_processor_account(
        &self,
        processor_account_id: &str,
    ) -> Result<Option<Organization>> {
        let row = sqlx::query("SELECT * FROM organizations WHERE processor_account_id = ?1")
            .bind(processor_account_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Persistence(format!("Failed to fetch organization: {}", e)))?;
        row.map(row_to_organization).transpose()
    }

    pub async fn find_organization_by_ein(&self, ein: &str) -> Result<Option<Organization>> {
        let row = sqlx::query("SELECT * FROM organizations WHERE ein = ?1")
            .bind(ein)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Persistence(format!("Failed to fetch organization: {}", e)))?;
        row.map(row_to_organization).transpose()
    }

    /// Persists every mutable organization field, guarded by the version the
    /// caller read. Zero rows updated means another transition won the race;
    /// the caller gets a `Precondition` and must re-read before retrying.
    pub async fn update_organization(&self, org: &Organization) -> Result<()> {
        run_update_organization(&self.pool, org).await
    }

    /// A state transition and its audit row land in one transaction: either
    /// both commit or neither does. The transaction is opened only after any
    /// processor call has already returned.
    pub async fn update_organization_with_audit(
        &self,
        org: &Organization,
        entry: &AuditLogEntry,
    ) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Persistence(format!("Failed to begin transaction: {}", e)))?;
        run_update_organization(&mut *tx, org).await?;
        run_append_audit(&mut *tx, entry).await?;
        tx.commit()
            .await
            .map_err(|e| AppError::Persistence(format!("Failed to commit transaction: {}", e)))?;
        Ok(())
    }
    /// Review queue: everything that has entered review, newest first.
    pub async fn list_review_queue(
        &self,
        status: Option<KycStatus>,
        page: u32,
        limit: u32,
    ) -> Result<(Vec<Organization>, i64)> {
        let offset = (page.saturating_sub(1) as i64) * limit as i64;
        let (rows, total) = match status {
            Some(status) => {
                let rows = sqlx::query(
                    "SELECT * FROM organizations WHERE kyc_status = ?1 \
                     ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
                )
                .bind(status.as_str())
                .bind(limit as i64)
                .bind(offset)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| AppError::Persistence(format!("Failed to list review queue: {}", e)))?;
                let total: i64 =
                    sqlx::query_scalar("SELECT COUNT(*) FROM organizations WHERE kyc_status = ?1")
                        .bind(status.as_str())
                        .fetch_one(&self.pool)
                        .await
                        .map_err(|e| AppError::Persistence(format!("Failed to count review queue: {}", e)))?;
                (rows, total)
            }
            None => {
                let rows = sqlx::query(
                    "SELECT * FROM organizations WHERE kyc_status != 'not_submitted' \
                     ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
                )
                .bind(limit as i64)
                .bind(offset)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| AppError::Persistence(format!("Failed to list review queue: {}", e)))?;
                let total: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM organizations WHERE kyc_status != 'not_submitted'",
                )
                .fetch_one(&self.pool)
                .await
                .map_err(|e| AppError::Persistence(format!("Failed to count review queue: {}", e)))?;
                (rows, total)
            }
        };
        let orgs = rows
            .into_iter()
            .map(row_to_organization)
            .collect::<Result<Vec<_>>>()?;
        Ok((orgs, total))
    }

    pub async fn count_by_kyc_status(&self, status: KycStatus) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM organizations WHERE kyc_status = ?1")
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| AppError::Persistence(format!("Failed to count organizations: {}", e)))?;
        Ok(count)
    }

    pub async fn count_submitted_since(&self, since: DateTime<Utc>) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM organizations WHERE kyc_submitted_at IS NOT NULL AND kyc_submitted_at >= ?1",
        )
        .bind(since.to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Persistence(format!("Failed to count submissions: {}", e)))?;
        Ok(count)
    }

    // ---- beneficial owners ----

    pub async fn insert_beneficial_owner(&self, owner: &BeneficialOwner) -> Result<()> {
        let query = r#"
            INSERT INTO beneficial_owners (
                id, organization_id, first_name, last_name, title, is_primary,
                date_of_birth, email, phone, gov_id_number, gov_id_type,
                id_front_ref, id_back_ref,
                address_line_1, address_line_2, city, state, zip_code, country,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)
        "#;
        sqlx::query(query)
            .bind(owner.id.to_string())
            .bind(owner.organization_id.to_string())
            .bind(&owner.first_name)
            .bind(&owner.last_name)
            .bind(&owner.title)
            .bind(owner.is_primary)
            .bind(owner.date_of_birth.map(|d| d.to_string()))
            .bind(&owner.email)
            .bind(&owner.phone)
            .bind(&owner.gov_id_number)
            .bind(&owner.gov_id_type)
            .bind(&owner.id_front_ref)
            .bind(&owner.id_back_ref)
            .bind(&owner.address_line_1)
            .bind(&owner.address_line_2)
            .bind(&owner.city)
            .bind(&owner.state)
            .bind(&owner.zip_code)
            .bind(&owner.country)
            .bind(owner.created_at.to_rfc3339())
            .bind(owner.updated_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Persistence(format!("Failed to insert beneficial owner: {}", e)))?;
        Ok(())
    }

    /// Replaces the owner set for an organization. Used when a compliance
    /// package is (re)submitted before the org goes ACTIVE.
    pub async fn replace_beneficial_owners(
        &self,
        organization_id: &Uuid,
        owners: &[BeneficialOwner],
    ) -> Result<()> {
        sqlx::query("DELETE FROM beneficial_owners WHERE organization_id = ?1")
            .bind(organization_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Persistence(format!("Failed to clear beneficial owners: {}", e)))?;
        for owner in owners {
            self.insert_beneficial_owner(owner).await?;
        }
        Ok(())
    }

    pub async fn list_beneficial_owners(&self, organization_id: &Uuid) -> Result<Vec<BeneficialOwner>> {
        let rows = sqlx::query(
            "SELECT * FROM beneficial_owners WHERE organization_id = ?1 ORDER BY is_primary DESC, created_at",
        )
        .bind(organization_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Persistence(format!("Failed to list beneficial owners: {}", e)))?;
        rows.into_iter().map(row_to_owner).collect()
    }

    // ---- audit log ----

    pub async fn append_audit(&self, entry: &AuditLogEntry) -> Result<()> {
        run_append_audit(&self.pool, entry).await
    }

    pub async fn recent_audit_entries(
        &self,
        organization_id: &Uuid,
        limit: i64,
    ) -> Result<Vec<AuditLogEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM audit_logs WHERE organization_id = ?1 ORDER BY created_at DESC LIMIT ?2",
        )
        .bind(organization_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Persistence(format!("Failed to fetch audit entries: {}", e)))?;
        rows.into_iter().map(row_to_audit_entry).collect()
    }

    pub async fn count_audit_entries(
        &self,
        organization_id: &Uuid,
        action: AuditAction,
    ) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM audit_logs WHERE organization_id = ?1 AND action = ?2",
        )
        .bind(organization_id.to_string())
        .bind(action.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Persistence(format!("Failed to count audit entries: {}", e)))?;
        Ok(count)
    }
}

// ---- write statements, shared by pool and transaction paths ----

async fn run_update_organization<'e, E>(executor: E, org: &Organization) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let query = r#"
        UPDATE organizations SET
            name = ?1, legal_name = ?2, ein = ?3, website = ?4, phone = ?5, email = ?6,
            address_line_1 = ?7, address_line_2 = ?8, city = ?9, state = ?10,
            zip_code = ?11, country = ?12, primary_purpose = ?13,
            tax_exempt = ?14, anti_terrorism = ?15, legitimate_entity = ?16,
            consent_checks = ?17, beneficial_ownership_disclosure = ?18,
            information_accuracy = ?19, penalty_of_perjury = ?20,
            articles_of_incorporation = ?21, tax_exempt_letter = ?22,
            bank_statement = ?23, board_resolution = ?24,
            document_reviews = ?25, document_request = ?26,
            processor_account_id = ?27, charges_enabled = ?28, payouts_enabled = ?29,
            disabled_reason = ?30, requirements = ?31,
            kyc_status = ?32, kyc_state = ?33, status = ?34,
            admin_notes = ?35, kyc_rejection_reason = ?36,
            kyc_submitted_at = ?37, kyc_approved_at = ?38, kyc_rejected_at = ?39,
            verified_at = ?40, updated_at = ?41,
            version = version + 1
        WHERE id = ?42 AND version = ?43
    "#;
    let result = sqlx::query(query)
        .bind(&org.name)
        .bind(&org.legal_name)
        .bind(&org.ein)
        .bind(&org.website)
        .bind(&org.phone)
        .bind(&org.email)
        .bind(&org.address_line_1)
        .bind(&org.address_line_2)
        .bind(&org.city)
        .bind(&org.state)
        .bind(&org.zip_code)
        .bind(&org.country)
        .bind(&org.primary_purpose)
        .bind(org.attestations.tax_exempt)
        .bind(org.attestations.anti_terrorism)
        .bind(org.attestations.legitimate_entity)
        .bind(org.attestations.consent_checks)
        .bind(org.attestations.beneficial_ownership_disclosure)
        .bind(org.attestations.information_accuracy)
        .bind(org.attestations.penalty_of_perjury)
        .bind(&org.articles_of_incorporation)
        .bind(&org.tax_exempt_letter)
        .bind(&org.bank_statement)
        .bind(&org.board_resolution)
        .bind(serde_json::to_string(&org.document_reviews)?)
        .bind(org.document_request.as_ref().map(serde_json::to_string).transpose()?)
        .bind(&org.processor_account_id)
        .bind(org.charges_enabled)
        .bind(org.payouts_enabled)
        .bind(&org.disabled_reason)
        .bind(serde_json::to_string(&org.requirements)?)
        .bind(org.kyc_status.as_str())
        .bind(org.kyc_state.as_str())
        .bind(org.status.as_str())
        .bind(&org.admin_notes)
        .bind(&org.kyc_rejection_reason)
        .bind(org.kyc_submitted_at.map(|dt| dt.to_rfc3339()))
        .bind(org.kyc_approved_at.map(|dt| dt.to_rfc3339()))
        .bind(org.kyc_rejected_at.map(|dt| dt.to_rfc3339()))
        .bind(org.verified_at.map(|dt| dt.to_rfc3339()))
        .bind(Utc::now().to_rfc3339())
        .bind(org.id.to_string())
        .bind(org.version)
        .execute(executor)
        .await
        .map_err(|e| AppError::Persistence(format!("Failed to update organization: {}", e)))?;

    if result.rows_affected() == 0 {
        return Err(AppError::Precondition(
            "organization was modified concurrently".to_string(),
        ));
    }
    Ok(())
}

async fn run_append_audit<'e, E>(executor: E, entry: &AuditLogEntry) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let query = r#"
        INSERT INTO audit_logs (id, organization_id, actor_type, actor_id, action, details, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
    "#;
    sqlx::query(query)
        .bind(entry.id.to_string())
        .bind(entry.organization_id.to_string())
        .bind(entry.actor_type.as_str())
        .bind(entry.actor_id.map(|id| id.to_string()))
        .bind(entry.action.as_str())
        .bind(serde_json::to_string(&entry.details)?)
        .bind(entry.created_at.to_rfc3339())
        .execute(executor)
        .await
        .map_err(|e| AppError::Persistence(format!("Failed to append audit entry: {}", e)))?;
    Ok(())
}

// ---- row mapping ----

fn parse_uuid(value: String) -> Result<Uuid> {
    Uuid::parse_str(&value).map_err(|e| AppError::Persistence(format!("Corrupt uuid column: {}", e)))
}

fn parse_datetime(value: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::Persistence(format!("Corrupt timestamp column: {}", e)))
}

fn parse_opt_datetime(value: Option<String>) -> Option<DateTime<Utc>> {
    value.and_then(|s| DateTime::parse_from_rfc3339(&s).ok().map(|dt| dt.with_timezone(&Utc)))
}

fn row_to_organization(row: SqliteRow) -> Result<Organization> {
    let kyc_status = KycStatus::from_str(&row.get::<String, _>("kyc_status"))
        .map_err(AppError::Persistence)?;
    let kyc_state =
        KycState::from_str(&row.get::<String, _>("kyc_state")).map_err(AppError::Persistence)?;
    let status =
        OrgStatus::from_str(&row.get::<String, _>("status")).map_err(AppError::Persistence)?;

    Ok(Organization {
        id: parse_uuid(row.get("id"))?,
        name: row.get("name"),
        legal_name: row.get("legal_name"),
        ein: row.get("ein"),
        website: row.get("website"),
        phone: row.get("phone"),
        email: row.get("email"),
        address_line_1: row.get("address_line_1"),
        address_line_2: row.get("address_line_2"),
        city: row.get("city"),
        state: row.get("state"),
        zip_code: row.get("zip_code"),
        country: row.get("country"),
        primary_purpose: row.get("primary_purpose"),
        attestations: Attestations {
            tax_exempt: row.get("tax_exempt"),
            anti_terrorism: row.get("anti_terrorism"),
            legitimate_entity: row.get("legitimate_entity"),
            consent_checks: row.get("consent_checks"),
            beneficial_ownership_disclosure: row.get("beneficial_ownership_disclosure"),
            information_accuracy: row.get("information_accuracy"),
            penalty_of_perjury: row.get("penalty_of_perjury"),
        },
        articles_of_incorporation: row.get("articles_of_incorporation"),
        tax_exempt_letter: row.get("tax_exempt_letter"),
        bank_statement: row.get("bank_statement"),
        board_resolution: row.get("board_resolution"),
        document_reviews: serde_json::from_str(&row.get::<String, _>("document_reviews"))
            .unwrap_or_default(),
        document_request: row
            .get::<Option<String>, _>("document_request")
            .and_then(|s| serde_json::from_str(&s).ok()),
        processor_account_id: row.get("processor_account_id"),
        charges_enabled: row.get("charges_enabled"),
        payouts_enabled: row.get("payouts_enabled"),
        disabled_reason: row.get("disabled_reason"),
        requirements: serde_json::from_str(&row.get::<String, _>("requirements"))
            .unwrap_or_default(),
        kyc_status,
        kyc_state,
        status,
        admin_notes: row.get("admin_notes"),
        kyc_rejection_reason: row.get("kyc_rejection_reason"),
        kyc_submitted_at: parse_opt_datetime(row.get("kyc_submitted_at")),
        kyc_approved_at: parse_opt_datetime(row.get("kyc_approved_at")),
        kyc_rejected_at: parse_opt_datetime(row.get("kyc_rejected_at")),
        verified_at: parse_opt_datetime(row.get("verified_at")),
        created_at: parse_datetime(row.get("created_at"))?,
        updated_at: parse_datetime(row.get("updated_at"))?,
        version: row.get("version"),
    })
}

fn row_to_owner(row: SqliteRow) -> Result<BeneficialOwner> {
    Ok(BeneficialOwner {
        id: parse_uuid(row.get("id"))?,
        organization_id: parse_uuid(row.get("organization_id"))?,
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        title: row.get("title"),
        is_primary: row.get("is_primary"),
        date_of_birth: row
            .get::<Option<String>, _>("date_of_birth")
            .and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
        email: row.get("email"),
        phone: row.get("phone"),
        gov_id_number: row.get("gov_id_number"),
        gov_id_type: row.get("gov_id_type"),
        id_front_ref: row.get("id_front_ref"),
        id_back_ref: row.get("id_back_ref"),
        address_line_1: row.get("address_line_1"),
        address_line_2: row.get("address_line_2"),
        city: row.get("city"),
        state: row.get("state"),
        zip_code: row.get("zip_code"),
        country: row.get("country"),
        created_at: parse_datetime(row.get("created_at"))?,
        updated_at: parse_datetime(row.get("updated_at"))?,
    })
}

fn row_to_audit_entry(row: SqliteRow) -> Result<AuditLogEntry> {
    Ok(AuditLogEntry {
        id: parse_uuid(row.get("id"))?,
        organization_id: parse_uuid(row.get("organization_id"))?,
        actor_type: ActorType::from_str(&row.get::<String, _>("actor_type"))
            .map_err(AppError::Persistence)?,
        actor_id: row
            .get::<Option<String>, _>("actor_id")
            .and_then(|s| Uuid::parse_str(&s).ok()),
        action: AuditAction::from_str(&row.get::<String, _>("action"))
            .map_err(AppError::Persistence)?,
        details: serde_json::from_str(&row.get::<String, _>("details"))
            .unwrap_or(serde_json::Value::Null),
        created_at: parse_datetime(row.get("created_at"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn seeded_org(db: &SqliteDatabase) -> Organization {
        let org = Organization::new("First Baptist".to_string());
        db.create_organization(&org).await.unwrap();
        db.require_organization(&org.id).await.unwrap()
    }

    fn entry_for(org: &Organization) -> AuditLogEntry {
        AuditLogEntry::new(
            org.id,
            ActorType::System,
            None,
            AuditAction::KycStateChanged,
            json!({ "previous_state": "REGISTERED", "new_state": "KYC_STARTED" }),
        )
    }

    #[tokio::test]
    async fn update_with_audit_writes_both_rows() {
        let db = SqliteDatabase::in_memory().await.unwrap();
        let mut org = seeded_org(&db).await;
        org.kyc_state = KycState::KycStarted;

        db.update_organization_with_audit(&org, &entry_for(&org)).await.unwrap();

        let fetched = db.require_organization(&org.id).await.unwrap();
        assert_eq!(fetched.kyc_state, KycState::KycStarted);
        assert_eq!(fetched.version, org.version + 1);
        assert_eq!(
            db.count_audit_entries(&org.id, AuditAction::KycStateChanged).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn state_write_rolls_back_when_audit_insert_fails() {
        let db = SqliteDatabase::in_memory().await.unwrap();
        let mut org = seeded_org(&db).await;
        let original_version = org.version;

        // Break the audit insert; the organization update must roll back.
        sqlx::query("DROP TABLE audit_logs").execute(&db.pool).await.unwrap();

        org.kyc_state = KycState::KycStarted;
        let result = db.update_organization_with_audit(&org, &entry_for(&org)).await;
        assert!(matches!(result, Err(AppError::Persistence(_))));

        let fetched = db.require_organization(&org.id).await.unwrap();
        assert_eq!(fetched.kyc_state, KycState::Registered);
        assert_eq!(fetched.version, original_version);
    }

    #[tokio::test]
    async fn stale_version_rolls_back_inside_the_transaction() {
        let db = SqliteDatabase::in_memory().await.unwrap();
        let org = seeded_org(&db).await;

        let mut winner = org.clone();
        winner.kyc_state = KycState::KycStarted;
        db.update_organization_with_audit(&winner, &entry_for(&winner)).await.unwrap();

        let mut loser = org;
        loser.kyc_state = KycState::KycSubmitted;
        let result = db.update_organization_with_audit(&loser, &entry_for(&loser)).await;
        assert!(matches!(result, Err(AppError::Precondition(_))));

        // The loser's audit row must not have landed.
        assert_eq!(
            db.count_audit_entries(&loser.id, AuditAction::KycStateChanged).await.unwrap(),
            1
        );
    }
}
