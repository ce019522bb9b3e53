use crate::models::beneficial_owner::BeneficialOwner;
use crate::models::organization::Organization;
use serde::Serialize;
use utoipa::ToSchema;

pub const TOTAL_DOCUMENTS: usize = 4;

/// Snapshot of how far along an application is. Percentages are integer
/// truncated, matching what the review dashboard displays.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CompletenessReport {
    pub overall_percentage: u8,
    pub document_percentage: u8,
    pub completed_fields: usize,
    pub total_fields: usize,
    pub uploaded_documents: usize,
    pub total_documents: usize,
}

/// Result of the pre-submission check: errors block submission, warnings
/// are surfaced but do not.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SubmissionValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

fn present(field: &Option<String>) -> bool {
    field.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false)
}

fn org_identity_fields(org: &Organization) -> [bool; 9] {
    [
        present(&org.legal_name) || !org.name.trim().is_empty(),
        present(&org.ein),
        present(&org.phone),
        present(&org.email),
        present(&org.address_line_1),
        present(&org.city),
        present(&org.state),
        present(&org.zip_code),
        present(&org.primary_purpose),
    ]
}

fn document_fields(org: &Organization) -> [bool; TOTAL_DOCUMENTS] {
    [
        present(&org.articles_of_incorporation),
        present(&org.tax_exempt_letter),
        present(&org.bank_statement),
        present(&org.board_resolution),
    ]
}

fn owner_fields(owner: &BeneficialOwner) -> [bool; 6] {
    [
        !owner.first_name.trim().is_empty(),
        !owner.last_name.trim().is_empty(),
        present(&owner.email),
        owner.date_of_birth.is_some(),
        present(&owner.gov_id_number),
        present(&owner.address_line_1),
    ]
}

/// Pure and deterministic; safe with an empty owner list.
pub fn evaluate_completeness(
    org: &Organization,
    owners: &[BeneficialOwner],
) -> CompletenessReport {
    let mut total_fields = 0usize;
    let mut completed_fields = 0usize;

    let identity = org_identity_fields(org);
    total_fields += identity.len();
    completed_fields += identity.iter().filter(|f| **f).count();

    let documents = document_fields(org);
    total_fields += documents.len();
    let uploaded_documents = documents.iter().filter(|f| **f).count();
    completed_fields += uploaded_documents;

    for owner in owners {
        let fields = owner_fields(owner);
        total_fields += fields.len();
        completed_fields += fields.iter().filter(|f| **f).count();
    }

    let overall_percentage = if total_fields > 0 {
        (completed_fields * 100 / total_fields) as u8
    } else {
        0
    };
    let document_percentage = (uploaded_documents * 100 / TOTAL_DOCUMENTS) as u8;

    CompletenessReport {
        overall_percentage,
        document_percentage,
        completed_fields,
        total_fields,
        uploaded_documents,
        total_documents: TOTAL_DOCUMENTS,
    }
}

/// Pre-submission gate. Missing identity fields, documents, or owner data
/// are hard errors; unchecked attestations only warn.
pub fn validate_for_submission(
    org: &Organization,
    owners: &[BeneficialOwner],
) -> SubmissionValidation {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if !present(&org.legal_name) && org.name.trim().is_empty() {
        errors.push("Legal name is required".to_string());
    }
    if !present(&org.ein) {
        errors.push("EIN is required".to_string());
    }
    if !present(&org.phone) {
        errors.push("Phone number is required".to_string());
    }
    if !present(&org.email) {
        errors.push("Email is required".to_string());
    }
    if !present(&org.address_line_1) {
        errors.push("Address is required".to_string());
    }
    if !present(&org.city) {
        errors.push("City is required".to_string());
    }
    if !present(&org.state) {
        errors.push("State is required".to_string());
    }
    if !present(&org.zip_code) {
        errors.push("ZIP code is required".to_string());
    }

    if !present(&org.articles_of_incorporation) {
        errors.push("Articles of Incorporation is required".to_string());
    }
    if !present(&org.tax_exempt_letter) {
        errors.push("IRS Tax Exempt Letter is required".to_string());
    }
    if !present(&org.bank_statement) {
        errors.push("Bank Statement is required".to_string());
    }

    if owners.is_empty() {
        errors.push("At least one beneficial owner is required".to_string());
    } else {
        for (i, owner) in owners.iter().enumerate() {
            let n = i + 1;
            if owner.first_name.trim().is_empty() || owner.last_name.trim().is_empty() {
                errors.push(format!("Beneficial owner {}: Full name is required", n));
            }
            if owner.date_of_birth.is_none() {
                errors.push(format!("Beneficial owner {}: Date of birth is required", n));
            }
            if !present(&owner.gov_id_number) {
                errors.push(format!("Beneficial owner {}: Government ID is required", n));
            }
            if !present(&owner.email) {
                errors.push(format!("Beneficial owner {}: Email is required", n));
            }
            if !present(&owner.address_line_1) {
                errors.push(format!("Beneficial owner {}: Address is required", n));
            }
            if !present(&owner.id_front_ref) {
                errors.push(format!("Beneficial owner {}: ID front image is required", n));
            }
        }
    }

    if !org.attestations.tax_exempt {
        warnings.push("Tax exempt status should be confirmed".to_string());
    }
    if !org.attestations.anti_terrorism {
        warnings.push("Anti-terrorism compliance should be confirmed".to_string());
    }
    if !org.attestations.legitimate_entity {
        warnings.push("Legitimate entity attestation should be confirmed".to_string());
    }

    SubmissionValidation {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;
    use uuid::Uuid;

    fn org_with_identity() -> Organization {
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
        org
    }

    fn complete_owner(org_id: Uuid) -> BeneficialOwner {
        let mut owner = BeneficialOwner::new(org_id, "Jane".to_string(), "Doe".to_string());
        owner.email = Some("jane@gracefellowship.org".to_string());
        owner.date_of_birth = NaiveDate::from_ymd_opt(1980, 4, 12);
        owner.gov_id_number = Some("123456789".to_string());
        owner.address_line_1 = Some("2 Elm St".to_string());
        owner
    }

    #[test]
    fn zero_owners_does_not_panic_and_stays_defined() {
        let org = Organization::new("Empty Org".to_string());
        let report = evaluate_completeness(&org, &[]);
        assert_eq!(report.total_fields, 13);
        assert_eq!(report.completed_fields, 1); // name counts for legal name
        assert_eq!(report.document_percentage, 0);
    }

    #[test]
    fn identity_plus_owner_without_documents_scores_68() {
        let org = org_with_identity();
        let owners = vec![complete_owner(org.id)];
        let report = evaluate_completeness(&org, &owners);
        assert_eq!(report.total_fields, 19);
        assert_eq!(report.completed_fields, 13);
        assert_eq!(report.overall_percentage, 68);
        assert_eq!(report.document_percentage, 0);
    }

    #[test]
    fn all_documents_give_full_document_percentage() {
        let mut org = org_with_identity();
        org.articles_of_incorporation = Some("doc/articles.pdf".to_string());
        org.tax_exempt_letter = Some("doc/irs.pdf".to_string());
        org.bank_statement = Some("doc/bank.pdf".to_string());
        org.board_resolution = Some("doc/board.pdf".to_string());
        let owners = vec![complete_owner(org.id)];
        let report = evaluate_completeness(&org, &owners);
        assert_eq!(report.document_percentage, 100);
        assert_eq!(report.uploaded_documents, 4);
        assert_eq!(report.overall_percentage, (17 * 100 / 19) as u8);
    }

    #[test]
    fn submission_validation_splits_errors_and_warnings() {
        let org = org_with_identity();
        let result = validate_for_submission(&org, &[]);
        assert!(!result.valid);
        assert!(result
            .errors
            .iter()
            .any(|e| e.contains("beneficial owner")));
        assert_eq!(result.warnings.len(), 3);
    }

    proptest! {
        // Filling any single identity field never lowers the score.
        #[test]
        fn filling_a_field_is_monotone(
            ein in proptest::option::of("[0-9]{2}-[0-9]{7}"),
            phone in proptest::option::of("\\+1[0-9]{10}"),
            purpose in proptest::option::of("[a-z ]{1,40}"),
        ) {
            let mut org = org_with_identity();
            org.ein = ein;
            org.phone = phone;
            org.primary_purpose = purpose;
            let before = evaluate_completeness(&org, &[]).overall_percentage;

            org.ein = Some("98-7654321".to_string());
            org.phone = Some("+15550000000".to_string());
            org.primary_purpose = Some("worship".to_string());
            let after = evaluate_completeness(&org, &[]).overall_percentage;
            prop_assert!(after >= before);
        }
    }
}
