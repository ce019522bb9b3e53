use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// An individual with controlling or ownership interest in an organization.
/// Owned by exactly one organization and deleted with it.
///
/// `gov_id_number` must never appear in logs or API projections; use
/// [`BeneficialOwner::gov_id_last4`] where a hint is needed.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BeneficialOwner {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub title: Option<String>,
    pub is_primary: bool,
    pub date_of_birth: Option<NaiveDate>,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(skip_serializing, default)]
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
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BeneficialOwner {
    pub fn new(organization_id: Uuid, first_name: String, last_name: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            first_name,
            last_name,
            title: None,
            is_primary: false,
            date_of_birth: None,
            email: None,
            phone: None,
            gov_id_number: None,
            gov_id_type: None,
            id_front_ref: None,
            id_back_ref: None,
            address_line_1: None,
            address_line_2: None,
            city: None,
            state: None,
            zip_code: None,
            country: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn gov_id_last4(&self) -> Option<String> {
        self.gov_id_number.as_ref().map(|id| {
            let digits: String = id.chars().filter(|c| c.is_ascii_digit()).collect();
            let start = digits.len().saturating_sub(4);
            digits[start..].to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last4_ignores_separators() {
        let mut owner = BeneficialOwner::new(Uuid::new_v4(), "Ada".into(), "Moore".into());
        owner.gov_id_number = Some("123-45-6789".to_string());
        assert_eq!(owner.gov_id_last4().as_deref(), Some("6789"));
    }

    #[test]
    fn gov_id_never_serialized() {
        let mut owner = BeneficialOwner::new(Uuid::new_v4(), "Ada".into(), "Moore".into());
        owner.gov_id_number = Some("123456789".to_string());
        let json = serde_json::to_string(&owner).unwrap();
        assert!(!json.contains("123456789"));
    }
}
