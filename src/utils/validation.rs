use crate::errors::{AppError, Result};
use regex::Regex;

pub struct Validator;

impl Validator {
    pub fn validate_email(email: &str) -> Result<()> {
        let email_regex = Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
            .map_err(|e| AppError::Internal(format!("Regex error: {}", e)))?;

        if !email_regex.is_match(email) {
            return Err(AppError::Validation("Invalid email format".to_string()));
        }

        if email.len() > 254 {
            return Err(AppError::Validation("Email too long".to_string()));
        }

        Ok(())
    }

    /// Employer Identification Number, with or without the hyphen.
    pub fn validate_ein(ein: &str) -> Result<()> {
        let ein = ein.trim();
        let ein_regex = Regex::new(r"^\d{2}-?\d{7}$")
            .map_err(|e| AppError::Internal(format!("Regex error: {}", e)))?;
        if !ein_regex.is_match(ein) {
            return Err(AppError::Validation(
                "Invalid EIN format. Use XX-XXXXXXX.".to_string(),
            ));
        }
        Ok(())
    }

    pub fn validate_phone(phone: &str) -> Result<()> {
        let phone = phone.trim();
        // E.164: +[country][number], or fallback to 8-15 digits
        let phone_regex = Regex::new(r"^(\+\d{8,15}|\d{8,15})$")
            .map_err(|e| AppError::Internal(format!("Regex error: {}", e)))?;
        if !phone_regex.is_match(phone) {
            return Err(AppError::Validation(
                "Invalid phone number format. Use +countrycode and 8-15 digits.".to_string(),
            ));
        }
        Ok(())
    }

    pub fn validate_zip_code(zip: &str) -> Result<()> {
        let zip = zip.trim();
        let zip_regex = Regex::new(r"^\d{5}(-\d{4})?$")
            .map_err(|e| AppError::Internal(format!("Regex error: {}", e)))?;
        if !zip_regex.is_match(zip) {
            return Err(AppError::Validation(
                "Invalid ZIP code format. Use 12345 or 12345-6789.".to_string(),
            ));
        }
        Ok(())
    }

    pub fn validate_organization_name(name: &str) -> Result<()> {
        let name = name.trim();
        if name.len() < 2 {
            return Err(AppError::Validation(
                "Organization name must be at least 2 characters long".to_string(),
            ));
        }
        if name.len() > 120 {
            return Err(AppError::Validation(
                "Organization name must be less than 120 characters".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ein_accepts_both_shapes() {
        assert!(Validator::validate_ein("12-3456789").is_ok());
        assert!(Validator::validate_ein("123456789").is_ok());
        assert!(Validator::validate_ein("1-23456789").is_err());
        assert!(Validator::validate_ein("12-345678").is_err());
    }

    #[test]
    fn zip_accepts_plus_four() {
        assert!(Validator::validate_zip_code("78701").is_ok());
        assert!(Validator::validate_zip_code("78701-1234").is_ok());
        assert!(Validator::validate_zip_code("787").is_err());
    }

    #[test]
    fn email_rejects_garbage() {
        assert!(Validator::validate_email("office@church.org").is_ok());
        assert!(Validator::validate_email("not-an-email").is_err());
    }
}
