use crate::errors::{AppError, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, TokenData, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_ORGANIZATION: &str = "organization";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub email: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

pub struct JwtManager {
    secret: String,
}

impl JwtManager {
    pub fn new(secret: String) -> Self {
        Self { secret }
    }

    /// Mints a 24h token with the shared secret. Production tokens come from
    /// the platform's auth service; this exists for local runs and tests,
    /// and keeps the claim shape in one place next to validation.
    pub fn generate_token(&self, subject: &Uuid, role: &str, email: &str) -> Result<String> {
        let now = Utc::now();
        let expiration = now + Duration::hours(24);
        let claims = Claims {
            sub: subject.to_string(),
            role: role.to_string(),
            email: email.to_string(),
            exp: expiration.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_ref()),
        )
        .map_err(|e| AppError::Auth(format!("Failed to generate token: {}", e)))
    }

    pub fn validate_token(&self, token: &str) -> Result<TokenData<Claims>> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_ref()),
            &Validation::default(),
        )
        .map_err(|e| AppError::Auth(format!("Invalid token: {}", e)))
    }

    /// Validates the token and requires the admin role.
    pub fn validate_admin(&self, token: &str) -> Result<AuthenticatedAdmin> {
        let token_data = self.validate_token(token)?;
        if token_data.claims.role != ROLE_ADMIN {
            return Err(AppError::Auth("Admin role required".to_string()));
        }
        AuthenticatedAdmin::try_from(token_data.claims)
    }
}

#[derive(Debug)]
pub struct AuthenticatedAdmin {
    pub admin_id: Uuid,
    pub email: String,
    pub token_id: String,
}

impl TryFrom<Claims> for AuthenticatedAdmin {
    type Error = AppError;

    fn try_from(claims: Claims) -> Result<Self> {
        let admin_id = Uuid::parse_str(&claims.sub)
            .map_err(|e| AppError::Validation(format!("Invalid admin ID in token: {}", e)))?;

        Ok(Self {
            admin_id,
            email: claims.email,
            token_id: claims.jti,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_token_round_trips() {
        let manager = JwtManager::new("test-secret".to_string());
        let admin_id = Uuid::new_v4();
        let token = manager
            .generate_token(&admin_id, ROLE_ADMIN, "admin@example.com")
            .unwrap();
        let admin = manager.validate_admin(&token).unwrap();
        assert_eq!(admin.admin_id, admin_id);
    }

    #[test]
    fn non_admin_role_is_rejected() {
        let manager = JwtManager::new("test-secret".to_string());
        let token = manager
            .generate_token(&Uuid::new_v4(), ROLE_ORGANIZATION, "org@example.com")
            .unwrap();
        assert!(manager.validate_admin(&token).is_err());
    }

    #[test]
    fn wrong_secret_fails_validation() {
        let manager = JwtManager::new("test-secret".to_string());
        let token = manager
            .generate_token(&Uuid::new_v4(), ROLE_ADMIN, "admin@example.com")
            .unwrap();
        let other = JwtManager::new("other-secret".to_string());
        assert!(other.validate_token(&token).is_err());
    }
}
