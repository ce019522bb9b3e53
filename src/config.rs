use crate::errors::{AppError, Result};

/// Process configuration, read once at startup and injected into the
/// components that need it. The processor credentials live here instead of
/// a process-wide SDK key.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_path: String,
    pub jwt_secret: String,
    pub frontend_url: String,
    pub stripe: StripeConfig,
    /// Absent when SMTP_HOST is unset; notifications become no-ops.
    pub smtp: Option<SmtpConfig>,
}

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub api_base: String,
    /// Bound on every gateway call so a stuck processor request cannot hold
    /// a workflow transition open.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub username: String,
    pub password: String,
    pub from_email: String,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_required(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| AppError::Config(format!("{} must be set", key)))
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let port = env_or("PORT", "8080");
        Ok(Self {
            bind_addr: format!("0.0.0.0:{}", port),
            database_path: env_or("DATABASE_PATH", "offertory.db"),
            jwt_secret: env_required("JWT_SECRET")?,
            frontend_url: env_or("FRONTEND_URL", "http://localhost:3000"),
            stripe: StripeConfig {
                secret_key: env_required("STRIPE_SECRET_KEY")?,
                webhook_secret: env_required("STRIPE_WEBHOOK_SECRET")?,
                api_base: env_or("STRIPE_API_BASE", "https://api.stripe.com/v1"),
                timeout_secs: env_or("STRIPE_TIMEOUT_SECS", "10")
                    .parse()
                    .map_err(|_| AppError::Config("STRIPE_TIMEOUT_SECS must be an integer".to_string()))?,
            },
            smtp: std::env::var("SMTP_HOST").ok().map(|host| SmtpConfig {
                host,
                username: env_or("SMTP_USERNAME", ""),
                password: env_or("SMTP_PASSWORD", ""),
                from_email: env_or("FROM_EMAIL", "noreply@offertory.app"),
            }),
        })
    }
}
