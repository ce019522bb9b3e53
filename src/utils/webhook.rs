use crate::errors::{AppError, Result};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signatures older than this are replays as far as we are concerned.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Verifies a `Stripe-Signature` style header: `t=<unix>,v1=<hex hmac>`
/// where the hmac is computed over `"{t}.{body}"` with the webhook secret.
pub fn verify_signature(secret: &str, header: &str, body: &str) -> Result<()> {
    verify_signature_at(secret, header, body, Utc::now().timestamp())
}

fn verify_signature_at(secret: &str, header: &str, body: &str, now: i64) -> Result<()> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<&str> = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = value.parse().ok();
            }
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| AppError::Auth("Missing timestamp in webhook signature".to_string()))?;
    if signatures.is_empty() {
        return Err(AppError::Auth("Missing v1 signature in webhook header".to_string()));
    }
    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(AppError::Auth("Webhook signature timestamp outside tolerance".to_string()));
    }

    let signed_payload = format!("{}.{}", timestamp, body);
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Internal(format!("Invalid webhook secret: {}", e)))?;
    mac.update(signed_payload.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    // Constant-time compare against every presented v1 signature.
    for candidate in signatures {
        if candidate.len() == expected.len() {
            let mut diff = 0u8;
            for (a, b) in candidate.bytes().zip(expected.bytes()) {
                diff |= a ^ b;
            }
            if diff == 0 {
                return Ok(());
            }
        }
    }
    Err(AppError::Auth("Webhook signature mismatch".to_string()))
}

/// Produces a header the verifier accepts. Used by tests and by local
/// tooling that replays events against a dev server.
pub fn sign_payload(secret: &str, timestamp: i64, body: &str) -> Result<String> {
    let signed_payload = format!("{}.{}", timestamp, body);
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Internal(format!("Invalid webhook secret: {}", e)))?;
    mac.update(signed_payload.as_bytes());
    Ok(format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";
    const BODY: &str = r#"{"type":"account.updated"}"#;

    #[test]
    fn valid_signature_passes() {
        let now = Utc::now().timestamp();
        let header = sign_payload(SECRET, now, BODY).unwrap();
        assert!(verify_signature(SECRET, &header, BODY).is_ok());
    }

    #[test]
    fn tampered_body_fails() {
        let now = Utc::now().timestamp();
        let header = sign_payload(SECRET, now, BODY).unwrap();
        assert!(verify_signature(SECRET, &header, r#"{"type":"account.deleted"}"#).is_err());
    }

    #[test]
    fn stale_timestamp_fails() {
        let now = Utc::now().timestamp();
        let header = sign_payload(SECRET, now - SIGNATURE_TOLERANCE_SECS - 1, BODY).unwrap();
        assert!(verify_signature(SECRET, &header, BODY).is_err());
    }

    #[test]
    fn wrong_secret_fails() {
        let now = Utc::now().timestamp();
        let header = sign_payload("whsec_other", now, BODY).unwrap();
        assert!(verify_signature(SECRET, &header, BODY).is_err());
    }

    #[test]
    fn missing_timestamp_fails() {
        assert!(verify_signature(SECRET, "v1=deadbeef", BODY).is_err());
    }
}
