use crate::config::StripeConfig;
use crate::errors::{AppError, Result};
use crate::models::organization::Requirements;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

/// Normalized view of a processor sub-account, independent of the wire shape.
#[derive(Debug, Clone, Default)]
pub struct ProcessorAccountStatus {
    pub account_id: String,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub disabled_reason: Option<String>,
    pub requirements: Requirements,
}

/// Company + individuals payload pushed to the processor at submission time.
#[derive(Debug, Clone)]
pub struct CompliancePackage {
    pub company_name: String,
    pub tax_id: String,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub address: AddressLines,
    pub individuals: Vec<IndividualProfile>,
}

#[derive(Debug, Clone, Default)]
pub struct AddressLines {
    pub line1: Option<String>,
    pub line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IndividualProfile {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub date_of_birth: NaiveDate,
    pub gov_id_last4: Option<String>,
    pub id_front_ref: Option<String>,
    pub id_back_ref: Option<String>,
    pub title: Option<String>,
    pub is_primary: bool,
    pub address: AddressLines,
}

/// The seam between the workflow engine and the payment processor. The
/// production implementation talks to Stripe; tests swap in a mock.
#[async_trait]
pub trait ProcessorGateway: Send + Sync {
    /// Provisions an express non-profit sub-account and returns its id.
    async fn create_account(
        &self,
        org_name: &str,
        email: Option<&str>,
        website: Option<&str>,
        idempotency_key: &str,
    ) -> Result<String>;

    /// Pushes company and beneficial-owner data onto an existing account.
    async fn modify_account(
        &self,
        account_id: &str,
        package: &CompliancePackage,
        idempotency_key: &str,
    ) -> Result<ProcessorAccountStatus>;

    /// Fresh hosted-onboarding URL; single use, expires processor-side.
    async fn create_onboarding_link(
        &self,
        account_id: &str,
        refresh_url: &str,
        return_url: &str,
    ) -> Result<String>;

    async fn retrieve_account(&self, account_id: &str) -> Result<ProcessorAccountStatus>;

    /// Adjusts the payout delay; 999 days effectively pauses payouts.
    async fn modify_payout_schedule(
        &self,
        account_id: &str,
        delay_days: u32,
        idempotency_key: &str,
    ) -> Result<()>;
}

pub const PAYOUT_DELAY_PAUSED: u32 = 999;
pub const PAYOUT_DELAY_NORMAL: u32 = 2;

// Religious organizations merchant category code.
const MCC_RELIGIOUS: &str = "8661";

#[derive(Debug, Deserialize)]
struct StripeAccount {
    id: String,
    #[serde(default)]
    charges_enabled: bool,
    #[serde(default)]
    payouts_enabled: bool,
    #[serde(default)]
    requirements: Option<StripeRequirements>,
}

#[derive(Debug, Default, Deserialize)]
struct StripeRequirements {
    #[serde(default)]
    currently_due: Vec<String>,
    #[serde(default)]
    eventually_due: Vec<String>,
    #[serde(default)]
    past_due: Vec<String>,
    #[serde(default)]
    disabled_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeAccountLink {
    url: String,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

impl ProcessorAccountStatus {
    /// Parses the `data.object` of an `account.updated` event, which carries
    /// the same shape as the accounts API.
    pub fn from_event_object(object: &serde_json::Value) -> Option<Self> {
        serde_json::from_value::<StripeAccount>(object.clone())
            .ok()
            .map(Into::into)
    }
}

impl From<StripeAccount> for ProcessorAccountStatus {
    fn from(account: StripeAccount) -> Self {
        let requirements = account.requirements.unwrap_or_default();
        ProcessorAccountStatus {
            account_id: account.id,
            charges_enabled: account.charges_enabled,
            payouts_enabled: account.payouts_enabled,
            disabled_reason: requirements.disabled_reason,
            requirements: Requirements {
                currently_due: requirements.currently_due,
                eventually_due: requirements.eventually_due,
                past_due: requirements.past_due,
            },
        }
    }
}

/// Stripe Connect client over the form-encoded v1 API. The secret key and
/// endpoint come from the injected config; there is no process-global key.
#[derive(Debug, Clone)]
pub struct StripeGateway {
    client: Client,
    config: StripeConfig,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build http client: {}", e)))?;
        Ok(Self { client, config })
    }

    async fn post_form(
        &self,
        path: &str,
        params: &[(String, String)],
        idempotency_key: Option<&str>,
    ) -> Result<serde_json::Value> {
        let url = format!("{}/{}", self.config.api_base.trim_end_matches('/'), path);
        let mut request = self
            .client
            .post(&url)
            .bearer_auth(&self.config.secret_key)
            .form(params);
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }
        let response = request.send().await.map_err(classify_transport_error)?;
        Self::read_response(response).await
    }

    async fn get(&self, path: &str) -> Result<serde_json::Value> {
        let url = format!("{}/{}", self.config.api_base.trim_end_matches('/'), path);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.secret_key)
            .send()
            .await
            .map_err(classify_transport_error)?;
        Self::read_response(response).await
    }

    async fn read_response(response: reqwest::Response) -> Result<serde_json::Value> {
        let status = response.status();
        let body = response.text().await.map_err(classify_transport_error)?;
        if status.is_success() {
            return serde_json::from_str(&body).map_err(|e| {
                AppError::processor_retryable(format!("Malformed processor response: {}", e))
            });
        }
        let message = serde_json::from_str::<StripeErrorBody>(&body)
            .ok()
            .and_then(|b| b.error.message)
            .unwrap_or_else(|| format!("processor returned {}", status));
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(AppError::processor_retryable(message))
        } else {
            Err(AppError::processor_rejected(message))
        }
    }
}

fn classify_transport_error(e: reqwest::Error) -> AppError {
    if e.is_timeout() || e.is_connect() {
        AppError::processor_retryable(format!("Processor unreachable: {}", e))
    } else {
        AppError::processor_rejected(format!("Processor request failed: {}", e))
    }
}

fn push_opt(params: &mut Vec<(String, String)>, key: &str, value: &Option<String>) {
    if let Some(v) = value {
        if !v.is_empty() {
            params.push((key.to_string(), v.clone()));
        }
    }
}

fn push_address(params: &mut Vec<(String, String)>, prefix: &str, address: &AddressLines) {
    push_opt(params, &format!("{}[line1]", prefix), &address.line1);
    push_opt(params, &format!("{}[line2]", prefix), &address.line2);
    push_opt(params, &format!("{}[city]", prefix), &address.city);
    push_opt(params, &format!("{}[state]", prefix), &address.state);
    push_opt(params, &format!("{}[postal_code]", prefix), &address.postal_code);
    push_opt(params, &format!("{}[country]", prefix), &address.country);
}

#[async_trait]
impl ProcessorGateway for StripeGateway {
    async fn create_account(
        &self,
        org_name: &str,
        email: Option<&str>,
        website: Option<&str>,
        idempotency_key: &str,
    ) -> Result<String> {
        let mut params: Vec<(String, String)> = vec![
            ("type".into(), "express".into()),
            ("country".into(), "US".into()),
            ("business_type".into(), "non_profit".into()),
            ("capabilities[card_payments][requested]".into(), "true".into()),
            ("capabilities[transfers][requested]".into(), "true".into()),
            ("business_profile[name]".into(), org_name.to_string()),
            ("business_profile[mcc]".into(), MCC_RELIGIOUS.into()),
            (
                "settings[payouts][schedule][delay_days]".into(),
                PAYOUT_DELAY_NORMAL.to_string(),
            ),
            ("settings[payouts][schedule][interval]".into(), "daily".into()),
        ];
        if let Some(email) = email {
            params.push(("email".into(), email.to_string()));
        }
        if let Some(website) = website {
            params.push(("business_profile[url]".into(), website.to_string()));
        }

        let value = self
            .post_form("accounts", &params, Some(idempotency_key))
            .await?;
        let account: StripeAccount = serde_json::from_value(value).map_err(|e| {
            AppError::processor_retryable(format!("Malformed account response: {}", e))
        })?;
        Ok(account.id)
    }

    async fn modify_account(
        &self,
        account_id: &str,
        package: &CompliancePackage,
        idempotency_key: &str,
    ) -> Result<ProcessorAccountStatus> {
        let mut params: Vec<(String, String)> = vec![
            ("company[name]".into(), package.company_name.clone()),
            ("company[tax_id]".into(), package.tax_id.clone()),
            ("business_profile[name]".into(), package.company_name.clone()),
            ("business_profile[mcc]".into(), MCC_RELIGIOUS.into()),
        ];
        push_opt(&mut params, "company[phone]", &package.phone);
        push_opt(&mut params, "business_profile[url]", &package.website);
        push_address(&mut params, "company[address]", &package.address);

        for (i, person) in package.individuals.iter().enumerate() {
            let p = format!("individuals[{}]", i);
            params.push((format!("{}[first_name]", p), person.first_name.clone()));
            params.push((format!("{}[last_name]", p), person.last_name.clone()));
            params.push((format!("{}[email]", p), person.email.clone()));
            push_opt(&mut params, &format!("{}[phone]", p), &person.phone);
            params.push((
                format!("{}[dob][day]", p),
                person.date_of_birth.format("%-d").to_string(),
            ));
            params.push((
                format!("{}[dob][month]", p),
                person.date_of_birth.format("%-m").to_string(),
            ));
            params.push((
                format!("{}[dob][year]", p),
                person.date_of_birth.format("%Y").to_string(),
            ));
            push_opt(&mut params, &format!("{}[ssn_last_4]", p), &person.gov_id_last4);
            push_opt(
                &mut params,
                &format!("{}[verification][document][front]", p),
                &person.id_front_ref,
            );
            push_opt(
                &mut params,
                &format!("{}[verification][document][back]", p),
                &person.id_back_ref,
            );
            push_opt(&mut params, &format!("{}[relationship][title]", p), &person.title);
            params.push((format!("{}[relationship][owner]", p), "true".into()));
            params.push((
                format!("{}[relationship][executive]", p),
                person.is_primary.to_string(),
            ));
            push_address(&mut params, &format!("{}[address]", p), &person.address);
        }

        let value = self
            .post_form(&format!("accounts/{}", account_id), &params, Some(idempotency_key))
            .await?;
        let account: StripeAccount = serde_json::from_value(value).map_err(|e| {
            AppError::processor_retryable(format!("Malformed account response: {}", e))
        })?;
        Ok(account.into())
    }

    async fn create_onboarding_link(
        &self,
        account_id: &str,
        refresh_url: &str,
        return_url: &str,
    ) -> Result<String> {
        let params: Vec<(String, String)> = vec![
            ("account".into(), account_id.to_string()),
            ("refresh_url".into(), refresh_url.to_string()),
            ("return_url".into(), return_url.to_string()),
            ("type".into(), "account_onboarding".into()),
            ("collect".into(), "eventually_due".into()),
        ];
        let value = self.post_form("account_links", &params, None).await?;
        let link: StripeAccountLink = serde_json::from_value(value).map_err(|e| {
            AppError::processor_retryable(format!("Malformed account link response: {}", e))
        })?;
        Ok(link.url)
    }

    async fn retrieve_account(&self, account_id: &str) -> Result<ProcessorAccountStatus> {
        let value = self.get(&format!("accounts/{}", account_id)).await?;
        let account: StripeAccount = serde_json::from_value(value).map_err(|e| {
            AppError::processor_retryable(format!("Malformed account response: {}", e))
        })?;
        Ok(account.into())
    }

    async fn modify_payout_schedule(
        &self,
        account_id: &str,
        delay_days: u32,
        idempotency_key: &str,
    ) -> Result<()> {
        let params: Vec<(String, String)> = vec![(
            "settings[payouts][schedule][delay_days]".into(),
            delay_days.to_string(),
        )];
        self.post_form(&format!("accounts/{}", account_id), &params, Some(idempotency_key))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stripe_account_maps_to_status() {
        let raw = serde_json::json!({
            "id": "acct_123",
            "charges_enabled": true,
            "payouts_enabled": false,
            "requirements": {
                "currently_due": ["company.tax_id"],
                "eventually_due": [],
                "past_due": [],
                "disabled_reason": null
            }
        });
        let account: StripeAccount = serde_json::from_value(raw).unwrap();
        let status: ProcessorAccountStatus = account.into();
        assert_eq!(status.account_id, "acct_123");
        assert!(status.charges_enabled);
        assert!(!status.payouts_enabled);
        assert_eq!(status.requirements.currently_due, vec!["company.tax_id"]);
        assert!(status.disabled_reason.is_none());
    }

    #[test]
    fn missing_requirements_block_defaults_empty() {
        let raw = serde_json::json!({ "id": "acct_9" });
        let account: StripeAccount = serde_json::from_value(raw).unwrap();
        let status: ProcessorAccountStatus = account.into();
        assert!(status.requirements.currently_due.is_empty());
        assert!(!status.charges_enabled);
    }
}
