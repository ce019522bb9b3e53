use crate::config::SmtpConfig;
use crate::models::organization::Organization;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};

/// Fire-and-forget email sink. Delivery failures are logged and swallowed;
/// no workflow transition ever fails because an email did not go out.
pub struct NotificationService {
    smtp: Option<SmtpConfig>,
}

impl NotificationService {
    pub fn new(smtp: SmtpConfig) -> Self {
        Self { smtp: Some(smtp) }
    }

    /// No-op sink for tests and local runs without SMTP configured.
    pub fn disabled() -> Self {
        Self { smtp: None }
    }

    pub fn notify_submission_received(&self, org: &Organization) {
        self.send(
            org,
            "Compliance application received",
            &format!(
                "Hi {},\n\nYour compliance application has been received and is now \
                 pending review. We will reach out if anything else is needed.",
                org.name
            ),
        );
    }

    pub fn notify_approved(&self, org: &Organization) {
        self.send(
            org,
            "Your organization has been approved",
            &format!(
                "Hi {},\n\nYour compliance review is complete and your organization \
                 is approved to receive donations.",
                org.name
            ),
        );
    }

    pub fn notify_rejected(&self, org: &Organization, reason: &str) {
        self.send(
            org,
            "Compliance application update",
            &format!(
                "Hi {},\n\nYour compliance application was not approved.\n\nReason: {}\n\n\
                 You may correct the issues above and resubmit.",
                org.name, reason
            ),
        );
    }

    pub fn notify_info_requested(&self, org: &Organization, required_info: &str) {
        self.send(
            org,
            "Additional information needed",
            &format!(
                "Hi {},\n\nA reviewer needs more information to complete your \
                 application:\n\n{}",
                org.name, required_info
            ),
        );
    }

    pub fn notify_documents_requested(&self, org: &Organization, documents: &[String]) {
        self.send(
            org,
            "Documents requested",
            &format!(
                "Hi {},\n\nPlease upload the following documents to continue your \
                 review:\n\n- {}",
                org.name,
                documents.join("\n- ")
            ),
        );
    }

    pub fn notify_document_reviewed(&self, org: &Organization, document: &str, approved: bool) {
        let verdict = if approved { "approved" } else { "rejected" };
        self.send(
            org,
            &format!("Document {}", verdict),
            &format!("Hi {},\n\nYour {} has been {}.", org.name, document, verdict),
        );
    }

    fn send(&self, org: &Organization, subject: &str, body: &str) {
        let Some(smtp) = &self.smtp else {
            tracing::debug!(org = %org.id, subject, "smtp not configured, skipping notification");
            return;
        };
        let Some(to_email) = org.email.as_deref() else {
            tracing::debug!(org = %org.id, subject, "organization has no email, skipping notification");
            return;
        };
        if let Err(e) = Self::send_email_smtp(smtp, to_email, subject, body) {
            tracing::warn!(org = %org.id, subject, error = %e, "failed to send notification email");
        }
    }

    fn send_email_smtp(
        smtp: &SmtpConfig,
        to_email: &str,
        subject: &str,
        body: &str,
    ) -> std::result::Result<(), String> {
        let email = Message::builder()
            .from(smtp.from_email.parse().map_err(|e| format!("From parse error: {}", e))?)
            .to(to_email.parse().map_err(|e| format!("To parse error: {}", e))?)
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| format!("Message build error: {}", e))?;

        let creds = Credentials::new(smtp.username.clone(), smtp.password.clone());
        let mailer = SmtpTransport::starttls_relay(&smtp.host)
            .map_err(|e| format!("SMTP relay error: {}", e))?
            .credentials(creds)
            .build();

        mailer.send(&email).map_err(|e| format!("Send error: {}", e))?;
        Ok(())
    }
}
