//! Outbound email over SMTP.

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::error::DashboardError;
use crate::settings::MailSettings;

/// Port that expects TLS from the first byte; everything else upgrades via STARTTLS.
const IMPLICIT_TLS_PORT: u16 = 465;

/// A rendered email ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Sends one email to the configured recipient.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, settings: &MailSettings, email: &OutboundEmail) -> Result<(), DashboardError>;
}

/// lettre SMTP transport, built per send from the current settings.
#[derive(Debug, Default, Clone, Copy)]
pub struct SmtpMailer;

impl SmtpMailer {
    pub fn new() -> Self {
        Self
    }

    fn build_message(settings: &MailSettings, email: &OutboundEmail) -> Result<Message, DashboardError> {
        let from: Mailbox = settings
            .smtp_user
            .trim()
            .parse()
            .map_err(|e| DashboardError::InvalidSettings(format!("Invalid SMTP user address: {}", e)))?;
        let to: Mailbox = settings
            .recipient_email
            .trim()
            .parse()
            .map_err(|e| DashboardError::InvalidSettings(format!("Invalid recipient address: {}", e)))?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(email.subject.as_str())
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(email.text.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(email.html.clone()),
                    ),
            )
            .map_err(|e| DashboardError::MailSend(format!("Failed to build email message: {}", e)))
    }

    fn transport(settings: &MailSettings) -> Result<AsyncSmtpTransport<Tokio1Executor>, DashboardError> {
        let host = settings.smtp_host.trim();
        let builder = if settings.smtp_port == IMPLICIT_TLS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
        }
        .map_err(|e| DashboardError::MailSend(format!("Failed to create SMTP transport: {}", e)))?;

        let creds = Credentials::new(settings.smtp_user.trim().to_string(), settings.smtp_pass.clone());
        Ok(builder.port(settings.smtp_port).credentials(creds).build())
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, settings: &MailSettings, email: &OutboundEmail) -> Result<(), DashboardError> {
        let message = Self::build_message(settings, email)?;
        let mailer = Self::transport(settings)?;

        mailer
            .send(message)
            .await
            .map_err(|e| DashboardError::MailSend(e.to_string()))?;

        log::info!(
            "Email sent to {} via {}:{} ({})",
            settings.recipient_email,
            settings.smtp_host,
            settings.smtp_port,
            email.subject
        );
        Ok(())
    }
}

/// The confirmation email sent from the settings screen.
pub fn test_email() -> OutboundEmail {
    OutboundEmail {
        subject: "dayglance - Test Email".to_string(),
        html: r#"<div style="font-family: -apple-system, BlinkMacSystemFont, sans-serif; padding: 20px;">
  <h2>Email Configuration Successful!</h2>
  <p>Your email reminders are now set up correctly.</p>
  <p style="color: #666;">- dayglance</p>
</div>
"#
        .to_string(),
        text: "Email Configuration Successful!\n\nYour email reminders are now set up correctly.\n\n- dayglance\n"
            .to_string(),
    }
}

/// Send the test email, refusing when the settings cannot possibly work.
pub async fn send_test_email(
    transport: &dyn MailTransport,
    settings: &MailSettings,
) -> Result<(), DashboardError> {
    if !settings.is_complete() {
        return Err(DashboardError::InvalidSettings(
            "Email settings incomplete".to_string(),
        ));
    }
    transport.send(settings, &test_email()).await
}

#[cfg(test)]
pub(crate) mod tests {
    use parking_lot::Mutex;

    use super::*;

    /// Transport fake that records what it was asked to send.
    #[derive(Default)]
    pub(crate) struct RecordingMailer {
        pub sent: Mutex<Vec<OutboundEmail>>,
        pub fail: bool,
    }

    impl RecordingMailer {
        pub(crate) fn failing() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        pub(crate) fn sent(&self) -> Vec<OutboundEmail> {
            self.sent.lock().clone()
        }
    }

    #[async_trait]
    impl MailTransport for RecordingMailer {
        async fn send(&self, _settings: &MailSettings, email: &OutboundEmail) -> Result<(), DashboardError> {
            self.sent.lock().push(email.clone());
            if self.fail {
                return Err(DashboardError::MailSend("connection refused".into()));
            }
            Ok(())
        }
    }

    pub(crate) fn complete_settings() -> MailSettings {
        MailSettings {
            recipient_email: "me@example.com".into(),
            smtp_host: "smtp.example.com".into(),
            smtp_port: 587,
            smtp_user: "bot@example.com".into(),
            smtp_pass: "app-password".into(),
        }
    }

    #[tokio::test]
    async fn test_incomplete_settings_suppress_test_email() {
        let mailer = RecordingMailer::default();
        let mut settings = complete_settings();
        settings.smtp_pass.clear();

        let err = send_test_email(&mailer, &settings).await.unwrap_err();
        assert!(err.to_string().contains("Email settings incomplete"));
        assert!(mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_test_email_is_sent_once() {
        let mailer = RecordingMailer::default();
        send_test_email(&mailer, &complete_settings()).await.unwrap();
        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].html.contains("Email Configuration Successful!"));
    }

    #[test]
    fn test_build_message_rejects_bad_addresses() {
        let mut settings = complete_settings();
        settings.recipient_email = "not an address".into();
        assert!(matches!(
            SmtpMailer::build_message(&settings, &test_email()),
            Err(DashboardError::InvalidSettings(_))
        ));
        assert!(SmtpMailer::build_message(&complete_settings(), &test_email()).is_ok());
    }

    #[tokio::test]
    async fn test_transport_builds_for_both_tls_modes() {
        let mut settings = complete_settings();
        assert!(SmtpMailer::transport(&settings).is_ok());
        settings.smtp_port = 465;
        assert!(SmtpMailer::transport(&settings).is_ok());
    }
}
