//! Email delivery abstractions.
//!
//! The registration workflow hands each OTP message to an [`EmailSender`].
//! Delivery is best effort: the workflow logs a failed send and carries on,
//! so senders report errors but never retry.
//!
//! The default sender for local dev is [`LogEmailSender`], which logs the
//! message and returns `Ok(())`. [`SmtpEmailSender`] delivers over SMTP with
//! STARTTLS when an SMTP host is configured.

use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::{Mailbox, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailMessage {
    pub to_email: String,
    pub subject: String,
    pub body: String,
}

/// Email delivery abstraction used by the registration workflow.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error describing why it was not sent.
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Local dev sender that logs the message instead of sending real email.
#[derive(Clone, Debug, Default)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to_email = %message.to_email,
            subject = %message.subject,
            body = %message.body,
            "email send stub"
        );
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct SmtpConfig {
    host: String,
    port: u16,
    username: Option<String>,
    password: Option<SecretString>,
    from: String,
    timeout: Duration,
}

impl SmtpConfig {
    /// Defaults: port 587, no credentials, 10s timeout.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 587,
            username: None,
            password: None,
            from: "Homesite <no-reply@homesite.local>".to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, username: String, password: SecretString) -> Self {
        self.username = Some(username);
        self.password = Some(password);
        self
    }

    #[must_use]
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = from.into();
        self
    }

    #[must_use]
    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn from(&self) -> &str {
        &self.from
    }
}

/// SMTP sender using a pooled async transport.
pub struct SmtpEmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpEmailSender {
    /// # Errors
    /// Returns an error if the relay host or the sender address is invalid.
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let from: Mailbox = config
            .from
            .parse()
            .with_context(|| format!("invalid from address: {}", config.from))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .with_context(|| format!("failed to create SMTP transport for {}", config.host))?
            .port(config.port)
            .timeout(Some(config.timeout));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(
                username.clone(),
                password.expose_secret().to_string(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        debug!(to_email = %message.to_email, subject = %message.subject, "sending email");

        let to: Mailbox = message
            .to_email
            .parse()
            .with_context(|| format!("invalid recipient address: {}", message.to_email))?;
        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(&message.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())
            .context("failed to build email")?;

        self.transport
            .send(email)
            .await
            .context("failed to send email")?;

        info!(to_email = %message.to_email, "email sent");
        Ok(())
    }
}

/// The OTP email sent on registration and resend.
#[must_use]
pub fn otp_message(to_email: &str, code: &str, ttl: Duration) -> EmailMessage {
    let minutes = ttl.as_secs().div_ceil(60).max(1);
    let body = format!(
        "Hello!\n\n\
         Your OTP code for registration is: {code}\n\n\
         This code will expire in {minutes} minutes.\n\n\
         If you didn't request this code, please ignore this email.\n"
    );
    EmailMessage {
        to_email: to_email.to_string(),
        subject: "Your OTP Code".to_string(),
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn otp_message_carries_code_and_expiry() {
        let message = otp_message("a@x.com", "123456", Duration::from_secs(300));
        assert_eq!(message.to_email, "a@x.com");
        assert!(message.body.contains("123456"));
        assert!(message.body.contains("expire in 5 minutes"));
    }

    #[test]
    fn otp_message_rounds_partial_minutes_up() {
        let message = otp_message("a@x.com", "123456", Duration::from_secs(90));
        assert!(message.body.contains("expire in 2 minutes"));
    }

    #[test]
    fn smtp_config_builder_sets_fields() {
        let config = SmtpConfig::new("smtp.example.com")
            .with_port(2525)
            .with_from("Site <site@example.com>");
        assert_eq!(config.host(), "smtp.example.com");
        assert_eq!(config.port(), 2525);
        assert_eq!(config.from(), "Site <site@example.com>");
    }

    #[test]
    fn smtp_sender_rejects_invalid_from_address() {
        let config = SmtpConfig::new("smtp.example.com").with_from("not an address");
        assert!(SmtpEmailSender::new(&config).is_err());
    }

    #[tokio::test]
    async fn smtp_sender_builds_with_credentials() -> Result<()> {
        let config = SmtpConfig::new("smtp.example.com")
            .with_credentials("user".to_string(), SecretString::from("pass".to_string()));
        let sender = SmtpEmailSender::new(&config)?;
        assert_eq!(sender.from.email.to_string(), "no-reply@homesite.local");
        Ok(())
    }

    #[tokio::test]
    async fn log_sender_always_succeeds() -> Result<()> {
        let message = otp_message("a@x.com", "123456", Duration::from_secs(300));
        LogEmailSender.send(&message).await
    }
}
