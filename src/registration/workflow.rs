use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use super::form::RegistrationForm;
use super::otp::generate_otp_code;
use super::throttle::{OtpThrottle, RateLimitDecision};
use crate::accounts::{Account, ProfileFields, join_violations};
use crate::clock::Clock;
use crate::email::{EmailSender, otp_message};
use crate::password::PasswordHasher;
use crate::storage::{PendingRegistration, PromoteOutcome, Store};
use crate::validation::{Violation, parse_birthday};

const DEFAULT_OTP_TTL_SECONDS: i64 = 5 * 60;
const DEFAULT_OTP_SEND_LIMIT: i64 = 3;
const DEFAULT_OTP_SEND_WINDOW_SECONDS: i64 = 60 * 60;
const DEFAULT_PASSWORD_MIN_LENGTH: usize = 6;

#[derive(Clone, Debug)]
pub struct RegistrationConfig {
    otp_ttl_seconds: i64,
    otp_send_limit: i64,
    otp_send_window_seconds: i64,
    password_min_length: usize,
}

impl RegistrationConfig {
    /// Defaults: 5 minute codes, 3 sends per hour, 6 character passwords.
    #[must_use]
    pub fn new() -> Self {
        Self {
            otp_ttl_seconds: DEFAULT_OTP_TTL_SECONDS,
            otp_send_limit: DEFAULT_OTP_SEND_LIMIT,
            otp_send_window_seconds: DEFAULT_OTP_SEND_WINDOW_SECONDS,
            password_min_length: DEFAULT_PASSWORD_MIN_LENGTH,
        }
    }

    #[must_use]
    pub fn with_otp_ttl_seconds(mut self, seconds: i64) -> Self {
        self.otp_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_otp_send_limit(mut self, limit: i64) -> Self {
        self.otp_send_limit = limit;
        self
    }

    #[must_use]
    pub fn with_otp_send_window_seconds(mut self, seconds: i64) -> Self {
        self.otp_send_window_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_password_min_length(mut self, length: usize) -> Self {
        self.password_min_length = length;
        self
    }

    #[must_use]
    pub fn otp_ttl_seconds(&self) -> i64 {
        self.otp_ttl_seconds
    }

    #[must_use]
    pub fn otp_send_limit(&self) -> i64 {
        self.otp_send_limit
    }

    #[must_use]
    pub fn otp_send_window_seconds(&self) -> i64 {
        self.otp_send_window_seconds
    }

    #[must_use]
    pub fn password_min_length(&self) -> usize {
        self.password_min_length
    }
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof that a submission was staged for `email`.
///
/// Only [`RegistrationWorkflow::submit_registration`] hands these out, so a
/// caller cannot start verification for an address it never registered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingVerification {
    email: String,
}

impl PendingVerification {
    pub(crate) fn new(email: String) -> Self {
        Self { email }
    }

    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }
}

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("{}", join_violations(.0))]
    Rejected(Vec<Violation>),
    #[error("Too many OTP requests. Please try again later.")]
    RateLimited,
    #[error("Invalid or expired OTP!")]
    InvalidOtp,
    #[error("Please register first!")]
    NoPendingRegistration,
    #[error("registration failed")]
    Internal(#[from] anyhow::Error),
}

impl RegistrationError {
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        match self {
            Self::Rejected(violations) => violations.iter().map(ToString::to_string).collect(),
            other => vec![other.to_string()],
        }
    }
}

pub struct RegistrationWorkflow {
    store: Arc<dyn Store>,
    mailer: Arc<dyn EmailSender>,
    hasher: Arc<dyn PasswordHasher>,
    clock: Arc<dyn Clock>,
    config: RegistrationConfig,
    throttle: OtpThrottle,
}

impl RegistrationWorkflow {
    pub fn new(
        store: Arc<dyn Store>,
        mailer: Arc<dyn EmailSender>,
        hasher: Arc<dyn PasswordHasher>,
        clock: Arc<dyn Clock>,
        config: RegistrationConfig,
    ) -> Self {
        let throttle = OtpThrottle::new(config.otp_send_limit(), config.otp_send_window_seconds());
        Self {
            store,
            mailer,
            hasher,
            clock,
            config,
            throttle,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RegistrationConfig {
        &self.config
    }

    /// Validate the form, stage it, and mail a fresh code.
    ///
    /// Nothing is written unless every rule passes.
    ///
    /// # Errors
    /// [`RegistrationError::Rejected`] with every violated rule, or
    /// [`RegistrationError::Internal`] on store/hash failures.
    pub async fn submit_registration(
        &self,
        form: &RegistrationForm,
    ) -> Result<PendingVerification, RegistrationError> {
        let email = form.normalized_email();
        let username = form.trimmed_username().to_string();

        let mut violations = form.validate(self.config.password_min_length());
        if !username.is_empty() && self.store.find_account_by_username(&username).await?.is_some()
        {
            violations.push(Violation::UsernameTaken);
        }
        if !email.is_empty() {
            if self.store.find_account_by_email(&email).await?.is_some() {
                violations.push(Violation::EmailTaken);
            }
            if self.check_spam(&email).await? == RateLimitDecision::Limited {
                violations.push(Violation::RateLimited);
            }
        }

        let birthday = parse_birthday(&form.birthday);
        let Some(birthday) = birthday.filter(|_| violations.is_empty()) else {
            info!(email = %email, violations = violations.len(), "registration rejected");
            return Err(RegistrationError::Rejected(violations));
        };

        let password_hash = self.hash_password(form.password.clone()).await?;
        let now = self.clock.now();
        let pending = PendingRegistration {
            email: email.clone(),
            username,
            password_hash,
            profile: ProfileFields {
                firstname: form.firstname.trim().to_string(),
                middlename: form.middlename.trim().to_string(),
                lastname: form.lastname.trim().to_string(),
                birthday,
                contact: form.contact.trim().to_string(),
            },
            created_at: now,
        };
        self.store.save_pending(&pending).await?;
        self.issue_otp(&email, now).await?;

        info!(email = %email, "registration staged");
        Ok(PendingVerification::new(email))
    }

    /// Check `code` for the marker's email and, on a match, create the account.
    ///
    /// A wrong or expired code changes nothing and reports the same error.
    ///
    /// # Errors
    /// [`RegistrationError::NoPendingRegistration`] without a marker or staged
    /// row, [`RegistrationError::InvalidOtp`] on mismatch or expiry.
    pub async fn verify_otp(
        &self,
        marker: Option<&PendingVerification>,
        code: &str,
    ) -> Result<Account, RegistrationError> {
        let marker = marker.ok_or(RegistrationError::NoPendingRegistration)?;
        let email = marker.email();

        if self.store.find_pending(email).await?.is_none() {
            return Err(RegistrationError::NoPendingRegistration);
        }

        let now = self.clock.now();
        let issued_after = now - Duration::seconds(self.config.otp_ttl_seconds());
        if !self.store.verify_otp(email, code.trim(), issued_after).await? {
            info!(email = %email, "otp rejected");
            return Err(RegistrationError::InvalidOtp);
        }

        match self.store.promote_pending(email, now).await? {
            PromoteOutcome::Promoted(account) => {
                info!(email = %email, user_id = account.id, "registration completed");
                Ok(account)
            }
            PromoteOutcome::Missing => Err(RegistrationError::NoPendingRegistration),
            PromoteOutcome::Conflict => {
                // The code is already consumed; the user has to register again.
                warn!(email = %email, "username or email claimed before promotion");
                Err(RegistrationError::Rejected(vec![Violation::AccountExists]))
            }
        }
    }

    /// Replace the marker's code with a fresh one, subject to throttling.
    ///
    /// # Errors
    /// [`RegistrationError::NoPendingRegistration`] without a marker,
    /// [`RegistrationError::RateLimited`] when the email is throttled.
    pub async fn resend_otp(
        &self,
        marker: Option<&PendingVerification>,
    ) -> Result<(), RegistrationError> {
        let marker = marker.ok_or(RegistrationError::NoPendingRegistration)?;
        let email = marker.email();

        if self.check_spam(email).await? == RateLimitDecision::Limited {
            info!(email = %email, "otp resend throttled");
            return Err(RegistrationError::RateLimited);
        }

        self.issue_otp(email, self.clock.now()).await?;
        info!(email = %email, "otp reissued");
        Ok(())
    }

    /// # Errors
    /// Returns an error if the send log cannot be read.
    pub async fn check_spam(&self, email: &str) -> anyhow::Result<RateLimitDecision> {
        self.throttle
            .check(self.store.as_ref(), email, self.clock.now())
            .await
    }

    /// # Errors
    /// Returns an error if the send log cannot be written.
    pub async fn log_sent(&self, email: &str) -> anyhow::Result<()> {
        self.store.log_sent(email, self.clock.now()).await
    }

    async fn issue_otp(&self, email: &str, now: DateTime<Utc>) -> anyhow::Result<()> {
        let code = generate_otp_code();
        self.store.save_otp(email, &code, now).await?;
        self.store.log_sent(email, now).await?;

        let ttl = std::time::Duration::from_secs(
            u64::try_from(self.config.otp_ttl_seconds()).unwrap_or_default(),
        );
        let message = otp_message(email, &code, ttl);
        if let Err(err) = self.mailer.send(&message).await {
            error!(email = %email, "failed to send otp email: {err:#}");
        }
        Ok(())
    }

    async fn hash_password(&self, password: String) -> anyhow::Result<String> {
        let hasher = Arc::clone(&self.hasher);
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .context("password hashing task failed")?
    }
}
