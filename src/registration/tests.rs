//! Registration workflow tests.

use super::{
    PendingVerification, RateLimitDecision, RegistrationConfig, RegistrationError,
    RegistrationForm, RegistrationWorkflow,
};
use crate::accounts::Role;
use crate::clock::{Clock, ManualClock};
use crate::email::{EmailMessage, EmailSender};
use crate::password::{Argon2Hasher, PasswordHasher};
use crate::storage::{AccountStore, MemoryStore, OtpLedger, PendingStaging, SendLog, Store};
use crate::validation::Violation;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<EmailMessage>>,
}

impl RecordingSender {
    fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl EmailSender for RecordingSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        self.sent
            .lock()
            .map_err(|_| anyhow!("recording sender poisoned"))?
            .push(message.clone());
        Ok(())
    }
}

struct FailingSender;

#[async_trait]
impl EmailSender for FailingSender {
    async fn send(&self, _message: &EmailMessage) -> Result<()> {
        Err(anyhow!("smtp unavailable"))
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    mailer: Arc<RecordingSender>,
    clock: Arc<ManualClock>,
    workflow: RegistrationWorkflow,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(RegistrationConfig::new())
    }

    fn with_config(config: RegistrationConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let mailer = Arc::new(RecordingSender::default());
        let start = Utc
            .with_ymd_and_hms(2024, 3, 1, 9, 0, 0)
            .single()
            .unwrap_or_default();
        let clock = Arc::new(ManualClock::new(start));
        let workflow = RegistrationWorkflow::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::clone(&mailer) as Arc<dyn EmailSender>,
            Arc::new(Argon2Hasher::new()),
            Arc::clone(&clock) as Arc<dyn Clock>,
            config,
        );
        Self {
            store,
            mailer,
            clock,
            workflow,
        }
    }

    async fn current_code(&self, email: &str) -> Result<String> {
        self.store
            .find_otp(email)
            .await?
            .map(|otp| otp.code)
            .context("no otp stored")
    }

    async fn account_count(&self) -> Result<usize> {
        Ok(self.store.list_accounts().await?.len())
    }
}

fn alice() -> RegistrationForm {
    RegistrationForm {
        username: "alice".to_string(),
        password: "secret1".to_string(),
        confirm_password: "secret1".to_string(),
        email: "a@x.com".to_string(),
        firstname: "Alice".to_string(),
        middlename: String::new(),
        lastname: "Liddell".to_string(),
        birthday: "2000-01-31".to_string(),
        contact: "555-0100".to_string(),
    }
}

fn wrong_code(code: &str) -> String {
    if code == "100000" {
        "100001".to_string()
    } else {
        "100000".to_string()
    }
}

#[tokio::test]
async fn submit_stages_registration_and_mails_code() -> Result<()> {
    let harness = Harness::new();
    let marker = harness.workflow.submit_registration(&alice()).await?;
    assert_eq!(marker.email(), "a@x.com");

    let pending = harness
        .store
        .find_pending("a@x.com")
        .await?
        .context("pending registration missing")?;
    assert_eq!(pending.username, "alice");
    assert_ne!(pending.password_hash, "secret1");
    assert!(Argon2Hasher::new().verify("secret1", &pending.password_hash));

    let code = harness.current_code("a@x.com").await?;
    let sent = harness.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to_email, "a@x.com");
    assert!(sent[0].body.contains(&code));

    let since = harness.clock.now() - Duration::hours(1);
    assert_eq!(harness.store.count_sent_since("a@x.com", since).await?, 1);
    assert_eq!(harness.account_count().await?, 0);
    Ok(())
}

#[tokio::test]
async fn rejected_submit_reports_all_violations_and_writes_nothing() -> Result<()> {
    let harness = Harness::new();
    harness.workflow.submit_registration(&alice()).await?;
    let code = harness.current_code("a@x.com").await?;
    harness
        .workflow
        .verify_otp(Some(&PendingVerification::new("a@x.com".to_string())), &code)
        .await?;

    let form = RegistrationForm {
        password: "abc".to_string(),
        confirm_password: "abd".to_string(),
        ..alice()
    };
    let err = harness
        .workflow
        .submit_registration(&form)
        .await
        .err()
        .context("expected rejection")?;
    let violations = match err {
        RegistrationError::Rejected(violations) => violations,
        other => return Err(anyhow!("unexpected error: {other:?}")),
    };
    assert_eq!(
        violations,
        vec![
            Violation::PasswordMismatch,
            Violation::PasswordTooShort { min: 6 },
            Violation::UsernameTaken,
            Violation::EmailTaken,
        ]
    );

    assert!(harness.store.find_pending("a@x.com").await?.is_none());
    assert!(harness.store.find_otp("a@x.com").await?.is_none());
    assert_eq!(harness.mailer.sent().len(), 1);
    Ok(())
}

#[tokio::test]
async fn second_submit_supersedes_the_first() -> Result<()> {
    let harness = Harness::new();
    let first = harness.workflow.submit_registration(&alice()).await?;
    let first_code = harness.current_code("a@x.com").await?;

    let resubmitted = RegistrationForm {
        username: "alice2".to_string(),
        ..alice()
    };
    harness.clock.advance(Duration::seconds(10));
    let second = harness.workflow.submit_registration(&resubmitted).await?;
    assert_eq!(first, second);

    let pending = harness
        .store
        .find_pending("a@x.com")
        .await?
        .context("pending registration missing")?;
    assert_eq!(pending.username, "alice2");

    let otp = harness
        .store
        .find_otp("a@x.com")
        .await?
        .context("otp missing")?;
    assert_eq!(otp.created_at, harness.clock.now());

    if otp.code != first_code {
        let err = harness
            .workflow
            .verify_otp(Some(&second), &first_code)
            .await
            .err();
        assert!(matches!(err, Some(RegistrationError::InvalidOtp)));
    }

    let account = harness.workflow.verify_otp(Some(&second), &otp.code).await?;
    assert_eq!(account.username, "alice2");
    Ok(())
}

#[tokio::test]
async fn wrong_code_fails_then_real_code_creates_account() -> Result<()> {
    let harness = Harness::new();
    let marker = harness.workflow.submit_registration(&alice()).await?;
    let code = harness.current_code("a@x.com").await?;

    let err = harness
        .workflow
        .verify_otp(Some(&marker), &wrong_code(&code))
        .await
        .err();
    assert!(matches!(err, Some(RegistrationError::InvalidOtp)));
    assert_eq!(harness.account_count().await?, 0);
    assert!(harness.store.find_pending("a@x.com").await?.is_some());
    assert!(harness.store.find_otp("a@x.com").await?.is_some());

    harness.clock.advance(Duration::minutes(4));
    let account = harness.workflow.verify_otp(Some(&marker), &code).await?;
    assert_eq!(account.email, "a@x.com");
    assert_eq!(account.username, "alice");
    assert_eq!(account.role, Role::User);
    assert!(account.is_active);

    assert_eq!(harness.account_count().await?, 1);
    assert!(harness.store.find_pending("a@x.com").await?.is_none());
    assert!(harness.store.find_otp("a@x.com").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn consumed_code_fails_the_second_time() -> Result<()> {
    let harness = Harness::new();
    let marker = harness.workflow.submit_registration(&alice()).await?;
    let code = harness.current_code("a@x.com").await?;

    harness.workflow.verify_otp(Some(&marker), &code).await?;
    let err = harness.workflow.verify_otp(Some(&marker), &code).await.err();
    assert!(matches!(
        err,
        Some(RegistrationError::NoPendingRegistration)
    ));
    assert_eq!(harness.account_count().await?, 1);
    Ok(())
}

#[tokio::test]
async fn expired_code_is_rejected_and_left_in_place() -> Result<()> {
    let harness = Harness::new();
    let marker = harness.workflow.submit_registration(&alice()).await?;
    let code = harness.current_code("a@x.com").await?;

    harness.clock.advance(Duration::minutes(5));
    let err = harness.workflow.verify_otp(Some(&marker), &code).await.err();
    assert!(matches!(err, Some(RegistrationError::InvalidOtp)));
    assert_eq!(harness.account_count().await?, 0);
    assert!(harness.store.find_otp("a@x.com").await?.is_some());
    assert!(harness.store.find_pending("a@x.com").await?.is_some());
    Ok(())
}

#[tokio::test]
async fn verify_and_resend_require_a_marker() -> Result<()> {
    let harness = Harness::new();
    let err = harness.workflow.verify_otp(None, "123456").await.err();
    assert!(matches!(
        err,
        Some(RegistrationError::NoPendingRegistration)
    ));

    let err = harness.workflow.resend_otp(None).await.err();
    assert!(matches!(
        err,
        Some(RegistrationError::NoPendingRegistration)
    ));
    assert!(harness.mailer.sent().is_empty());
    Ok(())
}

#[tokio::test]
async fn resend_replaces_the_code() -> Result<()> {
    let harness = Harness::new();
    let marker = harness.workflow.submit_registration(&alice()).await?;
    harness.clock.advance(Duration::minutes(4));
    harness.workflow.resend_otp(Some(&marker)).await?;

    let otp = harness
        .store
        .find_otp("a@x.com")
        .await?
        .context("otp missing")?;
    assert_eq!(otp.created_at, harness.clock.now());
    assert_eq!(harness.mailer.sent().len(), 2);

    // Still valid four minutes after the resend, eight after the submit.
    harness.clock.advance(Duration::minutes(4));
    harness.workflow.verify_otp(Some(&marker), &otp.code).await?;
    Ok(())
}

#[tokio::test]
async fn fourth_send_within_the_hour_is_rate_limited() -> Result<()> {
    let harness = Harness::new();
    let marker = harness.workflow.submit_registration(&alice()).await?;
    harness.clock.advance(Duration::minutes(1));
    harness.workflow.resend_otp(Some(&marker)).await?;
    harness.clock.advance(Duration::minutes(1));
    harness.workflow.resend_otp(Some(&marker)).await?;
    let code_before = harness.current_code("a@x.com").await?;

    harness.clock.advance(Duration::minutes(1));
    let err = harness.workflow.resend_otp(Some(&marker)).await.err();
    assert!(matches!(err, Some(RegistrationError::RateLimited)));

    assert_eq!(harness.current_code("a@x.com").await?, code_before);
    let since = harness.clock.now() - Duration::hours(1);
    assert_eq!(harness.store.count_sent_since("a@x.com", since).await?, 3);
    assert_eq!(harness.mailer.sent().len(), 3);
    assert!(harness.store.find_pending("a@x.com").await?.is_some());

    // Once the first send ages out a new code can be issued again.
    harness.clock.advance(Duration::minutes(58));
    harness.workflow.resend_otp(Some(&marker)).await?;
    Ok(())
}

#[tokio::test]
async fn throttled_email_cannot_resubmit() -> Result<()> {
    let harness = Harness::new();
    for _ in 0..3 {
        harness.workflow.log_sent("a@x.com").await?;
    }
    assert_eq!(
        harness.workflow.check_spam("a@x.com").await?,
        RateLimitDecision::Limited
    );

    let err = harness.workflow.submit_registration(&alice()).await.err();
    let violations = match err {
        Some(RegistrationError::Rejected(violations)) => violations,
        other => return Err(anyhow!("expected rejection, got {other:?}")),
    };
    assert_eq!(violations, vec![Violation::RateLimited]);
    assert!(harness.store.find_pending("a@x.com").await?.is_none());
    assert!(harness.store.find_otp("a@x.com").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn check_spam_never_appends() -> Result<()> {
    let harness = Harness::new();
    for _ in 0..5 {
        assert_eq!(
            harness.workflow.check_spam("a@x.com").await?,
            RateLimitDecision::Allowed
        );
    }
    let since = harness.clock.now() - Duration::hours(1);
    assert_eq!(harness.store.count_sent_since("a@x.com", since).await?, 0);
    Ok(())
}

#[tokio::test]
async fn dispatch_failure_is_swallowed() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let workflow = RegistrationWorkflow::new(
        Arc::clone(&store) as Arc<dyn Store>,
        Arc::new(FailingSender),
        Arc::new(Argon2Hasher::new()),
        Arc::new(crate::clock::SystemClock),
        RegistrationConfig::new(),
    );

    let marker = workflow.submit_registration(&alice()).await?;
    assert_eq!(marker.email(), "a@x.com");
    assert!(store.find_otp("a@x.com").await?.is_some());
    Ok(())
}

#[tokio::test]
async fn promotion_conflict_is_reported() -> Result<()> {
    let harness = Harness::new();
    let marker = harness.workflow.submit_registration(&alice()).await?;
    let code = harness.current_code("a@x.com").await?;

    // Someone else claims the username between submit and verify.
    let other = RegistrationForm {
        email: "b@x.com".to_string(),
        ..alice()
    };
    let other_marker = harness.workflow.submit_registration(&other).await?;
    let other_code = harness.current_code("b@x.com").await?;
    harness
        .workflow
        .verify_otp(Some(&other_marker), &other_code)
        .await?;

    let err = harness.workflow.verify_otp(Some(&marker), &code).await.err();
    let violations = match err {
        Some(RegistrationError::Rejected(violations)) => violations,
        other => return Err(anyhow!("expected conflict, got {other:?}")),
    };
    assert_eq!(violations, vec![Violation::AccountExists]);
    assert_eq!(harness.account_count().await?, 1);
    Ok(())
}

#[tokio::test]
async fn email_is_normalized_before_staging() -> Result<()> {
    let harness = Harness::new();
    let form = RegistrationForm {
        email: " A@X.COM ".to_string(),
        ..alice()
    };
    let marker = harness.workflow.submit_registration(&form).await?;
    assert_eq!(marker.email(), "a@x.com");
    assert!(harness.store.find_pending("a@x.com").await?.is_some());
    Ok(())
}

#[test]
fn error_messages_match_the_site() {
    assert_eq!(
        RegistrationError::InvalidOtp.messages(),
        vec!["Invalid or expired OTP!".to_string()]
    );
    assert_eq!(
        RegistrationError::NoPendingRegistration.to_string(),
        "Please register first!"
    );
    assert_eq!(
        RegistrationError::RateLimited.to_string(),
        Violation::RateLimited.to_string()
    );
}

#[test]
fn config_defaults_and_overrides() {
    let config = RegistrationConfig::new();
    assert_eq!(config.otp_ttl_seconds(), 300);
    assert_eq!(config.otp_send_limit(), 3);
    assert_eq!(config.otp_send_window_seconds(), 3600);
    assert_eq!(config.password_min_length(), 6);

    let config = config
        .with_otp_ttl_seconds(60)
        .with_otp_send_limit(5)
        .with_otp_send_window_seconds(120)
        .with_password_min_length(10);
    assert_eq!(config.otp_ttl_seconds(), 60);
    assert_eq!(config.otp_send_limit(), 5);
    assert_eq!(config.otp_send_window_seconds(), 120);
    assert_eq!(config.password_min_length(), 10);
}
