//! Persistence for accounts and registration state.
//!
//! Each component owns one trait so callers can see which tables an
//! operation touches: [`AccountStore`] (credential store), [`OtpLedger`],
//! [`SendLog`], [`PendingStaging`], and [`SiteContentStore`]. [`Store`] bundles
//! them for the services, which hold an `Arc<dyn Store>`.
//!
//! Time is always passed in by the caller. Stores never read the wall clock,
//! so expiry and rate-limit windows behave the same on every backend.
//!
//! Single-row-per-email tables (`otp_codes`, `pending_registrations`) are
//! written with upserts keyed on email; there is never a window where two
//! rows exist for one address.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{PgStore, apply_schema};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::accounts::{Account, ProfileFields, Role};

/// Values for a new `users` row.
#[derive(Clone, Debug)]
pub struct NewAccount {
    pub username: String,
    pub password_hash: String,
    pub email: String,
    pub profile: ProfileFields,
    pub role: Role,
    pub is_active: bool,
}

/// Fields an admin may change on an existing account.
#[derive(Clone, Debug)]
pub struct AccountChanges {
    pub username: String,
    pub email: String,
    pub profile: ProfileFields,
    pub role: Role,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingRegistration {
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub profile: ProfileFields,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OtpCode {
    pub email: String,
    pub code: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum InsertOutcome {
    Created(Account),
    Conflict,
}

#[derive(Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    NotFound,
    Conflict,
}

#[derive(Debug)]
pub enum PromoteOutcome {
    Promoted(Account),
    Missing,
    Conflict,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_account(&self, id: i64) -> Result<Option<Account>>;
    async fn find_account_by_username(&self, username: &str) -> Result<Option<Account>>;
    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>>;
    /// First admin by id; the homepage shows it as the site owner.
    async fn find_first_admin(&self) -> Result<Option<Account>>;
    /// Newest accounts first.
    async fn list_accounts(&self) -> Result<Vec<Account>>;
    /// Uniqueness of username and email is enforced here, not by callers.
    async fn insert_account(&self, account: NewAccount, now: DateTime<Utc>)
    -> Result<InsertOutcome>;
    async fn update_profile(
        &self,
        id: i64,
        email: &str,
        profile: &ProfileFields,
    ) -> Result<UpdateOutcome>;
    async fn update_account(&self, id: i64, changes: &AccountChanges) -> Result<UpdateOutcome>;
    /// Returns false when the account does not exist.
    async fn set_active(&self, id: i64, active: bool) -> Result<bool>;
    /// Returns false when the account does not exist.
    async fn delete_account(&self, id: i64) -> Result<bool>;
}

#[async_trait]
pub trait OtpLedger: Send + Sync {
    /// Replace any code for the email with `code`, issued at `now`.
    async fn save_otp(&self, email: &str, code: &str, now: DateTime<Utc>) -> Result<()>;
    /// Consume the email's code if it equals `code` and was issued after
    /// `issued_after`. Returns false, without touching anything, otherwise.
    async fn verify_otp(
        &self,
        email: &str,
        code: &str,
        issued_after: DateTime<Utc>,
    ) -> Result<bool>;
    async fn find_otp(&self, email: &str) -> Result<Option<OtpCode>>;
}

#[async_trait]
pub trait SendLog: Send + Sync {
    async fn log_sent(&self, email: &str, sent_at: DateTime<Utc>) -> Result<()>;
    async fn count_sent_since(&self, email: &str, since: DateTime<Utc>) -> Result<i64>;
}

#[async_trait]
pub trait PendingStaging: Send + Sync {
    /// Replace any pending submission for the same email.
    async fn save_pending(&self, pending: &PendingRegistration) -> Result<()>;
    async fn find_pending(&self, email: &str) -> Result<Option<PendingRegistration>>;
    /// Move the pending submission into `users` (role user, active) and drop
    /// the email's pending row and OTP in one step.
    async fn promote_pending(&self, email: &str, now: DateTime<Utc>) -> Result<PromoteOutcome>;
}

#[async_trait]
pub trait SiteContentStore: Send + Sync {
    async fn load_site_content(&self) -> Result<BTreeMap<String, String>>;
    async fn upsert_site_content(&self, key: &str, value: &str) -> Result<()>;
}

pub trait Store: AccountStore + OtpLedger + SendLog + PendingStaging + SiteContentStore {}

impl<T> Store for T where T: AccountStore + OtpLedger + SendLog + PendingStaging + SiteContentStore
{}

/// Default homepage content seeded into a fresh store.
pub const DEFAULT_SITE_CONTENT: [(&str, &str); 5] = [
    ("site_title", "Welcome to my website!"),
    ("tagline", "None"),
    ("about_me", "None"),
    ("dream_job_title", "None"),
    ("dream_job_text", "None"),
];
