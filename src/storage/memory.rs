//! In-process store with the same semantics as the Postgres tables.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

use super::{
    AccountChanges, AccountStore, DEFAULT_SITE_CONTENT, InsertOutcome, NewAccount, OtpCode,
    OtpLedger, PendingRegistration, PendingStaging, PromoteOutcome, SendLog, SiteContentStore,
    UpdateOutcome,
};
use crate::accounts::{Account, ProfileFields, Role};

#[derive(Debug, Default)]
struct Tables {
    accounts: BTreeMap<i64, Account>,
    last_id: i64,
    otp_codes: HashMap<String, OtpCode>,
    pending: HashMap<String, PendingRegistration>,
    send_log: Vec<(String, DateTime<Utc>)>,
    site_content: BTreeMap<String, String>,
}

impl Tables {
    /// Mirrors the `users_username_key` / `users_email_key` constraints.
    fn violates_unique(&self, username: &str, email: &str, except: Option<i64>) -> bool {
        self.accounts.values().any(|account| {
            Some(account.id) != except && (account.username == username || account.email == email)
        })
    }

    fn insert(&mut self, account: NewAccount, now: DateTime<Utc>) -> Option<Account> {
        if self.violates_unique(&account.username, &account.email, None) {
            return None;
        }
        self.last_id += 1;
        let created = Account {
            id: self.last_id,
            username: account.username,
            password_hash: account.password_hash,
            email: account.email,
            profile: account.profile,
            role: account.role,
            is_active: account.is_active,
            created_at: now,
        };
        self.accounts.insert(created.id, created.clone());
        Some(created)
    }
}

/// Store backed by in-memory maps.
#[derive(Debug)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        let tables = Tables {
            site_content: DEFAULT_SITE_CONTENT
                .iter()
                .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
                .collect(),
            ..Tables::default()
        };
        Self {
            tables: Mutex::new(tables),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn find_account(&self, id: i64) -> Result<Option<Account>> {
        Ok(self.tables.lock().await.accounts.get(&id).cloned())
    }

    async fn find_account_by_username(&self, username: &str) -> Result<Option<Account>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .accounts
            .values()
            .find(|account| account.username == username)
            .cloned())
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .accounts
            .values()
            .find(|account| account.email == email)
            .cloned())
    }

    async fn find_first_admin(&self) -> Result<Option<Account>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .accounts
            .values()
            .find(|account| account.role == Role::Admin)
            .cloned())
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        let tables = self.tables.lock().await;
        Ok(tables.accounts.values().rev().cloned().collect())
    }

    async fn insert_account(
        &self,
        account: NewAccount,
        now: DateTime<Utc>,
    ) -> Result<InsertOutcome> {
        let mut tables = self.tables.lock().await;
        Ok(tables
            .insert(account, now)
            .map_or(InsertOutcome::Conflict, InsertOutcome::Created))
    }

    async fn update_profile(
        &self,
        id: i64,
        email: &str,
        profile: &ProfileFields,
    ) -> Result<UpdateOutcome> {
        let mut tables = self.tables.lock().await;
        let Some(username) = tables.accounts.get(&id).map(|a| a.username.clone()) else {
            return Ok(UpdateOutcome::NotFound);
        };
        if tables.violates_unique(&username, email, Some(id)) {
            return Ok(UpdateOutcome::Conflict);
        }
        if let Some(account) = tables.accounts.get_mut(&id) {
            account.email = email.to_string();
            account.profile = profile.clone();
        }
        Ok(UpdateOutcome::Updated)
    }

    async fn update_account(&self, id: i64, changes: &AccountChanges) -> Result<UpdateOutcome> {
        let mut tables = self.tables.lock().await;
        if !tables.accounts.contains_key(&id) {
            return Ok(UpdateOutcome::NotFound);
        }
        if tables.violates_unique(&changes.username, &changes.email, Some(id)) {
            return Ok(UpdateOutcome::Conflict);
        }
        if let Some(account) = tables.accounts.get_mut(&id) {
            account.username = changes.username.clone();
            account.email = changes.email.clone();
            account.profile = changes.profile.clone();
            account.role = changes.role;
        }
        Ok(UpdateOutcome::Updated)
    }

    async fn set_active(&self, id: i64, active: bool) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        Ok(tables
            .accounts
            .get_mut(&id)
            .map(|account| account.is_active = active)
            .is_some())
    }

    async fn delete_account(&self, id: i64) -> Result<bool> {
        Ok(self.tables.lock().await.accounts.remove(&id).is_some())
    }
}

#[async_trait]
impl OtpLedger for MemoryStore {
    async fn save_otp(&self, email: &str, code: &str, now: DateTime<Utc>) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.otp_codes.insert(
            email.to_string(),
            OtpCode {
                email: email.to_string(),
                code: code.to_string(),
                created_at: now,
            },
        );
        Ok(())
    }

    async fn verify_otp(
        &self,
        email: &str,
        code: &str,
        issued_after: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        let matches = tables
            .otp_codes
            .get(email)
            .is_some_and(|otp| otp.code == code && otp.created_at > issued_after);
        if matches {
            tables.otp_codes.remove(email);
        }
        Ok(matches)
    }

    async fn find_otp(&self, email: &str) -> Result<Option<OtpCode>> {
        Ok(self.tables.lock().await.otp_codes.get(email).cloned())
    }
}

#[async_trait]
impl SendLog for MemoryStore {
    async fn log_sent(&self, email: &str, sent_at: DateTime<Utc>) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.send_log.push((email.to_string(), sent_at));
        Ok(())
    }

    async fn count_sent_since(&self, email: &str, since: DateTime<Utc>) -> Result<i64> {
        let tables = self.tables.lock().await;
        let count = tables
            .send_log
            .iter()
            .filter(|(logged, sent_at)| logged == email && *sent_at > since)
            .count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }
}

#[async_trait]
impl PendingStaging for MemoryStore {
    async fn save_pending(&self, pending: &PendingRegistration) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.pending.insert(pending.email.clone(), pending.clone());
        Ok(())
    }

    async fn find_pending(&self, email: &str) -> Result<Option<PendingRegistration>> {
        Ok(self.tables.lock().await.pending.get(email).cloned())
    }

    async fn promote_pending(&self, email: &str, now: DateTime<Utc>) -> Result<PromoteOutcome> {
        let mut tables = self.tables.lock().await;
        let Some(pending) = tables.pending.get(email).cloned() else {
            return Ok(PromoteOutcome::Missing);
        };
        let account = NewAccount {
            username: pending.username,
            password_hash: pending.password_hash,
            email: pending.email,
            profile: pending.profile,
            role: Role::User,
            is_active: true,
        };
        let Some(created) = tables.insert(account, now) else {
            return Ok(PromoteOutcome::Conflict);
        };
        tables.pending.remove(email);
        tables.otp_codes.remove(email);
        Ok(PromoteOutcome::Promoted(created))
    }
}

#[async_trait]
impl SiteContentStore for MemoryStore {
    async fn load_site_content(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.tables.lock().await.site_content.clone())
    }

    async fn upsert_site_content(&self, key: &str, value: &str) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables
            .site_content
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
