//! Postgres-backed store.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use std::collections::BTreeMap;
use tracing::{Instrument, Span};

use super::{
    AccountChanges, AccountStore, InsertOutcome, NewAccount, OtpCode, OtpLedger,
    PendingRegistration, PendingStaging, PromoteOutcome, SendLog, SiteContentStore, UpdateOutcome,
};
use crate::accounts::{Account, ProfileFields, Role};

const SCHEMA: &str = include_str!("../../sql/schema.sql");

const ACCOUNT_COLUMNS: &str = "id, username, password_hash, email, firstname, middlename, \
     lastname, birthday, contact, role, is_active, created_at";

/// Create tables and seed default site content. Safe to run on every start.
///
/// # Errors
/// Returns an error if any schema statement fails.
pub async fn apply_schema(pool: &PgPool) -> Result<()> {
    let span = db_span("CREATE", "schema.sql");
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to apply schema")?;
    Ok(())
}

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_account(&self, query: &str, bind: AccountKey<'_>) -> Result<Option<Account>> {
        let span = db_span("SELECT", query);
        let statement = sqlx::query(query);
        let statement = match bind {
            AccountKey::Id(id) => statement.bind(id),
            AccountKey::Text(value) => statement.bind(value),
            AccountKey::None => statement,
        };
        let row = statement
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup account")?;
        row.as_ref().map(account_from_row).transpose()
    }
}

enum AccountKey<'a> {
    Id(i64),
    Text(&'a str),
    None,
}

fn db_span(operation: &'static str, statement: &str) -> Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn profile_from_row(row: &PgRow) -> Result<ProfileFields> {
    Ok(ProfileFields {
        firstname: row.try_get("firstname")?,
        middlename: row.try_get("middlename")?,
        lastname: row.try_get("lastname")?,
        birthday: row.try_get::<NaiveDate, _>("birthday")?,
        contact: row.try_get("contact")?,
    })
}

fn account_from_row(row: &PgRow) -> Result<Account> {
    let role: String = row.try_get("role")?;
    Ok(Account {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        password_hash: row.try_get("password_hash")?,
        email: row.try_get("email")?,
        profile: profile_from_row(row)?,
        role: Role::parse(&role).ok_or_else(|| anyhow!("unknown role in users table: {role}"))?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

fn pending_from_row(row: &PgRow) -> Result<PendingRegistration> {
    Ok(PendingRegistration {
        email: row.try_get("email")?,
        username: row.try_get("username")?,
        password_hash: row.try_get("password_hash")?,
        profile: profile_from_row(row)?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl AccountStore for PgStore {
    async fn find_account(&self, id: i64) -> Result<Option<Account>> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM users WHERE id = $1");
        self.fetch_account(&query, AccountKey::Id(id)).await
    }

    async fn find_account_by_username(&self, username: &str) -> Result<Option<Account>> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM users WHERE username = $1");
        self.fetch_account(&query, AccountKey::Text(username)).await
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM users WHERE email = $1");
        self.fetch_account(&query, AccountKey::Text(email)).await
    }

    async fn find_first_admin(&self) -> Result<Option<Account>> {
        let query =
            format!("SELECT {ACCOUNT_COLUMNS} FROM users WHERE role = 'admin' ORDER BY id LIMIT 1");
        self.fetch_account(&query, AccountKey::None).await
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM users ORDER BY created_at DESC, id DESC");
        let span = db_span("SELECT", &query);
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to list accounts")?;
        rows.iter().map(account_from_row).collect()
    }

    async fn insert_account(
        &self,
        account: NewAccount,
        now: DateTime<Utc>,
    ) -> Result<InsertOutcome> {
        let query = format!(
            "INSERT INTO users \
                (username, password_hash, email, firstname, middlename, lastname, birthday, \
                 contact, role, is_active, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             RETURNING {ACCOUNT_COLUMNS}"
        );
        let span = db_span("INSERT", &query);
        let row = sqlx::query(&query)
            .bind(&account.username)
            .bind(&account.password_hash)
            .bind(&account.email)
            .bind(&account.profile.firstname)
            .bind(&account.profile.middlename)
            .bind(&account.profile.lastname)
            .bind(account.profile.birthday)
            .bind(&account.profile.contact)
            .bind(account.role.as_str())
            .bind(account.is_active)
            .bind(now)
            .fetch_one(&self.pool)
            .instrument(span)
            .await;

        match row {
            Ok(row) => Ok(InsertOutcome::Created(account_from_row(&row)?)),
            Err(err) if is_unique_violation(&err) => Ok(InsertOutcome::Conflict),
            Err(err) => Err(err).context("failed to insert account"),
        }
    }

    async fn update_profile(
        &self,
        id: i64,
        email: &str,
        profile: &ProfileFields,
    ) -> Result<UpdateOutcome> {
        let query = r"
            UPDATE users
            SET email = $2, firstname = $3, middlename = $4, lastname = $5,
                birthday = $6, contact = $7
            WHERE id = $1
        ";
        let span = db_span("UPDATE", query);
        let result = sqlx::query(query)
            .bind(id)
            .bind(email)
            .bind(&profile.firstname)
            .bind(&profile.middlename)
            .bind(&profile.lastname)
            .bind(profile.birthday)
            .bind(&profile.contact)
            .execute(&self.pool)
            .instrument(span)
            .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => Ok(UpdateOutcome::NotFound),
            Ok(_) => Ok(UpdateOutcome::Updated),
            Err(err) if is_unique_violation(&err) => Ok(UpdateOutcome::Conflict),
            Err(err) => Err(err).context("failed to update profile"),
        }
    }

    async fn update_account(&self, id: i64, changes: &AccountChanges) -> Result<UpdateOutcome> {
        let query = r"
            UPDATE users
            SET username = $2, email = $3, firstname = $4, middlename = $5, lastname = $6,
                birthday = $7, contact = $8, role = $9
            WHERE id = $1
        ";
        let span = db_span("UPDATE", query);
        let result = sqlx::query(query)
            .bind(id)
            .bind(&changes.username)
            .bind(&changes.email)
            .bind(&changes.profile.firstname)
            .bind(&changes.profile.middlename)
            .bind(&changes.profile.lastname)
            .bind(changes.profile.birthday)
            .bind(&changes.profile.contact)
            .bind(changes.role.as_str())
            .execute(&self.pool)
            .instrument(span)
            .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => Ok(UpdateOutcome::NotFound),
            Ok(_) => Ok(UpdateOutcome::Updated),
            Err(err) if is_unique_violation(&err) => Ok(UpdateOutcome::Conflict),
            Err(err) => Err(err).context("failed to update account"),
        }
    }

    async fn set_active(&self, id: i64, active: bool) -> Result<bool> {
        let query = "UPDATE users SET is_active = $2 WHERE id = $1";
        let span = db_span("UPDATE", query);
        let done = sqlx::query(query)
            .bind(id)
            .bind(active)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to update account status")?;
        Ok(done.rows_affected() > 0)
    }

    async fn delete_account(&self, id: i64) -> Result<bool> {
        let query = "DELETE FROM users WHERE id = $1";
        let span = db_span("DELETE", query);
        let done = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete account")?;
        Ok(done.rows_affected() > 0)
    }
}

#[async_trait]
impl OtpLedger for PgStore {
    async fn save_otp(&self, email: &str, code: &str, now: DateTime<Utc>) -> Result<()> {
        let query = r"
            INSERT INTO otp_codes (email, code, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (email) DO UPDATE
            SET code = EXCLUDED.code, created_at = EXCLUDED.created_at
        ";
        let span = db_span("INSERT", query);
        sqlx::query(query)
            .bind(email)
            .bind(code)
            .bind(now)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to save otp")?;
        Ok(())
    }

    async fn verify_otp(
        &self,
        email: &str,
        code: &str,
        issued_after: DateTime<Utc>,
    ) -> Result<bool> {
        // Match and consume in one statement so a code can only be used once.
        let query = r"
            DELETE FROM otp_codes
            WHERE email = $1 AND code = $2 AND created_at > $3
            RETURNING email
        ";
        let span = db_span("DELETE", query);
        let row = sqlx::query(query)
            .bind(email)
            .bind(code)
            .bind(issued_after)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to verify otp")?;
        Ok(row.is_some())
    }

    async fn find_otp(&self, email: &str) -> Result<Option<OtpCode>> {
        let query = "SELECT email, code, created_at FROM otp_codes WHERE email = $1";
        let span = db_span("SELECT", query);
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup otp")?;
        row.map(|row| -> Result<OtpCode> {
            Ok(OtpCode {
                email: row.try_get("email")?,
                code: row.try_get("code")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl SendLog for PgStore {
    async fn log_sent(&self, email: &str, sent_at: DateTime<Utc>) -> Result<()> {
        let query = "INSERT INTO email_send_log (email, sent_at) VALUES ($1, $2)";
        let span = db_span("INSERT", query);
        sqlx::query(query)
            .bind(email)
            .bind(sent_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to log sent email")?;
        Ok(())
    }

    async fn count_sent_since(&self, email: &str, since: DateTime<Utc>) -> Result<i64> {
        let query = "SELECT COUNT(*) AS sent FROM email_send_log WHERE email = $1 AND sent_at > $2";
        let span = db_span("SELECT", query);
        let row = sqlx::query(query)
            .bind(email)
            .bind(since)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to count sent emails")?;
        Ok(row.try_get("sent")?)
    }
}

#[async_trait]
impl PendingStaging for PgStore {
    async fn save_pending(&self, pending: &PendingRegistration) -> Result<()> {
        let query = r"
            INSERT INTO pending_registrations
                (email, username, password_hash, firstname, middlename, lastname, birthday,
                 contact, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (email) DO UPDATE
            SET username = EXCLUDED.username,
                password_hash = EXCLUDED.password_hash,
                firstname = EXCLUDED.firstname,
                middlename = EXCLUDED.middlename,
                lastname = EXCLUDED.lastname,
                birthday = EXCLUDED.birthday,
                contact = EXCLUDED.contact,
                created_at = EXCLUDED.created_at
        ";
        let span = db_span("INSERT", query);
        sqlx::query(query)
            .bind(&pending.email)
            .bind(&pending.username)
            .bind(&pending.password_hash)
            .bind(&pending.profile.firstname)
            .bind(&pending.profile.middlename)
            .bind(&pending.profile.lastname)
            .bind(pending.profile.birthday)
            .bind(&pending.profile.contact)
            .bind(pending.created_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to save pending registration")?;
        Ok(())
    }

    async fn find_pending(&self, email: &str) -> Result<Option<PendingRegistration>> {
        let query = r"
            SELECT email, username, password_hash, firstname, middlename, lastname, birthday,
                   contact, created_at
            FROM pending_registrations
            WHERE email = $1
        ";
        let span = db_span("SELECT", query);
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup pending registration")?;
        row.as_ref().map(pending_from_row).transpose()
    }

    async fn promote_pending(&self, email: &str, now: DateTime<Utc>) -> Result<PromoteOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin promote transaction")?;

        let query = r"
            SELECT email, username, password_hash, firstname, middlename, lastname, birthday,
                   contact, created_at
            FROM pending_registrations
            WHERE email = $1
            FOR UPDATE
        ";
        let span = db_span("SELECT", query);
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&mut *tx)
            .instrument(span)
            .await
            .context("failed to lock pending registration")?;
        let Some(row) = row else {
            let _ = tx.rollback().await;
            return Ok(PromoteOutcome::Missing);
        };
        let pending = pending_from_row(&row)?;

        let query = format!(
            "INSERT INTO users \
                (username, password_hash, email, firstname, middlename, lastname, birthday, \
                 contact, role, is_active, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'user', TRUE, $9) \
             RETURNING {ACCOUNT_COLUMNS}"
        );
        let span = db_span("INSERT", &query);
        let inserted = sqlx::query(&query)
            .bind(&pending.username)
            .bind(&pending.password_hash)
            .bind(&pending.email)
            .bind(&pending.profile.firstname)
            .bind(&pending.profile.middlename)
            .bind(&pending.profile.lastname)
            .bind(pending.profile.birthday)
            .bind(&pending.profile.contact)
            .bind(now)
            .fetch_one(&mut *tx)
            .instrument(span)
            .await;
        let account = match inserted {
            Ok(row) => account_from_row(&row)?,
            Err(err) if is_unique_violation(&err) => {
                let _ = tx.rollback().await;
                return Ok(PromoteOutcome::Conflict);
            }
            Err(err) => return Err(err).context("failed to promote pending registration"),
        };

        for query in [
            "DELETE FROM pending_registrations WHERE email = $1",
            "DELETE FROM otp_codes WHERE email = $1",
        ] {
            let span = db_span("DELETE", query);
            sqlx::query(query)
                .bind(email)
                .execute(&mut *tx)
                .instrument(span)
                .await
                .context("failed to clear registration state")?;
        }

        tx.commit().await.context("commit promote transaction")?;

        Ok(PromoteOutcome::Promoted(account))
    }
}

#[async_trait]
impl SiteContentStore for PgStore {
    async fn load_site_content(&self) -> Result<BTreeMap<String, String>> {
        let query = "SELECT content_key, content_value FROM site_content";
        let span = db_span("SELECT", query);
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to load site content")?;
        rows.iter()
            .map(|row| -> Result<(String, String)> {
                Ok((row.try_get("content_key")?, row.try_get("content_value")?))
            })
            .collect()
    }

    async fn upsert_site_content(&self, key: &str, value: &str) -> Result<()> {
        let query = r"
            INSERT INTO site_content (content_key, content_value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (content_key) DO UPDATE
            SET content_value = EXCLUDED.content_value, updated_at = NOW()
        ";
        let span = db_span("INSERT", query);
        sqlx::query(query)
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to save site content")?;
        Ok(())
    }
}
