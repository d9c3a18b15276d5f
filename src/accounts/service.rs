use anyhow::Context;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use super::{Account, AccountError, Principal, ProfileFields, Role};
use crate::clock::Clock;
use crate::password::PasswordHasher;
use crate::storage::{AccountChanges, InsertOutcome, NewAccount, Store, UpdateOutcome};
use crate::validation::{Violation, all_present, normalize_email, parse_birthday, valid_email};

/// Self-service profile edit.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ProfileForm {
    pub email: String,
    pub firstname: String,
    pub middlename: String,
    pub lastname: String,
    pub birthday: String,
    pub contact: String,
}

/// Admin-created account. A blank or unknown role creates a regular user.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct NewAccountForm {
    pub username: String,
    pub password: String,
    pub email: String,
    pub firstname: String,
    pub middlename: String,
    pub lastname: String,
    pub birthday: String,
    pub contact: String,
    pub role: String,
}

/// Admin edit of an existing account. The password is not editable here.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct AccountEditForm {
    pub username: String,
    pub email: String,
    pub firstname: String,
    pub middlename: String,
    pub lastname: String,
    pub birthday: String,
    pub contact: String,
    pub role: String,
}

struct ProfileInput<'a> {
    email: &'a str,
    firstname: &'a str,
    middlename: &'a str,
    lastname: &'a str,
    birthday: &'a str,
    contact: &'a str,
}

impl ProfileInput<'_> {
    /// Normalized email and profile, or the format violations found.
    fn check(&self, extra_required: &[&str]) -> Result<(String, ProfileFields), Vec<Violation>> {
        let mut violations = Vec::new();
        let mut required = vec![
            self.email,
            self.firstname,
            self.lastname,
            self.birthday,
            self.contact,
        ];
        required.extend_from_slice(extra_required);
        if !all_present(&required) {
            violations.push(Violation::MissingFields);
        }

        let email = normalize_email(self.email);
        if !email.is_empty() && !valid_email(&email) {
            violations.push(Violation::InvalidEmail);
        }
        let birthday = parse_birthday(self.birthday);
        if !self.birthday.trim().is_empty() && birthday.is_none() {
            violations.push(Violation::InvalidBirthday);
        }

        match birthday {
            Some(birthday) if violations.is_empty() => Ok((
                email,
                ProfileFields {
                    firstname: self.firstname.trim().to_string(),
                    middlename: self.middlename.trim().to_string(),
                    lastname: self.lastname.trim().to_string(),
                    birthday,
                    contact: self.contact.trim().to_string(),
                },
            )),
            _ => Err(violations),
        }
    }
}

/// Login, profile, and admin user management over the credential store.
pub struct AccountService {
    store: Arc<dyn Store>,
    hasher: Arc<dyn PasswordHasher>,
    clock: Arc<dyn Clock>,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn Store>,
        hasher: Arc<dyn PasswordHasher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            hasher,
            clock,
        }
    }

    /// # Errors
    /// [`AccountError::InvalidCredentials`] for an unknown user, a wrong
    /// password, or a deactivated account; these are not distinguished.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Principal, AccountError> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(AccountError::MissingCredentials);
        }

        let Some(account) = self.store.find_account_by_username(username).await? else {
            return Err(AccountError::InvalidCredentials);
        };

        let hasher = Arc::clone(&self.hasher);
        let password = password.to_string();
        let stored_hash = account.password_hash.clone();
        let matches =
            tokio::task::spawn_blocking(move || hasher.verify(&password, &stored_hash))
                .await
                .context("password verification task failed")?;

        if matches && account.is_active {
            info!(user_id = account.id, "login succeeded");
            Ok(Principal::from_account(&account))
        } else {
            info!(username = %username, "login rejected");
            Err(AccountError::InvalidCredentials)
        }
    }

    /// # Errors
    /// [`AccountError::LoginRequired`] or [`AccountError::NotFound`].
    pub async fn profile(&self, principal: Option<&Principal>) -> Result<Account, AccountError> {
        let principal = Principal::require_login(principal)?;
        self.store
            .find_account(principal.user_id)
            .await?
            .ok_or(AccountError::NotFound)
    }

    /// # Errors
    /// [`AccountError::Rejected`] for missing/malformed fields or an email used
    /// by a different account.
    pub async fn update_profile(
        &self,
        principal: Option<&Principal>,
        form: &ProfileForm,
    ) -> Result<Account, AccountError> {
        let principal = Principal::require_login(principal)?;
        let (email, profile) = ProfileInput {
            email: &form.email,
            firstname: &form.firstname,
            middlename: &form.middlename,
            lastname: &form.lastname,
            birthday: &form.birthday,
            contact: &form.contact,
        }
        .check(&[])
        .map_err(AccountError::Rejected)?;

        if let Some(existing) = self.store.find_account_by_email(&email).await?
            && existing.id != principal.user_id
        {
            return Err(AccountError::Rejected(vec![Violation::EmailInUse]));
        }

        match self
            .store
            .update_profile(principal.user_id, &email, &profile)
            .await?
        {
            UpdateOutcome::Updated => self.profile(Some(principal)).await,
            UpdateOutcome::NotFound => Err(AccountError::NotFound),
            UpdateOutcome::Conflict => Err(AccountError::Rejected(vec![Violation::EmailInUse])),
        }
    }

    /// Newest first.
    ///
    /// # Errors
    /// Fails the role gate or on storage errors.
    pub async fn list_accounts(
        &self,
        admin: Option<&Principal>,
    ) -> Result<Vec<Account>, AccountError> {
        Principal::require_admin(admin)?;
        Ok(self.store.list_accounts().await?)
    }

    /// # Errors
    /// Fails the role gate, or [`AccountError::NotFound`].
    pub async fn account(&self, admin: Option<&Principal>, id: i64) -> Result<Account, AccountError> {
        Principal::require_admin(admin)?;
        self.store
            .find_account(id)
            .await?
            .ok_or(AccountError::NotFound)
    }

    /// Create an active account directly, skipping email verification.
    ///
    /// # Errors
    /// [`AccountError::Rejected`] with every violated rule.
    pub async fn create_account(
        &self,
        admin: Option<&Principal>,
        form: &NewAccountForm,
    ) -> Result<Account, AccountError> {
        Principal::require_admin(admin)?;
        let username = form.username.trim().to_string();

        let checked = ProfileInput {
            email: &form.email,
            firstname: &form.firstname,
            middlename: &form.middlename,
            lastname: &form.lastname,
            birthday: &form.birthday,
            contact: &form.contact,
        }
        .check(&[form.username.as_str(), form.password.as_str()]);
        let mut violations = checked.as_ref().err().cloned().unwrap_or_default();

        if !username.is_empty() && self.store.find_account_by_username(&username).await?.is_some()
        {
            violations.push(Violation::UsernameTaken);
        }
        let email = normalize_email(&form.email);
        if !email.is_empty() && self.store.find_account_by_email(&email).await?.is_some() {
            violations.push(Violation::EmailTaken);
        }

        let (email, profile) = match checked {
            Ok(checked) if violations.is_empty() => checked,
            _ => return Err(AccountError::Rejected(violations)),
        };

        let hasher = Arc::clone(&self.hasher);
        let password = form.password.clone();
        let password_hash = tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .context("password hashing task failed")??;

        let account = NewAccount {
            username,
            password_hash,
            email,
            profile,
            role: Role::parse(&form.role).unwrap_or_default(),
            is_active: true,
        };
        match self.store.insert_account(account, self.clock.now()).await? {
            InsertOutcome::Created(account) => {
                info!(user_id = account.id, role = account.role.as_str(), "account created");
                Ok(account)
            }
            InsertOutcome::Conflict => Err(AccountError::Rejected(vec![Violation::AccountExists])),
        }
    }

    /// # Errors
    /// [`AccountError::NotFound`] for an unknown id, [`AccountError::Rejected`]
    /// for invalid fields or a username/email held by another account.
    pub async fn update_account(
        &self,
        admin: Option<&Principal>,
        id: i64,
        form: &AccountEditForm,
    ) -> Result<Account, AccountError> {
        let admin = Principal::require_admin(admin)?;
        let current = self
            .store
            .find_account(id)
            .await?
            .ok_or(AccountError::NotFound)?;
        let username = form.username.trim().to_string();

        let checked = ProfileInput {
            email: &form.email,
            firstname: &form.firstname,
            middlename: &form.middlename,
            lastname: &form.lastname,
            birthday: &form.birthday,
            contact: &form.contact,
        }
        .check(&[form.username.as_str()]);
        let mut violations = checked.as_ref().err().cloned().unwrap_or_default();

        if let Some(existing) = self.store.find_account_by_username(&username).await?
            && existing.id != id
        {
            violations.push(Violation::UsernameTaken);
        }
        let email = normalize_email(&form.email);
        if let Some(existing) = self.store.find_account_by_email(&email).await?
            && existing.id != id
        {
            violations.push(Violation::EmailInUse);
        }

        let (email, profile) = match checked {
            Ok(checked) if violations.is_empty() => checked,
            _ => return Err(AccountError::Rejected(violations)),
        };

        let changes = AccountChanges {
            username,
            email,
            profile,
            role: Role::parse(&form.role).unwrap_or(current.role),
        };
        match self.store.update_account(id, &changes).await? {
            UpdateOutcome::Updated => {
                info!(user_id = id, admin_id = admin.user_id, "account updated");
                self.store
                    .find_account(id)
                    .await?
                    .ok_or(AccountError::NotFound)
            }
            UpdateOutcome::NotFound => Err(AccountError::NotFound),
            UpdateOutcome::Conflict => Err(AccountError::Rejected(vec![Violation::AccountExists])),
        }
    }

    /// Flip the active flag and return the updated account.
    ///
    /// # Errors
    /// [`AccountError::CannotDeactivateSelf`] when `id` is the caller.
    pub async fn toggle_active(
        &self,
        admin: Option<&Principal>,
        id: i64,
    ) -> Result<Account, AccountError> {
        let admin = Principal::require_admin(admin)?;
        if admin.user_id == id {
            return Err(AccountError::CannotDeactivateSelf);
        }

        let account = self
            .store
            .find_account(id)
            .await?
            .ok_or(AccountError::NotFound)?;
        let active = !account.is_active;
        if !self.store.set_active(id, active).await? {
            return Err(AccountError::NotFound);
        }
        info!(user_id = id, active, admin_id = admin.user_id, "account status changed");
        Ok(Account {
            is_active: active,
            ..account
        })
    }

    /// # Errors
    /// [`AccountError::CannotDeleteSelf`] when `id` is the caller.
    pub async fn delete_account(
        &self,
        admin: Option<&Principal>,
        id: i64,
    ) -> Result<(), AccountError> {
        let admin = Principal::require_admin(admin)?;
        if admin.user_id == id {
            return Err(AccountError::CannotDeleteSelf);
        }
        if !self.store.delete_account(id).await? {
            return Err(AccountError::NotFound);
        }
        info!(user_id = id, admin_id = admin.user_id, "account deleted");
        Ok(())
    }
}
