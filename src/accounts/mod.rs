//! Accounts, the role gate, and account management.
//!
//! Registration promotes pending submissions into [`Account`] rows; after that
//! the account is owned by this module: login, profile edits, and the admin
//! user-management operations in [`AccountService`].
//!
//! ## Role gate
//!
//! There is no ambient session. Callers that have authenticated a user hold a
//! [`Principal`] and pass it explicitly; [`Principal::require_login`] and
//! [`Principal::require_admin`] turn a missing or under-privileged principal
//! into the same messages the site shows.

mod service;

pub use service::{AccountEditForm, AccountService, NewAccountForm, ProfileForm};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::validation::Violation;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "user" => Some(Self::User),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// Personal details collected at registration and editable from the profile page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProfileFields {
    pub firstname: String,
    pub middlename: String,
    pub lastname: String,
    pub birthday: NaiveDate,
    pub contact: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Account {
    pub id: i64,
    pub username: String,
    #[serde(skip)]
    pub password_hash: String,
    pub email: String,
    #[serde(flatten)]
    pub profile: ProfileFields,
    pub role: Role,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// The authenticated caller, as carried between requests by the web layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub user_id: i64,
    pub username: String,
    pub firstname: String,
    pub role: Role,
}

impl Principal {
    #[must_use]
    pub fn from_account(account: &Account) -> Self {
        Self {
            user_id: account.id,
            username: account.username.clone(),
            firstname: account.profile.firstname.clone(),
            role: account.role,
        }
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// # Errors
    /// Returns [`AccountError::LoginRequired`] when no principal is present.
    pub fn require_login(principal: Option<&Self>) -> Result<&Self, AccountError> {
        principal.ok_or(AccountError::LoginRequired)
    }

    /// # Errors
    /// Returns [`AccountError::LoginRequired`] or [`AccountError::AdminRequired`].
    pub fn require_admin(principal: Option<&Self>) -> Result<&Self, AccountError> {
        let principal = Self::require_login(principal)?;
        if principal.is_admin() {
            Ok(principal)
        } else {
            Err(AccountError::AdminRequired)
        }
    }
}

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("{}", join_violations(.0))]
    Rejected(Vec<Violation>),
    #[error("Please fill all fields!")]
    MissingCredentials,
    #[error("Invalid username or password, or account is deactivated!")]
    InvalidCredentials,
    #[error("Please login first!")]
    LoginRequired,
    #[error("Admin access required!")]
    AdminRequired,
    #[error("User not found!")]
    NotFound,
    #[error("You cannot delete yourself!")]
    CannotDeleteSelf,
    #[error("You cannot deactivate yourself!")]
    CannotDeactivateSelf,
    #[error("account storage failure")]
    Storage(#[from] anyhow::Error),
}

impl AccountError {
    /// Messages suitable for display, one per line of feedback.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        match self {
            Self::Rejected(violations) => violations.iter().map(ToString::to_string).collect(),
            other => vec![other.to_string()],
        }
    }
}

pub(crate) fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(role: Role) -> Principal {
        Principal {
            user_id: 7,
            username: "juan".to_string(),
            firstname: "Juan".to_string(),
            role,
        }
    }

    #[test]
    fn role_parse_round_trips_known_values() {
        assert_eq!(Role::parse("admin"), Some(Role::Admin));
        assert_eq!(Role::parse(" User "), Some(Role::User));
        assert_eq!(Role::parse("root"), None);
        assert_eq!(Role::Admin.as_str(), "admin");
    }

    #[test]
    fn require_login_rejects_anonymous_callers() {
        let result = Principal::require_login(None);
        assert!(matches!(result, Err(AccountError::LoginRequired)));
    }

    #[test]
    fn require_admin_checks_role() {
        let user = principal(Role::User);
        let admin = principal(Role::Admin);

        assert!(matches!(
            Principal::require_admin(Some(&user)),
            Err(AccountError::AdminRequired)
        ));
        assert!(matches!(
            Principal::require_admin(None),
            Err(AccountError::LoginRequired)
        ));
        assert_eq!(
            Principal::require_admin(Some(&admin)).map(|p| p.user_id).ok(),
            Some(7)
        );
    }

    #[test]
    fn rejected_error_lists_every_message() {
        let err = AccountError::Rejected(vec![Violation::MissingFields, Violation::UsernameTaken]);
        assert_eq!(
            err.messages(),
            vec![
                "Please fill all required fields!".to_string(),
                "Username already exists!".to_string()
            ]
        );
    }
}
