//! Form validation shared by registration and account management.
//!
//! Validation never stops at the first problem: callers collect every
//! [`Violation`] so the user can fix the whole form in one pass.

use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;
use std::fmt;

/// Coarse grouping used to pick a response status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Validation,
    Conflict,
    RateLimit,
}

/// A single rule a submitted form broke.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Violation {
    MissingFields,
    InvalidEmail,
    InvalidBirthday,
    PasswordMismatch,
    PasswordTooShort { min: usize },
    UsernameTaken,
    EmailTaken,
    EmailInUse,
    AccountExists,
    RateLimited,
}

impl Violation {
    #[must_use]
    pub fn kind(&self) -> ViolationKind {
        match self {
            Self::MissingFields
            | Self::InvalidEmail
            | Self::InvalidBirthday
            | Self::PasswordMismatch
            | Self::PasswordTooShort { .. } => ViolationKind::Validation,
            Self::UsernameTaken | Self::EmailTaken | Self::EmailInUse | Self::AccountExists => {
                ViolationKind::Conflict
            }
            Self::RateLimited => ViolationKind::RateLimit,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingFields => write!(f, "Please fill all required fields!"),
            Self::InvalidEmail => write!(f, "Please enter a valid email address!"),
            Self::InvalidBirthday => write!(f, "Birthday must be a valid date (YYYY-MM-DD)!"),
            Self::PasswordMismatch => write!(f, "Passwords do not match!"),
            Self::PasswordTooShort { min } => {
                write!(f, "Password must be at least {min} characters!")
            }
            Self::UsernameTaken => write!(f, "Username already exists!"),
            Self::EmailTaken => write!(f, "Email already registered!"),
            Self::EmailInUse => write!(f, "Email already used by another user!"),
            Self::AccountExists => write!(f, "Username or email already registered!"),
            Self::RateLimited => write!(f, "Too many OTP requests. Please try again later."),
        }
    }
}

/// Pick the kind that best describes a list: a uniform list keeps its kind,
/// anything mixed is reported as a validation failure.
#[must_use]
pub fn dominant_kind(violations: &[Violation]) -> ViolationKind {
    let mut kinds = violations.iter().map(Violation::kind);
    match kinds.next() {
        Some(first) if kinds.all(|kind| kind == first) => first,
        _ => ViolationKind::Validation,
    }
}

/// Normalize an email for lookup/uniqueness checks.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
#[must_use]
pub fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Birthdays travel as `YYYY-MM-DD`.
#[must_use]
pub fn parse_birthday(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

/// True when every value has non-whitespace content.
#[must_use]
pub fn all_present(values: &[&str]) -> bool {
    values.iter().all(|value| !value.trim().is_empty())
}
