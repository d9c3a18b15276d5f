use serde::Deserialize;
use utoipa::ToSchema;

use crate::validation::{Violation, all_present, normalize_email, parse_birthday, valid_email};

/// Registration form as submitted. Only `middlename` is optional.
#[derive(Clone, Debug, Default, Deserialize, ToSchema)]
#[serde(default)]
pub struct RegistrationForm {
    pub username: String,
    pub password: String,
    pub confirm_password: String,
    pub email: String,
    pub firstname: String,
    pub middlename: String,
    pub lastname: String,
    /// `YYYY-MM-DD`
    pub birthday: String,
    pub contact: String,
}

impl RegistrationForm {
    /// Rules that need no store lookups, in the order they are shown.
    #[must_use]
    pub fn validate(&self, password_min_length: usize) -> Vec<Violation> {
        let mut violations = Vec::new();

        if !all_present(&[
            self.username.as_str(),
            self.password.as_str(),
            self.email.as_str(),
            self.firstname.as_str(),
            self.lastname.as_str(),
            self.birthday.as_str(),
            self.contact.as_str(),
        ]) {
            violations.push(Violation::MissingFields);
        }

        let email = self.normalized_email();
        if !email.is_empty() && !valid_email(&email) {
            violations.push(Violation::InvalidEmail);
        }

        if !self.birthday.trim().is_empty() && parse_birthday(&self.birthday).is_none() {
            violations.push(Violation::InvalidBirthday);
        }

        if self.password != self.confirm_password {
            violations.push(Violation::PasswordMismatch);
        }

        if self.password.chars().count() < password_min_length {
            violations.push(Violation::PasswordTooShort {
                min: password_min_length,
            });
        }

        violations
    }

    #[must_use]
    pub fn normalized_email(&self) -> String {
        normalize_email(&self.email)
    }

    #[must_use]
    pub fn trimmed_username(&self) -> &str {
        self.username.trim()
    }
}
