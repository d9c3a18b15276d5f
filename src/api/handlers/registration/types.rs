//! Request/response types for registration endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RegisterResponse {
    /// Opaque handle for the pending registration; send it back on verify/resend.
    pub ticket: String,
    pub email: String,
    pub messages: Vec<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyOtpRequest {
    pub ticket: String,
    pub otp: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyOtpResponse {
    pub user_id: i64,
    pub username: String,
    pub messages: Vec<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ResendOtpRequest {
    pub ticket: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MessagesResponse {
    pub messages: Vec<String>,
}

impl MessagesResponse {
    pub fn one(message: impl Into<String>) -> Self {
        Self {
            messages: vec![message.into()],
        }
    }
}
