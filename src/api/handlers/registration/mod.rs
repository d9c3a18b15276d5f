//! Registration endpoints.
//!
//! `POST /v1/register` stages a submission and returns a pending ticket; the
//! ticket is then presented to `/v1/register/verify` together with the mailed
//! code, or to `/v1/register/resend` for a fresh code.

mod tickets;
pub(crate) mod types;

pub use tickets::PendingTickets;

use axum::{
    Json,
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::error;

use crate::registration::{RegistrationError, RegistrationForm, RegistrationWorkflow};
use crate::validation::{ViolationKind, dominant_kind};
use types::{
    MessagesResponse, RegisterResponse, ResendOtpRequest, VerifyOtpRequest, VerifyOtpResponse,
};

fn error_response(err: &RegistrationError) -> Response {
    let status = match err {
        RegistrationError::Rejected(violations) => match dominant_kind(violations) {
            ViolationKind::Validation => StatusCode::BAD_REQUEST,
            ViolationKind::Conflict => StatusCode::CONFLICT,
            ViolationKind::RateLimit => StatusCode::TOO_MANY_REQUESTS,
        },
        RegistrationError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        RegistrationError::InvalidOtp => StatusCode::BAD_REQUEST,
        RegistrationError::NoPendingRegistration => StatusCode::PRECONDITION_FAILED,
        RegistrationError::Internal(err) => {
            error!("Registration request failed: {err:#}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(MessagesResponse::one("Registration failed")),
            )
                .into_response();
        }
    };
    (
        status,
        Json(MessagesResponse {
            messages: err.messages(),
        }),
    )
        .into_response()
}

fn missing_payload() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(MessagesResponse::one("Missing payload")),
    )
        .into_response()
}

/// Validate and stage a registration, then mail an OTP.
#[utoipa::path(
    post,
    path = "/v1/register",
    request_body = RegistrationForm,
    responses(
        (status = 200, description = "Registration staged, OTP sent", body = RegisterResponse),
        (status = 400, description = "Validation failed", body = MessagesResponse),
        (status = 409, description = "Username or email already registered", body = MessagesResponse),
        (status = 429, description = "Too many OTP requests", body = MessagesResponse)
    ),
    tag = "registration"
)]
pub async fn register(
    workflow: Extension<Arc<RegistrationWorkflow>>,
    tickets: Extension<Arc<PendingTickets>>,
    payload: Option<Json<RegistrationForm>>,
) -> impl IntoResponse {
    let Some(Json(form)) = payload else {
        return missing_payload();
    };

    match workflow.submit_registration(&form).await {
        Ok(marker) => {
            let email = marker.email().to_string();
            let ticket = tickets.issue(marker).await;
            (
                StatusCode::OK,
                Json(RegisterResponse {
                    ticket: ticket.to_string(),
                    email,
                    messages: vec!["OTP has been sent to your email!".to_string()],
                }),
            )
                .into_response()
        }
        Err(err) => error_response(&err),
    }
}

/// Confirm a pending registration with its OTP.
#[utoipa::path(
    post,
    path = "/v1/register/verify",
    request_body = VerifyOtpRequest,
    responses(
        (status = 200, description = "Account created", body = VerifyOtpResponse),
        (status = 400, description = "Invalid or expired OTP", body = MessagesResponse),
        (status = 409, description = "Username or email registered meanwhile", body = MessagesResponse),
        (status = 412, description = "No pending registration for the ticket", body = MessagesResponse)
    ),
    tag = "registration"
)]
pub async fn verify_otp(
    workflow: Extension<Arc<RegistrationWorkflow>>,
    tickets: Extension<Arc<PendingTickets>>,
    payload: Option<Json<VerifyOtpRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    let marker = tickets.get(&request.ticket).await;
    match workflow.verify_otp(marker.as_ref(), &request.otp).await {
        Ok(account) => {
            tickets.clear(&request.ticket).await;
            (
                StatusCode::OK,
                Json(VerifyOtpResponse {
                    user_id: account.id,
                    username: account.username,
                    messages: vec!["Registration successful! Please login.".to_string()],
                }),
            )
                .into_response()
        }
        Err(err) => {
            if matches!(
                err,
                RegistrationError::NoPendingRegistration | RegistrationError::Rejected(_)
            ) {
                tickets.clear(&request.ticket).await;
            }
            error_response(&err)
        }
    }
}

/// Issue a fresh OTP for a pending registration.
#[utoipa::path(
    post,
    path = "/v1/register/resend",
    request_body = ResendOtpRequest,
    responses(
        (status = 200, description = "New OTP sent", body = MessagesResponse),
        (status = 412, description = "No pending registration for the ticket", body = MessagesResponse),
        (status = 429, description = "Too many OTP requests", body = MessagesResponse)
    ),
    tag = "registration"
)]
pub async fn resend_otp(
    workflow: Extension<Arc<RegistrationWorkflow>>,
    tickets: Extension<Arc<PendingTickets>>,
    payload: Option<Json<ResendOtpRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    let marker = tickets.get(&request.ticket).await;
    match workflow.resend_otp(marker.as_ref()).await {
        Ok(()) => (
            StatusCode::OK,
            Json(MessagesResponse::one("New OTP has been sent!")),
        )
            .into_response(),
        Err(err) => error_response(&err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::email::LogEmailSender;
    use crate::password::Argon2Hasher;
    use crate::registration::RegistrationConfig;
    use crate::storage::{AccountStore, MemoryStore, OtpLedger, Store};
    use anyhow::{Context, Result};
    use axum::body::to_bytes;
    use std::time::Duration;

    struct Fixture {
        store: Arc<MemoryStore>,
        workflow: Arc<RegistrationWorkflow>,
        tickets: Arc<PendingTickets>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let workflow = Arc::new(RegistrationWorkflow::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::new(LogEmailSender),
            Arc::new(Argon2Hasher::new()),
            Arc::new(SystemClock),
            RegistrationConfig::new(),
        ));
        Fixture {
            store,
            workflow,
            tickets: Arc::new(PendingTickets::new(Duration::from_secs(600))),
        }
    }

    fn form() -> RegistrationForm {
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

    async fn body_json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn register_alice(fixture: &Fixture) -> Result<RegisterResponse> {
        let response = register(
            Extension(fixture.workflow.clone()),
            Extension(fixture.tickets.clone()),
            Some(Json(form())),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        body_json(response).await
    }

    #[tokio::test]
    async fn register_missing_payload() -> Result<()> {
        let fixture = fixture();
        let response = register(
            Extension(fixture.workflow.clone()),
            Extension(fixture.tickets.clone()),
            None,
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn register_validation_failure_lists_messages() -> Result<()> {
        let fixture = fixture();
        let bad = RegistrationForm {
            confirm_password: "other".to_string(),
            ..form()
        };
        let response = register(
            Extension(fixture.workflow.clone()),
            Extension(fixture.tickets.clone()),
            Some(Json(bad)),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: MessagesResponse = body_json(response).await?;
        assert_eq!(body.messages, vec!["Passwords do not match!".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn register_verify_creates_account() -> Result<()> {
        let fixture = fixture();
        let registered = register_alice(&fixture).await?;
        assert_eq!(registered.email, "a@x.com");

        let code = fixture
            .store
            .find_otp("a@x.com")
            .await?
            .context("otp missing")?
            .code;
        let response = verify_otp(
            Extension(fixture.workflow.clone()),
            Extension(fixture.tickets.clone()),
            Some(Json(VerifyOtpRequest {
                ticket: registered.ticket.clone(),
                otp: code,
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let body: VerifyOtpResponse = body_json(response).await?;
        assert_eq!(body.username, "alice");
        assert!(fixture.store.find_account(body.user_id).await?.is_some());

        // The ticket is spent once the account exists.
        assert!(fixture.tickets.get(&registered.ticket).await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn verify_with_wrong_code_is_bad_request() -> Result<()> {
        let fixture = fixture();
        let registered = register_alice(&fixture).await?;
        let code = fixture
            .store
            .find_otp("a@x.com")
            .await?
            .context("otp missing")?
            .code;
        let wrong = if code == "999999" { "100000" } else { "999999" };

        let response = verify_otp(
            Extension(fixture.workflow.clone()),
            Extension(fixture.tickets.clone()),
            Some(Json(VerifyOtpRequest {
                ticket: registered.ticket.clone(),
                otp: wrong.to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: MessagesResponse = body_json(response).await?;
        assert_eq!(body.messages, vec!["Invalid or expired OTP!".to_string()]);
        assert!(fixture.tickets.get(&registered.ticket).await.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn verify_with_unknown_ticket_requires_registration() -> Result<()> {
        let fixture = fixture();
        let response = verify_otp(
            Extension(fixture.workflow.clone()),
            Extension(fixture.tickets.clone()),
            Some(Json(VerifyOtpRequest {
                ticket: ulid::Ulid::new().to_string(),
                otp: "123456".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
        let body: MessagesResponse = body_json(response).await?;
        assert_eq!(body.messages, vec!["Please register first!".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn resend_is_rate_limited_after_three_sends() -> Result<()> {
        let fixture = fixture();
        let registered = register_alice(&fixture).await?;

        let resend = || {
            resend_otp(
                Extension(fixture.workflow.clone()),
                Extension(fixture.tickets.clone()),
                Some(Json(ResendOtpRequest {
                    ticket: registered.ticket.clone(),
                })),
            )
        };
        assert_eq!(resend().await.into_response().status(), StatusCode::OK);
        assert_eq!(resend().await.into_response().status(), StatusCode::OK);
        let response = resend().await.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        Ok(())
    }

    #[tokio::test]
    async fn register_conflict_is_409() -> Result<()> {
        let fixture = fixture();
        let registered = register_alice(&fixture).await?;
        let code = fixture
            .store
            .find_otp("a@x.com")
            .await?
            .context("otp missing")?
            .code;
        fixture
            .workflow
            .verify_otp(
                fixture.tickets.get(&registered.ticket).await.as_ref(),
                &code,
            )
            .await?;

        let response = register(
            Extension(fixture.workflow.clone()),
            Extension(fixture.tickets.clone()),
            Some(Json(form())),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body: MessagesResponse = body_json(response).await?;
        assert_eq!(
            body.messages,
            vec![
                "Username already exists!".to_string(),
                "Email already registered!".to_string()
            ]
        );
        Ok(())
    }
}
