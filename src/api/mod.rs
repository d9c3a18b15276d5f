use crate::{
    api::handlers::registration::PendingTickets,
    clock::SystemClock,
    email::{EmailSender, LogEmailSender, SmtpConfig, SmtpEmailSender},
    password::Argon2Hasher,
    registration::{RegistrationConfig, RegistrationWorkflow},
    storage::{PgStore, Store, apply_schema},
};
use anyhow::{Context, Result};
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;
use utoipa_axum::router::OpenApiRouter;

pub(crate) mod handlers;
mod openapi;

pub use openapi::openapi;

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(
    port: u16,
    dsn: String,
    registration_config: RegistrationConfig,
    smtp_config: Option<SmtpConfig>,
    pending_ticket_ttl: Duration,
) -> Result<()> {
    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    apply_schema(&pool).await?;

    let mailer: Arc<dyn EmailSender> = match smtp_config {
        Some(config) => {
            info!("Sending OTP email via {}:{}", config.host(), config.port());
            Arc::new(SmtpEmailSender::new(&config)?)
        }
        None => {
            info!("No SMTP host configured, OTP email is logged only");
            Arc::new(LogEmailSender)
        }
    };

    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool.clone()));
    let workflow = Arc::new(RegistrationWorkflow::new(
        store,
        mailer,
        Arc::new(Argon2Hasher::new()),
        Arc::new(SystemClock),
        registration_config,
    ));

    let app = app(workflow, pending_ticket_ttl).layer(Extension(pool));

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {err}");
            }
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

/// Registration routes with request-id, tracing and workflow state attached.
///
/// `/health` additionally needs an `Extension<PgPool>` layered on top.
pub fn app(workflow: Arc<RegistrationWorkflow>, pending_ticket_ttl: Duration) -> Router {
    let tickets = Arc::new(PendingTickets::new(pending_ticket_ttl));

    let (router, _openapi) = router().split_for_parts();
    router.layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(Extension(workflow))
            .layer(Extension(tickets)),
    )
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_serves_documented_routes() {
        let (_router, openapi) = router().split_for_parts();
        assert!(openapi.paths.paths.contains_key("/v1/register"));
    }
}
