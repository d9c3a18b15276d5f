use crate::{api, cli::telemetry, email::SmtpConfig, registration::RegistrationConfig};
use anyhow::{Result, anyhow};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::debug;
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub db_password: Option<SecretString>,
    pub registration_config: RegistrationConfig,
    pub pending_ticket_ttl_seconds: u64,
    pub smtp_config: Option<SmtpConfig>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the DSN is invalid or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let dsn = with_password(&args.dsn, args.db_password.as_ref())?;

    debug!("Registration config: {:?}", args.registration_config);

    let result = api::new(
        args.port,
        dsn,
        args.registration_config,
        args.smtp_config,
        Duration::from_secs(args.pending_ticket_ttl_seconds),
    )
    .await;

    telemetry::shutdown_tracer();

    result
}

/// Inject the database password into the DSN, leaving it untouched when none is set.
fn with_password(dsn: &str, password: Option<&SecretString>) -> Result<String> {
    let Some(password) = password else {
        return Ok(dsn.to_string());
    };

    let mut url = Url::parse(dsn)?;
    url.set_password(Some(password.expose_secret()))
        .map_err(|()| anyhow!("Error setting password"))?;

    Ok(url.to_string())
}
