//! Command-line argument dispatch.
//!
//! Turns validated CLI matches into an [`Action`] carrying the server's full
//! configuration.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{ARG_DB_PASSWORD, ARG_DSN, ARG_PORT, registration, smtp};
use anyhow::{Context, Result};
use secrecy::SecretString;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;
    let db_password = matches
        .get_one::<String>(ARG_DB_PASSWORD)
        .cloned()
        .map(SecretString::from);

    let registration_opts = registration::Options::parse(matches)?;
    let smtp_config = smtp::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        db_password,
        registration_config: registration_opts.config,
        pending_ticket_ttl_seconds: registration_opts.pending_ticket_ttl_seconds,
        smtp_config,
    }))
}
