use crate::email::SmtpConfig;
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_SMTP_HOST: &str = "smtp-host";
pub const ARG_SMTP_PORT: &str = "smtp-port";
pub const ARG_SMTP_USERNAME: &str = "smtp-username";
pub const ARG_SMTP_PASSWORD: &str = "smtp-password";
pub const ARG_SMTP_FROM: &str = "smtp-from";

/// Build the relay settings, or `None` when no host is configured.
///
/// # Errors
/// Returns an error if only one of username and password is given.
pub fn parse(matches: &ArgMatches) -> anyhow::Result<Option<SmtpConfig>> {
    let Some(host) = matches
        .get_one::<String>(ARG_SMTP_HOST)
        .map(|host| host.trim())
        .filter(|host| !host.is_empty())
    else {
        return Ok(None);
    };

    let mut config = SmtpConfig::new(host)
        .with_port(matches.get_one::<u16>(ARG_SMTP_PORT).copied().unwrap_or(587));

    if let Some(from) = matches.get_one::<String>(ARG_SMTP_FROM) {
        config = config.with_from(from.as_str());
    }

    match (
        matches.get_one::<String>(ARG_SMTP_USERNAME),
        matches.get_one::<String>(ARG_SMTP_PASSWORD),
    ) {
        (Some(username), Some(password)) => {
            config = config
                .with_credentials(username.clone(), SecretString::from(password.clone()));
        }
        (None, None) => {}
        _ => anyhow::bail!("--{ARG_SMTP_USERNAME} and --{ARG_SMTP_PASSWORD} must be set together"),
    }

    Ok(Some(config))
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SMTP_HOST)
                .long(ARG_SMTP_HOST)
                .help("SMTP relay host; OTP emails are only logged when unset")
                .env("HOMESITE_SMTP_HOST"),
        )
        .arg(
            Arg::new(ARG_SMTP_PORT)
                .long(ARG_SMTP_PORT)
                .help("SMTP relay port")
                .env("HOMESITE_SMTP_PORT")
                .default_value("587")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_SMTP_USERNAME)
                .long(ARG_SMTP_USERNAME)
                .help("SMTP username")
                .env("HOMESITE_SMTP_USERNAME"),
        )
        .arg(
            Arg::new(ARG_SMTP_PASSWORD)
                .long(ARG_SMTP_PASSWORD)
                .help("SMTP password")
                .env("HOMESITE_SMTP_PASSWORD")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_SMTP_FROM)
                .long(ARG_SMTP_FROM)
                .help("Sender mailbox for OTP emails")
                .env("HOMESITE_SMTP_FROM")
                .default_value("Homesite <no-reply@homesite.local>"),
        )
}
