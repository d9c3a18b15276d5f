use crate::registration::RegistrationConfig;
use clap::{Arg, ArgMatches, Command};

pub const ARG_OTP_TTL_SECONDS: &str = "otp-ttl-seconds";
pub const ARG_OTP_SEND_LIMIT: &str = "otp-send-limit";
pub const ARG_OTP_SEND_WINDOW_SECONDS: &str = "otp-send-window-seconds";
pub const ARG_PASSWORD_MIN_LENGTH: &str = "password-min-length";
pub const ARG_PENDING_TICKET_TTL_SECONDS: &str = "pending-ticket-ttl-seconds";

#[derive(Debug, Clone)]
pub struct Options {
    pub config: RegistrationConfig,
    pub pending_ticket_ttl_seconds: u64,
}

impl Options {
    /// Parse registration arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a limit or TTL is zero.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let read_positive = |id: &str| -> anyhow::Result<i64> {
            let value = matches.get_one::<i64>(id).copied().unwrap_or_default();
            if value <= 0 {
                anyhow::bail!("--{id} must be greater than zero");
            }
            Ok(value)
        };

        let config = RegistrationConfig::new()
            .with_otp_ttl_seconds(read_positive(ARG_OTP_TTL_SECONDS)?)
            .with_otp_send_limit(read_positive(ARG_OTP_SEND_LIMIT)?)
            .with_otp_send_window_seconds(read_positive(ARG_OTP_SEND_WINDOW_SECONDS)?)
            .with_password_min_length(
                matches
                    .get_one::<usize>(ARG_PASSWORD_MIN_LENGTH)
                    .copied()
                    .unwrap_or(6),
            );

        let pending_ticket_ttl_seconds = matches
            .get_one::<u64>(ARG_PENDING_TICKET_TTL_SECONDS)
            .copied()
            .filter(|ttl| *ttl > 0)
            .ok_or_else(|| {
                anyhow::anyhow!("--{ARG_PENDING_TICKET_TTL_SECONDS} must be greater than zero")
            })?;

        Ok(Self {
            config,
            pending_ticket_ttl_seconds,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_OTP_TTL_SECONDS)
                .long(ARG_OTP_TTL_SECONDS)
                .help("Seconds an emailed OTP stays valid")
                .env("HOMESITE_OTP_TTL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_OTP_SEND_LIMIT)
                .long(ARG_OTP_SEND_LIMIT)
                .help("Max OTP emails per address within the send window")
                .env("HOMESITE_OTP_SEND_LIMIT")
                .default_value("3")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_OTP_SEND_WINDOW_SECONDS)
                .long(ARG_OTP_SEND_WINDOW_SECONDS)
                .help("Sliding window for the OTP send limit, in seconds")
                .env("HOMESITE_OTP_SEND_WINDOW_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_PASSWORD_MIN_LENGTH)
                .long(ARG_PASSWORD_MIN_LENGTH)
                .help("Minimum password length at registration")
                .env("HOMESITE_PASSWORD_MIN_LENGTH")
                .default_value("6")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_PENDING_TICKET_TTL_SECONDS)
                .long(ARG_PENDING_TICKET_TTL_SECONDS)
                .help("Seconds a pending registration ticket is honored")
                .env("HOMESITE_PENDING_TICKET_TTL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64)),
        )
}
