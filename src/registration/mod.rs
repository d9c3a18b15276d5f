//! Email OTP registration.
//!
//! A submission is staged in `pending_registrations`, a six digit code is
//! stored in `otp_codes` and mailed to the address, and the account only
//! exists once the code comes back inside its validity window.
//!
//! ## Flow
//!
//! 1. [`RegistrationWorkflow::submit_registration`] validates the whole form
//!    (every violated rule is reported), stages the submission, and issues a
//!    code. It returns a [`PendingVerification`] marker.
//! 2. [`RegistrationWorkflow::verify_otp`] takes that marker and a code. A
//!    match consumes the code and promotes the staged row into `users`.
//! 3. [`RegistrationWorkflow::resend_otp`] reissues a code for the marker's
//!    email, replacing the previous one.
//!
//! The marker is a plain value. How it travels between requests is up to the
//! caller; the HTTP layer keeps it server-side behind an opaque ticket.
//!
//! ## Throttling
//!
//! Every issued code appends to `email_send_log`. An email with three sends
//! in the trailing hour is refused further codes until older sends age out.
//! The check and the append are separate statements, so two concurrent
//! requests can both pass the check.

mod form;
mod otp;
mod throttle;
mod workflow;

pub use form::RegistrationForm;
pub use otp::generate_otp_code;
pub use throttle::{OtpThrottle, RateLimitDecision};
pub use workflow::{
    PendingVerification, RegistrationConfig, RegistrationError, RegistrationWorkflow,
};

#[cfg(test)]
mod tests;
