//! # Homesite
//!
//! Backend for a personal site: visitors register with an email one-time
//! password, members log in and edit their profile, and admins manage users
//! and the homepage copy.
//!
//! ## Registration
//!
//! Registration is two-phase. A submitted form is validated as a whole and
//! staged, a six digit code is mailed, and the account is only created when
//! the code comes back within five minutes. Sends are capped at three per
//! email per hour. See [`registration`].
//!
//! ## Storage
//!
//! Postgres is the system of record ([`storage::PgStore`]). An in-memory
//! backend with identical semantics ([`storage::MemoryStore`]) backs the
//! tests.
//!
//! ## HTTP
//!
//! The registration workflow is served under `/v1/register` with an `OpenAPI`
//! document generated from the handlers (see the `openapi` binary).

pub mod accounts;
pub mod api;
pub mod cli;
pub mod clock;
pub mod email;
pub mod password;
pub mod registration;
pub mod site;
pub mod storage;
pub mod validation;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
