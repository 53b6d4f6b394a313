//! # Trustgate (Operator Console Trust Core)
//!
//! `trustgate` is the authentication trust core for the operator console. It
//! decides how operators prove who they are and keeps that decision honest
//! when upstream infrastructure degrades.
//!
//! ## Dual-path authentication
//!
//! The primary path is an OAuth2/OIDC authorization-code exchange against the
//! corporate identity provider. When the IdP is unreachable, a health monitor
//! with hysteresis switches the core into a fallback mode where a small
//! allowlist of operators may authenticate with client certificates forwarded
//! by trusted proxies.
//!
//! - **Fail secure:** an unverifiable certificate, a stale CRL, or an
//!   unavailable session store always denies. "Cannot verify" is never read
//!   as "allow".
//! - **Generic rejections:** callers see one opaque `authentication failed`
//!   message; the concrete reason is only recorded in audit logs and metrics.
//!
//! ## Sessions and tokens
//!
//! Successful authentication issues a `PASETO` v4.public access/refresh token
//! pair bound to the caller's network identity. Sessions live in `PostgreSQL`
//! and enforce idle and absolute timeouts; refresh rotates both tokens and
//! revokes the old pair before the new one exists.

pub mod cert;
pub mod cli;
pub mod config;
pub mod crl;
pub mod error;
pub mod idp;
pub mod metrics;
pub mod monitor;
pub mod orchestrator;
pub mod store;
pub mod token;
pub mod trustgate;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
