//! Certificate validation for the mTLS fallback path.
//!
//! The reverse proxy terminates TLS and forwards its verification verdict plus
//! the client certificate. Validation here is a pure function over those
//! inputs: verdict, parse, lifetime policy, validity window, subject
//! allowlist, in that order. The first failing check wins and is reported as a
//! typed [`CertError`].

use sha2::{Digest, Sha256};
use x509_parser::prelude::*;

use crate::error::CertError;

/// The only proxy verdict that allows validation to proceed. Anything else,
/// including a missing header, rejects immediately.
pub const VERIFY_SUCCESS: &str = "SUCCESS";

/// Policy inputs for certificate validation.
#[derive(Debug, Clone)]
pub struct CertPolicy {
    pub max_lifetime_seconds: i64,
    pub admin_subjects: Vec<String>,
}

/// Outcome of a successful validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedIdentity {
    pub common_name: String,
    /// SHA-256 over the DER encoding, lowercase hex.
    pub fingerprint: String,
    /// Colon-separated lowercase hex serial, matching CRL entries.
    pub serial: String,
    pub not_before: i64,
    pub not_after: i64,
}

/// Validate a forwarded client certificate against policy.
///
/// `cert_input` is the PEM as forwarded by the proxy, or base64-encoded DER.
/// `now_unix_seconds` is injected so the window check is deterministic.
///
/// # Errors
/// Returns the [`CertError`] for the first check that fails.
pub fn validate(
    cert_input: &str,
    verify_status: Option<&str>,
    policy: &CertPolicy,
    now_unix_seconds: i64,
) -> Result<ValidatedIdentity, CertError> {
    let verdict = verify_status.ok_or(CertError::ProxyVerdict)?;
    if verdict != VERIFY_SUCCESS {
        return Err(CertError::ProxyVerdict);
    }

    let der = decode_der(cert_input)?;
    let (_, cert) = parse_x509_certificate(&der).map_err(|_| CertError::Parse)?;

    let not_before = cert.validity().not_before.timestamp();
    let not_after = cert.validity().not_after.timestamp();

    // Lifetime policy is independent of current time: a certificate issued
    // with a longer validity than allowed is rejected outright.
    if not_after - not_before > policy.max_lifetime_seconds {
        return Err(CertError::OverLifetime);
    }

    if now_unix_seconds < not_before || now_unix_seconds > not_after {
        return Err(CertError::OutsideWindow);
    }

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .ok_or(CertError::NotAllowlisted)?;

    if !policy
        .admin_subjects
        .iter()
        .any(|subject| subject == common_name)
    {
        return Err(CertError::NotAllowlisted);
    }

    Ok(ValidatedIdentity {
        common_name: common_name.to_string(),
        fingerprint: fingerprint(&der),
        serial: cert.raw_serial_as_string(),
        not_before,
        not_after,
    })
}

/// SHA-256 fingerprint over DER bytes, lowercase hex.
#[must_use]
pub fn fingerprint(der: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(der);
    hasher
        .finalize()
        .iter()
        .fold(String::with_capacity(64), |mut out, byte| {
            use std::fmt::Write;
            let _ = write!(out, "{byte:02x}");
            out
        })
}

fn decode_der(cert_input: &str) -> Result<Vec<u8>, CertError> {
    let trimmed = cert_input.trim();
    if trimmed.is_empty() {
        return Err(CertError::Parse);
    }
    if trimmed.starts_with("-----BEGIN") {
        let (_, pem) =
            x509_parser::pem::parse_x509_pem(trimmed.as_bytes()).map_err(|_| CertError::Parse)?;
        return Ok(pem.contents);
    }
    // Some proxies forward base64 DER instead of PEM.
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(trimmed)
        .map_err(|_| CertError::Parse)
}
