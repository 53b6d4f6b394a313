//! Error taxonomy for the authentication core.
//!
//! Every failure in this crate is folded into one of the kinds below before it
//! reaches a caller. The HTTP surface only ever returns
//! [`AuthError::GENERIC_MESSAGE`]; the specific reason code goes to the audit
//! log so rejections cannot be used as an oracle to distinguish a revoked
//! certificate from a non-allowlisted one.

use thiserror::Error;

/// Certificate validation failures, one per check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CertError {
    #[error("proxy verification verdict was not success")]
    ProxyVerdict,
    #[error("request did not arrive from a trusted proxy")]
    UntrustedSource,
    #[error("certificate did not parse")]
    Parse,
    #[error("certificate lifetime exceeds policy maximum")]
    OverLifetime,
    #[error("certificate is outside its validity window")]
    OutsideWindow,
    #[error("certificate subject is not allowlisted")]
    NotAllowlisted,
    #[error("certificate serial is revoked")]
    Revoked,
}

/// Token verification failures, one per check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("invalid signature")]
    Signature,
    #[error("token expired")]
    Expired,
    #[error("token id is revoked")]
    Revoked,
    #[error("session binding mismatch")]
    BindingMismatch,
    #[error("token does not resolve to a session")]
    UnknownSession,
    #[error("session idle timeout exceeded")]
    IdleTimeout,
    #[error("session absolute timeout exceeded")]
    AbsoluteTimeout,
}

/// Top-level error for every operation in the trust core.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Missing or invalid trust configuration. Always fatal-reject, never
    /// degraded to permissive behavior.
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Certificate(#[from] CertError),
    /// CRL stale or unreachable: treated identically to "revoked".
    #[error("revocation status unknown")]
    RevocationUnknown,
    /// Session store could not answer: fail closed rather than trust a token
    /// whose revocation status cannot be proven.
    #[error("session store unavailable: {0}")]
    StoreUnavailable(String),
    #[error(transparent)]
    Token(#[from] TokenError),
    /// IdP rejected or failed the authorization-code exchange.
    #[error("identity provider exchange failed: {0}")]
    IdpExchange(String),
    #[error("upstream timeout: {0}")]
    UpstreamTimeout(String),
}

impl AuthError {
    /// The only message callers ever see for a failed authentication.
    pub const GENERIC_MESSAGE: &'static str = "authentication failed";

    /// Internal reason code, emitted to audit logs and metrics only.
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Certificate(err) => match err {
                CertError::ProxyVerdict => "cert_proxy_verdict",
                CertError::UntrustedSource => "cert_untrusted_source",
                CertError::Parse => "cert_parse",
                CertError::OverLifetime => "cert_over_lifetime",
                CertError::OutsideWindow => "cert_outside_window",
                CertError::NotAllowlisted => "cert_not_allowlisted",
                CertError::Revoked => "cert_revoked",
            },
            Self::RevocationUnknown => "revocation_unknown",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::Token(err) => match err {
                TokenError::Malformed => "token_malformed",
                TokenError::Signature => "token_signature",
                TokenError::Expired => "token_expired",
                TokenError::Revoked => "token_revoked",
                TokenError::BindingMismatch => "token_binding_mismatch",
                TokenError::UnknownSession => "token_unknown_session",
                TokenError::IdleTimeout => "session_idle_timeout",
                TokenError::AbsoluteTimeout => "session_absolute_timeout",
            },
            Self::IdpExchange(_) => "idp_exchange_failed",
            Self::UpstreamTimeout(_) => "upstream_timeout",
        }
    }
}

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        Self::StoreUnavailable(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_are_stable() {
        assert_eq!(
            AuthError::Certificate(CertError::OverLifetime).reason_code(),
            "cert_over_lifetime"
        );
        assert_eq!(AuthError::RevocationUnknown.reason_code(), "revocation_unknown");
        assert_eq!(
            AuthError::from(anyhow::anyhow!("connection refused")).reason_code(),
            "store_unavailable"
        );
        assert_eq!(
            AuthError::Token(TokenError::BindingMismatch).reason_code(),
            "token_binding_mismatch"
        );
        assert_eq!(
            AuthError::Configuration("empty allowlist".to_string()).reason_code(),
            "configuration"
        );
    }

    #[test]
    fn generic_message_does_not_leak_reason() {
        let errors: Vec<AuthError> = vec![
            CertError::Revoked.into(),
            TokenError::Expired.into(),
            AuthError::RevocationUnknown,
        ];
        for err in errors {
            assert_ne!(AuthError::GENERIC_MESSAGE, err.to_string());
        }
    }

    #[test]
    fn cert_errors_convert_into_auth_errors() {
        let err: AuthError = CertError::Parse.into();
        assert!(matches!(err, AuthError::Certificate(CertError::Parse)));
    }
}
