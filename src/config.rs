//! Trust configuration for the authentication core.
//!
//! All limits in one place. An empty proxy or admin allowlist is a fatal
//! configuration error: the server refuses to start rather than run in a
//! state where "cannot verify trust" could be read as "allow".

use secrecy::SecretString;
use std::net::IpAddr;
use url::Url;

use crate::error::AuthError;

const DEFAULT_MAX_CERT_LIFETIME_SECONDS: i64 = 7 * 24 * 60 * 60;
const DEFAULT_ACCESS_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_REFRESH_TTL_SECONDS: i64 = 4 * 60 * 60;
const DEFAULT_IDLE_TIMEOUT_SECONDS: i64 = 15 * 60;
const DEFAULT_ABSOLUTE_TIMEOUT_SECONDS: i64 = 4 * 60 * 60;
const DEFAULT_CRL_REFRESH_SECONDS: i64 = 60 * 60;
const DEFAULT_CRL_MAX_AGE_SECONDS: i64 = 24 * 60 * 60;
const DEFAULT_CERT_EXPIRY_WARNING_SECONDS: i64 = 48 * 60 * 60;

/// Identity-provider endpoints and credentials. The IdP itself is an opaque
/// OAuth2/OIDC counterparty; only its reachability and exchange contract
/// matter here.
#[derive(Debug, Clone)]
pub struct IdpConfig {
    pub issuer_url: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub redirect_uri: String,
    pub probe_timeout_seconds: u64,
    pub exchange_timeout_seconds: u64,
}

impl IdpConfig {
    #[must_use]
    pub fn new(
        issuer_url: String,
        client_id: String,
        client_secret: SecretString,
        redirect_uri: String,
    ) -> Self {
        Self {
            issuer_url,
            client_id,
            client_secret,
            redirect_uri,
            probe_timeout_seconds: 5,
            exchange_timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrustConfig {
    idp: IdpConfig,
    crl_url: String,
    trusted_proxies: Vec<IpAddr>,
    admin_subjects: Vec<String>,
    max_cert_lifetime_seconds: i64,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
    idle_timeout_seconds: i64,
    absolute_timeout_seconds: i64,
    crl_refresh_seconds: i64,
    crl_max_age_seconds: i64,
    cert_expiry_warning_seconds: i64,
    cookie_secure: bool,
}

impl TrustConfig {
    #[must_use]
    pub fn new(
        idp: IdpConfig,
        crl_url: String,
        trusted_proxies: Vec<IpAddr>,
        admin_subjects: Vec<String>,
    ) -> Self {
        Self {
            idp,
            crl_url,
            trusted_proxies,
            admin_subjects,
            max_cert_lifetime_seconds: DEFAULT_MAX_CERT_LIFETIME_SECONDS,
            access_ttl_seconds: DEFAULT_ACCESS_TTL_SECONDS,
            refresh_ttl_seconds: DEFAULT_REFRESH_TTL_SECONDS,
            idle_timeout_seconds: DEFAULT_IDLE_TIMEOUT_SECONDS,
            absolute_timeout_seconds: DEFAULT_ABSOLUTE_TIMEOUT_SECONDS,
            crl_refresh_seconds: DEFAULT_CRL_REFRESH_SECONDS,
            crl_max_age_seconds: DEFAULT_CRL_MAX_AGE_SECONDS,
            cert_expiry_warning_seconds: DEFAULT_CERT_EXPIRY_WARNING_SECONDS,
            cookie_secure: true,
        }
    }

    /// Reject-all on missing trust anchors; never silently permissive.
    ///
    /// # Errors
    /// Returns `AuthError::Configuration` if any allowlist is empty or an
    /// endpoint URL does not parse.
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.trusted_proxies.is_empty() {
            return Err(AuthError::Configuration(
                "trusted proxy allowlist is empty".to_string(),
            ));
        }
        if self.admin_subjects.is_empty() {
            return Err(AuthError::Configuration(
                "admin subject allowlist is empty".to_string(),
            ));
        }
        Url::parse(&self.idp.issuer_url)
            .map_err(|err| AuthError::Configuration(format!("invalid IdP issuer URL: {err}")))?;
        Url::parse(&self.crl_url)
            .map_err(|err| AuthError::Configuration(format!("invalid CRL URL: {err}")))?;
        if self.max_cert_lifetime_seconds <= 0 {
            return Err(AuthError::Configuration(
                "certificate lifetime limit must be positive".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn with_max_cert_lifetime_seconds(mut self, seconds: i64) -> Self {
        self.max_cert_lifetime_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_access_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_idle_timeout_seconds(mut self, seconds: i64) -> Self {
        self.idle_timeout_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_absolute_timeout_seconds(mut self, seconds: i64) -> Self {
        self.absolute_timeout_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_crl_refresh_seconds(mut self, seconds: i64) -> Self {
        self.crl_refresh_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_crl_max_age_seconds(mut self, seconds: i64) -> Self {
        self.crl_max_age_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_cookie_secure(mut self, secure: bool) -> Self {
        self.cookie_secure = secure;
        self
    }

    #[must_use]
    pub fn idp(&self) -> &IdpConfig {
        &self.idp
    }

    #[must_use]
    pub fn crl_url(&self) -> &str {
        &self.crl_url
    }

    #[must_use]
    pub fn trusted_proxies(&self) -> &[IpAddr] {
        &self.trusted_proxies
    }

    #[must_use]
    pub fn admin_subjects(&self) -> &[String] {
        &self.admin_subjects
    }

    #[must_use]
    pub fn max_cert_lifetime_seconds(&self) -> i64 {
        self.max_cert_lifetime_seconds
    }

    #[must_use]
    pub fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl_seconds
    }

    #[must_use]
    pub fn refresh_ttl_seconds(&self) -> i64 {
        self.refresh_ttl_seconds
    }

    #[must_use]
    pub fn idle_timeout_seconds(&self) -> i64 {
        self.idle_timeout_seconds
    }

    #[must_use]
    pub fn absolute_timeout_seconds(&self) -> i64 {
        self.absolute_timeout_seconds
    }

    #[must_use]
    pub fn crl_refresh_seconds(&self) -> i64 {
        self.crl_refresh_seconds
    }

    #[must_use]
    pub fn crl_max_age_seconds(&self) -> i64 {
        self.crl_max_age_seconds
    }

    #[must_use]
    pub fn cert_expiry_warning_seconds(&self) -> i64 {
        self.cert_expiry_warning_seconds
    }

    #[must_use]
    pub fn cookie_secure(&self) -> bool {
        self.cookie_secure
    }
}
