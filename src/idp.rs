//! Identity-provider collaborator.
//!
//! The IdP is an opaque OAuth2/OIDC counterparty: this module only knows how
//! to probe its discovery endpoint, run the authorization-code exchange, and
//! resolve the resulting access token to a subject. Every call carries a
//! bounded timeout; a timeout is failure input to the caller's state machine,
//! never an error surfaced raw.

use rand::{rngs::OsRng, RngCore};
use secrecy::ExposeSecret;
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

use crate::config::IdpConfig;
use crate::error::AuthError;

/// What an authenticated exchange resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdpIdentity {
    pub subject: String,
    pub email: Option<String>,
}

pub type ExchangeFuture<'a> = Pin<Box<dyn Future<Output = Result<IdpIdentity, AuthError>> + Send + 'a>>;

/// Seam for the authorization-code exchange so the orchestrator can be tested
/// without a reachable IdP.
pub trait CodeExchanger: Send + Sync {
    fn exchange_code<'a>(&'a self, code: &'a str) -> ExchangeFuture<'a>;
}

#[derive(Debug, Clone)]
pub struct IdpClient {
    client: reqwest::Client,
    config: IdpConfig,
    issuer_base: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct UserinfoResponse {
    sub: String,
    email: Option<String>,
}

impl IdpClient {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: IdpConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .build()?;
        let issuer_base = config.issuer_url.trim_end_matches('/').to_string();
        Ok(Self {
            client,
            config,
            issuer_base,
        })
    }

    /// Probe IdP availability. Timeouts and transport errors are plain
    /// failures; the health monitor owns the interpretation.
    pub async fn probe(&self) -> bool {
        let url = format!("{}/.well-known/openid-configuration", self.issuer_base);
        let result = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(self.config.probe_timeout_seconds))
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                debug!(status = %response.status(), "IdP probe returned non-success");
                false
            }
            Err(err) => {
                debug!(error = %err, "IdP probe failed");
                false
            }
        }
    }

    /// The URL operators are redirected to for the normal login path.
    #[must_use]
    pub fn authorize_url(&self, state: &str) -> String {
        format!(
            "{}/oauth2/authorize?response_type=code&client_id={}&redirect_uri={}&scope=openid&state={state}",
            self.issuer_base, self.config.client_id, self.config.redirect_uri
        )
    }

    /// Run the authorization-code exchange and resolve the subject.
    ///
    /// # Errors
    /// `UpstreamTimeout` on timeout, `IdpExchange` on any rejection or
    /// malformed response.
    pub async fn exchange(&self, code: &str) -> Result<IdpIdentity, AuthError> {
        let timeout = Duration::from_secs(self.config.exchange_timeout_seconds);
        let token_url = format!("{}/oauth2/token", self.issuer_base);

        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.expose_secret()),
        ];

        let response = self
            .client
            .post(&token_url)
            .timeout(timeout)
            .form(&params)
            .send()
            .await
            .map_err(map_transport_error)?;
        if !response.status().is_success() {
            return Err(AuthError::IdpExchange(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|_| AuthError::IdpExchange("malformed token response".to_string()))?;

        let userinfo_url = format!("{}/oauth2/userinfo", self.issuer_base);
        let response = self
            .client
            .get(&userinfo_url)
            .timeout(timeout)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .map_err(map_transport_error)?;
        if !response.status().is_success() {
            return Err(AuthError::IdpExchange(format!(
                "userinfo endpoint returned {}",
                response.status()
            )));
        }
        let userinfo: UserinfoResponse = response
            .json()
            .await
            .map_err(|_| AuthError::IdpExchange("malformed userinfo response".to_string()))?;

        Ok(IdpIdentity {
            subject: userinfo.sub,
            email: userinfo.email,
        })
    }
}

impl CodeExchanger for IdpClient {
    fn exchange_code<'a>(&'a self, code: &'a str) -> ExchangeFuture<'a> {
        Box::pin(self.exchange(code))
    }
}

fn map_transport_error(err: reqwest::Error) -> AuthError {
    if err.is_timeout() {
        AuthError::UpstreamTimeout("identity provider".to_string())
    } else {
        AuthError::IdpExchange("identity provider unreachable".to_string())
    }
}

/// Random `state` parameter for the authorization redirect.
///
/// # Errors
/// Returns an error if the system RNG fails.
pub fn generate_state() -> anyhow::Result<String> {
    use base64::Engine;
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|err| anyhow::anyhow!("failed to generate state: {err}"))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}
