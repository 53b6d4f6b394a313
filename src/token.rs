//! Signed session tokens.
//!
//! Tokens are PASETO v4.public: Ed25519-signed, claims readable by anyone,
//! forgeable by no one without the signing key. The key pair is generated at
//! startup and never persisted, so a restart invalidates all outstanding
//! tokens; sessions are server-side state and the console re-authenticates.
//!
//! Verification is layered: signature, expiry, revocation list, session
//! lookup, binding. A binding mismatch is treated as evidence of token theft
//! and destroys the session it points at.

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use pasetors::keys::{AsymmetricKeyPair, AsymmetricPublicKey, AsymmetricSecretKey, Generate};
use pasetors::token::UntrustedToken;
use pasetors::version4::{PublicToken, V4};
use pasetors::Public;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::error::{AuthError, TokenError};
use crate::store::{AuthMethod, SessionRecord, SessionStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }
}

/// Claims carried inside every token. `sid` ties the token back to its
/// server-side session; nothing here is trusted until the signature checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub jti: Uuid,
    pub sid: Uuid,
    pub iat: DateTime<Utc>,
    pub exp: DateTime<Utc>,
    pub method: AuthMethod,
    pub kind: TokenKind,
    pub binding: String,
}

/// The pair handed back to a freshly authenticated client.
#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub session_id: Uuid,
    pub access_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_expires_at: DateTime<Utc>,
}

pub struct TokenService {
    signing_key: AsymmetricSecretKey<V4>,
    public_key: AsymmetricPublicKey<V4>,
    store: Arc<dyn SessionStore>,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
}

impl TokenService {
    /// Generate a fresh signing key pair and bind the service to a store.
    ///
    /// # Errors
    /// Returns an error if key generation fails.
    pub fn new(
        store: Arc<dyn SessionStore>,
        access_ttl_seconds: i64,
        refresh_ttl_seconds: i64,
    ) -> anyhow::Result<Self> {
        let pair = AsymmetricKeyPair::<V4>::generate()
            .map_err(|err| anyhow::anyhow!("failed to generate signing key pair: {err}"))?;
        Ok(Self {
            signing_key: pair.secret,
            public_key: pair.public,
            store,
            access_ttl_seconds,
            refresh_ttl_seconds,
        })
    }

    /// Create a session and sign its access/refresh pair.
    ///
    /// # Errors
    /// `StoreUnavailable` if the session cannot be persisted; no tokens are
    /// returned in that case.
    pub async fn issue(
        &self,
        subject: &str,
        method: AuthMethod,
        binding_digest: &str,
        certificate_fingerprint: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<IssuedTokens, AuthError> {
        let session_id = Uuid::new_v4();
        let access_jti = Uuid::new_v4();
        let refresh_jti = Uuid::new_v4();
        let access_expires_at = now + Duration::seconds(self.access_ttl_seconds);
        let refresh_expires_at = now + Duration::seconds(self.refresh_ttl_seconds);

        let access_token = self.sign(&TokenClaims {
            sub: subject.to_string(),
            jti: access_jti,
            sid: session_id,
            iat: now,
            exp: access_expires_at,
            method,
            kind: TokenKind::Access,
            binding: binding_digest.to_string(),
        })?;
        let refresh_token = self.sign(&TokenClaims {
            sub: subject.to_string(),
            jti: refresh_jti,
            sid: session_id,
            iat: now,
            exp: refresh_expires_at,
            method,
            kind: TokenKind::Refresh,
            binding: binding_digest.to_string(),
        })?;

        let record = SessionRecord {
            session_id,
            subject: subject.to_string(),
            method,
            access_jti,
            refresh_jti,
            issued_at: now,
            last_activity_at: now,
            expires_at: refresh_expires_at,
            binding_digest: binding_digest.to_string(),
            certificate_fingerprint,
        };
        self.store.create(&record).await?;

        Ok(IssuedTokens {
            session_id,
            access_token,
            access_expires_at,
            refresh_token,
            refresh_expires_at,
        })
    }

    /// Verify a token end to end and return its claims and backing session.
    ///
    /// # Errors
    /// The [`TokenError`] for the first failing layer, `StoreUnavailable` if
    /// the store cannot answer, in which case the token is rejected.
    pub async fn verify(
        &self,
        token: &str,
        expected_kind: TokenKind,
        binding_digest: &str,
        now: DateTime<Utc>,
    ) -> Result<(TokenClaims, SessionRecord), AuthError> {
        let untrusted = UntrustedToken::<Public, V4>::try_from(token)
            .map_err(|_| TokenError::Malformed)?;
        let trusted = PublicToken::verify(&self.public_key, &untrusted, None, None)
            .map_err(|_| TokenError::Signature)?;
        let claims: TokenClaims =
            serde_json::from_str(trusted.payload()).map_err(|_| TokenError::Malformed)?;

        if claims.kind != expected_kind {
            return Err(TokenError::Malformed.into());
        }
        if now >= claims.exp {
            return Err(TokenError::Expired.into());
        }
        if self.store.is_revoked(claims.jti).await? {
            return Err(TokenError::Revoked.into());
        }

        let record = self
            .store
            .lookup(claims.sid)
            .await?
            .ok_or(TokenError::UnknownSession)?;

        if claims.binding != binding_digest || record.binding_digest != binding_digest {
            // A signed, unexpired, unrevoked token presented from the wrong
            // place. Assume theft and destroy the session it points at.
            warn!(
                session_id = %record.session_id,
                subject = %record.subject,
                "token binding mismatch; destroying session"
            );
            self.destroy_session(&record).await?;
            return Err(TokenError::BindingMismatch.into());
        }

        Ok((claims, record))
    }

    /// Rotate a refresh token: revoke the outgoing pair, then issue and
    /// persist the replacement.
    ///
    /// # Errors
    /// Any verification failure of the presented refresh token, or
    /// `StoreUnavailable`. If the rotation update itself fails the session is
    /// deleted so no half-rotated state survives.
    pub async fn rotate(
        &self,
        refresh_token: &str,
        binding_digest: &str,
        now: DateTime<Utc>,
    ) -> Result<IssuedTokens, AuthError> {
        let (claims, record) = self
            .verify(refresh_token, TokenKind::Refresh, binding_digest, now)
            .await?;

        // Revocations are durable before any replacement token exists, so a
        // crash here strands the session but never leaves the old pair live
        // alongside a new one.
        self.store.mark_revoked(record.refresh_jti, claims.exp).await?;
        self.store
            .mark_revoked(
                record.access_jti,
                now + Duration::seconds(self.access_ttl_seconds),
            )
            .await?;

        let access_jti = Uuid::new_v4();
        let refresh_jti = Uuid::new_v4();
        let access_expires_at = now + Duration::seconds(self.access_ttl_seconds);
        let refresh_expires_at = now + Duration::seconds(self.refresh_ttl_seconds);

        let rotated = self
            .store
            .rotate_jtis(record.session_id, access_jti, refresh_jti, refresh_expires_at)
            .await;
        match rotated {
            Ok(true) => {}
            Ok(false) => return Err(TokenError::UnknownSession.into()),
            Err(err) => {
                // The old pair is already revoked; remove the session rather
                // than leave it pointing at tokens that will never exist.
                let _ = self.store.delete(record.session_id).await;
                return Err(err.into());
            }
        }

        let access_token = self.sign(&TokenClaims {
            sub: record.subject.clone(),
            jti: access_jti,
            sid: record.session_id,
            iat: now,
            exp: access_expires_at,
            method: record.method,
            kind: TokenKind::Access,
            binding: binding_digest.to_string(),
        })?;
        let refresh_token = self.sign(&TokenClaims {
            sub: record.subject,
            jti: refresh_jti,
            sid: record.session_id,
            iat: now,
            exp: refresh_expires_at,
            method: record.method,
            kind: TokenKind::Refresh,
            binding: binding_digest.to_string(),
        })?;

        Ok(IssuedTokens {
            session_id: record.session_id,
            access_token,
            access_expires_at,
            refresh_token,
            refresh_expires_at,
        })
    }

    /// Revoke both live token identifiers and delete the session.
    ///
    /// # Errors
    /// `StoreUnavailable` if the revocations cannot be made durable.
    pub async fn destroy_session(&self, record: &SessionRecord) -> Result<(), AuthError> {
        self.store
            .mark_revoked(record.access_jti, record.expires_at)
            .await?;
        self.store
            .mark_revoked(record.refresh_jti, record.expires_at)
            .await?;
        self.store.delete(record.session_id).await?;
        Ok(())
    }

    fn sign(&self, claims: &TokenClaims) -> Result<String, AuthError> {
        let payload = serde_json::to_vec(claims)
            .map_err(|err| AuthError::Configuration(format!("claims serialization: {err}")))?;
        PublicToken::sign(&self.signing_key, &payload, None, None)
            .map_err(|err| AuthError::Configuration(format!("token signing: {err}")))
    }
}

/// Digest binding a token to the client that earned it. The console sits
/// behind trusted proxies, so the observed address is stable per client.
#[must_use]
pub fn binding_digest(remote_addr: IpAddr, client_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(remote_addr.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(client_id.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hasher.finalize())
}
