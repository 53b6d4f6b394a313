//! The authentication decision point.
//!
//! Everything the HTTP surface does funnels through here: which login path is
//! active, whether a certificate earns a session, whether a presented token is
//! still good. The orchestrator owns no policy of its own; it sequences the
//! monitor, certificate validator, revocation cache, token service, and store,
//! and guarantees that every rejection is logged with a reason code while the
//! caller only ever learns "authentication failed".

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cert::{self, CertPolicy};
use crate::config::TrustConfig;
use crate::crl::{RevocationCache, RevocationStatus};
use crate::error::{AuthError, CertError, TokenError};
use crate::idp::CodeExchanger;
use crate::metrics::Metrics;
use crate::monitor::{HealthMonitor, HealthState};
use crate::store::{AuthMethod, MemorySessionStore, SessionRecord, SessionStore};
use crate::token::{binding_digest, IssuedTokens, TokenKind, TokenService};

/// Where a request came from, as attested by the trusted proxy layer.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub peer_addr: IpAddr,
    pub client_id: String,
}

impl RequestContext {
    #[must_use]
    pub fn binding(&self) -> String {
        binding_digest(self.peer_addr, &self.client_id)
    }
}

/// Login material presented by the client. Which variant is acceptable
/// depends on the current health state, not on what the client sent.
#[derive(Debug, Clone)]
pub enum Credentials {
    AuthorizationCode {
        code: String,
    },
    ClientCertificate {
        cert: String,
        verify_status: Option<String>,
    },
}

/// What a valid access token resolves to.
#[derive(Debug, Clone, Serialize)]
pub struct VerifiedSession {
    pub session_id: Uuid,
    pub subject: String,
    pub method: AuthMethod,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

pub struct Orchestrator {
    config: TrustConfig,
    monitor: Arc<HealthMonitor>,
    crl: Arc<RevocationCache>,
    tokens: Arc<TokenService>,
    store: Arc<dyn SessionStore>,
    idp: Arc<dyn CodeExchanger>,
    metrics: Arc<Metrics>,
    /// Operator kill switch for the certificate path, independent of health.
    fallback_disabled: AtomicBool,
}

impl Orchestrator {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: TrustConfig,
        monitor: Arc<HealthMonitor>,
        crl: Arc<RevocationCache>,
        tokens: Arc<TokenService>,
        store: Arc<dyn SessionStore>,
        idp: Arc<dyn CodeExchanger>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            monitor,
            crl,
            tokens,
            store,
            idp,
            metrics,
            fallback_disabled: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    #[must_use]
    pub fn config(&self) -> &TrustConfig {
        &self.config
    }

    #[must_use]
    pub fn crl(&self) -> &Arc<RevocationCache> {
        &self.crl
    }

    pub fn set_fallback_disabled(&self, disabled: bool) {
        self.fallback_disabled.store(disabled, Ordering::SeqCst);
        warn!(disabled, "certificate fallback path toggled by operator");
    }

    #[must_use]
    pub fn fallback_disabled(&self) -> bool {
        self.fallback_disabled.load(Ordering::SeqCst)
    }

    /// Authenticate a login attempt over whichever path is currently active.
    ///
    /// # Errors
    /// An [`AuthError`] whose reason code has been recorded; callers must
    /// answer with [`AuthError::GENERIC_MESSAGE`] only.
    pub async fn authenticate(
        &self,
        ctx: &RequestContext,
        credentials: &Credentials,
        now: DateTime<Utc>,
    ) -> Result<IssuedTokens, AuthError> {
        let result = match self.monitor.snapshot().state {
            HealthState::Normal => self.authenticate_oauth2(ctx, credentials, now).await,
            HealthState::Fallback => self.authenticate_fallback(ctx, credentials, now).await,
        };
        match result {
            Ok(issued) => {
                info!(session_id = %issued.session_id, "session established");
                Ok(issued)
            }
            Err(err) => Err(self.reject(ctx, err)),
        }
    }

    async fn authenticate_oauth2(
        &self,
        ctx: &RequestContext,
        credentials: &Credentials,
        now: DateTime<Utc>,
    ) -> Result<IssuedTokens, AuthError> {
        self.metrics.inc_auth_attempt_oauth2();
        let Credentials::AuthorizationCode { code } = credentials else {
            // Certificates are only honored while the IdP is down.
            return Err(AuthError::IdpExchange(
                "authorization code required".to_string(),
            ));
        };
        let identity = self.idp.exchange_code(code).await?;
        self.tokens
            .issue(
                &identity.subject,
                AuthMethod::Oauth2,
                &ctx.binding(),
                None,
                now,
            )
            .await
    }

    async fn authenticate_fallback(
        &self,
        ctx: &RequestContext,
        credentials: &Credentials,
        now: DateTime<Utc>,
    ) -> Result<IssuedTokens, AuthError> {
        self.metrics.inc_auth_attempt_mtls();
        if self.fallback_disabled() {
            return Err(AuthError::Configuration(
                "certificate fallback is disabled".to_string(),
            ));
        }
        let Credentials::ClientCertificate {
            cert,
            verify_status,
        } = credentials
        else {
            return Err(AuthError::IdpExchange(
                "identity provider unavailable".to_string(),
            ));
        };

        // Certificate headers are only believable from the proxy layer that
        // terminated TLS.
        if !self.config.trusted_proxies().contains(&ctx.peer_addr) {
            return Err(CertError::UntrustedSource.into());
        }

        let policy = CertPolicy {
            max_lifetime_seconds: self.config.max_cert_lifetime_seconds(),
            admin_subjects: self.config.admin_subjects().to_vec(),
        };
        let identity = cert::validate(
            cert,
            verify_status.as_deref(),
            &policy,
            now.timestamp(),
        )?;

        match self.crl.check(&identity.serial, now.timestamp()).await? {
            RevocationStatus::Revoked => return Err(CertError::Revoked.into()),
            RevocationStatus::NotRevoked => {}
        }

        let near_expiry =
            identity.not_after - now.timestamp() <= self.config.cert_expiry_warning_seconds();
        self.metrics
            .set_cert_expiry_warning(&identity.common_name, near_expiry);
        if near_expiry {
            warn!(
                subject = %identity.common_name,
                not_after = identity.not_after,
                "client certificate is nearing expiry"
            );
        }

        self.tokens
            .issue(
                &identity.common_name,
                AuthMethod::MtlsFallback,
                &ctx.binding(),
                Some(identity.fingerprint),
                now,
            )
            .await
    }

    /// Resolve an access token to its session, enforcing idle and absolute
    /// timeouts, and record the activity.
    ///
    /// # Errors
    /// An [`AuthError`] whose reason code has been recorded. Timeout failures
    /// destroy the session before returning.
    pub async fn verify_request(
        &self,
        ctx: &RequestContext,
        access_token: &str,
        now: DateTime<Utc>,
    ) -> Result<VerifiedSession, AuthError> {
        let result = self.verify_inner(ctx, access_token, now).await;
        result.map_err(|err| self.reject(ctx, err))
    }

    async fn verify_inner(
        &self,
        ctx: &RequestContext,
        access_token: &str,
        now: DateTime<Utc>,
    ) -> Result<VerifiedSession, AuthError> {
        let (_, record) = self
            .tokens
            .verify(access_token, TokenKind::Access, &ctx.binding(), now)
            .await?;

        self.enforce_session_timeouts(&record, now).await?;

        self.store.touch_activity(record.session_id, now).await?;

        Ok(VerifiedSession {
            session_id: record.session_id,
            subject: record.subject,
            method: record.method,
            issued_at: record.issued_at,
            expires_at: record.expires_at,
        })
    }

    /// Idle and absolute timeouts apply to every request that presents a
    /// session token, rotation included; otherwise periodic refreshes would
    /// keep a session alive forever. Violations destroy the session.
    async fn enforce_session_timeouts(
        &self,
        record: &SessionRecord,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        if now - record.last_activity_at > Duration::seconds(self.config.idle_timeout_seconds()) {
            self.tokens.destroy_session(record).await?;
            return Err(TokenError::IdleTimeout.into());
        }
        if now - record.issued_at > Duration::seconds(self.config.absolute_timeout_seconds()) {
            self.tokens.destroy_session(record).await?;
            return Err(TokenError::AbsoluteTimeout.into());
        }
        Ok(())
    }

    /// Rotate a refresh token into a new pair. The session behind the token
    /// must still be within its idle and absolute windows.
    ///
    /// # Errors
    /// Any refresh-token verification or timeout failure, with its reason
    /// recorded.
    pub async fn refresh(
        &self,
        ctx: &RequestContext,
        refresh_token: &str,
        now: DateTime<Utc>,
    ) -> Result<IssuedTokens, AuthError> {
        match self.refresh_inner(ctx, refresh_token, now).await {
            Ok(issued) => {
                self.metrics.inc_token_rotations();
                Ok(issued)
            }
            Err(err) => Err(self.reject(ctx, err)),
        }
    }

    async fn refresh_inner(
        &self,
        ctx: &RequestContext,
        refresh_token: &str,
        now: DateTime<Utc>,
    ) -> Result<IssuedTokens, AuthError> {
        let (_, record) = self
            .tokens
            .verify(refresh_token, TokenKind::Refresh, &ctx.binding(), now)
            .await?;
        self.enforce_session_timeouts(&record, now).await?;
        self.tokens.rotate(refresh_token, &ctx.binding(), now).await
    }

    /// Tear down the session behind a valid access token. Idempotent from the
    /// caller's perspective: an already-dead token is still a logout.
    ///
    /// # Errors
    /// `StoreUnavailable` if live revocations could not be made durable.
    pub async fn logout(
        &self,
        ctx: &RequestContext,
        access_token: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        match self
            .tokens
            .verify(access_token, TokenKind::Access, &ctx.binding(), now)
            .await
        {
            Ok((_, record)) => {
                self.tokens.destroy_session(&record).await?;
                info!(session_id = %record.session_id, "session terminated by logout");
                Ok(())
            }
            // The token no longer resolves to anything revocable.
            Err(AuthError::Token(_)) => Ok(()),
            Err(err) => Err(self.reject(ctx, err)),
        }
    }

    /// Destroy every live session, e.g. after a signing-key or store
    /// compromise. Returns the number of sessions revoked.
    ///
    /// # Errors
    /// `StoreUnavailable` if the store cannot complete the sweep.
    pub async fn revoke_all_sessions(&self) -> Result<u64, AuthError> {
        let count = self.store.revoke_all().await?;
        warn!(sessions = count, "all sessions revoked by operator");
        Ok(count)
    }

    /// Cheap store probe for the health surface. A revocation lookup against
    /// the nil jti exercises the same path every verification takes.
    pub async fn store_reachable(&self) -> bool {
        self.store.is_revoked(Uuid::nil()).await.is_ok()
    }

    /// Manual health override for operators; audited here.
    pub fn force_health_state(&self, state: HealthState, now: DateTime<Utc>) {
        warn!(?state, "health state forced by operator");
        self.monitor.force_state(state, now.timestamp());
        self.metrics
            .set_fallback_active(state == HealthState::Fallback);
    }

    fn reject(&self, ctx: &RequestContext, err: AuthError) -> AuthError {
        let reason = err.reason_code();
        self.metrics.inc_auth_failure(reason);
        if matches!(err, AuthError::Token(TokenError::Revoked)) {
            self.metrics.inc_revoked_token_rejections();
        }
        warn!(peer = %ctx.peer_addr, reason, "authentication rejected");
        err
    }
}

/// Wire a development orchestrator over the in-memory store.
///
/// # Errors
/// Returns an error if the token service cannot be constructed.
pub fn with_memory_store(
    config: TrustConfig,
    monitor: Arc<HealthMonitor>,
    crl: Arc<RevocationCache>,
    idp: Arc<dyn CodeExchanger>,
    metrics: Arc<Metrics>,
) -> anyhow::Result<(Orchestrator, Arc<MemorySessionStore>)> {
    let store = Arc::new(MemorySessionStore::new());
    let tokens = Arc::new(TokenService::new(
        store.clone(),
        config.access_ttl_seconds(),
        config.refresh_ttl_seconds(),
    )?);
    let orchestrator = Orchestrator::new(
        config,
        monitor,
        crl,
        tokens,
        store.clone(),
        idp,
        metrics,
    );
    Ok((orchestrator, store))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::tests::{CLEAN_SERIAL_PEM, SHORT_LIVED_PEM};
    use crate::config::IdpConfig;
    use crate::crl::tests::CRL_PEM;
    use crate::crl::{CrlFetcher, FetchFuture};
    use crate::idp::{ExchangeFuture, IdpIdentity};
    use secrecy::SecretString;
    use std::net::Ipv4Addr;
    use x509_parser::prelude::{parse_x509_certificate, parse_x509_pem};

    const PROXY: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));

    struct StubExchanger {
        outcome: Result<IdpIdentity, String>,
    }

    impl CodeExchanger for StubExchanger {
        fn exchange_code<'a>(&'a self, _code: &'a str) -> ExchangeFuture<'a> {
            let outcome = self
                .outcome
                .clone()
                .map_err(AuthError::IdpExchange);
            Box::pin(async move { outcome })
        }
    }

    struct FixedFetcher(Vec<u8>);

    impl CrlFetcher for FixedFetcher {
        fn fetch(&self) -> FetchFuture<'_> {
            Box::pin(async move { Ok(self.0.clone()) })
        }
    }

    fn config() -> TrustConfig {
        TrustConfig::new(
            IdpConfig::new(
                "https://idp.example.com".to_string(),
                "console".to_string(),
                SecretString::from("secret".to_string()),
                "https://console.example.com/callback".to_string(),
            ),
            "https://pki.example.com/crl.pem".to_string(),
            vec![PROXY],
            vec!["ops-admin".to_string()],
        )
    }

    fn build(
        exchanger: StubExchanger,
    ) -> (Orchestrator, Arc<crate::store::MemorySessionStore>) {
        let metrics = Arc::new(Metrics::default());
        let crl = Arc::new(RevocationCache::new(
            Arc::new(FixedFetcher(CRL_PEM.as_bytes().to_vec())),
            "https://pki.example.com/crl.pem".to_string(),
            60 * 60,
            24 * 60 * 60,
            metrics.clone(),
        ));
        with_memory_store(
            config(),
            Arc::new(HealthMonitor::new()),
            crl,
            Arc::new(exchanger),
            metrics,
        )
        .unwrap()
    }

    fn ok_exchanger() -> StubExchanger {
        StubExchanger {
            outcome: Ok(IdpIdentity {
                subject: "alice@example.com".to_string(),
                email: Some("alice@example.com".to_string()),
            }),
        }
    }

    fn ctx() -> RequestContext {
        RequestContext {
            peer_addr: PROXY,
            client_id: "console-ui".to_string(),
        }
    }

    fn cert_credentials() -> Credentials {
        Credentials::ClientCertificate {
            cert: CLEAN_SERIAL_PEM.to_string(),
            verify_status: Some("SUCCESS".to_string()),
        }
    }

    /// A time inside both the test certificate's validity window and the test
    /// CRL's freshness bound.
    fn cert_now() -> DateTime<Utc> {
        let (_, pem) = parse_x509_pem(CLEAN_SERIAL_PEM.as_bytes()).unwrap();
        let (_, cert) = parse_x509_certificate(&pem.contents).unwrap();
        DateTime::from_timestamp(cert.validity().not_before.timestamp() + 3600, 0).unwrap()
    }

    fn enter_fallback(orchestrator: &Orchestrator, now: DateTime<Utc>) {
        for offset in [0, 10, 20] {
            orchestrator
                .monitor()
                .record_probe(false, now.timestamp() + offset);
        }
        assert!(orchestrator.monitor().is_fallback());
    }

    #[tokio::test]
    async fn oauth2_login_issues_a_session() {
        let (orchestrator, _) = build(ok_exchanger());
        let now = Utc::now();
        let issued = orchestrator
            .authenticate(
                &ctx(),
                &Credentials::AuthorizationCode {
                    code: "abc".to_string(),
                },
                now,
            )
            .await
            .unwrap();

        let session = orchestrator
            .verify_request(&ctx(), &issued.access_token, now)
            .await
            .unwrap();
        assert_eq!(session.subject, "alice@example.com");
        assert_eq!(session.method, AuthMethod::Oauth2);
        assert_eq!(orchestrator.metrics().snapshot().auth_attempts_oauth2, 1);
    }

    #[tokio::test]
    async fn idp_rejection_fails_the_login() {
        let (orchestrator, _) = build(StubExchanger {
            outcome: Err("invalid code".to_string()),
        });
        let result = orchestrator
            .authenticate(
                &ctx(),
                &Credentials::AuthorizationCode {
                    code: "bad".to_string(),
                },
                Utc::now(),
            )
            .await;
        assert!(matches!(result, Err(AuthError::IdpExchange(_))));
        let snapshot = orchestrator.metrics().snapshot();
        assert_eq!(
            snapshot.auth_failures_by_reason.get("idp_exchange_failed"),
            Some(&1)
        );
    }

    #[tokio::test]
    async fn certificates_are_not_honored_while_normal() {
        let (orchestrator, _) = build(ok_exchanger());
        let result = orchestrator
            .authenticate(&ctx(), &cert_credentials(), cert_now())
            .await;
        assert!(matches!(result, Err(AuthError::IdpExchange(_))));
        assert_eq!(orchestrator.metrics().snapshot().auth_attempts_mtls, 0);
    }

    #[tokio::test]
    async fn fallback_login_with_allowlisted_certificate() {
        let (orchestrator, _) = build(ok_exchanger());
        let now = cert_now();
        enter_fallback(&orchestrator, now);

        let issued = orchestrator
            .authenticate(&ctx(), &cert_credentials(), now)
            .await
            .unwrap();
        assert!(!issued.access_token.is_empty());
        assert!(!issued.refresh_token.is_empty());
        assert_eq!(orchestrator.metrics().snapshot().auth_attempts_mtls, 1);
        // 1-day certificate is inside the 48h warning window.
        assert!(orchestrator
            .metrics()
            .snapshot()
            .cert_expiry_warnings
            .contains("ops-admin"));
    }

    #[tokio::test]
    async fn fallback_rejects_untrusted_peer() {
        let (orchestrator, _) = build(ok_exchanger());
        let now = cert_now();
        enter_fallback(&orchestrator, now);

        let stranger = RequestContext {
            peer_addr: IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9)),
            client_id: "console-ui".to_string(),
        };
        let result = orchestrator
            .authenticate(&stranger, &cert_credentials(), now)
            .await;
        assert!(matches!(
            result,
            Err(AuthError::Certificate(CertError::UntrustedSource))
        ));
    }

    #[tokio::test]
    async fn fallback_rejects_revoked_certificate() {
        // The first test certificate's serial 1a:2b:3c is on the CRL.
        let (orchestrator, _) = build(ok_exchanger());
        let now = cert_now();
        enter_fallback(&orchestrator, now);

        let result = orchestrator
            .authenticate(
                &ctx(),
                &Credentials::ClientCertificate {
                    cert: SHORT_LIVED_PEM.to_string(),
                    verify_status: Some("SUCCESS".to_string()),
                },
                now,
            )
            .await;
        assert!(matches!(
            result,
            Err(AuthError::Certificate(CertError::Revoked))
        ));
        let snapshot = orchestrator.metrics().snapshot();
        assert_eq!(snapshot.auth_failures_by_reason.get("cert_revoked"), Some(&1));
    }

    #[tokio::test]
    async fn disabled_fallback_rejects_certificates() {
        let (orchestrator, _) = build(ok_exchanger());
        let now = cert_now();
        enter_fallback(&orchestrator, now);
        orchestrator.set_fallback_disabled(true);

        let result = orchestrator
            .authenticate(&ctx(), &cert_credentials(), now)
            .await;
        assert!(matches!(result, Err(AuthError::Configuration(_))));

        orchestrator.set_fallback_disabled(false);
        assert!(orchestrator
            .authenticate(&ctx(), &cert_credentials(), now)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn idle_timeout_destroys_the_session() {
        let (orchestrator, store) = build(ok_exchanger());
        let now = Utc::now();
        let issued = orchestrator
            .authenticate(
                &ctx(),
                &Credentials::AuthorizationCode {
                    code: "abc".to_string(),
                },
                now,
            )
            .await
            .unwrap();

        store
            .touch_activity(issued.session_id, now - Duration::seconds(16 * 60))
            .await
            .unwrap();
        let result = orchestrator
            .verify_request(&ctx(), &issued.access_token, now)
            .await;
        assert!(matches!(
            result,
            Err(AuthError::Token(TokenError::IdleTimeout))
        ));

        // The destroyed session rejects the token outright afterwards.
        let result = orchestrator
            .verify_request(&ctx(), &issued.access_token, now)
            .await;
        assert!(matches!(result, Err(AuthError::Token(TokenError::Revoked))));
    }

    #[tokio::test]
    async fn absolute_timeout_destroys_the_session() {
        let (orchestrator, store) = build(ok_exchanger());
        let now = Utc::now();
        let issued = orchestrator
            .authenticate(
                &ctx(),
                &Credentials::AuthorizationCode {
                    code: "abc".to_string(),
                },
                now,
            )
            .await
            .unwrap();

        store.backdate_issued_at(issued.session_id, now - Duration::hours(5));
        let result = orchestrator
            .verify_request(&ctx(), &issued.access_token, now)
            .await;
        assert!(matches!(
            result,
            Err(AuthError::Token(TokenError::AbsoluteTimeout))
        ));
    }

    #[tokio::test]
    async fn refresh_rotates_and_counts() {
        let (orchestrator, _) = build(ok_exchanger());
        let now = Utc::now();
        let issued = orchestrator
            .authenticate(
                &ctx(),
                &Credentials::AuthorizationCode {
                    code: "abc".to_string(),
                },
                now,
            )
            .await
            .unwrap();

        let rotated = orchestrator
            .refresh(&ctx(), &issued.refresh_token, now)
            .await
            .unwrap();
        assert_eq!(orchestrator.metrics().snapshot().token_rotations, 1);

        // Replaying the old refresh token counts a revoked rejection.
        let result = orchestrator
            .refresh(&ctx(), &issued.refresh_token, now)
            .await;
        assert!(matches!(result, Err(AuthError::Token(TokenError::Revoked))));
        assert_eq!(
            orchestrator.metrics().snapshot().revoked_token_rejections,
            1
        );

        assert!(orchestrator
            .verify_request(&ctx(), &rotated.access_token, now)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn refresh_honors_idle_timeout() {
        let (orchestrator, store) = build(ok_exchanger());
        let now = Utc::now();
        let issued = orchestrator
            .authenticate(
                &ctx(),
                &Credentials::AuthorizationCode {
                    code: "abc".to_string(),
                },
                now,
            )
            .await
            .unwrap();

        store
            .touch_activity(issued.session_id, now - Duration::seconds(30 * 60))
            .await
            .unwrap();
        let result = orchestrator
            .refresh(&ctx(), &issued.refresh_token, now)
            .await;
        assert!(matches!(
            result,
            Err(AuthError::Token(TokenError::IdleTimeout))
        ));
        assert_eq!(orchestrator.metrics().snapshot().token_rotations, 0);

        // The violation destroyed the session; the refresh token is dead.
        let result = orchestrator
            .refresh(&ctx(), &issued.refresh_token, now)
            .await;
        assert!(matches!(result, Err(AuthError::Token(TokenError::Revoked))));
    }

    #[tokio::test]
    async fn refresh_honors_absolute_timeout() {
        let (orchestrator, store) = build(ok_exchanger());
        let now = Utc::now();
        let issued = orchestrator
            .authenticate(
                &ctx(),
                &Credentials::AuthorizationCode {
                    code: "abc".to_string(),
                },
                now,
            )
            .await
            .unwrap();

        store.backdate_issued_at(issued.session_id, now - Duration::hours(5));
        let result = orchestrator
            .refresh(&ctx(), &issued.refresh_token, now)
            .await;
        assert!(matches!(
            result,
            Err(AuthError::Token(TokenError::AbsoluteTimeout))
        ));
    }

    #[tokio::test]
    async fn logout_is_idempotent() {
        let (orchestrator, _) = build(ok_exchanger());
        let now = Utc::now();
        let issued = orchestrator
            .authenticate(
                &ctx(),
                &Credentials::AuthorizationCode {
                    code: "abc".to_string(),
                },
                now,
            )
            .await
            .unwrap();

        orchestrator
            .logout(&ctx(), &issued.access_token, now)
            .await
            .unwrap();
        let result = orchestrator
            .verify_request(&ctx(), &issued.access_token, now)
            .await;
        assert!(matches!(result, Err(AuthError::Token(TokenError::Revoked))));

        // Second logout with the dead token still succeeds.
        orchestrator
            .logout(&ctx(), &issued.access_token, now)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn revoke_all_counts_and_clears() {
        let (orchestrator, _) = build(ok_exchanger());
        let now = Utc::now();
        let first = orchestrator
            .authenticate(
                &ctx(),
                &Credentials::AuthorizationCode {
                    code: "abc".to_string(),
                },
                now,
            )
            .await
            .unwrap();
        orchestrator
            .authenticate(
                &ctx(),
                &Credentials::AuthorizationCode {
                    code: "def".to_string(),
                },
                now,
            )
            .await
            .unwrap();

        assert_eq!(orchestrator.revoke_all_sessions().await.unwrap(), 2);
        let result = orchestrator
            .verify_request(&ctx(), &first.access_token, now)
            .await;
        assert!(matches!(result, Err(AuthError::Token(TokenError::Revoked))));
    }

    #[tokio::test]
    async fn forced_fallback_enables_certificate_path() {
        let (orchestrator, _) = build(ok_exchanger());
        let now = cert_now();
        orchestrator.force_health_state(HealthState::Fallback, now);
        assert!(orchestrator.monitor().is_fallback());
        assert!(orchestrator.metrics().snapshot().fallback_active);

        assert!(orchestrator
            .authenticate(&ctx(), &cert_credentials(), now)
            .await
            .is_ok());

        orchestrator.force_health_state(HealthState::Normal, now);
        assert!(!orchestrator.monitor().is_fallback());
    }
}
