//! Certificate revocation cache.
//!
//! Fetches a CRL from the distribution point on a refresh schedule and answers
//! `is_revoked` for certificate serials. The one decision that matters here is
//! fail-secure: a CRL that cannot be fetched, or one older than the staleness
//! bound, makes every query answer "treat as revoked" until a fresh CRL is
//! obtained. Availability is sacrificed for integrity.

use anyhow::{anyhow, Context, Result};
use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use x509_parser::prelude::*;

use crate::error::AuthError;
use crate::metrics::Metrics;

const REFRESH_POLL_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationStatus {
    Revoked,
    NotRevoked,
}

/// A parsed CRL snapshot. Replaced atomically on refresh, never mutated.
#[derive(Debug, Clone)]
pub struct RevocationList {
    serials: BTreeSet<String>,
    pub issuer: String,
    /// The artifact's own freshness timestamp (`thisUpdate`), unix seconds.
    pub generated_at: i64,
    pub source_url: String,
    /// When this process obtained the artifact, unix seconds.
    pub fetched_at: i64,
}

impl RevocationList {
    /// Parse a DER or PEM-wrapped X.509 CRL.
    ///
    /// # Errors
    /// Returns an error if the artifact does not parse as a CRL.
    pub fn parse(bytes: &[u8], source_url: &str, fetched_at: i64) -> Result<Self> {
        let der = if bytes.starts_with(b"-----BEGIN") {
            let (_, pem) = x509_parser::pem::parse_x509_pem(bytes)
                .map_err(|err| anyhow!("invalid CRL PEM: {err}"))?;
            pem.contents
        } else {
            bytes.to_vec()
        };
        let (_, crl) =
            parse_x509_crl(&der).map_err(|err| anyhow!("invalid CRL encoding: {err}"))?;

        let serials = crl
            .iter_revoked_certificates()
            .map(RevokedCertificate::raw_serial_as_string)
            .collect();

        Ok(Self {
            serials,
            issuer: crl.issuer().to_string(),
            generated_at: crl.last_update().timestamp(),
            source_url: source_url.to_string(),
            fetched_at,
        })
    }

    #[must_use]
    pub fn contains(&self, serial: &str) -> bool {
        self.serials.contains(serial)
    }

    #[must_use]
    pub fn revoked_count(&self) -> usize {
        self.serials.len()
    }

    /// A stale CRL must not be trusted: unknown revocation status rejects.
    #[must_use]
    pub fn is_stale(&self, max_age_seconds: i64, now_unix_seconds: i64) -> bool {
        now_unix_seconds - self.generated_at > max_age_seconds
    }

    fn is_due_for_refresh(&self, refresh_seconds: i64, now_unix_seconds: i64) -> bool {
        now_unix_seconds - self.fetched_at >= refresh_seconds
    }
}

pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + 'a>>;

/// Seam for fetching the CRL artifact, so tests can exercise the cache
/// without a distribution point.
pub trait CrlFetcher: Send + Sync {
    fn fetch(&self) -> FetchFuture<'_>;
}

/// HTTPS GET against the distribution point with a bounded timeout.
#[derive(Debug, Clone)]
pub struct HttpCrlFetcher {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpCrlFetcher {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .build()
            .context("failed to build CRL fetch client")?;
        Ok(Self {
            client,
            url,
            timeout,
        })
    }
}

impl CrlFetcher for HttpCrlFetcher {
    fn fetch(&self) -> FetchFuture<'_> {
        Box::pin(async move {
            let response = self
                .client
                .get(&self.url)
                .timeout(self.timeout)
                .send()
                .await
                .context("CRL fetch failed")?
                .error_for_status()
                .context("CRL distribution point returned an error")?;
            let bytes = response.bytes().await.context("CRL body read failed")?;
            Ok(bytes.to_vec())
        })
    }
}

/// Shared cache over the current [`RevocationList`].
///
/// Refresh is single-flight: concurrent callers that find the cache due for
/// refresh await one in-flight fetch instead of issuing duplicates.
pub struct RevocationCache {
    fetcher: Arc<dyn CrlFetcher>,
    source_url: String,
    refresh_seconds: i64,
    max_age_seconds: i64,
    cache: RwLock<Option<Arc<RevocationList>>>,
    refresh_guard: Mutex<()>,
    metrics: Arc<Metrics>,
}

impl RevocationCache {
    #[must_use]
    pub fn new(
        fetcher: Arc<dyn CrlFetcher>,
        source_url: String,
        refresh_seconds: i64,
        max_age_seconds: i64,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            fetcher,
            source_url,
            refresh_seconds,
            max_age_seconds,
            cache: RwLock::new(None),
            refresh_guard: Mutex::new(()),
            metrics,
        }
    }

    /// Answer whether `serial` is revoked, refreshing the CRL first if due.
    ///
    /// # Errors
    /// Returns `AuthError::RevocationUnknown` when no sufficiently fresh CRL
    /// is available; callers must treat that identically to "revoked".
    pub async fn is_revoked(&self, serial: &str) -> Result<RevocationStatus, AuthError> {
        self.check(serial, chrono::Utc::now().timestamp()).await
    }

    pub(crate) async fn check(
        &self,
        serial: &str,
        now_unix_seconds: i64,
    ) -> Result<RevocationStatus, AuthError> {
        if self.needs_refresh(now_unix_seconds).await {
            self.refresh(now_unix_seconds).await;
        }

        let current = { self.cache.read().await.clone() };
        match current {
            Some(list) if !list.is_stale(self.max_age_seconds, now_unix_seconds) => {
                if list.contains(serial) {
                    Ok(RevocationStatus::Revoked)
                } else {
                    Ok(RevocationStatus::NotRevoked)
                }
            }
            _ => Err(AuthError::RevocationUnknown),
        }
    }

    /// Freshness of the cached CRL, for the health surface.
    pub async fn freshness(&self) -> Option<(i64, i64)> {
        let current = self.cache.read().await.clone();
        current.map(|list| (list.generated_at, list.fetched_at))
    }

    async fn needs_refresh(&self, now_unix_seconds: i64) -> bool {
        let current = self.cache.read().await.clone();
        match current {
            Some(list) => list.is_due_for_refresh(self.refresh_seconds, now_unix_seconds),
            None => true,
        }
    }

    async fn refresh(&self, now_unix_seconds: i64) {
        let _guard = self.refresh_guard.lock().await;

        // Another caller may have completed the refresh while we waited.
        if !self.needs_refresh(now_unix_seconds).await {
            return;
        }

        match self.fetcher.fetch().await {
            Ok(bytes) => {
                match RevocationList::parse(&bytes, &self.source_url, now_unix_seconds) {
                    Ok(list) => {
                        info!(
                            issuer = %list.issuer,
                            revoked = list.revoked_count(),
                            generated_at = list.generated_at,
                            "CRL refreshed"
                        );
                        let mut cache = self.cache.write().await;
                        *cache = Some(Arc::new(list));
                    }
                    Err(err) => {
                        self.metrics.inc_crl_fetch_failures();
                        warn!(error = %err, "fetched CRL did not parse; keeping prior list");
                    }
                }
            }
            Err(err) => {
                // Keep the prior list; the staleness bound decides whether it
                // may still be used.
                self.metrics.inc_crl_fetch_failures();
                warn!(error = %err, "CRL fetch failed");
            }
        }
    }

    /// Refresh the cached CRL when its TTL has lapsed. The background task
    /// calls this on a schedule so the first fallback login after an outage
    /// does not pay the fetch latency.
    pub async fn refresh_if_due(&self, now_unix_seconds: i64) {
        if self.needs_refresh(now_unix_seconds).await {
            self.refresh(now_unix_seconds).await;
        }
    }
}

/// Spawn the background refresh task.
pub fn spawn_refresh_loop(cache: Arc<RevocationCache>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            cache.refresh_if_due(chrono::Utc::now().timestamp()).await;
            tokio::time::sleep(REFRESH_POLL_INTERVAL).await;
        }
    })
}
