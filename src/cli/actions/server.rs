//! Wires the trust core together and runs the HTTP server.

use crate::cli::actions::Action;
use crate::config::{IdpConfig, TrustConfig};
use crate::crl::{self, HttpCrlFetcher, RevocationCache};
use crate::idp::IdpClient;
use crate::metrics::Metrics;
use crate::monitor::{spawn_probe_loop, HealthMonitor};
use crate::orchestrator::Orchestrator;
use crate::store::{ensure_schema, PgSessionStore};
use crate::token::TokenService;
use crate::trustgate::{self, AppState};
use anyhow::{Context, Result};
use secrecy::SecretString;
use sqlx::postgres::PgPoolOptions;
use std::{net::IpAddr, sync::Arc, time::Duration};

const CRL_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub idp_issuer_url: String,
    pub idp_client_id: String,
    pub idp_client_secret: SecretString,
    pub idp_redirect_uri: String,
    pub crl_url: String,
    pub trusted_proxies: Vec<IpAddr>,
    pub admin_subjects: Vec<String>,
    pub cookie_secure: bool,
}

/// Handle the server action
///
/// # Errors
/// Returns an error if the configuration is invalid, the database is
/// unreachable, or the listener cannot bind.
pub async fn handle(action: Action) -> Result<()> {
    let Action::Server(args) = action;

    let idp_config = IdpConfig::new(
        args.idp_issuer_url,
        args.idp_client_id,
        args.idp_client_secret,
        args.idp_redirect_uri,
    );

    let config = TrustConfig::new(
        idp_config,
        args.crl_url.clone(),
        args.trusted_proxies,
        args.admin_subjects,
    )
    .with_cookie_secure(args.cookie_secure);

    config.validate()?;

    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&args.dsn)
        .await
        .context("failed to connect to the session database")?;

    ensure_schema(&pool).await?;

    let store = Arc::new(PgSessionStore::new(pool));
    let tokens = Arc::new(TokenService::new(
        store.clone(),
        config.access_ttl_seconds(),
        config.refresh_ttl_seconds(),
    )?);

    let idp = Arc::new(IdpClient::new(config.idp().clone())?);
    let metrics = Arc::new(Metrics::default());
    let monitor = Arc::new(HealthMonitor::new());

    let fetcher = Arc::new(HttpCrlFetcher::new(args.crl_url, CRL_FETCH_TIMEOUT)?);
    let crl = Arc::new(RevocationCache::new(
        fetcher,
        config.crl_url().to_string(),
        config.crl_refresh_seconds(),
        config.crl_max_age_seconds(),
        metrics.clone(),
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        config,
        monitor.clone(),
        crl.clone(),
        tokens,
        store,
        idp.clone(),
        metrics.clone(),
    ));

    spawn_probe_loop(monitor, idp.clone(), metrics);
    crl::spawn_refresh_loop(crl);

    trustgate::new(args.port, AppState::new(orchestrator, idp)).await
}
