//! HTTP surface of the trust core.
//!
//! Routes are thin: extract, hand off to the orchestrator, translate the
//! outcome. Failed authentication always answers 401 with the generic
//! message; reasons live in the audit log only.

use anyhow::Result;
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    routing::{get, post},
    Extension, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;

use crate::idp::IdpClient;
use crate::orchestrator::Orchestrator;

pub mod handlers;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub idp: Arc<IdpClient>,
}

impl AppState {
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>, idp: Arc<IdpClient>) -> Self {
        Self { orchestrator, idp }
    }
}

/// Build the application router.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/metrics", get(handlers::metrics::metrics))
        .route("/v1/auth/authorize", get(handlers::login::authorize))
        .route("/v1/auth/login", post(handlers::login::login))
        .route("/v1/auth/session", get(handlers::session::session))
        .route("/v1/auth/refresh", post(handlers::session::refresh))
        .route("/v1/auth/logout", post(handlers::session::logout))
        .route("/v1/admin/fallback", post(handlers::admin::fallback))
        .route("/v1/admin/health", post(handlers::admin::health_override))
        .route(
            "/v1/admin/sessions/revoke-all",
            post(handlers::admin::revoke_all),
        )
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(state)),
        )
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, state: AppState) -> Result<()> {
    let app = router(state);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Gracefully shutdown");
    })
    .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
