//! Operator controls: disabling the certificate fallback path, forcing the
//! health state, and the revoke-all sweep. Every call requires a live session
//! and is audited with the acting subject.

use axum::{
    extract::ConnectInfo,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use tracing::{instrument, warn};
use utoipa::ToSchema;

use super::{access_token, request_context, unauthorized};
use crate::monitor::HealthState;
use crate::orchestrator::VerifiedSession;
use crate::trustgate::AppState;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct FallbackRequest {
    pub disabled: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct HealthOverrideRequest {
    pub state: HealthOverrideState,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum HealthOverrideState {
    Normal,
    Fallback,
}

async fn require_session(
    state: &AppState,
    addr: SocketAddr,
    headers: &HeaderMap,
) -> Option<VerifiedSession> {
    let ctx = request_context(addr, headers);
    let token = access_token(headers)?;
    state
        .orchestrator
        .verify_request(&ctx, &token, Utc::now())
        .await
        .ok()
}

#[utoipa::path(
    post,
    path = "/v1/admin/fallback",
    request_body = FallbackRequest,
    responses(
        (status = 204, description = "Fallback path toggled"),
        (status = 401, description = "Authentication failed"),
    ),
    tag = "admin"
)]
#[instrument(skip_all)]
pub async fn fallback(
    state: Extension<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    payload: Option<Json<FallbackRequest>>,
) -> impl IntoResponse {
    let Some(session) = require_session(&state, addr, &headers).await else {
        return unauthorized().into_response();
    };
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };
    warn!(
        subject = %session.subject,
        disabled = request.disabled,
        "fallback toggle requested"
    );
    state.orchestrator.set_fallback_disabled(request.disabled);
    StatusCode::NO_CONTENT.into_response()
}

#[utoipa::path(
    post,
    path = "/v1/admin/health",
    request_body = HealthOverrideRequest,
    responses(
        (status = 204, description = "Health state forced"),
        (status = 401, description = "Authentication failed"),
    ),
    tag = "admin"
)]
#[instrument(skip_all)]
pub async fn health_override(
    state: Extension<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    payload: Option<Json<HealthOverrideRequest>>,
) -> impl IntoResponse {
    let Some(session) = require_session(&state, addr, &headers).await else {
        return unauthorized().into_response();
    };
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };
    let health_state = match request.state {
        HealthOverrideState::Normal => HealthState::Normal,
        HealthOverrideState::Fallback => HealthState::Fallback,
    };
    warn!(
        subject = %session.subject,
        state = ?health_state,
        "health override requested"
    );
    state.orchestrator.force_health_state(health_state, Utc::now());
    StatusCode::NO_CONTENT.into_response()
}

#[utoipa::path(
    post,
    path = "/v1/admin/sessions/revoke-all",
    responses(
        (status = 200, description = "All sessions revoked"),
        (status = 401, description = "Authentication failed"),
    ),
    tag = "admin"
)]
#[instrument(skip_all)]
pub async fn revoke_all(
    state: Extension<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let Some(session) = require_session(&state, addr, &headers).await else {
        return unauthorized().into_response();
    };
    warn!(subject = %session.subject, "revoke-all requested");
    match state.orchestrator.revoke_all_sessions().await {
        Ok(revoked) => Json(json!({ "revoked": revoked })).into_response(),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            "session store unavailable".to_string(),
        )
            .into_response(),
    }
}
