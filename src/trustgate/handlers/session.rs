use axum::{
    extract::ConnectInfo,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tracing::instrument;
use utoipa::ToSchema;

use super::{access_token, clear_session_cookie, request_context, unauthorized};
use crate::trustgate::AppState;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[utoipa::path(
    get,
    path = "/v1/auth/session",
    responses(
        (status = 200, description = "The session behind the presented access token"),
        (status = 401, description = "Authentication failed"),
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn session(
    state: Extension<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let ctx = request_context(addr, &headers);
    let Some(token) = access_token(&headers) else {
        return unauthorized().into_response();
    };
    match state
        .orchestrator
        .verify_request(&ctx, &token, Utc::now())
        .await
    {
        Ok(session) => Json(session).into_response(),
        Err(_) => unauthorized().into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Rotated token pair", body = super::login::TokenResponse),
        (status = 401, description = "Authentication failed"),
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn refresh(
    state: Extension<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    payload: Option<Json<RefreshRequest>>,
) -> impl IntoResponse {
    let ctx = request_context(addr, &headers);
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };
    match state
        .orchestrator
        .refresh(&ctx, &request.refresh_token, Utc::now())
        .await
    {
        Ok(issued) => super::login::token_response(&state, issued).into_response(),
        Err(_) => unauthorized().into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Session terminated"),
        (status = 401, description = "Authentication failed"),
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn logout(
    state: Extension<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let ctx = request_context(addr, &headers);
    let Some(token) = access_token(&headers) else {
        return unauthorized().into_response();
    };
    match state.orchestrator.logout(&ctx, &token, Utc::now()).await {
        Ok(()) => {
            let mut response_headers = HeaderMap::new();
            let cookie = clear_session_cookie(state.orchestrator.config().cookie_secure());
            if let Ok(value) = cookie.parse() {
                response_headers.insert(header::SET_COOKIE, value);
            }
            (StatusCode::NO_CONTENT, response_headers).into_response()
        }
        Err(_) => unauthorized().into_response(),
    }
}
