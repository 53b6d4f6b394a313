use axum::{
    extract::ConnectInfo,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

use super::{request_context, session_cookie, unauthorized};
use crate::idp;
use crate::orchestrator::Credentials;
use crate::token::IssuedTokens;
use crate::trustgate::AppState;

/// Proxy headers carrying the mTLS material on the fallback path.
pub const CLIENT_CERT_HEADER: &str = "x-client-cert";
pub const CLIENT_VERIFY_HEADER: &str = "x-client-verify";

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AuthorizeResponse {
    pub authorize_url: String,
    pub state: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    /// OAuth2 authorization code, present on the normal path.
    pub code: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TokenResponse {
    pub session_id: Uuid,
    pub access_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_expires_at: DateTime<Utc>,
}

impl From<IssuedTokens> for TokenResponse {
    fn from(issued: IssuedTokens) -> Self {
        Self {
            session_id: issued.session_id,
            access_token: issued.access_token,
            access_expires_at: issued.access_expires_at,
            refresh_token: issued.refresh_token,
            refresh_expires_at: issued.refresh_expires_at,
        }
    }
}

#[utoipa::path(
    get,
    path = "/v1/auth/authorize",
    responses(
        (status = 200, description = "Authorization redirect target", body = AuthorizeResponse),
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn authorize(state: Extension<AppState>) -> impl IntoResponse {
    let Ok(login_state) = idp::generate_state() else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to generate state".to_string(),
        )
            .into_response();
    };
    Json(AuthorizeResponse {
        authorize_url: state.idp.authorize_url(&login_state),
        state: login_state,
    })
    .into_response()
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session established", body = TokenResponse),
        (status = 401, description = "Authentication failed"),
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn login(
    state: Extension<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let ctx = request_context(addr, &headers);
    let Some(credentials) = extract_credentials(&headers, payload.as_deref()) else {
        return (StatusCode::BAD_REQUEST, "Missing credentials".to_string()).into_response();
    };

    match state
        .orchestrator
        .authenticate(&ctx, &credentials, Utc::now())
        .await
    {
        Ok(issued) => token_response(&state, issued).into_response(),
        Err(_) => unauthorized().into_response(),
    }
}

fn extract_credentials(headers: &HeaderMap, payload: Option<&LoginRequest>) -> Option<Credentials> {
    if let Some(code) = payload.and_then(|request| request.code.clone()) {
        return Some(Credentials::AuthorizationCode { code });
    }
    let cert = headers
        .get(CLIENT_CERT_HEADER)
        .and_then(|value| value.to_str().ok())?;
    let verify_status = headers
        .get(CLIENT_VERIFY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string);
    Some(Credentials::ClientCertificate {
        // Proxies URL-encode the PEM they forward.
        cert: cert.replace("%0A", "\n").replace("%20", " "),
        verify_status,
    })
}

pub(super) fn token_response(state: &AppState, issued: IssuedTokens) -> impl IntoResponse {
    let config = state.orchestrator.config();
    let cookie = session_cookie(
        &issued.access_token,
        config.access_ttl_seconds(),
        config.cookie_secure(),
    );
    let mut headers = HeaderMap::new();
    if let Ok(value) = cookie.parse() {
        headers.insert(header::SET_COOKIE, value);
    }
    (headers, Json(TokenResponse::from(issued)))
}
