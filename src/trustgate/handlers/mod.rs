pub mod admin;
pub mod health;
pub mod login;
pub mod metrics;
pub mod session;

// common extraction helpers for the handlers

use axum::http::{header, HeaderMap, StatusCode};
use std::net::SocketAddr;

use crate::error::AuthError;
use crate::orchestrator::RequestContext;

/// Cookie carrying the access token for browser clients.
pub const SESSION_COOKIE: &str = "trustgate_session";

/// The uniform answer for any failed authentication.
pub(crate) fn unauthorized() -> (StatusCode, String) {
    (
        StatusCode::UNAUTHORIZED,
        AuthError::GENERIC_MESSAGE.to_string(),
    )
}

pub(crate) fn request_context(addr: SocketAddr, headers: &HeaderMap) -> RequestContext {
    let client_id = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    RequestContext {
        peer_addr: addr.ip(),
        client_id,
    }
}

/// Access token from the `Authorization: Bearer` header or the session
/// cookie, in that order.
pub(crate) fn access_token(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    {
        if let Some(token) = value.strip_prefix("Bearer ") {
            return Some(token.to_string());
        }
    }
    cookie_value(headers, SESSION_COOKIE)
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

/// `Set-Cookie` value binding the access token to the browser. `Strict`
/// same-site: the console is first-party only.
pub(crate) fn session_cookie(token: &str, max_age_seconds: i64, secure: bool) -> String {
    let secure_attr = if secure { "; Secure" } else { "" };
    format!(
        "{SESSION_COOKIE}={token}; Path=/; Max-Age={max_age_seconds}; HttpOnly; SameSite=Strict{secure_attr}"
    )
}

pub(crate) fn clear_session_cookie(secure: bool) -> String {
    session_cookie("", 0, secure)
}
