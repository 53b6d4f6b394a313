use axum::{
    http::HeaderMap,
    response::{IntoResponse, Json},
    Extension,
};
use serde_json::json;

use crate::trustgate::AppState;
use crate::GIT_COMMIT_HASH;

// axum handler for health
pub async fn health(state: Extension<AppState>) -> impl IntoResponse {
    let monitor = state.orchestrator.monitor().snapshot();
    let crl = state.orchestrator.crl().freshness().await;
    let store_reachable = state.orchestrator.store_reachable().await;

    let body = Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "build": GIT_COMMIT_HASH,
        "idp": &*monitor,
        "crl": crl.map(|(generated_at, fetched_at)| json!({
            "generated_at": generated_at,
            "fetched_at": fetched_at,
        })),
        "store_reachable": store_reachable,
        "fallback_disabled": state.orchestrator.fallback_disabled(),
    }));

    let short_hash = if GIT_COMMIT_HASH.len() > 7 {
        &GIT_COMMIT_HASH[0..7]
    } else {
        ""
    };

    let mut headers = HeaderMap::new();
    if let Ok(value) = format!(
        "{}:{}:{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_hash
    )
    .parse()
    {
        headers.insert("X-App", value);
    }

    (headers, body)
}
