use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "issuer": state.issuer.signer.pubkey().to_string(),
    }))
}

async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let ledger = state.issuer.ledger.latest_blockhash().await;
    if let Err(e) = &ledger {
        tracing::warn!(error = %e, "ledger not reachable");
    }

    let (status, code) = if ledger.is_ok() {
        ("ready", StatusCode::OK)
    } else {
        ("degraded", StatusCode::SERVICE_UNAVAILABLE)
    };
    let body = serde_json::json!({
        "status": status,
        "checks": {
            "ledger": if ledger.is_ok() { "ok" } else { "error" },
        }
    });

    (code, Json(body))
}
