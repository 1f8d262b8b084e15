pub mod health;
pub mod mint;
pub mod nfts;
pub mod transfer;
pub mod upload;

use axum::extract::DefaultBodyLimit;
use axum::Router;

use crate::state::AppState;

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    let body_limit = state.max_upload_bytes;
    Router::new()
        .merge(health::router())
        .merge(upload::router())
        .merge(mint::router())
        .merge(transfer::router())
        .merge(nfts::router())
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
