use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use cert_issuance::metadata::parse_address;
use cert_issuance::reservations::CertificateView;
use cert_issuance::ReservationView;
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/nfts", get(list_nfts))
        .route("/reservations", get(list_reservations))
}

#[derive(Debug, Deserialize)]
pub struct WalletQuery {
    #[serde(default)]
    pub wallet: String,
}

async fn list_nfts(
    State(state): State<AppState>,
    Query(query): Query<WalletQuery>,
) -> Result<Json<Vec<CertificateView>>, ApiError> {
    let wallet = parse_address("wallet", &query.wallet)?;
    let certificates = state.issuer.reservations.certificates(&wallet).await?;
    Ok(Json(certificates))
}

async fn list_reservations(
    State(state): State<AppState>,
    Query(query): Query<WalletQuery>,
) -> Result<Json<Vec<ReservationView>>, ApiError> {
    let wallet = parse_address("wallet", &query.wallet)?;
    let views = state.issuer.reservations.list_by_owner(&wallet).await?;
    Ok(Json(views))
}
