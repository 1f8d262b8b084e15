use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use cert_issuance::metadata::parse_address;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/transfer-nft", post(transfer_nft))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    /// Falls back to the configured default mint when absent.
    #[serde(default)]
    pub mint_address: Option<String>,
    #[serde(default)]
    pub recipient_address: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResponse {
    pub success: bool,
    pub signature: String,
    pub mint_address: String,
    pub recipient_address: String,
    pub created_holding_account: bool,
}

async fn transfer_nft(
    State(state): State<AppState>,
    payload: Result<Json<TransferRequest>, JsonRejection>,
) -> Result<Json<TransferResponse>, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let issuer = &state.issuer;

    let mint = match req.mint_address.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => parse_address("mintAddress", raw)?,
        _ => issuer.default_mint.ok_or(ApiError::NoDefaultMint)?,
    };
    let recipient = parse_address("recipientAddress", &req.recipient_address)?;

    let receipt = issuer
        .transferor
        .transfer(&mint, &recipient, &issuer.signer)
        .await?;

    Ok(Json(TransferResponse {
        success: true,
        signature: receipt.signature.to_string(),
        mint_address: receipt.mint.to_string(),
        recipient_address: receipt.recipient.to_string(),
        created_holding_account: receipt.created_holding_account,
    }))
}
