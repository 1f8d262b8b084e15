use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use cert_issuance::error::ValidationError;
use cert_issuance::{CertificateAttributes, CertificateRequest, ContentUri, ImageSource};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/mint-certification", post(mint_certification))
        .route("/mint-collection", post(mint_collection))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintCertificationRequest {
    #[serde(default)]
    pub image_url: String,
    #[serde(flatten)]
    pub attributes: CertificateAttributes,
    #[serde(default)]
    pub recipient_address: Option<String>,
    #[serde(default)]
    pub requester: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MintCertificationResponse {
    pub success: bool,
    pub run_id: String,
    pub mint_address: String,
    pub metadata_url: String,
    pub image_url: String,
    pub signature: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_error: Option<String>,
}

async fn mint_certification(
    State(state): State<AppState>,
    payload: Result<Json<MintCertificationRequest>, JsonRejection>,
) -> Result<Json<MintCertificationResponse>, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    if req.image_url.trim().is_empty() {
        return Err(ValidationError::MissingField("imageUrl").into());
    }
    let image = ContentUri::parse(&req.image_url)?;

    let request = CertificateRequest {
        requester: req.requester,
        image: ImageSource::Uri(image),
        attributes: req.attributes,
        recipient: req.recipient_address,
    };
    let issuer = &state.issuer;
    let outcome = issuer.pipeline.run(request, &issuer.signer).await?;

    Ok(Json(MintCertificationResponse {
        success: true,
        run_id: outcome.run_id.to_string(),
        mint_address: outcome.mint_address.to_string(),
        metadata_url: outcome.metadata_url.to_string(),
        image_url: outcome.image_url.to_string(),
        signature: outcome.signature.to_string(),
        transfer_signature: outcome.transfer_signature.map(|s| s.to_string()),
        transfer_error: outcome.transfer_error.map(|e| e.to_string()),
    }))
}

#[derive(Debug, Deserialize)]
pub struct MintCollectionRequest {
    pub name: String,
    pub symbol: String,
    pub uri: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MintCollectionResponse {
    pub success: bool,
    pub signature: String,
    pub mint_address: String,
}

async fn mint_collection(
    State(state): State<AppState>,
    payload: Result<Json<MintCollectionRequest>, JsonRejection>,
) -> Result<Json<MintCollectionResponse>, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let uri = ContentUri::parse(&req.uri)?;

    let issuer = &state.issuer;
    let receipt = issuer
        .minter
        .mint_collection(&req.name, &req.symbol, &uri, &issuer.signer)
        .await?;

    Ok(Json(MintCollectionResponse {
        success: true,
        signature: receipt.signature.to_string(),
        mint_address: receipt.mint.to_string(),
    }))
}
