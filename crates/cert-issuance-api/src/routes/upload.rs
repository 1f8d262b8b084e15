use axum::extract::{Multipart, State};
use axum::routing::post;
use axum::{Json, Router};
use cert_issuance::error::ValidationError;
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

const IMAGE_FIELD: &str = "image";

pub fn router() -> Router<AppState> {
    Router::new().route("/upload-image", post(upload_image))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadImageResponse {
    pub success: bool,
    pub image_url: String,
}

async fn upload_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadImageResponse>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let file_name = field.file_name().unwrap_or("image").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        if bytes.is_empty() {
            return Err(ValidationError::MissingField(IMAGE_FIELD).into());
        }

        let image_url = state
            .issuer
            .content
            .upload_binary(bytes.to_vec(), &file_name)
            .await?;
        tracing::info!(%image_url, size = bytes.len(), "image pinned");
        return Ok(Json(UploadImageResponse {
            success: true,
            image_url: image_url.to_string(),
        }));
    }

    Err(ValidationError::MissingField(IMAGE_FIELD).into())
}
