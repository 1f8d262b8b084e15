use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use cert_issuance::error::{LedgerError, MintError, TransferError, UploadError, ValidationError};
use cert_issuance::{Error, PipelineFailure};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("no mint address given and no default mint configured")]
    NoDefaultMint,
    #[error(transparent)]
    Issuance(#[from] Error),
}

impl From<PipelineFailure> for ApiError {
    fn from(failure: PipelineFailure) -> Self {
        ApiError::Issuance(failure.error)
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError::Issuance(e.into())
    }
}

impl From<UploadError> for ApiError {
    fn from(e: UploadError) -> Self {
        ApiError::Issuance(e.into())
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        ApiError::Issuance(e.into())
    }
}

impl From<MintError> for ApiError {
    fn from(e: MintError) -> Self {
        ApiError::Issuance(e.into())
    }
}

impl From<TransferError> for ApiError {
    fn from(e: TransferError) -> Self {
        ApiError::Issuance(e.into())
    }
}

fn ledger_status(e: &LedgerError) -> StatusCode {
    match e {
        LedgerError::Transport(_) => StatusCode::SERVICE_UNAVAILABLE,
        LedgerError::Rpc { .. } | LedgerError::Decode(_) => StatusCode::BAD_GATEWAY,
    }
}

fn issuance_status(e: &Error) -> StatusCode {
    match e {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        Error::Upload(UploadError::Transient(_)) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Upload(UploadError::Rejected(_)) | Error::Fetch(_) => StatusCode::BAD_GATEWAY,
        Error::Ledger(e) => ledger_status(e),
        Error::Mint(e) => match e {
            MintError::Simulation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            MintError::ConfirmationTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            MintError::Ledger(e) => ledger_status(e),
            MintError::Arguments(_) => StatusCode::BAD_REQUEST,
            MintError::Signing(_) | MintError::Accounts(_) => StatusCode::INTERNAL_SERVER_ERROR,
        },
        Error::Transfer(e) => match e {
            TransferError::AlreadyDelivered { .. } | TransferError::NotInCustody { .. } => {
                StatusCode::CONFLICT
            }
            TransferError::Rejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            TransferError::ConfirmationTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            TransferError::Ledger(e) => ledger_status(e),
            TransferError::Build(_) => StatusCode::BAD_REQUEST,
        },
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::NoDefaultMint => StatusCode::BAD_REQUEST,
            ApiError::Issuance(e) => issuance_status(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error, details) = match &self {
            ApiError::BadRequest(msg) => ("invalid request".to_string(), Some(msg.clone())),
            ApiError::NoDefaultMint => ("invalid request".to_string(), Some(self.to_string())),
            ApiError::Issuance(Error::Config(_)) => ("internal error".to_string(), None),
            ApiError::Issuance(e) => {
                let summary = match e {
                    Error::Validation(_) => "invalid request",
                    Error::Upload(_) | Error::Fetch(_) => "content storage failed",
                    Error::Mint(_) => "certificate mint failed",
                    Error::Transfer(_) => "certificate transfer failed",
                    Error::Ledger(_) => "ledger unavailable",
                    Error::Config(_) => "internal error",
                };
                (summary.to_string(), Some(e.to_string()))
            }
        };

        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self, "request failed");
        }

        let body = serde_json::json!({ "error": error, "details": details });
        (status, Json(body)).into_response()
    }
}
