use std::sync::Arc;

use cert_issuance::Issuer;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub issuer: Arc<Issuer>,
    /// Largest accepted request body, in bytes.
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(issuer: Issuer, max_upload_bytes: usize) -> Self {
        Self {
            issuer: Arc::new(issuer),
            max_upload_bytes,
        }
    }
}
