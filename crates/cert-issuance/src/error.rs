//! Error taxonomy for the issuance pipeline.
//!
//! Each external step has its own error type so callers can tell which
//! retries are safe: uploads are content-addressed and can be repeated as-is,
//! mints need a fresh mint identity, and transfers need a custody check first.

use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use thiserror::Error;

/// Convenience alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Custom error code the certificate program raises when a certificate has
/// already left the issuer.
pub const ALREADY_TRANSFERRED_CODE: u32 = 6000;

/// Umbrella error for the issuance library.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Mint(#[from] MintError),

    #[error(transparent)]
    Transfer(#[from] TransferError),
}

/// Invalid or incomplete configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid TOML: {0}")]
    Parse(String),

    #[error("cannot read config file: {0}")]
    Io(String),

    #[error("{0}")]
    Invalid(String),

    #[error("cannot read {what} from env var {var}: {reason}")]
    MissingEnv {
        what: &'static str,
        var: String,
        reason: String,
    },

    #[error("invalid issuer keypair: {0}")]
    Keypair(String),
}

/// A request was rejected before any external call was made.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid address in {field}: {value}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("invalid content URI: {0}")]
    InvalidContentUri(String),
}

/// Pinning a payload to the content store failed.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Network failure, timeout or a 5xx/429 response. Safe to retry: the
    /// identifier is derived from the bytes, so a repeat upload is a no-op.
    #[error("transient upload failure: {0}")]
    Transient(String),

    /// Authentication or payload validation failure. Retrying without a
    /// credential or payload change will fail the same way.
    #[error("upload rejected: {0}")]
    Rejected(String),
}

impl UploadError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, UploadError::Transient(_))
    }
}

/// A content document could not be resolved from any gateway.
#[derive(Debug, Error)]
#[error("failed to fetch {uri}: {reason}")]
pub struct FetchError {
    pub uri: String,
    pub reason: String,
}

/// Ledger JSON-RPC failure.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The endpoint could not be reached or timed out.
    #[error("ledger transport error: {0}")]
    Transport(String),

    /// The endpoint answered with a JSON-RPC error object.
    #[error("ledger rpc error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        logs: Vec<String>,
        program_error: Option<u32>,
    },

    /// The endpoint answered with something we could not decode.
    #[error("ledger response decode error: {0}")]
    Decode(String),
}

impl LedgerError {
    /// JSON-RPC code returned when preflight simulation rejects a transaction.
    pub const PREFLIGHT_FAILURE: i64 = -32002;

    pub fn is_transport(&self) -> bool {
        matches!(self, LedgerError::Transport(_))
    }
}

/// Creating a certificate on the ledger failed.
#[derive(Debug, Error)]
pub enum MintError {
    /// The program or runtime rejected the transaction. This mint identity
    /// is spent; a retry must start with a fresh one.
    #[error("mint {mint} rejected: {message}")]
    Simulation {
        mint: Pubkey,
        message: String,
        logs: Vec<String>,
        program_error: Option<u32>,
    },

    /// The transaction was signed and handed to the ledger but no
    /// confirmation was observed in time. Query `signature` before
    /// resubmitting.
    #[error("mint {mint} not confirmed (signature {signature}): {reason}")]
    ConfirmationTimeout {
        mint: Pubkey,
        signature: Signature,
        reason: String,
    },

    /// The ledger was unreachable before anything was submitted.
    #[error("ledger unavailable before submission: {0}")]
    Ledger(#[source] LedgerError),

    #[error("failed to sign mint transaction: {0}")]
    Signing(String),

    #[error("invalid mint account set: {0}")]
    Accounts(String),

    /// Name, symbol or URI do not fit the token-metadata limits.
    #[error("invalid mint arguments: {0}")]
    Arguments(String),
}

impl MintError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, MintError::ConfirmationTimeout { .. } | MintError::Ledger(_))
    }

    pub fn program_error(&self) -> Option<u32> {
        match self {
            MintError::Simulation { program_error, .. } => *program_error,
            _ => None,
        }
    }
}

/// Moving a certificate to its recipient failed. Never invalidates a mint
/// that was already confirmed.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The recipient already holds the certificate; a previous submission
    /// went through.
    #[error("certificate {mint} is already held by {recipient}")]
    AlreadyDelivered { mint: Pubkey, recipient: Pubkey },

    /// Neither the issuer nor the recipient holds the certificate.
    #[error("certificate {mint} is not in the issuer's custody")]
    NotInCustody { mint: Pubkey },

    #[error("transfer of {mint} rejected: {message}")]
    Rejected {
        mint: Pubkey,
        message: String,
        logs: Vec<String>,
        program_error: Option<u32>,
    },

    /// Submitted but unconfirmed. Verify custody before trying again.
    #[error("transfer of {mint} not confirmed (signature {signature}): {reason}")]
    ConfirmationTimeout {
        mint: Pubkey,
        signature: Signature,
        reason: String,
    },

    #[error("ledger unavailable before transfer submission: {0}")]
    Ledger(#[source] LedgerError),

    #[error("failed to build transfer: {0}")]
    Build(String),
}

impl TransferError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::ConfirmationTimeout { .. } | TransferError::Ledger(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_transient_is_retryable() {
        assert!(UploadError::Transient("503".into()).is_retryable());
        assert!(!UploadError::Rejected("401".into()).is_retryable());
    }

    #[test]
    fn mint_simulation_is_not_retryable() {
        let err = MintError::Simulation {
            mint: Pubkey::new_unique(),
            message: "custom program error: 0x1770".into(),
            logs: vec![],
            program_error: Some(ALREADY_TRANSFERRED_CODE),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.program_error(), Some(ALREADY_TRANSFERRED_CODE));
    }

    #[test]
    fn mint_timeout_is_retryable() {
        let err = MintError::ConfirmationTimeout {
            mint: Pubkey::new_unique(),
            signature: Signature::default(),
            reason: "timed out".into(),
        };
        assert!(err.is_retryable());
        assert!(err.to_string().contains("not confirmed"));
    }

    #[test]
    fn validation_error_names_field() {
        let err = ValidationError::MissingField("imageUrl");
        assert_eq!(err.to_string(), "missing required field: imageUrl");
    }
}
