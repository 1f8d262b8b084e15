//! Issuer signing identity.
//!
//! The issuer keypair is loaded once and passed by value (cheaply cloned)
//! into every mint and transfer call. Nothing in the crate mutates it.

use std::path::Path;
use std::sync::Arc;

use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};

use crate::config::{read_secret_env, SignerConfig};
use crate::error::ConfigError;

/// Read-only handle on the issuer keypair.
#[derive(Clone)]
pub struct SigningContext {
    issuer: Arc<Keypair>,
}

impl SigningContext {
    pub fn new(issuer: Keypair) -> Self {
        Self {
            issuer: Arc::new(issuer),
        }
    }

    /// Load the issuer keypair as described by the `[signer]` section.
    pub fn from_config(config: &SignerConfig) -> Result<Self, ConfigError> {
        if let Some(var) = config.secret_key_env.as_deref() {
            let raw = read_secret_env("issuer secret key", var)?;
            return Self::from_json_bytes(&raw);
        }
        if let Some(path) = config.keypair_path.as_deref() {
            return Self::from_keypair_file(path);
        }
        Err(ConfigError::Invalid(
            "signer must specify either secret_key_env or keypair_path".into(),
        ))
    }

    /// Parse a keypair from the Solana CLI format: a JSON array of 64 bytes.
    pub fn from_json_bytes(raw: &str) -> Result<Self, ConfigError> {
        let bytes: Vec<u8> = serde_json::from_str(raw.trim())
            .map_err(|e| ConfigError::Keypair(format!("expected a JSON byte array: {e}")))?;
        if bytes.len() != 64 {
            return Err(ConfigError::Keypair(format!(
                "expected 64 bytes, got {}",
                bytes.len()
            )));
        }
        let keypair =
            Keypair::from_bytes(&bytes).map_err(|e| ConfigError::Keypair(e.to_string()))?;
        Ok(Self::new(keypair))
    }

    pub fn from_keypair_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        Self::from_json_bytes(&raw)
    }

    pub fn pubkey(&self) -> Pubkey {
        self.issuer.pubkey()
    }

    pub fn keypair(&self) -> &Keypair {
        &self.issuer
    }
}

impl std::fmt::Debug for SigningContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningContext")
            .field("issuer", &self.pubkey())
            .finish()
    }
}
