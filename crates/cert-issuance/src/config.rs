//! TOML configuration for the issuance service.
//!
//! Secrets (issuer keypair, pinning credentials) are never stored in the file
//! itself; the file names the environment variables that hold them.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use solana_sdk::pubkey::Pubkey;

use crate::accounts::ProgramIds;
use crate::error::ConfigError;
use crate::ledger::Commitment;
use crate::metadata::CertificateTemplate;

type Result<T> = std::result::Result<T, ConfigError>;

/// Top-level configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IssuanceConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    pub signer: SignerConfig,
    #[serde(default)]
    pub pinning: PinningConfig,
    pub programs: ProgramsConfig,
    #[serde(default)]
    pub certificate: CertificateTemplate,
    #[serde(default)]
    pub transfer: TransferConfig,
}

/// HTTP listener settings.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Largest accepted image upload, in bytes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

/// Ledger network selector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Network {
    #[default]
    Devnet,
    Testnet,
    MainnetBeta,
}

impl Network {
    pub fn default_rpc_url(self) -> &'static str {
        match self {
            Network::Devnet => "https://api.devnet.solana.com",
            Network::Testnet => "https://api.testnet.solana.com",
            Network::MainnetBeta => "https://api.mainnet-beta.solana.com",
        }
    }
}

/// Ledger RPC and submission settings.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LedgerConfig {
    #[serde(default)]
    pub network: Network,
    /// Overrides the network's public endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<String>,
    #[serde(default)]
    pub commitment: Commitment,
    #[serde(default = "default_confirm_timeout_secs")]
    pub confirm_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Issuer-signed submissions allowed in flight at once.
    #[serde(default = "default_max_concurrent_submissions")]
    pub max_concurrent_submissions: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            network: Network::default(),
            rpc_url: None,
            commitment: Commitment::default(),
            confirm_timeout_secs: default_confirm_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            max_concurrent_submissions: default_max_concurrent_submissions(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl LedgerConfig {
    pub fn effective_rpc_url(&self) -> String {
        self.rpc_url
            .clone()
            .unwrap_or_else(|| self.network.default_rpc_url().to_string())
    }
}

fn default_confirm_timeout_secs() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_max_concurrent_submissions() -> usize {
    1
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Where the issuer keypair comes from.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignerConfig {
    /// Environment variable holding the keypair as a JSON byte array.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key_env: Option<String>,
    /// Keypair file in the Solana CLI JSON format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keypair_path: Option<PathBuf>,
}

/// Content-store credentials and gateways.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PinningConfig {
    /// Environment variable holding a Pinata JWT.
    #[serde(default)]
    pub pinata_jwt_env: Option<String>,
    /// Environment variables holding the legacy Pinata key pair.
    #[serde(default)]
    pub pinata_api_key_env: Option<String>,
    #[serde(default)]
    pub pinata_secret_api_key_env: Option<String>,
    /// Self-hosted IPFS HTTP API (e.g. `http://127.0.0.1:5001`).
    #[serde(default)]
    pub ipfs_api_url: Option<String>,
    /// Ordered gateway base URLs used to resolve `ipfs://` URIs.
    #[serde(default)]
    pub gateways: Vec<String>,
    #[serde(default = "default_pinning_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_pinning_timeout_secs() -> u64 {
    30
}

/// Resolved Pinata credentials.
#[derive(Clone)]
pub enum PinataAuth {
    Jwt(String),
    ApiKey { key: String, secret: String },
}

impl std::fmt::Debug for PinataAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PinataAuth::Jwt(_) => f.write_str("PinataAuth::Jwt(..)"),
            PinataAuth::ApiKey { .. } => f.write_str("PinataAuth::ApiKey(..)"),
        }
    }
}

impl PinningConfig {
    /// Resolve Pinata credentials from the environment, if configured.
    pub fn resolve_pinata_auth(&self) -> Result<Option<PinataAuth>> {
        if let Some(var) = self.pinata_jwt_env.as_deref() {
            return Ok(Some(PinataAuth::Jwt(read_env("Pinata JWT", var)?)));
        }
        match (
            self.pinata_api_key_env.as_deref(),
            self.pinata_secret_api_key_env.as_deref(),
        ) {
            (Some(key_var), Some(secret_var)) => Ok(Some(PinataAuth::ApiKey {
                key: read_env("Pinata API key", key_var)?,
                secret: read_env("Pinata secret API key", secret_var)?,
            })),
            _ => Ok(None),
        }
    }
}

/// Program addresses. The three well-known programs default to their
/// mainnet/devnet deployments.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProgramsConfig {
    pub certificate_program: String,
    #[serde(default)]
    pub token_program: Option<String>,
    #[serde(default)]
    pub token_metadata_program: Option<String>,
    #[serde(default)]
    pub associated_token_program: Option<String>,
}

impl ProgramsConfig {
    pub fn program_ids(&self) -> Result<ProgramIds> {
        let defaults = ProgramIds::with_certificate_program(parse_pubkey(
            "programs.certificate_program",
            &self.certificate_program,
        )?);
        let ids = ProgramIds {
            token: parse_optional("programs.token_program", &self.token_program)?
                .unwrap_or(defaults.token),
            token_metadata: parse_optional(
                "programs.token_metadata_program",
                &self.token_metadata_program,
            )?
            .unwrap_or(defaults.token_metadata),
            associated_token: parse_optional(
                "programs.associated_token_program",
                &self.associated_token_program,
            )?
            .unwrap_or(defaults.associated_token),
            ..defaults
        };
        ids.validate()
            .map_err(|e| ConfigError::Invalid(format!("programs: {e}")))?;
        Ok(ids)
    }
}

/// Transfer settings for `POST /transfer-nft` without a mint address.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransferConfig {
    #[serde(default)]
    pub default_mint: Option<String>,
}

impl TransferConfig {
    pub fn default_mint(&self) -> Result<Option<Pubkey>> {
        parse_optional("transfer.default_mint", &self.default_mint)
    }
}

impl IssuanceConfig {
    /// Parse configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        Self::parse(&content)
    }

    fn validate(&self) -> Result<()> {
        if let Some(url) = &self.ledger.rpc_url {
            if url.is_empty() {
                return Err(ConfigError::Invalid("ledger.rpc_url must not be empty".into()));
            }
        }
        if self.ledger.confirm_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "ledger.confirm_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.ledger.max_concurrent_submissions == 0 {
            return Err(ConfigError::Invalid(
                "ledger.max_concurrent_submissions must be greater than 0".into(),
            ));
        }
        if self.signer.secret_key_env.is_none() && self.signer.keypair_path.is_none() {
            return Err(ConfigError::Invalid(
                "signer must specify either secret_key_env or keypair_path".into(),
            ));
        }
        if self.pinning.pinata_api_key_env.is_some()
            != self.pinning.pinata_secret_api_key_env.is_some()
        {
            return Err(ConfigError::Invalid(
                "pinning.pinata_api_key_env and pinning.pinata_secret_api_key_env must be set together"
                    .into(),
            ));
        }
        if self.certificate.symbol.is_empty() || self.certificate.name.is_empty() {
            return Err(ConfigError::Invalid(
                "certificate.name and certificate.symbol must not be empty".into(),
            ));
        }
        crate::mint::check_onchain_fields(&self.certificate.name, &self.certificate.symbol, "")
            .map_err(|e| ConfigError::Invalid(format!("certificate: {e}")))?;
        self.programs.program_ids()?;
        self.transfer.default_mint()?;
        Ok(())
    }
}

fn read_env(what: &'static str, var: &str) -> Result<String> {
    std::env::var(var).map_err(|e| ConfigError::MissingEnv {
        what,
        var: var.to_string(),
        reason: e.to_string(),
    })
}

pub(crate) fn read_secret_env(what: &'static str, var: &str) -> Result<String> {
    read_env(what, var)
}

fn parse_pubkey(field: &str, value: &str) -> Result<Pubkey> {
    Pubkey::from_str(value)
        .map_err(|e| ConfigError::Invalid(format!("{field} is not a valid address ({value}): {e}")))
}

fn parse_optional(field: &str, value: &Option<String>) -> Result<Option<Pubkey>> {
    value.as_deref().map(|v| parse_pubkey(field, v)).transpose()
}
