//! Minimal JSON-RPC client for the ledger.
//!
//! Only the methods issuance needs are implemented. Account data is always
//! requested base64-encoded and decoded locally.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;

use super::{Commitment, LedgerRpc, SignatureStatus, TokenHolding};
use crate::error::LedgerError;

/// JSON-RPC ledger client over HTTP.
pub struct JsonRpcLedger {
    url: String,
    commitment: Commitment,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

impl JsonRpcLedger {
    pub fn new(
        url: impl Into<String>,
        commitment: Commitment,
        timeout: Duration,
    ) -> Result<Self, LedgerError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            url: url.into(),
            commitment,
            http,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, LedgerError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let resp = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LedgerError::Transport(format!("{method}: {e}")))?;

        let status = resp.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LedgerError::Transport(format!("{method}: HTTP {status}")));
        }

        let parsed: RpcResponse = resp
            .json()
            .await
            .map_err(|e| LedgerError::Decode(format!("{method}: {e}")))?;

        if let Some(err) = parsed.error {
            return Err(rpc_error(err));
        }
        parsed
            .result
            .ok_or_else(|| LedgerError::Decode(format!("{method}: response has no result")))
    }
}

fn rpc_error(err: RpcErrorObject) -> LedgerError {
    let (logs, program_error) = match &err.data {
        Some(data) => (
            data.get("logs")
                .and_then(|v| v.as_array())
                .map(|logs| {
                    logs.iter()
                        .filter_map(|l| l.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
            data.get("err").and_then(custom_program_error),
        ),
        None => (Vec::new(), None),
    };
    LedgerError::Rpc {
        code: err.code,
        message: err.message,
        logs,
        program_error,
    }
}

/// Extract `N` from `{"InstructionError": [idx, {"Custom": N}]}`.
pub(crate) fn custom_program_error(err: &Value) -> Option<u32> {
    err.get("InstructionError")?
        .get(1)?
        .get("Custom")?
        .as_u64()
        .and_then(|code| u32::try_from(code).ok())
}

fn decode_account_data(value: &Value) -> Result<Option<Vec<u8>>, LedgerError> {
    if value.is_null() {
        return Ok(None);
    }
    let encoded = value
        .get("data")
        .and_then(|d| d.get(0))
        .and_then(|d| d.as_str())
        .ok_or_else(|| LedgerError::Decode("account has no base64 data".into()))?;
    BASE64
        .decode(encoded)
        .map(Some)
        .map_err(|e| LedgerError::Decode(format!("invalid account data: {e}")))
}

fn parse_status(value: &Value) -> Result<Option<SignatureStatus>, LedgerError> {
    if value.is_null() {
        return Ok(None);
    }
    let commitment = match value.get("confirmationStatus").and_then(|v| v.as_str()) {
        Some(s) => Some(
            serde_json::from_value::<Commitment>(Value::String(s.to_string()))
                .map_err(|e| LedgerError::Decode(format!("confirmationStatus: {e}")))?,
        ),
        None => None,
    };
    let err = value.get("err").filter(|e| !e.is_null());
    Ok(Some(SignatureStatus {
        slot: value.get("slot").and_then(|v| v.as_u64()).unwrap_or_default(),
        commitment,
        err: err.map(|e| e.to_string()),
        program_error: err.and_then(custom_program_error),
    }))
}

#[async_trait]
impl LedgerRpc for JsonRpcLedger {
    async fn latest_blockhash(&self) -> Result<Hash, LedgerError> {
        let result = self
            .call(
                "getLatestBlockhash",
                json!([{ "commitment": self.commitment.as_str() }]),
            )
            .await?;
        let blockhash = result
            .get("value")
            .and_then(|v| v.get("blockhash"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| LedgerError::Decode("getLatestBlockhash: missing blockhash".into()))?;
        Hash::from_str(blockhash)
            .map_err(|e| LedgerError::Decode(format!("getLatestBlockhash: {e}")))
    }

    async fn send_transaction(&self, tx: &Transaction) -> Result<Signature, LedgerError> {
        let wire = bincode::serialize(tx)
            .map_err(|e| LedgerError::Decode(format!("failed to serialize transaction: {e}")))?;
        let result = self
            .call(
                "sendTransaction",
                json!([
                    BASE64.encode(wire),
                    {
                        "encoding": "base64",
                        "skipPreflight": false,
                        "preflightCommitment": self.commitment.as_str(),
                    }
                ]),
            )
            .await?;
        let signature = result
            .as_str()
            .ok_or_else(|| LedgerError::Decode("sendTransaction: expected a signature".into()))?;
        Signature::from_str(signature)
            .map_err(|e| LedgerError::Decode(format!("sendTransaction: {e}")))
    }

    async fn signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<SignatureStatus>, LedgerError> {
        let result = self
            .call(
                "getSignatureStatuses",
                json!([[signature.to_string()], { "searchTransactionHistory": true }]),
            )
            .await?;
        let entry = result
            .get("value")
            .and_then(|v| v.get(0))
            .ok_or_else(|| LedgerError::Decode("getSignatureStatuses: missing value".into()))?;
        parse_status(entry)
    }

    async fn account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, LedgerError> {
        let result = self
            .call(
                "getAccountInfo",
                json!([
                    address.to_string(),
                    { "encoding": "base64", "commitment": self.commitment.as_str() }
                ]),
            )
            .await?;
        decode_account_data(result.get("value").unwrap_or(&Value::Null))
    }

    async fn multiple_account_data(
        &self,
        addresses: &[Pubkey],
    ) -> Result<Vec<Option<Vec<u8>>>, LedgerError> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = addresses.iter().map(ToString::to_string).collect();
        let result = self
            .call(
                "getMultipleAccounts",
                json!([keys, { "encoding": "base64", "commitment": self.commitment.as_str() }]),
            )
            .await?;
        let values = result
            .get("value")
            .and_then(|v| v.as_array())
            .ok_or_else(|| LedgerError::Decode("getMultipleAccounts: missing value".into()))?;
        if values.len() != addresses.len() {
            return Err(LedgerError::Decode(format!(
                "getMultipleAccounts: asked for {}, got {}",
                addresses.len(),
                values.len()
            )));
        }
        values.iter().map(decode_account_data).collect()
    }

    async fn token_accounts_by_owner(
        &self,
        owner: &Pubkey,
        token_program: &Pubkey,
    ) -> Result<Vec<TokenHolding>, LedgerError> {
        let result = self
            .call(
                "getTokenAccountsByOwner",
                json!([
                    owner.to_string(),
                    { "programId": token_program.to_string() },
                    { "encoding": "base64", "commitment": self.commitment.as_str() }
                ]),
            )
            .await?;
        let entries = result
            .get("value")
            .and_then(|v| v.as_array())
            .ok_or_else(|| LedgerError::Decode("getTokenAccountsByOwner: missing value".into()))?;

        let mut holdings = Vec::with_capacity(entries.len());
        for entry in entries {
            let address = entry
                .get("pubkey")
                .and_then(|v| v.as_str())
                .and_then(|s| Pubkey::from_str(s).ok())
                .ok_or_else(|| {
                    LedgerError::Decode("getTokenAccountsByOwner: invalid pubkey".into())
                })?;
            let data = decode_account_data(entry.get("account").unwrap_or(&Value::Null))?
                .ok_or_else(|| {
                    LedgerError::Decode(format!("token account {address} has no data"))
                })?;
            holdings.push(TokenHolding::unpack(address, &data)?);
        }
        Ok(holdings)
    }
}
