//! Ledger access: the handful of RPC calls issuance needs, and the
//! submission path shared by minting and transfers.

mod rpc;
mod submit;

#[cfg(any(test, feature = "testing"))]
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use solana_sdk::hash::Hash;
use solana_sdk::program_pack::Pack;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;
use spl_token::state::Account as TokenAccount;

use crate::error::LedgerError;

pub use rpc::JsonRpcLedger;
pub use submit::{Confirmed, SubmitError, Submitter};

/// Confirmation depth, ordered from least to most final.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    #[default]
    Confirmed,
    Finalized,
}

impl Commitment {
    pub fn as_str(self) -> &'static str {
        match self {
            Commitment::Processed => "processed",
            Commitment::Confirmed => "confirmed",
            Commitment::Finalized => "finalized",
        }
    }
}

/// Status of a submitted transaction as reported by the ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignatureStatus {
    pub slot: u64,
    pub commitment: Option<Commitment>,
    /// Execution error, if the transaction landed but failed.
    pub err: Option<String>,
    pub program_error: Option<u32>,
}

impl SignatureStatus {
    pub fn reached(&self, target: Commitment) -> bool {
        self.err.is_none() && self.commitment.is_some_and(|c| c >= target)
    }
}

/// A token account as stored on the ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenHolding {
    pub address: Pubkey,
    pub mint: Pubkey,
    pub owner: Pubkey,
    pub amount: u64,
}

impl TokenHolding {
    /// Decode an SPL token account.
    pub fn unpack(address: Pubkey, data: &[u8]) -> Result<Self, LedgerError> {
        let account = TokenAccount::unpack(data)
            .map_err(|e| LedgerError::Decode(format!("token account {address}: {e}")))?;
        Ok(Self {
            address,
            mint: account.mint,
            owner: account.owner,
            amount: account.amount,
        })
    }
}

/// The ledger operations issuance relies on.
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    async fn latest_blockhash(&self) -> Result<Hash, LedgerError>;

    /// Submit a signed transaction. Preflight failures come back as
    /// `LedgerError::Rpc` with code `LedgerError::PREFLIGHT_FAILURE`.
    async fn send_transaction(&self, tx: &Transaction) -> Result<Signature, LedgerError>;

    async fn signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<SignatureStatus>, LedgerError>;

    /// Raw account data, or `None` when the account does not exist.
    async fn account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, LedgerError>;

    /// Raw data for several accounts, in request order.
    async fn multiple_account_data(
        &self,
        addresses: &[Pubkey],
    ) -> Result<Vec<Option<Vec<u8>>>, LedgerError>;

    /// Every token account owned by `owner` under `token_program`.
    async fn token_accounts_by_owner(
        &self,
        owner: &Pubkey,
        token_program: &Pubkey,
    ) -> Result<Vec<TokenHolding>, LedgerError>;
}

/// Read a token account, returning `None` when it does not exist.
pub async fn token_holding(
    ledger: &dyn LedgerRpc,
    address: &Pubkey,
) -> Result<Option<TokenHolding>, LedgerError> {
    match ledger.account_data(address).await? {
        Some(data) => TokenHolding::unpack(*address, &data).map(Some),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commitment_ordering() {
        assert!(Commitment::Processed < Commitment::Confirmed);
        assert!(Commitment::Confirmed < Commitment::Finalized);
    }

    #[test]
    fn status_reached_requires_success() {
        let ok = SignatureStatus {
            slot: 10,
            commitment: Some(Commitment::Finalized),
            err: None,
            program_error: None,
        };
        assert!(ok.reached(Commitment::Confirmed));

        let failed = SignatureStatus {
            err: Some("InstructionError".into()),
            ..ok.clone()
        };
        assert!(!failed.reached(Commitment::Processed));

        let shallow = SignatureStatus {
            commitment: Some(Commitment::Processed),
            ..ok
        };
        assert!(!shallow.reached(Commitment::Confirmed));
    }

    #[test]
    fn commitment_serde_lowercase() {
        let c: Commitment =
            serde_json::from_str("\"finalized\"").unwrap_or_else(|e| panic!("serde: {e}"));
        assert_eq!(c, Commitment::Finalized);
        assert_eq!(Commitment::Processed.as_str(), "processed");
    }

    #[test]
    fn unpack_token_account() {
        let mint = Pubkey::new_unique();
        let owner = Pubkey::new_unique();
        let account = TokenAccount {
            mint,
            owner,
            amount: 1,
            state: spl_token::state::AccountState::Initialized,
            ..Default::default()
        };
        let mut data = vec![0u8; TokenAccount::LEN];
        TokenAccount::pack(account, &mut data).unwrap_or_else(|e| panic!("pack: {e}"));

        let address = Pubkey::new_unique();
        let holding = TokenHolding::unpack(address, &data).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(holding.mint, mint);
        assert_eq!(holding.owner, owner);
        assert_eq!(holding.amount, 1);
    }

    #[test]
    fn unpack_rejects_garbage() {
        let err = TokenHolding::unpack(Pubkey::new_unique(), &[1, 2, 3]).expect_err("garbage");
        assert!(err.to_string().contains("decode"));
    }
}
