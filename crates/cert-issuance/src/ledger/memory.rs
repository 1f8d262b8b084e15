//! In-process ledger for tests and local development.
//!
//! Verifies signatures and executes the few instructions issuance emits
//! (certificate mints, associated-account creation, token transfers)
//! atomically per transaction. Sends can be scripted to fail.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use borsh::BorshDeserialize;
use solana_sdk::hash::Hash;
use solana_sdk::instruction::CompiledInstruction;
use solana_sdk::program_option::COption;
use solana_sdk::program_pack::Pack;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;
use spl_token::error::TokenError;
use spl_token::instruction::TokenInstruction;
use spl_token::state::{Account as TokenAccount, AccountState, Mint};

use super::{Commitment, LedgerRpc, SignatureStatus, TokenHolding};
use crate::accounts::{derive_holding_account, derive_metadata_account, ProgramIds};
use crate::error::LedgerError;
use crate::metadata::OnChainMetadata;
use crate::mint::{instruction_discriminator, MintArgs, MINT_CERTIFICATE_IX, MINT_COLLECTION_IX};

/// Certificate program address the memory ledger answers to by default.
pub const MEMORY_CERTIFICATE_PROGRAM: Pubkey =
    solana_sdk::pubkey!("35GtXHKY4m9q9735friqSn8G73QYFZcBf5qzRp3bwGmV");

/// How the next `send_transaction` call behaves.
#[derive(Clone, Debug)]
pub enum SendBehavior {
    Accept,
    /// Fail preflight with the given custom program error.
    Reject {
        program_error: Option<u32>,
        message: String,
    },
    /// Refuse the request with an RPC error other than a preflight
    /// failure, e.g. a node that is behind. Nothing is recorded.
    Refuse { code: i64, message: String },
    /// Fail at the transport layer without applying the transaction.
    Transport,
    /// Accept the transaction but never report it as confirmed until
    /// `land_pending` is called.
    Unconfirmed,
}

#[derive(Clone)]
struct StoredAccount {
    program: Pubkey,
    data: Vec<u8>,
}

#[derive(Default)]
struct State {
    accounts: HashMap<Pubkey, StoredAccount>,
    statuses: HashMap<Signature, SignatureStatus>,
    submitted: Vec<Transaction>,
    pending: Vec<Transaction>,
    script: VecDeque<SendBehavior>,
    slot: u64,
    unavailable: bool,
}

/// Failure raised while executing an instruction.
struct ExecError {
    message: String,
    program_error: Option<u32>,
}

impl ExecError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            program_error: None,
        }
    }

    fn token(err: TokenError) -> Self {
        Self {
            message: err.to_string(),
            program_error: Some(err as u32),
        }
    }
}

pub struct MemoryLedger {
    programs: ProgramIds,
    state: Mutex<State>,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::with_programs(ProgramIds::with_certificate_program(
            MEMORY_CERTIFICATE_PROGRAM,
        ))
    }

    pub fn with_programs(programs: ProgramIds) -> Self {
        Self {
            programs,
            state: Mutex::new(State::default()),
        }
    }

    pub fn programs(&self) -> ProgramIds {
        self.programs
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue the behavior of an upcoming send. Unscripted sends are accepted.
    pub fn script_send(&self, behavior: SendBehavior) {
        self.lock().script.push_back(behavior);
    }

    pub fn reject_next_send(&self, program_error: Option<u32>, message: &str) {
        self.script_send(SendBehavior::Reject {
            program_error,
            message: message.to_string(),
        });
    }

    pub fn refuse_next_send(&self, code: i64, message: &str) {
        self.script_send(SendBehavior::Refuse {
            code,
            message: message.to_string(),
        });
    }

    pub fn fail_next_send_transport(&self) {
        self.script_send(SendBehavior::Transport);
    }

    pub fn leave_next_unconfirmed(&self) {
        self.script_send(SendBehavior::Unconfirmed);
    }

    /// Make every call fail with a transport error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Every transaction handed to `send_transaction`, in order.
    pub fn submitted(&self) -> Vec<Transaction> {
        self.lock().submitted.clone()
    }

    /// Execute transactions that were accepted but left unconfirmed.
    pub fn land_pending(&self) {
        let mut state = self.lock();
        let pending = std::mem::take(&mut state.pending);
        for tx in pending {
            let _ = self.execute(&mut state, &tx);
        }
    }

    /// Store raw account data owned by `program`.
    pub fn insert_account(&self, address: Pubkey, program: Pubkey, data: Vec<u8>) {
        self.lock()
            .accounts
            .insert(address, StoredAccount { program, data });
    }

    /// Store an initialized token account.
    pub fn insert_token_account(&self, address: Pubkey, mint: Pubkey, owner: Pubkey, amount: u64) {
        let data = pack_token_account(mint, owner, amount);
        self.insert_account(address, self.programs.token, data);
    }

    fn check_available(&self) -> Result<(), LedgerError> {
        if self.lock().unavailable {
            return Err(LedgerError::Transport("memory ledger unavailable".into()));
        }
        Ok(())
    }

    /// Run every instruction against a copy of the accounts and commit only
    /// if all succeed. Records the signature status either way.
    fn execute(&self, state: &mut State, tx: &Transaction) -> Result<(), ExecError> {
        state.slot += 1;
        let slot = state.slot;
        let signature = tx.signatures.first().copied().unwrap_or_default();

        let mut accounts = state.accounts.clone();
        let result = tx
            .message
            .instructions
            .iter()
            .try_for_each(|ix| self.apply(&mut accounts, tx, ix));

        let status = match &result {
            Ok(()) => {
                state.accounts = accounts;
                SignatureStatus {
                    slot,
                    commitment: Some(Commitment::Finalized),
                    err: None,
                    program_error: None,
                }
            }
            Err(e) => SignatureStatus {
                slot,
                commitment: Some(Commitment::Processed),
                err: Some(e.message.clone()),
                program_error: e.program_error,
            },
        };
        state.statuses.insert(signature, status);
        result
    }

    fn apply(
        &self,
        accounts: &mut HashMap<Pubkey, StoredAccount>,
        tx: &Transaction,
        ix: &CompiledInstruction,
    ) -> Result<(), ExecError> {
        let keys = &tx.message.account_keys;
        let program = keys
            .get(usize::from(ix.program_id_index))
            .copied()
            .ok_or_else(|| ExecError::new("program index out of range"))?;
        let metas: Vec<Pubkey> = ix
            .accounts
            .iter()
            .map(|&i| keys.get(usize::from(i)).copied())
            .collect::<Option<_>>()
            .ok_or_else(|| ExecError::new("account index out of range"))?;
        let is_signer = |key: &Pubkey| {
            keys.iter()
                .position(|k| k == key)
                .is_some_and(|i| tx.message.is_signer(i))
        };

        if program == self.programs.certificate {
            self.apply_certificate(accounts, ix, &metas, &is_signer)
        } else if program == self.programs.associated_token {
            self.apply_create_holding(accounts, ix, &metas)
        } else if program == self.programs.token {
            self.apply_token(accounts, ix, &metas, &is_signer)
        } else if program == self.programs.system {
            Ok(())
        } else {
            Err(ExecError::new(format!("program {program} not found")))
        }
    }

    fn apply_certificate(
        &self,
        accounts: &mut HashMap<Pubkey, StoredAccount>,
        ix: &CompiledInstruction,
        metas: &[Pubkey],
        is_signer: &dyn Fn(&Pubkey) -> bool,
    ) -> Result<(), ExecError> {
        if ix.data.len() < 8 {
            return Err(ExecError::new("instruction data too short"));
        }
        let (disc, mut args) = ix.data.split_at(8);
        if disc != instruction_discriminator(MINT_CERTIFICATE_IX)
            && disc != instruction_discriminator(MINT_COLLECTION_IX)
        {
            return Err(ExecError::new(format!(
                "unknown certificate instruction {}",
                hex::encode(disc)
            )));
        }
        let args = MintArgs::deserialize(&mut args)
            .map_err(|e| ExecError::new(format!("invalid instruction arguments: {e}")))?;

        let [payer, metadata, edition, mint, holding, ..] = metas else {
            return Err(ExecError::new("not enough account keys"));
        };
        if !is_signer(payer) || !is_signer(mint) {
            return Err(ExecError::new("missing required signature"));
        }
        if *metadata != derive_metadata_account(mint, &self.programs.token_metadata) {
            return Err(ExecError::new("metadata account does not match seeds"));
        }
        if *holding != derive_holding_account(payer, mint, &self.programs) {
            return Err(ExecError::new("holding account does not match seeds"));
        }
        if accounts.contains_key(mint) {
            return Err(ExecError::new(format!("account {mint} already in use")));
        }

        let mut mint_data = vec![0u8; Mint::LEN];
        Mint::pack(
            Mint {
                mint_authority: COption::Some(*edition),
                supply: 1,
                decimals: 0,
                is_initialized: true,
                freeze_authority: COption::Some(*edition),
            },
            &mut mint_data,
        )
        .map_err(|e| ExecError::new(e.to_string()))?;

        let header = OnChainMetadata {
            update_authority: *payer,
            mint: *mint,
            name: args.name,
            symbol: args.symbol,
            uri: args.uri,
        };

        accounts.insert(
            *mint,
            StoredAccount {
                program: self.programs.token,
                data: mint_data,
            },
        );
        accounts.insert(
            *holding,
            StoredAccount {
                program: self.programs.token,
                data: pack_token_account(*mint, *payer, 1),
            },
        );
        accounts.insert(
            *metadata,
            StoredAccount {
                program: self.programs.token_metadata,
                data: header.to_account_data(),
            },
        );
        accounts.insert(
            *edition,
            StoredAccount {
                program: self.programs.token_metadata,
                data: vec![6],
            },
        );
        Ok(())
    }

    fn apply_create_holding(
        &self,
        accounts: &mut HashMap<Pubkey, StoredAccount>,
        ix: &CompiledInstruction,
        metas: &[Pubkey],
    ) -> Result<(), ExecError> {
        let [_payer, holding, wallet, mint, ..] = metas else {
            return Err(ExecError::new("not enough account keys"));
        };
        if *holding != derive_holding_account(wallet, mint, &self.programs) {
            return Err(ExecError::new("associated address does not match seeds"));
        }
        let idempotent = ix.data.first() == Some(&1);
        if accounts.contains_key(holding) {
            return if idempotent {
                Ok(())
            } else {
                Err(ExecError::new(format!("account {holding} already in use")))
            };
        }
        if !accounts.contains_key(mint) {
            return Err(ExecError::new(format!("mint {mint} does not exist")));
        }
        accounts.insert(
            *holding,
            StoredAccount {
                program: self.programs.token,
                data: pack_token_account(*mint, *wallet, 0),
            },
        );
        Ok(())
    }

    fn apply_token(
        &self,
        accounts: &mut HashMap<Pubkey, StoredAccount>,
        ix: &CompiledInstruction,
        metas: &[Pubkey],
        is_signer: &dyn Fn(&Pubkey) -> bool,
    ) -> Result<(), ExecError> {
        let amount = match TokenInstruction::unpack(&ix.data) {
            Ok(TokenInstruction::Transfer { amount }) => amount,
            Ok(_) => return Err(ExecError::new("unsupported token instruction")),
            Err(e) => return Err(ExecError::new(e.to_string())),
        };
        let [source, destination, authority, ..] = metas else {
            return Err(ExecError::new("not enough account keys"));
        };
        let mut from = read_token_account(accounts, source)?;
        let mut to = read_token_account(accounts, destination)?;
        if from.owner != *authority || !is_signer(authority) {
            return Err(ExecError::token(TokenError::OwnerMismatch));
        }
        if from.mint != to.mint {
            return Err(ExecError::token(TokenError::MintMismatch));
        }
        if from.amount < amount {
            return Err(ExecError::token(TokenError::InsufficientFunds));
        }
        from.amount -= amount;
        to.amount += amount;
        write_token_account(accounts, source, from)?;
        write_token_account(accounts, destination, to)?;
        Ok(())
    }
}

fn pack_token_account(mint: Pubkey, owner: Pubkey, amount: u64) -> Vec<u8> {
    let mut data = vec![0u8; TokenAccount::LEN];
    let account = TokenAccount {
        mint,
        owner,
        amount,
        state: AccountState::Initialized,
        ..Default::default()
    };
    TokenAccount::pack_into_slice(&account, &mut data);
    data
}

fn read_token_account(
    accounts: &HashMap<Pubkey, StoredAccount>,
    address: &Pubkey,
) -> Result<TokenAccount, ExecError> {
    let stored = accounts
        .get(address)
        .ok_or_else(|| ExecError::new(format!("account {address} not found")))?;
    TokenAccount::unpack(&stored.data).map_err(|e| ExecError::new(e.to_string()))
}

fn write_token_account(
    accounts: &mut HashMap<Pubkey, StoredAccount>,
    address: &Pubkey,
    account: TokenAccount,
) -> Result<(), ExecError> {
    let stored = accounts
        .get_mut(address)
        .ok_or_else(|| ExecError::new(format!("account {address} not found")))?;
    TokenAccount::pack(account, &mut stored.data).map_err(|e| ExecError::new(e.to_string()))
}

#[async_trait]
impl LedgerRpc for MemoryLedger {
    async fn latest_blockhash(&self) -> Result<Hash, LedgerError> {
        self.check_available()?;
        Ok(Hash::new_unique())
    }

    async fn send_transaction(&self, tx: &Transaction) -> Result<Signature, LedgerError> {
        self.check_available()?;
        let mut state = self.lock();
        let behavior = state.script.pop_front().unwrap_or(SendBehavior::Accept);

        let signature = tx
            .signatures
            .first()
            .copied()
            .ok_or_else(|| LedgerError::Decode("transaction has no signatures".into()))?;

        match behavior {
            SendBehavior::Transport => {
                return Err(LedgerError::Transport("connection reset".into()));
            }
            SendBehavior::Refuse { code, message } => {
                return Err(LedgerError::Rpc {
                    code,
                    message,
                    logs: Vec::new(),
                    program_error: None,
                });
            }
            SendBehavior::Reject {
                program_error,
                message,
            } => {
                state.submitted.push(tx.clone());
                return Err(LedgerError::Rpc {
                    code: LedgerError::PREFLIGHT_FAILURE,
                    message,
                    logs: vec!["Program log: simulated failure".into()],
                    program_error,
                });
            }
            SendBehavior::Accept | SendBehavior::Unconfirmed => {}
        }

        if tx.verify().is_err() {
            return Err(LedgerError::Rpc {
                code: LedgerError::PREFLIGHT_FAILURE,
                message: "signature verification failure".into(),
                logs: Vec::new(),
                program_error: None,
            });
        }
        state.submitted.push(tx.clone());

        if matches!(behavior, SendBehavior::Unconfirmed) {
            state.pending.push(tx.clone());
            return Ok(signature);
        }

        // Preflight: a failing transaction never reaches the ledger.
        let mut preview = State {
            accounts: state.accounts.clone(),
            ..State::default()
        };
        if let Err(e) = self.execute(&mut preview, tx) {
            return Err(LedgerError::Rpc {
                code: LedgerError::PREFLIGHT_FAILURE,
                message: format!("Transaction simulation failed: {}", e.message),
                logs: vec![format!("Program log: {}", e.message)],
                program_error: e.program_error,
            });
        }
        // Preflight succeeded on the same state, so this cannot fail.
        let _ = self.execute(&mut state, tx);
        Ok(signature)
    }

    async fn signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<SignatureStatus>, LedgerError> {
        self.check_available()?;
        Ok(self.lock().statuses.get(signature).cloned())
    }

    async fn account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, LedgerError> {
        self.check_available()?;
        Ok(self.lock().accounts.get(address).map(|a| a.data.clone()))
    }

    async fn multiple_account_data(
        &self,
        addresses: &[Pubkey],
    ) -> Result<Vec<Option<Vec<u8>>>, LedgerError> {
        self.check_available()?;
        let state = self.lock();
        Ok(addresses
            .iter()
            .map(|a| state.accounts.get(a).map(|s| s.data.clone()))
            .collect())
    }

    async fn token_accounts_by_owner(
        &self,
        owner: &Pubkey,
        token_program: &Pubkey,
    ) -> Result<Vec<TokenHolding>, LedgerError> {
        self.check_available()?;
        let state = self.lock();
        let mut holdings: Vec<TokenHolding> = state
            .accounts
            .iter()
            .filter(|(_, a)| a.program == *token_program && a.data.len() == TokenAccount::LEN)
            .filter_map(|(address, a)| TokenHolding::unpack(*address, &a.data).ok())
            .filter(|h| h.owner == *owner)
            .collect();
        holdings.sort_by_key(|h| h.address);
        Ok(holdings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::token_holding;
    use solana_sdk::signature::{Keypair, Signer};

    #[tokio::test]
    async fn token_transfer_moves_balance() {
        let ledger = MemoryLedger::new();
        let owner = Keypair::new();
        let mint = Pubkey::new_unique();
        let from = Pubkey::new_unique();
        let to = Pubkey::new_unique();
        ledger.insert_token_account(from, mint, owner.pubkey(), 1);
        ledger.insert_token_account(to, mint, Pubkey::new_unique(), 0);

        let ix = spl_token::instruction::transfer(
            &spl_token::id(),
            &from,
            &to,
            &owner.pubkey(),
            &[],
            1,
        )
        .unwrap_or_else(|e| panic!("{e}"));
        let blockhash = ledger.latest_blockhash().await.unwrap_or_else(|e| panic!("{e}"));
        let tx = Transaction::new_signed_with_payer(
            &[ix],
            Some(&owner.pubkey()),
            &[&owner],
            blockhash,
        );
        let sig = ledger
            .send_transaction(&tx)
            .await
            .unwrap_or_else(|e| panic!("{e}"));

        let status = ledger.signature_status(&sig).await.unwrap_or_else(|e| panic!("{e}"));
        assert!(status.is_some_and(|s| s.reached(Commitment::Finalized)));
        let to_holding = token_holding(&ledger, &to)
            .await
            .unwrap_or_else(|e| panic!("{e}"))
            .unwrap_or_else(|| panic!("destination missing"));
        assert_eq!(to_holding.amount, 1);
    }

    #[tokio::test]
    async fn failing_transfer_is_rejected_in_preflight() {
        let ledger = MemoryLedger::new();
        let owner = Keypair::new();
        let mint = Pubkey::new_unique();
        let from = Pubkey::new_unique();
        let to = Pubkey::new_unique();
        ledger.insert_token_account(from, mint, owner.pubkey(), 0);
        ledger.insert_token_account(to, mint, Pubkey::new_unique(), 0);

        let ix = spl_token::instruction::transfer(
            &spl_token::id(),
            &from,
            &to,
            &owner.pubkey(),
            &[],
            1,
        )
        .unwrap_or_else(|e| panic!("{e}"));
        let tx = Transaction::new_signed_with_payer(
            &[ix],
            Some(&owner.pubkey()),
            &[&owner],
            Hash::new_unique(),
        );
        let err = ledger.send_transaction(&tx).await.expect_err("insufficient");
        match err {
            LedgerError::Rpc { program_error, .. } => {
                assert_eq!(program_error, Some(TokenError::InsufficientFunds as u32));
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[tokio::test]
    async fn unsigned_transaction_is_rejected() {
        let ledger = MemoryLedger::new();
        let payer = Keypair::new();
        let ix = solana_sdk::system_instruction::transfer(&payer.pubkey(), &Pubkey::new_unique(), 1);
        let tx = Transaction::new_with_payer(&[ix], Some(&payer.pubkey()));
        assert!(ledger.send_transaction(&tx).await.is_err());
    }

    #[tokio::test]
    async fn token_accounts_filter_by_owner() {
        let ledger = MemoryLedger::new();
        let owner = Pubkey::new_unique();
        ledger.insert_token_account(Pubkey::new_unique(), Pubkey::new_unique(), owner, 1);
        ledger.insert_token_account(Pubkey::new_unique(), Pubkey::new_unique(), owner, 1);
        ledger.insert_token_account(
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            1,
        );
        let holdings = ledger
            .token_accounts_by_owner(&owner, &spl_token::id())
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(holdings.len(), 2);
    }
}
