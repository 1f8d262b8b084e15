//! Custody transfer from the issuer to a recipient.
//!
//! Each call starts by reading who holds the certificate right now. A
//! submission that timed out may still have landed, so this check is what
//! keeps a retry from moving the token twice.

use std::sync::Arc;

use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Signature, Signer};
use solana_sdk::transaction::Transaction;

use crate::accounts::{derive_holding_account, ProgramIds};
use crate::error::{LedgerError, TransferError};
use crate::ledger::{SubmitError, Submitter, TokenHolding};
use crate::signer::SigningContext;

/// `CreateIdempotent` tag of the associated-token program.
const CREATE_IDEMPOTENT: u8 = 1;

/// Who currently holds a certificate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Custody {
    Issuer,
    Recipient,
    /// Neither the issuer nor the recipient.
    Elsewhere,
}

/// A confirmed custody move.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferReceipt {
    pub mint: Pubkey,
    pub recipient: Pubkey,
    pub signature: Signature,
    pub slot: u64,
    /// Whether the recipient's holding account was created by this transfer.
    pub created_holding_account: bool,
}

/// Instruction creating `wallet`'s holding account for `mint` if it does
/// not exist yet, funded by `payer`.
pub fn create_holding_account_instruction(
    payer: &Pubkey,
    wallet: &Pubkey,
    mint: &Pubkey,
    programs: &ProgramIds,
) -> Instruction {
    Instruction {
        program_id: programs.associated_token,
        accounts: vec![
            AccountMeta::new(*payer, true),
            AccountMeta::new(derive_holding_account(wallet, mint, programs), false),
            AccountMeta::new_readonly(*wallet, false),
            AccountMeta::new_readonly(*mint, false),
            AccountMeta::new_readonly(programs.system, false),
            AccountMeta::new_readonly(programs.token, false),
        ],
        data: vec![CREATE_IDEMPOTENT],
    }
}

struct CustodySnapshot {
    custody: Custody,
    recipient_account_exists: bool,
}

pub struct OwnershipTransferor {
    submitter: Arc<Submitter>,
    programs: ProgramIds,
}

impl OwnershipTransferor {
    pub fn new(submitter: Arc<Submitter>, programs: ProgramIds) -> Self {
        Self {
            submitter,
            programs,
        }
    }

    /// Read current custody of `mint` between `issuer` and `recipient`.
    pub async fn verify_custody(
        &self,
        mint: &Pubkey,
        recipient: &Pubkey,
        issuer: &Pubkey,
    ) -> Result<Custody, LedgerError> {
        Ok(self.snapshot(mint, recipient, issuer).await?.custody)
    }

    async fn snapshot(
        &self,
        mint: &Pubkey,
        recipient: &Pubkey,
        issuer: &Pubkey,
    ) -> Result<CustodySnapshot, LedgerError> {
        let issuer_account = derive_holding_account(issuer, mint, &self.programs);
        let recipient_account = derive_holding_account(recipient, mint, &self.programs);
        let data = self
            .submitter
            .ledger()
            .multiple_account_data(&[issuer_account, recipient_account])
            .await?;

        let holds = |address: Pubkey, raw: Option<&Vec<u8>>| -> Result<bool, LedgerError> {
            match raw {
                Some(bytes) => {
                    let holding = TokenHolding::unpack(address, bytes)?;
                    Ok(holding.mint == *mint && holding.amount > 0)
                }
                None => Ok(false),
            }
        };
        let issuer_raw = data.first().and_then(Option::as_ref);
        let recipient_raw = data.get(1).and_then(Option::as_ref);

        let custody = if holds(recipient_account, recipient_raw)? {
            Custody::Recipient
        } else if holds(issuer_account, issuer_raw)? {
            Custody::Issuer
        } else {
            Custody::Elsewhere
        };
        Ok(CustodySnapshot {
            custody,
            recipient_account_exists: recipient_raw.is_some(),
        })
    }

    /// Move `mint` from the issuer to `recipient`.
    pub async fn transfer(
        &self,
        mint: &Pubkey,
        recipient: &Pubkey,
        signer: &SigningContext,
    ) -> Result<TransferReceipt, TransferError> {
        let issuer = signer.pubkey();
        if *recipient == issuer {
            return Err(TransferError::Build(
                "recipient is the issuer itself".to_string(),
            ));
        }

        let snapshot = self
            .snapshot(mint, recipient, &issuer)
            .await
            .map_err(TransferError::Ledger)?;
        match snapshot.custody {
            Custody::Issuer => {}
            Custody::Recipient => {
                return Err(TransferError::AlreadyDelivered {
                    mint: *mint,
                    recipient: *recipient,
                })
            }
            Custody::Elsewhere => return Err(TransferError::NotInCustody { mint: *mint }),
        }

        let create_account = !snapshot.recipient_account_exists;
        let mut instructions = Vec::with_capacity(2);
        if create_account {
            instructions.push(create_holding_account_instruction(
                &issuer,
                recipient,
                mint,
                &self.programs,
            ));
        }
        instructions.push(
            spl_token::instruction::transfer(
                &self.programs.token,
                &derive_holding_account(&issuer, mint, &self.programs),
                &derive_holding_account(recipient, mint, &self.programs),
                &issuer,
                &[],
                1,
            )
            .map_err(|e| TransferError::Build(e.to_string()))?,
        );

        tracing::info!(%mint, %recipient, create_account, "submitting transfer");

        let keypair = signer.keypair();
        let submitted = self
            .submitter
            .submit(|blockhash| {
                let mut tx = Transaction::new_with_payer(&instructions, Some(&issuer));
                tx.try_sign(&[keypair], blockhash)
                    .map_err(|e| e.to_string())?;
                Ok(tx)
            })
            .await;
        let confirmed = match submitted {
            Ok(confirmed) => confirmed,
            Err(SubmitError::Rejected {
                message,
                logs,
                program_error,
            }) => {
                return Err(self
                    .explain_rejection(mint, recipient, &issuer, message, logs, program_error)
                    .await)
            }
            Err(SubmitError::Unconfirmed { signature, reason }) => {
                return Err(TransferError::ConfirmationTimeout {
                    mint: *mint,
                    signature,
                    reason,
                })
            }
            Err(SubmitError::Ledger(e)) => return Err(TransferError::Ledger(e)),
            Err(SubmitError::Signing(e)) => return Err(TransferError::Build(e)),
        };

        tracing::info!(%mint, %recipient, signature = %confirmed.signature, "transfer confirmed");

        Ok(TransferReceipt {
            mint: *mint,
            recipient: *recipient,
            signature: confirmed.signature,
            slot: confirmed.slot,
            created_holding_account: create_account,
        })
    }

    /// Custody may have moved between the snapshot and the submission, e.g.
    /// a concurrent transfer of the same mint confirmed first.
    async fn explain_rejection(
        &self,
        mint: &Pubkey,
        recipient: &Pubkey,
        issuer: &Pubkey,
        message: String,
        logs: Vec<String>,
        program_error: Option<u32>,
    ) -> TransferError {
        match self.snapshot(mint, recipient, issuer).await {
            Ok(CustodySnapshot {
                custody: Custody::Recipient,
                ..
            }) => TransferError::AlreadyDelivered {
                mint: *mint,
                recipient: *recipient,
            },
            Ok(CustodySnapshot {
                custody: Custody::Elsewhere,
                ..
            }) => TransferError::NotInCustody { mint: *mint },
            Ok(_) => TransferError::Rejected {
                mint: *mint,
                message,
                logs,
                program_error,
            },
            Err(e) => {
                tracing::warn!(%mint, error = %e, "custody re-check after rejection failed");
                TransferError::Rejected {
                    mint: *mint,
                    message,
                    logs,
                    program_error,
                }
            }
        }
    }
}
