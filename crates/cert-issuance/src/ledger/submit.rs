//! Serialized submission of issuer-signed transactions.
//!
//! Every transaction the issuer signs goes through one `Submitter`. The gate
//! is held from blockhash fetch through confirmation, so with the default of
//! one permit the issuer never has two transactions in flight.

use std::sync::Arc;
use std::time::Duration;

use solana_sdk::hash::Hash;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;
use thiserror::Error;
use tokio::sync::Semaphore;

use super::{Commitment, LedgerRpc};
use crate::config::LedgerConfig;
use crate::error::LedgerError;

/// Outcome of a submission that did not confirm.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// Preflight or on-chain execution rejected the transaction.
    #[error("transaction rejected: {message}")]
    Rejected {
        message: String,
        logs: Vec<String>,
        program_error: Option<u32>,
    },

    /// Signed and possibly accepted, but not observed at the target
    /// commitment.
    #[error("transaction {signature} unconfirmed: {reason}")]
    Unconfirmed { signature: Signature, reason: String },

    /// Nothing was sent, or the node refused it without simulating.
    /// Nothing was accepted.
    #[error(transparent)]
    Ledger(LedgerError),

    #[error("signing failed: {0}")]
    Signing(String),
}

/// A transaction observed at the target commitment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Confirmed {
    pub signature: Signature,
    pub slot: u64,
}

/// Submits signed transactions and waits for confirmation.
pub struct Submitter {
    ledger: Arc<dyn LedgerRpc>,
    gate: Semaphore,
    commitment: Commitment,
    confirm_timeout: Duration,
    poll_interval: Duration,
}

impl Submitter {
    pub fn new(ledger: Arc<dyn LedgerRpc>, config: &LedgerConfig) -> Self {
        Self::with_settings(
            ledger,
            config.commitment,
            Duration::from_secs(config.confirm_timeout_secs),
            Duration::from_millis(config.poll_interval_ms),
            config.max_concurrent_submissions,
        )
    }

    pub fn with_settings(
        ledger: Arc<dyn LedgerRpc>,
        commitment: Commitment,
        confirm_timeout: Duration,
        poll_interval: Duration,
        max_in_flight: usize,
    ) -> Self {
        Self {
            ledger,
            gate: Semaphore::new(max_in_flight.max(1)),
            commitment,
            confirm_timeout,
            poll_interval,
        }
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerRpc> {
        &self.ledger
    }

    /// Fetch a blockhash, let `sign` build the transaction, send it and wait
    /// for the configured commitment.
    pub async fn submit<F>(&self, sign: F) -> Result<Confirmed, SubmitError>
    where
        F: FnOnce(Hash) -> Result<Transaction, String> + Send,
    {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| SubmitError::Ledger(LedgerError::Transport(e.to_string())))?;

        let blockhash = self
            .ledger
            .latest_blockhash()
            .await
            .map_err(SubmitError::Ledger)?;
        let tx = sign(blockhash).map_err(SubmitError::Signing)?;
        let signature = tx
            .signatures
            .first()
            .copied()
            .ok_or_else(|| SubmitError::Signing("transaction has no signatures".into()))?;

        match self.ledger.send_transaction(&tx).await {
            Ok(_) => {}
            Err(LedgerError::Rpc {
                code,
                message,
                logs,
                program_error,
            }) if code == LedgerError::PREFLIGHT_FAILURE => {
                return Err(SubmitError::Rejected {
                    message,
                    logs,
                    program_error,
                })
            }
            // Node health and rate-limit errors come back before simulation.
            Err(e @ LedgerError::Rpc { .. }) => return Err(SubmitError::Ledger(e)),
            // The request may have reached the ledger; only the signature
            // can tell.
            Err(e) => {
                return Err(SubmitError::Unconfirmed {
                    signature,
                    reason: e.to_string(),
                })
            }
        }

        tracing::debug!(%signature, "transaction sent, awaiting confirmation");

        match tokio::time::timeout(self.confirm_timeout, self.poll(&signature)).await {
            Ok(result) => result,
            Err(_) => Err(SubmitError::Unconfirmed {
                signature,
                reason: format!(
                    "not {} within {}s",
                    self.commitment.as_str(),
                    self.confirm_timeout.as_secs()
                ),
            }),
        }
    }

    async fn poll(&self, signature: &Signature) -> Result<Confirmed, SubmitError> {
        loop {
            match self.ledger.signature_status(signature).await {
                Ok(Some(status)) if status.err.is_some() => {
                    return Err(SubmitError::Rejected {
                        message: status.err.unwrap_or_default(),
                        logs: Vec::new(),
                        program_error: status.program_error,
                    });
                }
                Ok(Some(status)) if status.reached(self.commitment) => {
                    return Ok(Confirmed {
                        signature: *signature,
                        slot: status.slot,
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(%signature, error = %e, "signature status poll failed");
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::MemoryLedger;
    use solana_sdk::signature::{Keypair, Signer};
    use solana_sdk::system_instruction;

    fn transfer_tx(payer: &Keypair, blockhash: Hash) -> Result<Transaction, String> {
        let ix = system_instruction::transfer(&payer.pubkey(), &Keypair::new().pubkey(), 1);
        let mut tx = Transaction::new_with_payer(&[ix], Some(&payer.pubkey()));
        tx.try_sign(&[payer], blockhash).map_err(|e| e.to_string())?;
        Ok(tx)
    }

    fn submitter(ledger: Arc<MemoryLedger>, timeout: Duration) -> Submitter {
        Submitter::with_settings(
            ledger,
            Commitment::Confirmed,
            timeout,
            Duration::from_millis(10),
            1,
        )
    }

    #[tokio::test]
    async fn confirms_accepted_transaction() {
        let ledger = Arc::new(MemoryLedger::new());
        let payer = Keypair::new();
        let sub = submitter(ledger.clone(), Duration::from_secs(5));
        let confirmed = sub
            .submit(|bh| transfer_tx(&payer, bh))
            .await
            .unwrap_or_else(|e| panic!("submit: {e}"));
        assert_eq!(ledger.submitted().len(), 1);
        assert_eq!(ledger.submitted()[0].signatures[0], confirmed.signature);
    }

    #[tokio::test]
    async fn preflight_rejection_is_rejected() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.reject_next_send(Some(6000), "custom program error: 0x1770");
        let payer = Keypair::new();
        let sub = submitter(ledger.clone(), Duration::from_secs(5));
        let err = sub
            .submit(|bh| transfer_tx(&payer, bh))
            .await
            .expect_err("should be rejected");
        match err {
            SubmitError::Rejected { program_error, .. } => assert_eq!(program_error, Some(6000)),
            other => panic!("unexpected: {other}"),
        }
    }

    #[tokio::test]
    async fn node_refusal_is_ledger_error_and_resubmits() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.refuse_next_send(-32005, "Node is behind by 120 slots");
        let payer = Keypair::new();
        let sub = submitter(ledger.clone(), Duration::from_secs(5));
        let err = sub
            .submit(|bh| transfer_tx(&payer, bh))
            .await
            .expect_err("should be refused");
        match err {
            SubmitError::Ledger(LedgerError::Rpc { code, .. }) => assert_eq!(code, -32005),
            other => panic!("unexpected: {other}"),
        }
        assert!(ledger.submitted().is_empty());

        sub.submit(|bh| transfer_tx(&payer, bh))
            .await
            .unwrap_or_else(|e| panic!("resubmit: {e}"));
        assert_eq!(ledger.submitted().len(), 1);
    }

    #[tokio::test]
    async fn unconfirmed_after_timeout() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.leave_next_unconfirmed();
        let payer = Keypair::new();
        let sub = submitter(ledger.clone(), Duration::from_millis(100));
        let err = sub
            .submit(|bh| transfer_tx(&payer, bh))
            .await
            .expect_err("should time out");
        assert!(matches!(err, SubmitError::Unconfirmed { .. }));
    }

    #[tokio::test]
    async fn transport_failure_after_signing_is_unconfirmed() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.fail_next_send_transport();
        let payer = Keypair::new();
        let sub = submitter(ledger.clone(), Duration::from_secs(5));
        let err = sub
            .submit(|bh| transfer_tx(&payer, bh))
            .await
            .expect_err("should fail");
        assert!(matches!(err, SubmitError::Unconfirmed { .. }));
    }

    #[tokio::test]
    async fn blockhash_failure_sends_nothing() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.set_unavailable(true);
        let payer = Keypair::new();
        let sub = submitter(ledger.clone(), Duration::from_secs(5));
        let err = sub
            .submit(|bh| transfer_tx(&payer, bh))
            .await
            .expect_err("should fail");
        assert!(matches!(err, SubmitError::Ledger(_)));
        assert!(ledger.submitted().is_empty());
    }

    #[tokio::test]
    async fn signing_failure_sends_nothing() {
        let ledger = Arc::new(MemoryLedger::new());
        let sub = submitter(ledger.clone(), Duration::from_secs(5));
        let err = sub
            .submit(|_| Err("missing signer".to_string()))
            .await
            .expect_err("should fail");
        assert!(matches!(err, SubmitError::Signing(_)));
        assert!(ledger.submitted().is_empty());
    }
}
