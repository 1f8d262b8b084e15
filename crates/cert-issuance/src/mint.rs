//! Certificate minting.
//!
//! Every certificate gets a freshly generated mint keypair. The orchestrator
//! remembers each identity it has handed out for the life of the process and
//! never signs with one twice, so a retried mint always lands on new
//! accounts.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::{Digest, Sha256};
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature, Signer};
use solana_sdk::transaction::Transaction;

use crate::accounts::{MintAccountSet, ProgramIds};
use crate::content::ContentUri;
use crate::error::{LedgerError, MintError};
use crate::ledger::{SignatureStatus, SubmitError, Submitter};
use crate::metadata::CertificateMetadata;
use crate::signer::SigningContext;

/// Version tag of the instruction layout below.
pub const SCHEMA_VERSION: &str = "nft_minter/v1";
pub const MINT_CERTIFICATE_IX: &str = "mint_certification_nft";
pub const MINT_COLLECTION_IX: &str = "mint_collection_nft";

/// Token-metadata field limits.
pub const MAX_NAME_LEN: usize = 32;
pub const MAX_SYMBOL_LEN: usize = 10;
pub const MAX_URI_LEN: usize = 200;

/// First 8 bytes of `sha256("global:<name>")`.
pub fn instruction_discriminator(name: &str) -> [u8; 8] {
    let digest = Sha256::digest(format!("global:{name}").as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// On-chain arguments of both mint instructions.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct MintArgs {
    pub name: String,
    pub symbol: String,
    pub uri: String,
}

/// Reject values the token-metadata program would refuse.
pub fn check_onchain_fields(name: &str, symbol: &str, uri: &str) -> Result<(), String> {
    for (field, value, max) in [
        ("name", name, MAX_NAME_LEN),
        ("symbol", symbol, MAX_SYMBOL_LEN),
        ("uri", uri, MAX_URI_LEN),
    ] {
        if value.len() > max {
            return Err(format!("{field} is {} bytes, limit is {max}", value.len()));
        }
    }
    Ok(())
}

/// Encode a mint instruction of the `nft_minter/v1` schema.
pub fn build_mint_instruction(
    ix_name: &str,
    accounts: &MintAccountSet,
    args: &MintArgs,
) -> Result<Instruction, MintError> {
    let mut data = instruction_discriminator(ix_name).to_vec();
    args.serialize(&mut data)
        .map_err(|e| MintError::Arguments(e.to_string()))?;
    Ok(Instruction {
        program_id: accounts.programs.certificate,
        accounts: accounts.to_account_metas(),
        data,
    })
}

/// A confirmed mint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MintReceipt {
    pub mint: Pubkey,
    pub signature: Signature,
    pub slot: u64,
    pub metadata_account: Pubkey,
    pub edition_account: Pubkey,
    pub holding_account: Pubkey,
}

pub struct MintOrchestrator {
    submitter: Arc<Submitter>,
    programs: ProgramIds,
    issued: Mutex<HashSet<Pubkey>>,
}

impl MintOrchestrator {
    pub fn new(submitter: Arc<Submitter>, programs: ProgramIds) -> Self {
        Self {
            submitter,
            programs,
            issued: Mutex::new(HashSet::new()),
        }
    }

    pub fn programs(&self) -> &ProgramIds {
        &self.programs
    }

    /// Mint identities generated so far.
    pub fn issued_count(&self) -> usize {
        self.issued.lock().map(|set| set.len()).unwrap_or_else(|e| e.into_inner().len())
    }

    /// Mint a certificate whose metadata document lives at `metadata_uri`.
    pub async fn mint(
        &self,
        metadata_uri: &ContentUri,
        metadata: &CertificateMetadata,
        signer: &SigningContext,
    ) -> Result<MintReceipt, MintError> {
        let args = MintArgs {
            name: metadata.name.clone(),
            symbol: metadata.symbol.clone(),
            uri: metadata_uri.to_string(),
        };
        self.submit_mint(MINT_CERTIFICATE_IX, args, signer).await
    }

    /// Mint a collection parent certificate.
    pub async fn mint_collection(
        &self,
        name: &str,
        symbol: &str,
        uri: &ContentUri,
        signer: &SigningContext,
    ) -> Result<MintReceipt, MintError> {
        let args = MintArgs {
            name: name.to_string(),
            symbol: symbol.to_string(),
            uri: uri.to_string(),
        };
        self.submit_mint(MINT_COLLECTION_IX, args, signer).await
    }

    /// Look up a previously submitted mint. Call this after a
    /// `ConfirmationTimeout` before deciding to mint again.
    pub async fn signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<SignatureStatus>, LedgerError> {
        self.submitter.ledger().signature_status(signature).await
    }

    fn fresh_mint_identity(&self) -> Keypair {
        let mut issued = self.issued.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            let keypair = Keypair::new();
            if issued.insert(keypair.pubkey()) {
                return keypair;
            }
            tracing::warn!(mint = %keypair.pubkey(), "discarding previously issued mint identity");
        }
    }

    async fn submit_mint(
        &self,
        ix_name: &'static str,
        args: MintArgs,
        signer: &SigningContext,
    ) -> Result<MintReceipt, MintError> {
        check_onchain_fields(&args.name, &args.symbol, &args.uri).map_err(MintError::Arguments)?;

        let mint_keypair = self.fresh_mint_identity();
        let mint = mint_keypair.pubkey();
        let payer = signer.pubkey();
        let accounts =
            MintAccountSet::derive(payer, mint, self.programs).map_err(MintError::Accounts)?;
        let ix = build_mint_instruction(ix_name, &accounts, &args)?;

        tracing::info!(
            %mint,
            instruction = ix_name,
            schema = SCHEMA_VERSION,
            uri = %args.uri,
            "submitting mint"
        );

        let issuer = signer.keypair();
        let result = self
            .submitter
            .submit(|blockhash| {
                let mut tx = Transaction::new_with_payer(&[ix], Some(&payer));
                tx.try_sign(&[issuer, &mint_keypair], blockhash)
                    .map_err(|e| e.to_string())?;
                Ok(tx)
            })
            .await;

        let confirmed = result.map_err(|e| match e {
            SubmitError::Rejected {
                message,
                logs,
                program_error,
            } => MintError::Simulation {
                mint,
                message,
                logs,
                program_error,
            },
            SubmitError::Unconfirmed { signature, reason } => MintError::ConfirmationTimeout {
                mint,
                signature,
                reason,
            },
            SubmitError::Ledger(e) => MintError::Ledger(e),
            SubmitError::Signing(e) => MintError::Signing(e),
        });

        match &confirmed {
            Ok(c) => tracing::info!(%mint, signature = %c.signature, slot = c.slot, "mint confirmed"),
            Err(e) => tracing::warn!(%mint, error = %e, "mint failed"),
        }

        let confirmed = confirmed?;
        Ok(MintReceipt {
            mint,
            signature: confirmed.signature,
            slot: confirmed.slot,
            metadata_account: accounts.metadata,
            edition_account: accounts.edition,
            holding_account: accounts.holding,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::error::ALREADY_TRANSFERRED_CODE;
    use crate::ledger::memory::MemoryLedger;
    use crate::ledger::{token_holding, Commitment, LedgerRpc};
    use crate::metadata::{CertificateAttributes, CertificateTemplate, OnChainMetadata};

    struct Fixture {
        ledger: Arc<MemoryLedger>,
        orchestrator: MintOrchestrator,
        signer: SigningContext,
    }

    fn fixture(confirm_timeout: Duration) -> Fixture {
        let ledger = Arc::new(MemoryLedger::new());
        let submitter = Arc::new(Submitter::with_settings(
            ledger.clone(),
            Commitment::Confirmed,
            confirm_timeout,
            Duration::from_millis(10),
            1,
        ));
        Fixture {
            orchestrator: MintOrchestrator::new(submitter, ledger.programs()),
            ledger,
            signer: SigningContext::new(Keypair::new()),
        }
    }

    fn document() -> (ContentUri, CertificateMetadata) {
        let metadata = CertificateMetadata::build(
            &CertificateTemplate::default(),
            &ContentUri::from_cid("bafyimage"),
            &CertificateAttributes::default(),
        );
        (ContentUri::from_cid("bafymeta"), metadata)
    }

    #[test]
    fn discriminator_matches_known_value() {
        // sha256("global:initialize")[..8]
        assert_eq!(
            instruction_discriminator("initialize"),
            [175, 175, 109, 31, 13, 152, 155, 237]
        );
        assert_ne!(
            instruction_discriminator(MINT_CERTIFICATE_IX),
            instruction_discriminator(MINT_COLLECTION_IX)
        );
    }

    #[test]
    fn instruction_layout() {
        let programs = ProgramIds::with_certificate_program(Pubkey::new_unique());
        let accounts =
            MintAccountSet::derive(Pubkey::new_unique(), Pubkey::new_unique(), programs).unwrap();
        let args = MintArgs {
            name: "N".into(),
            symbol: "S".into(),
            uri: "ipfs://x".into(),
        };
        let ix = build_mint_instruction(MINT_CERTIFICATE_IX, &accounts, &args).unwrap();
        assert_eq!(ix.program_id, programs.certificate);
        assert_eq!(ix.accounts.len(), 10);
        assert_eq!(&ix.data[..8], &instruction_discriminator(MINT_CERTIFICATE_IX));
        // u32 length prefix + bytes, per string
        assert_eq!(&ix.data[8..13], &[1, 0, 0, 0, b'N']);
        let decoded = MintArgs::try_from_slice(&ix.data[8..]).unwrap();
        assert_eq!(decoded, args);
    }

    #[test]
    fn field_limits() {
        assert!(check_onchain_fields("Preservation Certificate", "CPNFT", "ipfs://x").is_ok());
        assert!(check_onchain_fields(&"n".repeat(33), "CPNFT", "").is_err());
        assert!(check_onchain_fields("n", "TOOLONGSYMB", "").is_err());
        assert!(check_onchain_fields("n", "s", &"u".repeat(201)).is_err());
    }

    #[tokio::test]
    async fn mint_creates_certificate_held_by_issuer() {
        let f = fixture(Duration::from_secs(5));
        let (uri, metadata) = document();
        let receipt = f.orchestrator.mint(&uri, &metadata, &f.signer).await.unwrap();

        let holding = token_holding(f.ledger.as_ref(), &receipt.holding_account)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(holding.owner, f.signer.pubkey());
        assert_eq!(holding.mint, receipt.mint);
        assert_eq!(holding.amount, 1);

        let data = f
            .ledger
            .account_data(&receipt.metadata_account)
            .await
            .unwrap()
            .unwrap();
        let onchain = OnChainMetadata::decode(&data).unwrap();
        assert_eq!(onchain.uri, "ipfs://bafymeta");
        assert_eq!(onchain.symbol, "CPNFT");
        assert_eq!(onchain.update_authority, f.signer.pubkey());

        let status = f.orchestrator.signature_status(&receipt.signature).await.unwrap();
        assert!(status.unwrap().reached(Commitment::Confirmed));
    }

    #[tokio::test]
    async fn consecutive_mints_use_distinct_identities() {
        let f = fixture(Duration::from_secs(5));
        let (uri, metadata) = document();
        let a = f.orchestrator.mint(&uri, &metadata, &f.signer).await.unwrap();
        let b = f.orchestrator.mint(&uri, &metadata, &f.signer).await.unwrap();
        assert_ne!(a.mint, b.mint);
        assert_ne!(a.metadata_account, b.metadata_account);
        assert_eq!(f.orchestrator.issued_count(), 2);
    }

    #[tokio::test]
    async fn program_rejection_is_simulation_error() {
        let f = fixture(Duration::from_secs(5));
        f.ledger
            .reject_next_send(Some(ALREADY_TRANSFERRED_CODE), "custom program error: 0x1770");
        let (uri, metadata) = document();
        let err = f.orchestrator.mint(&uri, &metadata, &f.signer).await.unwrap_err();
        assert!(matches!(err, MintError::Simulation { .. }));
        assert_eq!(err.program_error(), Some(ALREADY_TRANSFERRED_CODE));
        assert!(!err.is_retryable());

        // A retry goes out under a new identity.
        let receipt = f.orchestrator.mint(&uri, &metadata, &f.signer).await.unwrap();
        let MintError::Simulation { mint, .. } = err else {
            unreachable!()
        };
        assert_ne!(receipt.mint, mint);
    }

    #[tokio::test]
    async fn timeout_reports_signature_for_status_check() {
        let f = fixture(Duration::from_millis(100));
        f.ledger.leave_next_unconfirmed();
        let (uri, metadata) = document();
        let err = f.orchestrator.mint(&uri, &metadata, &f.signer).await.unwrap_err();
        let MintError::ConfirmationTimeout { signature, .. } = err else {
            panic!("expected timeout, got {err}");
        };
        assert!(f.orchestrator.signature_status(&signature).await.unwrap().is_none());

        f.ledger.land_pending();
        let status = f.orchestrator.signature_status(&signature).await.unwrap();
        assert!(status.unwrap().reached(Commitment::Confirmed));
    }

    #[tokio::test]
    async fn unreachable_ledger_submits_nothing() {
        let f = fixture(Duration::from_secs(5));
        f.ledger.set_unavailable(true);
        let (uri, metadata) = document();
        let err = f.orchestrator.mint(&uri, &metadata, &f.signer).await.unwrap_err();
        assert!(matches!(err, MintError::Ledger(_)));
        assert!(err.is_retryable());
        f.ledger.set_unavailable(false);
        assert!(f.ledger.submitted().is_empty());
    }

    #[tokio::test]
    async fn lagging_node_is_retryable() {
        let f = fixture(Duration::from_secs(5));
        f.ledger.refuse_next_send(-32005, "Node is behind by 120 slots");
        let (uri, metadata) = document();
        let err = f.orchestrator.mint(&uri, &metadata, &f.signer).await.unwrap_err();
        assert!(matches!(err, MintError::Ledger(_)), "got {err}");
        assert!(err.is_retryable());
        assert_eq!(err.program_error(), None);

        f.orchestrator.mint(&uri, &metadata, &f.signer).await.unwrap();
    }

    #[tokio::test]
    async fn overlong_uri_is_rejected_locally() {
        let f = fixture(Duration::from_secs(5));
        let uri = ContentUri::parse(&format!("https://example.com/{}", "a".repeat(200))).unwrap();
        let err = f
            .orchestrator
            .mint_collection("Collection", "CPNFT", &uri, &f.signer)
            .await
            .unwrap_err();
        assert!(matches!(err, MintError::Arguments(_)));
        assert_eq!(f.orchestrator.issued_count(), 0);
    }

    #[tokio::test]
    async fn collection_mint_uses_collection_instruction() {
        let f = fixture(Duration::from_secs(5));
        let uri = ContentUri::from_cid("bafycollection");
        f.orchestrator
            .mint_collection("Preservation Collection", "CPNFT", &uri, &f.signer)
            .await
            .unwrap();
        let tx = &f.ledger.submitted()[0];
        let data = &tx.message.instructions[0].data;
        assert_eq!(&data[..8], &instruction_discriminator(MINT_COLLECTION_IX));
    }
}
