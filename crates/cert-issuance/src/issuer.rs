//! Wiring of the issuance components around one issuer identity.

use std::sync::Arc;
use std::time::Duration;

use solana_sdk::pubkey::Pubkey;

use crate::accounts::ProgramIds;
use crate::config::{IssuanceConfig, LedgerConfig};
use crate::content::{ContentStore, PinningClient};
use crate::error::Result;
use crate::ledger::{JsonRpcLedger, LedgerRpc, Submitter};
use crate::metadata::CertificateTemplate;
use crate::mint::MintOrchestrator;
use crate::pipeline::IssuancePipeline;
use crate::reservations::ReservationStateTracker;
use crate::signer::SigningContext;
use crate::transfer::OwnershipTransferor;

/// External systems and identity an `Issuer` is built from.
pub struct Backends {
    pub ledger: Arc<dyn LedgerRpc>,
    pub content: Arc<dyn ContentStore>,
    pub signer: SigningContext,
    pub programs: ProgramIds,
    pub template: CertificateTemplate,
    pub default_mint: Option<Pubkey>,
}

/// Every issuance component, sharing one ledger connection and one
/// submission gate.
pub struct Issuer {
    pub signer: SigningContext,
    pub ledger: Arc<dyn LedgerRpc>,
    pub content: Arc<dyn ContentStore>,
    pub minter: Arc<MintOrchestrator>,
    pub transferor: Arc<OwnershipTransferor>,
    pub reservations: Arc<ReservationStateTracker>,
    pub pipeline: Arc<IssuancePipeline>,
    pub template: CertificateTemplate,
    /// Certificate moved by transfer requests that name no mint.
    pub default_mint: Option<Pubkey>,
}

impl Issuer {
    /// Connect to the configured ledger and pinning service.
    pub fn from_config(config: &IssuanceConfig) -> Result<Self> {
        let signer = SigningContext::from_config(&config.signer)?;
        let ledger = JsonRpcLedger::new(
            config.ledger.effective_rpc_url(),
            config.ledger.commitment,
            Duration::from_secs(config.ledger.request_timeout_secs),
        )?;
        let content = PinningClient::from_config(&config.pinning)?;

        tracing::info!(
            issuer = %signer.pubkey(),
            rpc_url = %ledger.url(),
            pinning = content.backend_name(),
            "issuer configured"
        );

        Ok(Self::assemble(
            Backends {
                ledger: Arc::new(ledger),
                content: Arc::new(content),
                signer,
                programs: config.programs.program_ids()?,
                template: config.certificate.clone(),
                default_mint: config.transfer.default_mint()?,
            },
            &config.ledger,
        ))
    }

    pub fn assemble(backends: Backends, ledger_config: &LedgerConfig) -> Self {
        let Backends {
            ledger,
            content,
            signer,
            programs,
            template,
            default_mint,
        } = backends;

        let submitter = Arc::new(Submitter::new(ledger.clone(), ledger_config));
        let minter = Arc::new(MintOrchestrator::new(submitter.clone(), programs));
        let transferor = Arc::new(OwnershipTransferor::new(submitter, programs));
        let reservations = Arc::new(ReservationStateTracker::new(
            ledger.clone(),
            content.clone(),
            programs,
            signer.pubkey(),
            template.symbol.clone(),
        ));
        let pipeline = Arc::new(IssuancePipeline::new(
            content.clone(),
            minter.clone(),
            transferor.clone(),
            template.clone(),
        ));

        Self {
            signer,
            ledger,
            content,
            minter,
            transferor,
            reservations,
            pipeline,
            template,
            default_mint,
        }
    }
}
