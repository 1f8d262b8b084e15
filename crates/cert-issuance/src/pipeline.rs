//! Request-scoped issuance: upload, mint, then hand over.
//!
//! Stages run strictly in order. Once a mint is confirmed the run can no
//! longer fail; a transfer problem is attached to the outcome instead.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use thiserror::Error;
use tracing::Instrument;
use uuid::Uuid;

use crate::content::{ContentStore, ContentUri};
use crate::error::{Error, TransferError, UploadError};
use crate::metadata::{CertificateMetadata, CertificateRequest, CertificateTemplate, ImageSource};
use crate::mint::MintOrchestrator;
use crate::signer::SigningContext;
use crate::transfer::OwnershipTransferor;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Received,
    Uploading,
    Minting,
    Transferring,
    Completed,
    Failed,
}

impl Stage {
    fn can_advance_to(self, next: Stage) -> bool {
        use Stage::*;
        matches!(
            (self, next),
            (Received, Uploading)
                | (Uploading, Minting)
                | (Uploading, Failed)
                | (Minting, Transferring)
                | (Minting, Completed)
                | (Minting, Failed)
                | (Transferring, Completed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal stage transition {from:?} -> {to:?}")]
pub struct IllegalTransition {
    pub from: Stage,
    pub to: Stage,
}

/// Stage tracker for one issuance.
#[derive(Clone, Debug)]
pub struct PipelineRun {
    id: Uuid,
    stage: Stage,
    history: Vec<Stage>,
}

impl Default for PipelineRun {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineRun {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            stage: Stage::Received,
            history: vec![Stage::Received],
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn history(&self) -> &[Stage] {
        &self.history
    }

    pub fn try_advance(&mut self, next: Stage) -> Result<(), IllegalTransition> {
        if !self.stage.can_advance_to(next) {
            return Err(IllegalTransition {
                from: self.stage,
                to: next,
            });
        }
        tracing::debug!(run_id = %self.id, from = ?self.stage, to = ?next, "stage transition");
        self.stage = next;
        self.history.push(next);
        Ok(())
    }

    fn enter(&mut self, next: Stage) {
        if let Err(e) = self.try_advance(next) {
            tracing::error!(run_id = %self.id, error = %e, "pipeline stage bug");
        }
    }
}

/// Result of a run that reached `Completed`.
#[derive(Debug)]
pub struct IssuanceOutcome {
    pub run_id: Uuid,
    pub mint_address: Pubkey,
    pub metadata_url: ContentUri,
    pub image_url: ContentUri,
    pub signature: Signature,
    pub transfer_signature: Option<Signature>,
    /// Set when a recipient was given and the hand-over failed. The
    /// certificate stays with the issuer and the transfer can be retried.
    pub transfer_error: Option<TransferError>,
    pub stage: Stage,
    pub history: Vec<Stage>,
    pub issued_at: DateTime<Utc>,
}

/// A run that stopped before a certificate was minted.
#[derive(Debug, Error)]
#[error("issuance {run_id} failed at {stage:?}: {error}")]
pub struct PipelineFailure {
    pub run_id: Uuid,
    /// `Received` for validation failures, otherwise `Failed`.
    pub stage: Stage,
    pub history: Vec<Stage>,
    #[source]
    pub error: Error,
}

pub struct IssuancePipeline {
    content: Arc<dyn ContentStore>,
    minter: Arc<MintOrchestrator>,
    transferor: Arc<OwnershipTransferor>,
    template: CertificateTemplate,
}

impl IssuancePipeline {
    pub fn new(
        content: Arc<dyn ContentStore>,
        minter: Arc<MintOrchestrator>,
        transferor: Arc<OwnershipTransferor>,
        template: CertificateTemplate,
    ) -> Self {
        Self {
            content,
            minter,
            transferor,
            template,
        }
    }

    /// Issue one certificate.
    pub async fn run(
        &self,
        request: CertificateRequest,
        signer: &SigningContext,
    ) -> Result<IssuanceOutcome, PipelineFailure> {
        let mut run = PipelineRun::new();
        let span = tracing::info_span!(
            "issuance",
            run_id = %run.id(),
            requester = request.requester.as_deref().unwrap_or("anonymous"),
        );
        self.execute(&mut run, request, signer)
            .instrument(span)
            .await
    }

    async fn execute(
        &self,
        run: &mut PipelineRun,
        request: CertificateRequest,
        signer: &SigningContext,
    ) -> Result<IssuanceOutcome, PipelineFailure> {
        let fail = |run: &mut PipelineRun, error: Error| {
            if run.stage() != Stage::Received {
                run.enter(Stage::Failed);
            }
            tracing::warn!(stage = ?run.stage(), error = %error, "issuance failed");
            PipelineFailure {
                run_id: run.id(),
                stage: run.stage(),
                history: run.history().to_vec(),
                error,
            }
        };

        let recipient = match request.validate() {
            Ok(recipient) => recipient,
            Err(e) => return Err(fail(run, e.into())),
        };

        run.enter(Stage::Uploading);
        let (image_url, metadata, metadata_url) = match self.upload(run, &request).await {
            Ok(uploaded) => uploaded,
            Err(e) => return Err(fail(run, e.into())),
        };

        run.enter(Stage::Minting);
        let minted = match self.minter.mint(&metadata_url, &metadata, signer).await {
            Ok(receipt) => receipt,
            Err(e) => return Err(fail(run, e.into())),
        };

        let mut transfer_signature = None;
        let mut transfer_error = None;
        if let Some(recipient) = recipient {
            run.enter(Stage::Transferring);
            match self.transferor.transfer(&minted.mint, &recipient, signer).await {
                Ok(receipt) => transfer_signature = Some(receipt.signature),
                Err(e) => {
                    tracing::error!(
                        transfer_failed = true,
                        mint = %minted.mint,
                        %recipient,
                        retryable = e.is_retryable(),
                        error = %e,
                        "certificate minted but transfer failed"
                    );
                    transfer_error = Some(e);
                }
            }
        }
        run.enter(Stage::Completed);

        tracing::info!(
            mint = %minted.mint,
            signature = %minted.signature,
            metadata = %metadata_url,
            transferred = transfer_signature.is_some(),
            "issuance completed"
        );

        Ok(IssuanceOutcome {
            run_id: run.id(),
            mint_address: minted.mint,
            metadata_url,
            image_url,
            signature: minted.signature,
            transfer_signature,
            transfer_error,
            stage: run.stage(),
            history: run.history().to_vec(),
            issued_at: Utc::now(),
        })
    }

    async fn upload(
        &self,
        run: &PipelineRun,
        request: &CertificateRequest,
    ) -> Result<(ContentUri, CertificateMetadata, ContentUri), UploadError> {
        let image_url = match &request.image {
            ImageSource::Uri(uri) => uri.clone(),
            ImageSource::Bytes { bytes, file_name } => {
                self.content.upload_binary(bytes.clone(), file_name).await?
            }
        };

        let metadata = CertificateMetadata::build(&self.template, &image_url, &request.attributes);
        let document = metadata
            .to_json_bytes()
            .map_err(|e| UploadError::Rejected(format!("cannot serialize metadata: {e}")))?;
        let metadata_url = self
            .content
            .upload_json(&document, &format!("certificate-{}.json", run.id()))
            .await?;
        Ok((image_url, metadata, metadata_url))
    }
}
