#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

//! Environmental preservation certificate issuance.
//!
//! Turns an image plus structured evidence into a token on the ledger:
//! content is pinned to IPFS, a certificate is minted by the issuer and then
//! handed to its recipient. A read model lists the certificates a wallet
//! holds.
//!
//! # Example
//!
//! ```rust,ignore
//! use cert_issuance::{IssuanceConfig, Issuer};
//!
//! let config = IssuanceConfig::load("issuance.toml".as_ref())?;
//! let issuer = Issuer::from_config(&config)?;
//! let outcome = issuer.pipeline.run(request, &issuer.signer).await?;
//! ```

pub mod accounts;
pub mod config;
pub mod content;
pub mod error;
pub mod ledger;
pub mod metadata;
pub mod mint;
pub mod pipeline;
pub mod reservations;
pub mod signer;
pub mod transfer;

mod issuer;

pub use accounts::{MintAccountSet, ProgramIds};
pub use config::IssuanceConfig;
pub use content::{ContentStore, ContentUri};
pub use error::{Error, Result};
pub use issuer::{Backends, Issuer};
pub use ledger::LedgerRpc;
pub use metadata::{CertificateAttributes, CertificateMetadata, CertificateRequest, ImageSource};
pub use mint::{MintOrchestrator, MintReceipt};
pub use pipeline::{IssuanceOutcome, IssuancePipeline, PipelineFailure, Stage};
pub use reservations::{ReservationStateTracker, ReservationStatus, ReservationView};
pub use signer::SigningContext;
pub use transfer::{Custody, OwnershipTransferor, TransferReceipt};
