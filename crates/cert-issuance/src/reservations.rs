//! Read model: which certificates a wallet holds.
//!
//! Nothing here is persisted. Each listing is one token-account query, one
//! batched metadata-account read and one document fetch per certificate.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use solana_sdk::pubkey::Pubkey;

use crate::accounts::{derive_metadata_account, ProgramIds};
use crate::content::{ContentStore, ContentUri};
use crate::error::LedgerError;
use crate::ledger::LedgerRpc;
use crate::metadata::OnChainMetadata;

/// `getMultipleAccounts` accepts at most this many keys per call.
const MAX_ACCOUNTS_PER_REQUEST: usize = 100;
const FETCH_CONCURRENCY: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Empty,
    /// Certificate exists but its document could not be resolved yet.
    Pending,
    Approved,
    /// Client-side bookkeeping only; never produced here.
    Rejected,
}

/// Wire shape of one certificate.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CertificateView {
    pub address: String,
    pub name: String,
    pub symbol: String,
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReservationView {
    pub status: ReservationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<CertificateView>,
}

impl ReservationView {
    pub fn empty() -> Self {
        Self {
            status: ReservationStatus::Empty,
            certificate: None,
        }
    }
}

pub struct ReservationStateTracker {
    ledger: Arc<dyn LedgerRpc>,
    content: Arc<dyn ContentStore>,
    programs: ProgramIds,
    issuer: Pubkey,
    symbol: String,
}

impl ReservationStateTracker {
    /// Track certificates whose metadata was written by `issuer` under
    /// `symbol`.
    pub fn new(
        ledger: Arc<dyn LedgerRpc>,
        content: Arc<dyn ContentStore>,
        programs: ProgramIds,
        issuer: Pubkey,
        symbol: impl Into<String>,
    ) -> Self {
        Self {
            ledger,
            content,
            programs,
            issuer,
            symbol: symbol.into(),
        }
    }

    /// Every certificate `wallet` holds, or a single `empty` view.
    pub async fn list_by_owner(&self, wallet: &Pubkey) -> Result<Vec<ReservationView>, LedgerError> {
        let certificates = self.matching_certificates(wallet).await?;
        if certificates.is_empty() {
            return Ok(vec![ReservationView::empty()]);
        }

        let views: Vec<ReservationView> = stream::iter(certificates)
            .map(|onchain| self.resolve(onchain))
            .buffered(FETCH_CONCURRENCY)
            .collect()
            .await;

        let degraded = views
            .iter()
            .filter(|v| v.status == ReservationStatus::Pending)
            .count();
        tracing::debug!(%wallet, total = views.len(), degraded, "listed certificates");
        Ok(views)
    }

    /// Certificate views only, for clients that do not track status.
    pub async fn certificates(&self, wallet: &Pubkey) -> Result<Vec<CertificateView>, LedgerError> {
        Ok(self
            .list_by_owner(wallet)
            .await?
            .into_iter()
            .filter_map(|v| v.certificate)
            .collect())
    }

    async fn matching_certificates(&self, wallet: &Pubkey) -> Result<Vec<OnChainMetadata>, LedgerError> {
        let holdings = self
            .ledger
            .token_accounts_by_owner(wallet, &self.programs.token)
            .await?;
        let mints: Vec<Pubkey> = holdings
            .iter()
            .filter(|h| h.amount == 1)
            .map(|h| h.mint)
            .collect();
        if mints.is_empty() {
            return Ok(Vec::new());
        }

        let metadata_accounts: Vec<Pubkey> = mints
            .iter()
            .map(|mint| derive_metadata_account(mint, &self.programs.token_metadata))
            .collect();
        let mut raw = Vec::with_capacity(metadata_accounts.len());
        for chunk in metadata_accounts.chunks(MAX_ACCOUNTS_PER_REQUEST) {
            raw.extend(self.ledger.multiple_account_data(chunk).await?);
        }

        let mut matches = Vec::new();
        for (mint, data) in mints.iter().zip(raw) {
            let Some(data) = data else { continue };
            match OnChainMetadata::decode(&data) {
                Ok(onchain)
                    if onchain.mint == *mint
                        && onchain.update_authority == self.issuer
                        && onchain.symbol == self.symbol =>
                {
                    matches.push(onchain)
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(%mint, error = %e, "skipping undecodable metadata"),
            }
        }
        Ok(matches)
    }

    async fn resolve(&self, onchain: OnChainMetadata) -> ReservationView {
        let mut view = CertificateView {
            address: onchain.mint.to_string(),
            name: onchain.name.clone(),
            symbol: onchain.symbol.clone(),
            uri: self.content.gateway_url(&onchain.uri),
            image: None,
            attributes: None,
            description: None,
        };

        let document = match ContentUri::parse(&onchain.uri) {
            Ok(uri) => self.content.fetch_json(&uri).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        let status = match document {
            Ok(doc) => {
                view.image = doc
                    .get("image")
                    .and_then(Value::as_str)
                    .map(|image| self.content.gateway_url(image));
                view.attributes = Some(
                    doc.get("attributes")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default(),
                );
                view.description = doc
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                ReservationStatus::Approved
            }
            Err(reason) => {
                tracing::warn!(mint = %onchain.mint, uri = %onchain.uri, %reason, "certificate document unavailable");
                ReservationStatus::Pending
            }
        };

        ReservationView {
            status,
            certificate: Some(view),
        }
    }
}
