//! Shared fixtures: an issuer wired to in-memory backends.

#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use cert_issuance::config::LedgerConfig;
use cert_issuance::content::memory::MemoryStore;
use cert_issuance::ledger::memory::MemoryLedger;
use cert_issuance::metadata::{CertificateAttributes, CertificateTemplate};
use cert_issuance::{Backends, CertificateRequest, ContentUri, ImageSource, Issuer, SigningContext};
use solana_sdk::signature::Keypair;

pub struct TestIssuer {
    pub issuer: Issuer,
    pub ledger: Arc<MemoryLedger>,
    pub store: Arc<MemoryStore>,
}

pub fn ledger_config(confirm_timeout_secs: u64) -> LedgerConfig {
    LedgerConfig {
        confirm_timeout_secs,
        poll_interval_ms: 10,
        ..LedgerConfig::default()
    }
}

pub fn test_issuer() -> TestIssuer {
    test_issuer_with(ledger_config(5))
}

pub fn test_issuer_with(config: LedgerConfig) -> TestIssuer {
    let ledger = Arc::new(MemoryLedger::new());
    let store = Arc::new(MemoryStore::new());
    let issuer = Issuer::assemble(
        Backends {
            ledger: ledger.clone(),
            content: store.clone(),
            signer: SigningContext::new(Keypair::new()),
            programs: ledger.programs(),
            template: CertificateTemplate::default(),
            default_mint: None,
        },
        &config,
    );
    TestIssuer {
        issuer,
        ledger,
        store,
    }
}

pub fn attributes() -> CertificateAttributes {
    CertificateAttributes {
        vegetation_coverage: "85".into(),
        hectares_number: "120".into(),
        specific_attributes: "Atlantic forest remnant with native species".into(),
        water_bodies_count: "3".into(),
        springs_count: "2".into(),
        ongoing_projects: "Riparian reforestation".into(),
        car_registry: "SP-3550308-0A1B2C3D4E5F".into(),
    }
}

pub fn request_with_image_bytes(recipient: Option<String>) -> CertificateRequest {
    CertificateRequest {
        requester: Some("landowner@example.com".into()),
        image: ImageSource::Bytes {
            bytes: b"\x89PNG\r\n\x1a\nfake image".to_vec(),
            file_name: "area.png".into(),
        },
        attributes: attributes(),
        recipient,
    }
}

pub fn request_with_image_uri(uri: &str, recipient: Option<String>) -> CertificateRequest {
    CertificateRequest {
        requester: None,
        image: ImageSource::Uri(ContentUri::parse(uri).unwrap()),
        attributes: attributes(),
        recipient,
    }
}
