//! In-process content store.
//!
//! Identifiers are real CIDv1 values (raw codec, sha2-256 multihash,
//! base32 multibase), so identical bytes always produce the same URI.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{ContentStore, ContentUri, Gateways};
use crate::error::{FetchError, UploadError};

const CID_VERSION_1: u8 = 0x01;
const CODEC_RAW: u8 = 0x55;
const MULTIHASH_SHA2_256: u8 = 0x12;
const SHA2_256_LEN: u8 = 0x20;

/// Compute the CIDv1 (raw, sha2-256) of `bytes` in base32 multibase form.
pub fn cid_v1_raw(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut cid = Vec::with_capacity(4 + digest.len());
    cid.extend_from_slice(&[CID_VERSION_1, CODEC_RAW, MULTIHASH_SHA2_256, SHA2_256_LEN]);
    cid.extend_from_slice(&digest);
    format!("b{}", base32_lower(&cid))
}

/// RFC 4648 base32, lowercase, no padding.
fn base32_lower(bytes: &[u8]) -> String {
    const ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";
    let mut out = String::with_capacity((bytes.len() * 8).div_ceil(5));
    let mut buffer: u32 = 0;
    let mut bits = 0;
    for &byte in bytes {
        buffer = (buffer << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(char::from(ALPHABET[((buffer >> bits) & 0x1f) as usize]));
        }
    }
    if bits > 0 {
        out.push(char::from(ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize]));
    }
    out
}

#[derive(Default)]
struct State {
    objects: HashMap<String, Vec<u8>>,
    upload_failures: VecDeque<UploadError>,
    unfetchable: HashSet<String>,
    uploads: usize,
}

pub struct MemoryStore {
    gateways: Gateways,
    state: Mutex<State>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            gateways: Gateways::default(),
            state: Mutex::new(State::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fail the next upload with `err`. Queued failures are consumed in order.
    pub fn fail_next_upload(&self, err: UploadError) {
        self.lock().upload_failures.push_back(err);
    }

    /// Make fetches of `uri` fail as if every gateway were down.
    pub fn make_unfetchable(&self, uri: &ContentUri) {
        if let Some(cid) = uri.cid() {
            self.lock().unfetchable.insert(cid.to_string());
        }
    }

    /// Successful uploads so far.
    pub fn upload_count(&self) -> usize {
        self.lock().uploads
    }

    fn store(&self, bytes: Vec<u8>) -> Result<ContentUri, UploadError> {
        let mut state = self.lock();
        if let Some(err) = state.upload_failures.pop_front() {
            return Err(err);
        }
        let cid = cid_v1_raw(&bytes);
        state.objects.insert(cid.clone(), bytes);
        state.uploads += 1;
        Ok(ContentUri::from_cid(&cid))
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn upload_binary(&self, bytes: Vec<u8>, _name: &str) -> Result<ContentUri, UploadError> {
        if bytes.is_empty() {
            return Err(UploadError::Rejected("refusing to pin an empty file".into()));
        }
        self.store(bytes)
    }

    async fn upload_json(&self, document: &[u8], _name: &str) -> Result<ContentUri, UploadError> {
        serde_json::from_slice::<serde_json::Value>(document)
            .map_err(|e| UploadError::Rejected(format!("document is not valid JSON: {e}")))?;
        self.store(document.to_vec())
    }

    async fn fetch_json(&self, uri: &ContentUri) -> Result<serde_json::Value, FetchError> {
        let fail = |reason: &str| FetchError {
            uri: uri.to_string(),
            reason: reason.to_string(),
        };
        let cid = uri.cid().ok_or_else(|| fail("not an ipfs:// URI"))?;
        let state = self.lock();
        if state.unfetchable.contains(cid) {
            return Err(fail("all gateways failed"));
        }
        let bytes = state.objects.get(cid).ok_or_else(|| fail("not found"))?;
        serde_json::from_slice(bytes).map_err(|e| fail(&format!("invalid JSON: {e}")))
    }

    fn gateways(&self) -> &Gateways {
        &self.gateways
    }
}
