//! Content-addressed storage for certificate images and metadata documents.
//!
//! Uploads return `ipfs://<cid>` URIs. Since the identifier is derived from
//! the bytes, re-uploading the same payload yields the same URI, which is
//! what makes transient upload failures safe to retry.

mod pinning;

#[cfg(any(test, feature = "testing"))]
pub mod memory;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{FetchError, UploadError, ValidationError};

pub use pinning::PinningClient;

/// Default IPFS gateways used when none are configured.
pub const DEFAULT_GATEWAYS: &[&str] = &[
    "https://gateway.pinata.cloud/ipfs/",
    "https://dweb.link/ipfs/",
    "https://ipfs.io/ipfs/",
];

const IPFS_SCHEME: &str = "ipfs://";

/// A reference to stored content: either `ipfs://<cid>[/path]` or an
/// already-resolved `http(s)` URL.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentUri(String);

impl ContentUri {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let raw = raw.trim();
        if raw.starts_with(IPFS_SCHEME) {
            parse_ipfs_uri(raw)?;
            return Ok(Self(raw.to_string()));
        }
        if raw.starts_with("https://") || raw.starts_with("http://") {
            let rest = raw.split_once("://").map(|(_, r)| r).unwrap_or_default();
            if rest.is_empty() || rest.starts_with('/') {
                return Err(ValidationError::InvalidContentUri(raw.to_string()));
            }
            return Ok(Self(raw.to_string()));
        }
        Err(ValidationError::InvalidContentUri(raw.to_string()))
    }

    pub fn from_cid(cid: &str) -> Self {
        Self(format!("{IPFS_SCHEME}{cid}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_ipfs(&self) -> bool {
        self.0.starts_with(IPFS_SCHEME)
    }

    /// The bare CID of an `ipfs://` URI, without any path.
    pub fn cid(&self) -> Option<&str> {
        let path = parse_ipfs_uri(&self.0).ok()?;
        path.split('/').next()
    }
}

impl fmt::Display for ContentUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ContentUri {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ContentUri> for String {
    fn from(uri: ContentUri) -> Self {
        uri.0
    }
}

/// Parse an `ipfs://` URI and return the CID with any trailing path.
pub fn parse_ipfs_uri(uri: &str) -> Result<&str, ValidationError> {
    let stripped = uri
        .strip_prefix(IPFS_SCHEME)
        .ok_or_else(|| ValidationError::InvalidContentUri(uri.to_string()))?;
    let trimmed = stripped.trim_start_matches('/');
    if trimmed.is_empty() || trimmed.starts_with('/') {
        return Err(ValidationError::InvalidContentUri(uri.to_string()));
    }
    Ok(trimmed)
}

/// Ensure a gateway URL ends with a slash for CID concatenation.
pub(crate) fn ensure_trailing_slash(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    }
}

/// Ordered gateway list used to turn `ipfs://` URIs into fetchable URLs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Gateways(Vec<String>);

impl Gateways {
    /// Configured gateways, falling back to `DEFAULT_GATEWAYS` when empty.
    pub fn new(configured: &[String]) -> Self {
        let mut gateways: Vec<String> = Vec::new();
        let source: Vec<String> = if configured.is_empty() {
            DEFAULT_GATEWAYS.iter().map(|s| (*s).to_string()).collect()
        } else {
            configured.to_vec()
        };
        for g in source {
            let normalized = ensure_trailing_slash(&g);
            if !gateways.contains(&normalized) {
                gateways.push(normalized);
            }
        }
        Self(gateways)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Rewrite `ipfs://` references to the first gateway. Anything else is
    /// returned unchanged.
    pub fn rewrite(&self, uri: &str) -> String {
        match (parse_ipfs_uri(uri), self.0.first()) {
            (Ok(path), Some(gateway)) => format!("{gateway}{path}"),
            _ => uri.to_string(),
        }
    }

    /// Every URL the content may be fetched from, in order.
    pub fn candidates(&self, uri: &ContentUri) -> Vec<String> {
        match parse_ipfs_uri(uri.as_str()) {
            Ok(path) => self.0.iter().map(|g| format!("{g}{path}")).collect(),
            Err(_) => vec![uri.as_str().to_string()],
        }
    }
}

impl Default for Gateways {
    fn default() -> Self {
        Self::new(&[])
    }
}

/// Pinning and retrieval of certificate content.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Pin raw bytes (the certificate image).
    async fn upload_binary(&self, bytes: Vec<u8>, name: &str) -> Result<ContentUri, UploadError>;

    /// Pin a serialized JSON document.
    async fn upload_json(&self, document: &[u8], name: &str) -> Result<ContentUri, UploadError>;

    /// Resolve and parse a JSON document.
    async fn fetch_json(&self, uri: &ContentUri) -> Result<serde_json::Value, FetchError>;

    fn gateways(&self) -> &Gateways;

    /// Gateway form of `uri`, for clients that cannot resolve `ipfs://`.
    fn gateway_url(&self, uri: &str) -> String {
        self.gateways().rewrite(uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ipfs_uri_valid() {
        assert_eq!(parse_ipfs_uri("ipfs://bafyexample123").unwrap(), "bafyexample123");
        assert_eq!(
            parse_ipfs_uri("ipfs://bafyexample123/path/to/file").unwrap(),
            "bafyexample123/path/to/file"
        );
    }

    #[test]
    fn parse_ipfs_uri_rejects_empty() {
        assert!(parse_ipfs_uri("ipfs://").is_err());
        assert!(parse_ipfs_uri("https://example.com").is_err());
    }

    #[test]
    fn content_uri_accepts_ipfs_and_http() {
        let ipfs = ContentUri::parse("ipfs://bafyimage").unwrap();
        assert!(ipfs.is_ipfs());
        assert_eq!(ipfs.cid(), Some("bafyimage"));

        let http = ContentUri::parse("https://gateway.pinata.cloud/ipfs/Qm123").unwrap();
        assert!(!http.is_ipfs());
        assert_eq!(http.cid(), None);
    }

    #[test]
    fn content_uri_rejects_other_schemes() {
        assert!(ContentUri::parse("").is_err());
        assert!(ContentUri::parse("file:///etc/passwd").is_err());
        assert!(ContentUri::parse("https://").is_err());
        assert!(ContentUri::parse("not a uri").is_err());
    }

    #[test]
    fn content_uri_serde_is_a_string() {
        let uri: ContentUri = serde_json::from_str("\"ipfs://bafy/meta.json\"").unwrap();
        assert_eq!(uri.cid(), Some("bafy"));
        assert_eq!(serde_json::to_string(&uri).unwrap(), "\"ipfs://bafy/meta.json\"");
        assert!(serde_json::from_str::<ContentUri>("\"ftp://x\"").is_err());
    }

    #[test]
    fn default_gateways_are_populated() {
        let gateways = Gateways::default();
        assert_eq!(gateways.as_slice().len(), DEFAULT_GATEWAYS.len());
        for gw in gateways.as_slice() {
            assert!(gw.starts_with("https://"), "gateway should be HTTPS: {gw}");
        }
    }

    #[test]
    fn custom_gateways_are_normalized_and_deduplicated() {
        let gateways = Gateways::new(&[
            "https://gw.example.com/ipfs".to_string(),
            "https://gw.example.com/ipfs/".to_string(),
        ]);
        assert_eq!(gateways.as_slice(), ["https://gw.example.com/ipfs/"]);
    }

    #[test]
    fn rewrite_uses_first_gateway() {
        let gateways = Gateways::default();
        assert_eq!(
            gateways.rewrite("ipfs://bafyimage"),
            "https://gateway.pinata.cloud/ipfs/bafyimage"
        );
        assert_eq!(
            gateways.rewrite("https://example.com/a.png"),
            "https://example.com/a.png"
        );
    }

    #[test]
    fn candidates_cover_every_gateway() {
        let gateways = Gateways::default();
        let uri = ContentUri::from_cid("bafymeta");
        let urls = gateways.candidates(&uri);
        assert_eq!(urls.len(), 3);
        assert!(urls.iter().all(|u| u.ends_with("/bafymeta")));

        let direct = ContentUri::parse("https://example.com/doc.json").unwrap();
        assert_eq!(gateways.candidates(&direct), ["https://example.com/doc.json"]);
    }
}
