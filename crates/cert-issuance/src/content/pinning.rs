//! Pinning client for Pinata and self-hosted IPFS nodes, with gateway
//! fetch fallback.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use super::{ContentStore, ContentUri, Gateways};
use crate::config::{PinataAuth, PinningConfig};
use crate::error::{ConfigError, FetchError, UploadError};

const PINATA_API_BASE: &str = "https://api.pinata.cloud";
const GATEWAY_TIMEOUT: Duration = Duration::from_secs(10);

/// Pinata `pinFileToIPFS` / `pinJSONToIPFS` response.
#[derive(Debug, Deserialize)]
struct PinataPinResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: String,
}

/// Pinata `pinJSONToIPFS` request. The document is forwarded byte for byte.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PinataJsonBody<'a> {
    pinata_content: Box<RawValue>,
    pinata_metadata: PinataName<'a>,
}

#[derive(Debug, Serialize)]
struct PinataName<'a> {
    name: &'a str,
}

fn pinata_json_body<'a>(document: &[u8], name: &'a str) -> Result<PinataJsonBody<'a>, UploadError> {
    let content: Box<RawValue> = serde_json::from_slice(document)
        .map_err(|e| UploadError::Rejected(format!("document is not valid JSON: {e}")))?;
    Ok(PinataJsonBody {
        pinata_content: content,
        pinata_metadata: PinataName { name },
    })
}

/// Self-hosted IPFS API response for `/api/v0/add`.
#[derive(Debug, Deserialize)]
struct IpfsAddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

#[derive(Debug)]
enum Backend {
    Pinata(PinataAuth),
    SelfHosted(String),
    Unconfigured,
}

/// HTTP-backed `ContentStore`.
pub struct PinningClient {
    backend: Backend,
    gateways: Gateways,
    total_timeout: Duration,
    http: reqwest::Client,
}

impl PinningClient {
    /// Build a client from the `[pinning]` section, resolving credentials
    /// from the environment. Pinata wins when both backends are configured.
    pub fn from_config(config: &PinningConfig) -> Result<Self, ConfigError> {
        let backend = match (config.resolve_pinata_auth()?, &config.ipfs_api_url) {
            (Some(auth), _) => Backend::Pinata(auth),
            (None, Some(url)) => Backend::SelfHosted(url.trim_end_matches('/').to_string()),
            (None, None) => Backend::Unconfigured,
        };
        let total_timeout = Duration::from_secs(config.timeout_secs.max(1));
        let http = reqwest::Client::builder()
            .timeout(total_timeout)
            .build()
            .map_err(|e| ConfigError::Invalid(format!("failed to build pinning HTTP client: {e}")))?;
        Ok(Self {
            backend,
            gateways: Gateways::new(&config.gateways),
            total_timeout,
            http,
        })
    }

    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            Backend::Pinata(_) => "pinata",
            Backend::SelfHosted(_) => "ipfs",
            Backend::Unconfigured => "none",
        }
    }

    fn pinata_request(&self, path: &str, auth: &PinataAuth) -> reqwest::RequestBuilder {
        let req = self.http.post(format!("{PINATA_API_BASE}/pinning/{path}"));
        match auth {
            PinataAuth::Jwt(jwt) => req.bearer_auth(jwt),
            PinataAuth::ApiKey { key, secret } => req
                .header("pinata_api_key", key)
                .header("pinata_secret_api_key", secret),
        }
    }

    async fn pin_file_pinata(
        &self,
        bytes: Vec<u8>,
        name: &str,
        auth: &PinataAuth,
    ) -> Result<ContentUri, UploadError> {
        let metadata = serde_json::json!({ "name": name }).to_string();
        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes).file_name(name.to_string()),
            )
            .text("pinataMetadata", metadata);

        let resp = self
            .pinata_request("pinFileToIPFS", auth)
            .multipart(form)
            .send()
            .await
            .map_err(transport("Pinata file pin"))?;
        let pinned: PinataPinResponse = read_pin_response(resp, "Pinata file pin").await?;
        Ok(ContentUri::from_cid(&pinned.ipfs_hash))
    }

    async fn pin_json_pinata(
        &self,
        document: &[u8],
        name: &str,
        auth: &PinataAuth,
    ) -> Result<ContentUri, UploadError> {
        let body = pinata_json_body(document, name)?;

        let resp = self
            .pinata_request("pinJSONToIPFS", auth)
            .json(&body)
            .send()
            .await
            .map_err(transport("Pinata JSON pin"))?;
        let pinned: PinataPinResponse = read_pin_response(resp, "Pinata JSON pin").await?;
        Ok(ContentUri::from_cid(&pinned.ipfs_hash))
    }

    async fn add_self_hosted(
        &self,
        bytes: Vec<u8>,
        name: &str,
        api_url: &str,
    ) -> Result<ContentUri, UploadError> {
        let url = format!("{api_url}/api/v0/add?pin=true&cid-version=1");
        let part = reqwest::multipart::Part::bytes(bytes).file_name(name.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);

        let resp = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(transport("IPFS add"))?;
        let added: IpfsAddResponse = read_pin_response(resp, "IPFS add").await?;
        Ok(ContentUri::from_cid(&added.hash))
    }

    async fn fetch_single_gateway(&self, url: &str) -> Result<serde_json::Value, String> {
        let resp = self
            .http
            .get(url)
            .timeout(GATEWAY_TIMEOUT)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        resp.json()
            .await
            .map_err(|e| format!("invalid JSON: {e}"))
    }
}

fn transport(what: &'static str) -> impl Fn(reqwest::Error) -> UploadError {
    move |e| UploadError::Transient(format!("{what} request failed: {e}"))
}

/// Map a pinning response onto the transient/rejected split.
async fn read_pin_response<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
    what: &str,
) -> Result<T, UploadError> {
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(classify_status(status, &format!("{what} failed (HTTP {status}): {text}")));
    }
    resp.json()
        .await
        .map_err(|e| UploadError::Transient(format!("invalid {what} response: {e}")))
}

fn classify_status(status: reqwest::StatusCode, message: &str) -> UploadError {
    if status.is_server_error()
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
    {
        UploadError::Transient(message.to_string())
    } else {
        UploadError::Rejected(message.to_string())
    }
}

#[async_trait]
impl ContentStore for PinningClient {
    async fn upload_binary(&self, bytes: Vec<u8>, name: &str) -> Result<ContentUri, UploadError> {
        if bytes.is_empty() {
            return Err(UploadError::Rejected("refusing to pin an empty file".into()));
        }
        let uri = match &self.backend {
            Backend::Pinata(auth) => self.pin_file_pinata(bytes, name, auth).await?,
            Backend::SelfHosted(url) => self.add_self_hosted(bytes, name, url).await?,
            Backend::Unconfigured => return Err(no_backend()),
        };
        tracing::info!(%uri, name, backend = self.backend_name(), "pinned file");
        Ok(uri)
    }

    async fn upload_json(&self, document: &[u8], name: &str) -> Result<ContentUri, UploadError> {
        let uri = match &self.backend {
            Backend::Pinata(auth) => self.pin_json_pinata(document, name, auth).await?,
            Backend::SelfHosted(url) => {
                self.add_self_hosted(document.to_vec(), name, url).await?
            }
            Backend::Unconfigured => return Err(no_backend()),
        };
        tracing::info!(%uri, name, backend = self.backend_name(), "pinned JSON document");
        Ok(uri)
    }

    async fn fetch_json(&self, uri: &ContentUri) -> Result<serde_json::Value, FetchError> {
        let deadline = tokio::time::Instant::now() + self.total_timeout;
        let mut errors = Vec::new();

        for url in self.gateways.candidates(uri) {
            if tokio::time::Instant::now() >= deadline {
                errors.push("deadline exceeded".to_string());
                break;
            }
            match self.fetch_single_gateway(&url).await {
                Ok(doc) => return Ok(doc),
                Err(e) => {
                    tracing::debug!(%url, error = %e, "gateway fetch failed");
                    errors.push(format!("{url}: {e}"));
                }
            }
        }

        Err(FetchError {
            uri: uri.to_string(),
            reason: errors.join("; "),
        })
    }

    fn gateways(&self) -> &Gateways {
        &self.gateways
    }
}

fn no_backend() -> UploadError {
    UploadError::Rejected(
        "no pinning backend configured (set pinning.pinata_jwt_env, the Pinata API key pair, or pinning.ipfs_api_url)"
            .into(),
    )
}
