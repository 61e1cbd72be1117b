//! Tier-1 directory client
//!
//! Talks to `{tier1}/api/v1/deploy/{uuid}/{publicKey}`: `GET` asks which
//! cloudlets already run the application, `POST` asks the directory to
//! allocate one.

use crate::error::DeployError;
use async_trait::async_trait;
use sinfonia_proto::{DeploymentRecord, DirectoryMethod, Key, DEPLOY_PATH};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

/// Default timeout for a directory round trip
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum number of redirects followed
const MAX_REDIRECTS: usize = 10;

/// Status and body of a directory response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// HTTP transport used by the directory client
///
/// Implementations must follow redirects and report transport failures as
/// [`DeployError::Http`]. Non-2xx statuses are not errors at this level.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, method: DirectoryMethod, url: &Url) -> Result<HttpResponse, DeployError>;
}

/// [`HttpClient`] backed by reqwest with rustls
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Result<Self, DeployError> {
        Self::with_timeout(DEFAULT_HTTP_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, DeployError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(timeout)
            .user_agent(concat!("sinfonia-tier3/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DeployError::Http(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn send(&self, method: DirectoryMethod, url: &Url) -> Result<HttpResponse, DeployError> {
        let request = match method {
            DirectoryMethod::Query => self.client.get(url.clone()),
            DirectoryMethod::Deploy => self.client.post(url.clone()),
        };

        let response = request
            .send()
            .await
            .map_err(|e| DeployError::Http(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| DeployError::Http(e.to_string()))?;

        Ok(HttpResponse { status, body })
    }
}

/// Client for the tier-1 deployment endpoint
/// Parse a tier-1 base URL; only absolute http(s) URLs with a host pass
pub fn parse_directory_url(base_url: &str) -> Result<Url, DeployError> {
    let invalid = || DeployError::InvalidDirectoryUrl(base_url.to_string());

    let url = Url::parse(base_url).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(invalid());
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid());
    }
    Ok(url)
}

#[derive(Clone)]
pub struct DirectoryClient {
    base_url: Url,
    http: Arc<dyn HttpClient>,
}

impl DirectoryClient {
    /// Fails with [`DeployError::InvalidDirectoryUrl`] unless `base_url` is an
    /// absolute http(s) URL
    pub fn new(base_url: &str, http: Arc<dyn HttpClient>) -> Result<Self, DeployError> {
        Ok(Self {
            base_url: parse_directory_url(base_url)?,
            http,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Deployment endpoint for an application and client key
    pub fn deploy_url(&self, uuid: &Uuid, public_key: &Key) -> Result<Url, DeployError> {
        let mut url = self.base_url.clone();
        url.set_query(None);
        url.set_fragment(None);
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| DeployError::InvalidDirectoryUrl(self.base_url.to_string()))?;
            segments
                .pop_if_empty()
                .extend(DEPLOY_PATH)
                .push(&uuid.to_string())
                .push(&public_key.to_base64());
        }
        Ok(url)
    }

    /// Query or request deployments
    pub async fn request(
        &self,
        method: DirectoryMethod,
        uuid: &Uuid,
        public_key: &Key,
    ) -> Result<Vec<DeploymentRecord>, DeployError> {
        let url = self.deploy_url(uuid, public_key)?;
        debug!("{} {}", method.http_verb(), url);

        let response = self.http.send(method, &url).await?;
        debug!("Tier-1 responded with status {}", response.status);

        match response.status {
            200..=299 => DeploymentRecord::decode_list(&response.body).map_err(|e| {
                warn!("Malformed tier-1 response: {}", e);
                DeployError::ResponseDecode(e.to_string())
            }),
            404 => Err(DeployError::DirectoryNotFound(uuid.to_string())),
            500 => Err(DeployError::DeploymentUnavailable),
            503 => Err(DeployError::DirectoryOverloaded),
            code => Err(DeployError::UnexpectedStatus(code)),
        }
    }
}

impl std::fmt::Debug for DirectoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}
