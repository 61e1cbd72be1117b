//! Deployment request configuration

use crate::directory::parse_directory_url;
use crate::error::DeployError;
use serde::{Deserialize, Serialize};
use sinfonia_proto::DEFAULT_TIER1_URL;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

/// Application used when a request names none
pub const DEFAULT_APPLICATION_NAME: &str = "helloworld";

/// Application routed through the tunnel when a request names none
pub const DEFAULT_APPLICATION: &str = "com.android.chrome";

/// A fetch or deploy request, as handed over by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployRequest {
    /// Base URL of the tier-1 directory
    pub tier1_url: String,
    /// Human-readable application name, also the default tunnel name
    pub application_name: String,
    /// Application UUID known to the directory
    pub uuid: String,
    /// Local applications whose traffic goes through the tunnel
    pub applications: Vec<String>,
    /// Tunnel name, defaults to the application name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tunnel_name: Option<String>,
    /// Replace an existing tunnel of the same name
    pub overwrite: bool,
    #[serde(with = "duration_secs")]
    pub http_timeout: Duration,
}

/// Helper module for serializing Duration as seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

impl Default for DeployRequest {
    fn default() -> Self {
        Self {
            tier1_url: DEFAULT_TIER1_URL.to_string(),
            application_name: DEFAULT_APPLICATION_NAME.to_string(),
            uuid: Uuid::nil().to_string(),
            applications: vec![DEFAULT_APPLICATION.to_string()],
            tunnel_name: None,
            overwrite: false,
            http_timeout: Duration::from_secs(30),
        }
    }
}

impl DeployRequest {
    pub fn builder() -> DeployRequestBuilder {
        DeployRequestBuilder::default()
    }

    /// Name of the tunnel this request creates
    pub fn tunnel_name(&self) -> &str {
        self.tunnel_name.as_deref().unwrap_or(&self.application_name)
    }

    /// Check the directory URL and application UUID
    pub fn validate(&self) -> Result<(Url, Uuid), DeployError> {
        let url = parse_directory_url(&self.tier1_url)?;
        let uuid = Uuid::parse_str(&self.uuid)
            .map_err(|_| DeployError::InvalidDestinationId(self.uuid.clone()))?;
        Ok((url, uuid))
    }
}

/// Builder for DeployRequest
#[derive(Default)]
pub struct DeployRequestBuilder {
    request: DeployRequest,
    applications: Vec<String>,
}

impl DeployRequestBuilder {
    pub fn tier1_url(mut self, url: impl Into<String>) -> Self {
        self.request.tier1_url = url.into();
        self
    }

    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.request.application_name = name.into();
        self
    }

    pub fn uuid(mut self, uuid: impl Into<String>) -> Self {
        self.request.uuid = uuid.into();
        self
    }

    /// Route an application through the tunnel; replaces the default
    pub fn application(mut self, application: impl Into<String>) -> Self {
        self.applications.push(application.into());
        self
    }

    pub fn tunnel_name(mut self, name: impl Into<String>) -> Self {
        self.request.tunnel_name = Some(name.into());
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.request.overwrite = overwrite;
        self
    }

    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.request.http_timeout = timeout;
        self
    }

    pub fn build(mut self) -> Result<DeployRequest, DeployError> {
        if !self.applications.is_empty() {
            self.request.applications = self.applications;
        }
        self.request.validate()?;
        Ok(self.request)
    }
}
