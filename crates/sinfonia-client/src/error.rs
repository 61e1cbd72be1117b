//! Deployment error taxonomy

use sinfonia_proto::{ConfigError, TunnelError};
use thiserror::Error;

/// Errors raised while negotiating a deployment with the tier-1 directory
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeployError {
    #[error("Invalid tier-1 URL '{0}'")]
    InvalidDirectoryUrl(String),

    #[error("Invalid application UUID '{0}'")]
    InvalidDestinationId(String),

    #[error("Application UUID {0} not found on tier-1")]
    DirectoryNotFound(String),

    #[error("Deployment unavailable: tier-1 failed to allocate a cloudlet")]
    DeploymentUnavailable,

    #[error("Tier-1 is overloaded, try again later")]
    DirectoryOverloaded,

    #[error("Unexpected response status {0} from tier-1")]
    UnexpectedStatus(u16),

    #[error("Cannot decode tier-1 response: {0}")]
    ResponseDecode(String),

    #[error("No deployment available")]
    NoDeploymentAvailable,

    #[error("HTTP request failed: {0}")]
    Http(String),
}

impl From<ConfigError> for DeployError {
    fn from(err: ConfigError) -> Self {
        DeployError::ResponseDecode(err.to_string())
    }
}

/// Errors surfaced by the deployment service, which drives both the
/// directory negotiation and the tunnel lifecycle
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error(transparent)]
    Deploy(#[from] DeployError),

    #[error(transparent)]
    Tunnel(#[from] TunnelError),
}
