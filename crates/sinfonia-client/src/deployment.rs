//! Cloudlet deployments offered by the tier-1 directory

use crate::error::DeployError;
use chrono::{DateTime, Utc};
use sinfonia_proto::{
    DeploymentRecord, Interface, Key, KeyPair, Peer, TunnelConfig, DEFAULT_PERSISTENT_KEEPALIVE,
    STATUS_DEPLOYED,
};
use tracing::warn;
use uuid::Uuid;

/// Lifecycle of a deployment as seen by this client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentState {
    /// The cloudlet reports the application as running
    Deployed,
    /// Any other reported status
    Null,
    /// Torn down locally; terminal
    Destroyed,
}

/// One cloudlet deployment with a fully resolved tunnel configuration
#[derive(Debug, Clone)]
pub struct CloudletDeployment {
    pub uuid: Uuid,
    /// The cloudlet's public key, distinct from the client's own key pair
    pub application_key: Key,
    pub status: String,
    pub tunnel_config: TunnelConfig,
    pub deployment_name: Option<String>,
    pub created: Option<DateTime<Utc>>,
    state: DeploymentState,
}

impl CloudletDeployment {
    /// Resolve a directory record into a deployment
    ///
    /// The tunnel routes only `applications`, uses the client's private key
    /// and keeps the cloudlet peer alive every 30 seconds.
    pub fn from_record(
        record: &DeploymentRecord,
        applications: &[String],
        keys: &KeyPair,
    ) -> Result<Self, DeployError> {
        let uuid = Uuid::parse_str(&record.uuid).map_err(|e| {
            DeployError::ResponseDecode(format!("invalid UUID '{}': {}", record.uuid, e))
        })?;
        let application_key = Key::from_base64(&record.application_key).map_err(|e| {
            DeployError::ResponseDecode(format!("invalid ApplicationKey: {}", e))
        })?;

        let offered = &record.tunnel_config;
        let interface = Interface::builder()
            .parse_addresses(&offered.address)?
            .parse_dns_servers(&offered.dns)?
            .include_applications(applications.iter().cloned())
            .private_key(*keys.private_key())
            .build()?;
        let peer = Peer::builder()
            .parse_public_key(&offered.public_key)?
            .parse_endpoint(&offered.endpoint)?
            .parse_allowed_ips(&offered.allowed_ips)?
            .persistent_keepalive(DEFAULT_PERSISTENT_KEEPALIVE)
            .build()?;

        let created = record.created.as_deref().and_then(|created| {
            match DateTime::parse_from_rfc3339(created) {
                Ok(created) => Some(created.with_timezone(&Utc)),
                Err(e) => {
                    warn!("Ignoring unparseable creation time '{}': {}", created, e);
                    None
                }
            }
        });

        let state = if record.status.eq_ignore_ascii_case(STATUS_DEPLOYED) {
            DeploymentState::Deployed
        } else {
            DeploymentState::Null
        };

        Ok(Self {
            uuid,
            application_key,
            status: record.status.clone(),
            tunnel_config: TunnelConfig::new(interface, vec![peer]),
            deployment_name: record.deployment_name.clone(),
            created,
            state,
        })
    }

    pub fn state(&self) -> DeploymentState {
        self.state
    }

    pub fn is_deployed(&self) -> bool {
        self.state == DeploymentState::Deployed
    }

    /// Mark the deployment torn down
    pub fn destroy(&mut self) {
        self.state = DeploymentState::Destroyed;
    }
}

/// Two deployments are the same when they name the same application and
/// route to the same peers
impl PartialEq for CloudletDeployment {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid && self.tunnel_config.peers == other.tunnel_config.peers
    }
}

impl Eq for CloudletDeployment {}
