//! Seams to the tunnel-management process
//!
//! [`TunnelService`] is the command interface of the process that owns the
//! WireGuard engine. [`TunnelConnector`] opens a channel to it. Both are
//! injected into [`crate::WireGuardClient`], so the same client drives an
//! in-process manager in tests and a remote one over IPC in production.

use async_trait::async_trait;
use sinfonia_proto::{TunnelConfig, TunnelError, TunnelState};
use std::sync::Arc;

/// Operations offered by the tunnel-management process
///
/// Errors reported by the process are returned as values and propagate to
/// the caller unchanged.
#[async_trait]
pub trait TunnelService: Send + Sync {
    /// Names of tunnels whose included applications cover `applications`
    async fn fetch_my_tunnels(&self, applications: &[String]) -> Result<Vec<String>, TunnelError>;

    /// Re-read tunnel states from the engine
    async fn refresh_tunnels(&self) -> Result<(), TunnelError>;

    async fn create_tunnel(
        &self,
        name: &str,
        config: &TunnelConfig,
        overwrite: bool,
    ) -> Result<(), TunnelError>;

    async fn destroy_tunnel(&self, name: &str) -> Result<(), TunnelError>;

    /// Bring a tunnel up or down; [`TunnelState::Toggle`] flips it
    async fn set_tunnel_state(&self, name: &str, state: TunnelState) -> Result<(), TunnelError>;

    /// Current configuration, `None` if the tunnel does not exist
    async fn get_tunnel_config(&self, name: &str) -> Result<Option<TunnelConfig>, TunnelError>;

    /// Replace a configuration and return the one now in effect
    async fn set_tunnel_config(
        &self,
        name: &str,
        config: &TunnelConfig,
    ) -> Result<Option<TunnelConfig>, TunnelError>;
}

/// Opens a channel to the tunnel-management process
#[async_trait]
pub trait TunnelConnector: Send + Sync {
    /// Fails with [`TunnelError::PermissionDenied`] when the process refuses
    /// the caller, or [`TunnelError::ServiceDisconnected`] when it cannot be
    /// reached
    async fn connect(&self) -> Result<Arc<dyn TunnelService>, TunnelError>;
}

/// Connector for a service living in the same process
#[derive(Clone)]
pub struct LocalConnector {
    service: Arc<dyn TunnelService>,
}

impl LocalConnector {
    pub fn new(service: Arc<dyn TunnelService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl TunnelConnector for LocalConnector {
    async fn connect(&self) -> Result<Arc<dyn TunnelService>, TunnelError> {
        Ok(self.service.clone())
    }
}
