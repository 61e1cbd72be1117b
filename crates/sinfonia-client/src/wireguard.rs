//! Authorization-checked tunnel control client
//!
//! The client remembers which tunnels it created (or adopted through
//! [`WireGuardClient::fetch_my_tunnels`]) and refuses to mutate any other
//! tunnel, even when the tunnel-management process knows about it.
//!
//! Binding is bind-or-fail: operations issued before [`WireGuardClient::bind`]
//! or after [`WireGuardClient::unbind`] fail with
//! [`TunnelError::ServiceDisconnected`]; the client never reconnects on its
//! own. When the process drops the channel, the operation that notices fails
//! with [`TunnelError::ServiceDisconnected`], the client becomes unbound and a
//! later [`WireGuardClient::bind`] opens a fresh channel.

use crate::tunnel_service::{TunnelConnector, TunnelService};
use chrono::{DateTime, Utc};
use sinfonia_proto::{TunnelConfig, TunnelError, TunnelState};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

struct ClientState {
    service: Option<Arc<dyn TunnelService>>,
    /// Tunnel name to the time this client took ownership
    owned: BTreeMap<String, DateTime<Utc>>,
}

impl ClientState {
    fn service(&self) -> Result<Arc<dyn TunnelService>, TunnelError> {
        self.service.clone().ok_or(TunnelError::ServiceDisconnected)
    }

    /// Unbind when the tunnel-management process has dropped the channel
    fn settle<T>(&mut self, result: Result<T, TunnelError>) -> Result<T, TunnelError> {
        if matches!(result, Err(TunnelError::ServiceDisconnected)) && self.service.take().is_some()
        {
            warn!("Lost connection to tunnel service");
        }
        result
    }

    fn authorize(&self, name: &str) -> Result<(), TunnelError> {
        if self.owned.contains_key(name) {
            Ok(())
        } else {
            Err(TunnelError::UnauthorizedAccess(name.to_string()))
        }
    }
}

/// Client for the tunnel-management process
///
/// All state sits behind one async mutex held for the whole of each
/// operation, so concurrent callers are serialized.
pub struct WireGuardClient {
    connector: Arc<dyn TunnelConnector>,
    state: Mutex<ClientState>,
}

impl WireGuardClient {
    pub fn new(connector: Arc<dyn TunnelConnector>) -> Self {
        Self {
            connector,
            state: Mutex::new(ClientState {
                service: None,
                owned: BTreeMap::new(),
            }),
        }
    }

    /// Open the channel to the tunnel-management process
    ///
    /// Binding an already bound client is a no-op.
    pub async fn bind(&self) -> Result<(), TunnelError> {
        let mut state = self.state.lock().await;
        if state.service.is_some() {
            return Ok(());
        }

        let service = self.connector.connect().await.map_err(|e| {
            warn!("Failed to bind tunnel service: {}", e);
            e
        })?;
        state.service = Some(service);
        info!("Bound to tunnel service");
        Ok(())
    }

    /// Release the channel; owned tunnels are remembered
    pub async fn unbind(&self) {
        let mut state = self.state.lock().await;
        if state.service.take().is_some() {
            info!("Unbound from tunnel service");
        }
    }

    pub async fn is_bound(&self) -> bool {
        self.state.lock().await.service.is_some()
    }

    /// Snapshot of owned tunnels and when each was taken over
    pub async fn owned_tunnels(&self) -> BTreeMap<String, DateTime<Utc>> {
        self.state.lock().await.owned.clone()
    }

    /// Adopt tunnels created for `applications` by an earlier client
    pub async fn fetch_my_tunnels(&self, applications: &[String]) -> Result<(), TunnelError> {
        let mut state = self.state.lock().await;
        let service = state.service()?;
        let names = state.settle(service.fetch_my_tunnels(applications).await)?;

        let now = Utc::now();
        for name in names {
            debug!("Adopting tunnel {}", name);
            state.owned.entry(name).or_insert(now);
        }
        Ok(())
    }

    /// Ask the tunnel-management process to re-read tunnel states
    pub async fn refresh_tunnels(&self) -> Result<(), TunnelError> {
        let mut state = self.state.lock().await;
        let service = state.service()?;
        state.settle(service.refresh_tunnels().await)
    }

    /// Create a tunnel and take ownership of it
    ///
    /// With `overwrite`, an existing tunnel of the same name gets the new
    /// configuration instead of failing with
    /// [`TunnelError::AlreadyExists`].
    pub async fn create_tunnel(
        &self,
        name: &str,
        config: &TunnelConfig,
        overwrite: bool,
    ) -> Result<(), TunnelError> {
        let mut state = self.state.lock().await;
        let service = state.service()?;
        state.settle(service.create_tunnel(name, config, overwrite).await)?;

        state.owned.entry(name.to_string()).or_insert_with(Utc::now);
        info!("Created tunnel {}", name);
        Ok(())
    }

    /// Destroy an owned tunnel
    pub async fn destroy_tunnel(&self, name: &str) -> Result<(), TunnelError> {
        let mut state = self.state.lock().await;
        Self::destroy_locked(&mut state, name).await
    }

    pub async fn set_tunnel_up(&self, name: &str) -> Result<(), TunnelError> {
        self.set_tunnel_state(name, TunnelState::Up).await
    }

    pub async fn set_tunnel_down(&self, name: &str) -> Result<(), TunnelError> {
        self.set_tunnel_state(name, TunnelState::Down).await
    }

    pub async fn set_tunnel_toggle(&self, name: &str) -> Result<(), TunnelError> {
        self.set_tunnel_state(name, TunnelState::Toggle).await
    }

    /// Configuration of a tunnel, `None` if it does not exist
    pub async fn get_tunnel_config(&self, name: &str) -> Result<Option<TunnelConfig>, TunnelError> {
        let mut state = self.state.lock().await;
        let service = state.service()?;
        state.settle(service.get_tunnel_config(name).await)
    }

    /// Replace the configuration of an owned tunnel
    pub async fn set_tunnel_config(
        &self,
        name: &str,
        config: &TunnelConfig,
    ) -> Result<Option<TunnelConfig>, TunnelError> {
        let mut state = self.state.lock().await;
        state.authorize(name)?;
        let service = state.service()?;
        state.settle(service.set_tunnel_config(name, config).await)
    }

    /// Bring every owned tunnel down, ignoring failures
    pub async fn set_tunnel_down_all(&self) {
        let mut state = self.state.lock().await;
        let service = match state.service() {
            Ok(service) => service,
            Err(e) => {
                debug!("Skipping tunnel shutdown: {}", e);
                return;
            }
        };

        let names: Vec<String> = state.owned.keys().cloned().collect();
        for name in &names {
            match state.settle(service.set_tunnel_state(name, TunnelState::Down).await) {
                Ok(()) => info!("Tunnel {} is now down", name),
                Err(TunnelError::ServiceDisconnected) => return,
                Err(e) => debug!("Tunnel {} not brought down: {}", name, e),
            }
        }
    }

    /// Destroy every owned tunnel
    ///
    /// Returns whether all of them were destroyed. Tunnels that could not be
    /// destroyed stay owned so a later cleanup can retry them.
    pub async fn cleanup(&self) -> bool {
        let mut state = self.state.lock().await;
        let names: Vec<String> = state.owned.keys().cloned().collect();

        let mut failed = 0;
        for name in &names {
            if let Err(e) = Self::destroy_locked(&mut state, name).await {
                warn!("Failed to destroy tunnel {}: {}", name, e);
                failed += 1;
            }
        }

        if failed == 0 {
            state.owned.clear();
            info!("Cleaned up {} tunnels", names.len());
            true
        } else {
            warn!("Cleanup left {} of {} tunnels", failed, names.len());
            false
        }
    }

    async fn set_tunnel_state(&self, name: &str, target: TunnelState) -> Result<(), TunnelError> {
        let mut state = self.state.lock().await;
        state.authorize(name)?;
        let service = state.service()?;
        state.settle(service.set_tunnel_state(name, target).await)?;
        info!("Set tunnel {} {}", name, target);
        Ok(())
    }

    async fn destroy_locked(
        state: &mut MutexGuard<'_, ClientState>,
        name: &str,
    ) -> Result<(), TunnelError> {
        state.authorize(name)?;
        let service = state.service()?;
        state.settle(service.destroy_tunnel(name).await)?;
        state.owned.remove(name);
        info!("Destroyed tunnel {}", name);
        Ok(())
    }
}

impl std::fmt::Debug for WireGuardClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireGuardClient").finish_non_exhaustive()
    }
}
