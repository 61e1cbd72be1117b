//! In-process tunnel manager
//!
//! Keeps tunnels in memory and applies the same rules as the real
//! tunnel-management process, without touching any network interface. Used
//! by `sinfonia serve` and by tests.

use crate::tunnel_service::TunnelService;
use async_trait::async_trait;
use sinfonia_proto::{TunnelConfig, TunnelError, TunnelState};
use std::collections::{BTreeMap, HashSet};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Longest accepted tunnel name, the Linux interface name limit
pub const MAX_TUNNEL_NAME_LEN: usize = 15;

/// Whether `name` is usable as a tunnel name
pub fn is_valid_tunnel_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_TUNNEL_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '=' | '+' | '.' | '-'))
}

#[derive(Debug, Clone)]
struct Tunnel {
    config: TunnelConfig,
    up: bool,
}

/// Tunnel manager holding tunnels in memory
#[derive(Debug, Default)]
pub struct InMemoryTunnelService {
    tunnels: Mutex<BTreeMap<String, Tunnel>>,
}

impl InMemoryTunnelService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runtime state of a tunnel, `None` if it does not exist
    pub async fn tunnel_state(&self, name: &str) -> Option<TunnelState> {
        let tunnels = self.tunnels.lock().await;
        tunnels.get(name).map(|tunnel| {
            if tunnel.up {
                TunnelState::Up
            } else {
                TunnelState::Down
            }
        })
    }

    /// Names of all tunnels, sorted
    pub async fn tunnel_names(&self) -> Vec<String> {
        self.tunnels.lock().await.keys().cloned().collect()
    }
}

#[async_trait]
impl TunnelService for InMemoryTunnelService {
    async fn fetch_my_tunnels(&self, applications: &[String]) -> Result<Vec<String>, TunnelError> {
        let tunnels = self.tunnels.lock().await;
        let names = tunnels
            .iter()
            .filter(|(_, tunnel)| {
                let included: HashSet<&String> =
                    tunnel.config.interface.included_applications.iter().collect();
                applications.iter().all(|app| included.contains(app))
            })
            .map(|(name, _)| name.clone())
            .collect();
        Ok(names)
    }

    async fn refresh_tunnels(&self) -> Result<(), TunnelError> {
        debug!("Refreshing {} tunnels", self.tunnels.lock().await.len());
        Ok(())
    }

    async fn create_tunnel(
        &self,
        name: &str,
        config: &TunnelConfig,
        overwrite: bool,
    ) -> Result<(), TunnelError> {
        if !is_valid_tunnel_name(name) {
            return Err(TunnelError::InvalidName(name.to_string()));
        }

        let mut tunnels = self.tunnels.lock().await;
        match tunnels.get_mut(name) {
            Some(_) if !overwrite => Err(TunnelError::AlreadyExists(name.to_string())),
            Some(existing) => {
                // Runtime state survives the overwrite
                existing.config = config.clone();
                info!("Overwrote tunnel {}", name);
                Ok(())
            }
            None => {
                tunnels.insert(
                    name.to_string(),
                    Tunnel {
                        config: config.clone(),
                        up: false,
                    },
                );
                info!("Created tunnel {}", name);
                Ok(())
            }
        }
    }

    async fn destroy_tunnel(&self, name: &str) -> Result<(), TunnelError> {
        let mut tunnels = self.tunnels.lock().await;
        if tunnels.remove(name).is_none() {
            return Err(TunnelError::NotFound(name.to_string()));
        }
        info!("Destroyed tunnel {}", name);
        Ok(())
    }

    async fn set_tunnel_state(&self, name: &str, state: TunnelState) -> Result<(), TunnelError> {
        let mut tunnels = self.tunnels.lock().await;
        let tunnel = tunnels
            .get_mut(name)
            .ok_or_else(|| TunnelError::NotFound(name.to_string()))?;

        match (state, tunnel.up) {
            (TunnelState::Up, true) => return Err(TunnelError::AlreadyUp(name.to_string())),
            (TunnelState::Down, false) => return Err(TunnelError::AlreadyDown(name.to_string())),
            (TunnelState::Up, false) => tunnel.up = true,
            (TunnelState::Down, true) => tunnel.up = false,
            (TunnelState::Toggle, up) => tunnel.up = !up,
        }

        info!(
            "Tunnel {} is now {}",
            name,
            if tunnel.up { "up" } else { "down" }
        );
        Ok(())
    }

    async fn get_tunnel_config(&self, name: &str) -> Result<Option<TunnelConfig>, TunnelError> {
        let tunnels = self.tunnels.lock().await;
        Ok(tunnels.get(name).map(|tunnel| tunnel.config.clone()))
    }

    async fn set_tunnel_config(
        &self,
        name: &str,
        config: &TunnelConfig,
    ) -> Result<Option<TunnelConfig>, TunnelError> {
        let mut tunnels = self.tunnels.lock().await;
        let tunnel = tunnels
            .get_mut(name)
            .ok_or_else(|| TunnelError::NotFound(name.to_string()))?;
        tunnel.config = config.clone();
        Ok(Some(tunnel.config.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sinfonia_proto::{Interface, KeyPair, Peer};

    fn config(apps: &[&str]) -> TunnelConfig {
        let interface = Interface::builder()
            .parse_addresses(["10.0.0.2/32"])
            .unwrap()
            .include_applications(apps.iter().copied())
            .private_key(*KeyPair::generate().private_key())
            .build()
            .unwrap();
        let peer = Peer::builder()
            .public_key(*KeyPair::generate().public_key())
            .parse_allowed_ips(["0.0.0.0/0"])
            .unwrap()
            .build()
            .unwrap();
        TunnelConfig::new(interface, vec![peer])
    }

    #[test]
    fn test_tunnel_names() {
        assert!(is_valid_tunnel_name("helloworld"));
        assert!(is_valid_tunnel_name("a_b=c+d.e-f"));
        assert!(is_valid_tunnel_name("fifteen-chars-x"));
        assert!(!is_valid_tunnel_name("sixteen-chars-xx"));
        assert!(!is_valid_tunnel_name(""));
        assert!(!is_valid_tunnel_name("hello world"));
        assert!(!is_valid_tunnel_name("wg/0"));
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_name() {
        let service = InMemoryTunnelService::new();
        let result = service.create_tunnel("bad name", &config(&[]), false).await;
        assert_eq!(result, Err(TunnelError::InvalidName("bad name".to_string())));
    }

    #[tokio::test]
    async fn test_overwrite_replaces_config_and_keeps_state() {
        let service = InMemoryTunnelService::new();
        let first = config(&["a"]);
        let second = config(&["b"]);

        service.create_tunnel("wg0", &first, false).await.unwrap();
        service.set_tunnel_state("wg0", TunnelState::Up).await.unwrap();

        assert_eq!(
            service.create_tunnel("wg0", &second, false).await,
            Err(TunnelError::AlreadyExists("wg0".to_string()))
        );
        service.create_tunnel("wg0", &second, true).await.unwrap();

        assert_eq!(service.tunnel_names().await, vec!["wg0".to_string()]);
        assert_eq!(service.get_tunnel_config("wg0").await.unwrap(), Some(second));
        assert_eq!(service.tunnel_state("wg0").await, Some(TunnelState::Up));
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let service = InMemoryTunnelService::new();
        service.create_tunnel("wg0", &config(&[]), false).await.unwrap();
        assert_eq!(service.tunnel_state("wg0").await, Some(TunnelState::Down));

        assert_eq!(
            service.set_tunnel_state("wg0", TunnelState::Down).await,
            Err(TunnelError::AlreadyDown("wg0".to_string()))
        );
        service.set_tunnel_state("wg0", TunnelState::Up).await.unwrap();
        assert_eq!(
            service.set_tunnel_state("wg0", TunnelState::Up).await,
            Err(TunnelError::AlreadyUp("wg0".to_string()))
        );

        service.set_tunnel_state("wg0", TunnelState::Toggle).await.unwrap();
        assert_eq!(service.tunnel_state("wg0").await, Some(TunnelState::Down));
        service.set_tunnel_state("wg0", TunnelState::Toggle).await.unwrap();
        assert_eq!(service.tunnel_state("wg0").await, Some(TunnelState::Up));
    }

    #[tokio::test]
    async fn test_missing_tunnel() {
        let service = InMemoryTunnelService::new();
        let missing = Err(TunnelError::NotFound("wg0".to_string()));

        assert_eq!(service.destroy_tunnel("wg0").await, missing);
        assert_eq!(
            service.set_tunnel_state("wg0", TunnelState::Up).await,
            missing
        );
        assert_eq!(service.get_tunnel_config("wg0").await, Ok(None));
        assert!(service.set_tunnel_config("wg0", &config(&[])).await.is_err());
    }

    #[tokio::test]
    async fn test_fetch_matches_superset_of_applications() {
        let service = InMemoryTunnelService::new();
        service
            .create_tunnel("both", &config(&["a", "b"]), false)
            .await
            .unwrap();
        service.create_tunnel("only-a", &config(&["a"]), false).await.unwrap();
        service.create_tunnel("none", &config(&[]), false).await.unwrap();

        let apps = |names: &[&str]| names.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        assert_eq!(
            service.fetch_my_tunnels(&apps(&["a"])).await.unwrap(),
            vec!["both".to_string(), "only-a".to_string()]
        );
        assert_eq!(
            service.fetch_my_tunnels(&apps(&["a", "b"])).await.unwrap(),
            vec!["both".to_string()]
        );
        assert!(service
            .fetch_my_tunnels(&apps(&["c"]))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_set_config_returns_new_config() {
        let service = InMemoryTunnelService::new();
        service.create_tunnel("wg0", &config(&["a"]), false).await.unwrap();

        let replacement = config(&["b"]);
        let applied = service.set_tunnel_config("wg0", &replacement).await.unwrap();
        assert_eq!(applied, Some(replacement));
    }
}
