//! Sinfonia tier-3 client
//!
//! Negotiates cloudlet deployments with a tier-1 directory and hands the
//! resulting WireGuard configuration to a tunnel-management process.
//!
//! ```text
//! SinfoniaService ──► SinfoniaTier3 ──► KeyCache
//!        │                  └─────────► DirectoryClient ──► HttpClient
//!        └──────────► WireGuardClient ──► TunnelConnector ──► TunnelService
//! ```

pub mod config;
pub mod deployment;
pub mod directory;
pub mod error;
pub mod key_cache;
pub mod memory_service;
pub mod messages;
pub mod service;
pub mod tier3;
pub mod tunnel_service;
pub mod wireguard;

pub use config::{DeployRequest, DeployRequestBuilder};
pub use deployment::{CloudletDeployment, DeploymentState};
pub use directory::{DirectoryClient, HttpClient, HttpResponse, ReqwestHttpClient};
pub use error::{DeployError, ServiceError};
pub use key_cache::{FileKeyStore, KeyCache, KeyStore, KeyStoreError, MemoryKeyStore};
pub use memory_service::InMemoryTunnelService;
pub use messages::{MessageKey, Messages};
pub use service::{DeploymentListener, LoggingListener, SinfoniaService};
pub use tier3::{SinfoniaTier3, Tier3State};
pub use tunnel_service::{LocalConnector, TunnelConnector, TunnelService};
pub use wireguard::WireGuardClient;

// Re-export protocol types for convenience
pub use sinfonia_proto::{TunnelConfig, TunnelError, TunnelState};
