//! Sinfonia protocol definitions
//!
//! Types shared by the deployment client, the command-line tool and the
//! tunnel-management process: WireGuard keys, tunnel configuration, the tier-1
//! directory wire format and the tunnel-management IPC messages.

pub mod config;
pub mod directory;
pub mod ipc;
pub mod key;
pub mod tunnel;

pub use config::{ConfigError, Endpoint, Interface, Peer, TunnelConfig};
pub use directory::{
    DeploymentRecord, DirectoryMethod, RecordTunnelConfig, DEFAULT_TIER1_URL, DEPLOY_PATH,
    STATUS_DEPLOYED,
};
pub use ipc::{IpcRequest, IpcResponse};
pub use key::{Key, KeyFormatError, KeyPair, KEY_LENGTH};
pub use tunnel::{TunnelError, TunnelState};

/// Persistent keepalive applied to cloudlet peers (seconds)
pub const DEFAULT_PERSISTENT_KEEPALIVE: u16 = 30;
