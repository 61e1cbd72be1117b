//! Tunnel-management IPC messages
//!
//! Each request and response is one JSON document terminated by a newline.
//! Errors travel as data inside [`IpcResponse::Error`] rather than as a
//! broken connection, so the caller can tell a refused operation from a dead
//! channel.

use crate::config::TunnelConfig;
use crate::tunnel::{TunnelError, TunnelState};
use serde::{Deserialize, Serialize};

/// Request from a control client to the tunnel manager
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcRequest {
    /// Names of tunnels whose included applications cover all of `applications`
    FetchMyTunnels { applications: Vec<String> },

    /// Re-read tunnel states from the engine
    RefreshTunnels,

    /// Create a tunnel, optionally overwriting an existing one
    CreateTunnel {
        name: String,
        config: TunnelConfig,
        overwrite: bool,
    },

    /// Delete a tunnel
    DestroyTunnel { name: String },

    /// Bring a tunnel up, down, or flip it
    SetTunnelState { name: String, state: TunnelState },

    /// Read a tunnel's configuration
    GetTunnelConfig { name: String },

    /// Replace a tunnel's configuration
    SetTunnelConfig { name: String, config: TunnelConfig },
}

/// Response from the tunnel manager
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    /// Tunnel names
    Tunnels { names: Vec<String> },

    /// A configuration, absent when the tunnel does not exist
    Config { config: Option<TunnelConfig> },

    /// Success acknowledgment
    Ok,

    /// Operation refused or failed
    Error { error: TunnelError },
}

impl IpcResponse {
    /// Unwrap an acknowledgment
    pub fn into_ok(self) -> Result<(), TunnelError> {
        match self {
            IpcResponse::Ok => Ok(()),
            IpcResponse::Error { error } => Err(error),
            other => Err(unexpected(&other)),
        }
    }

    /// Unwrap a list of tunnel names
    pub fn into_tunnels(self) -> Result<Vec<String>, TunnelError> {
        match self {
            IpcResponse::Tunnels { names } => Ok(names),
            IpcResponse::Error { error } => Err(error),
            other => Err(unexpected(&other)),
        }
    }

    /// Unwrap a configuration
    pub fn into_config(self) -> Result<Option<TunnelConfig>, TunnelError> {
        match self {
            IpcResponse::Config { config } => Ok(config),
            IpcResponse::Error { error } => Err(error),
            other => Err(unexpected(&other)),
        }
    }
}

impl From<Result<(), TunnelError>> for IpcResponse {
    fn from(result: Result<(), TunnelError>) -> Self {
        match result {
            Ok(()) => IpcResponse::Ok,
            Err(error) => IpcResponse::Error { error },
        }
    }
}

fn unexpected(response: &IpcResponse) -> TunnelError {
    TunnelError::Ipc(format!("unexpected response: {:?}", response))
}
