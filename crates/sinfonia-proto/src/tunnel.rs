//! Tunnel lifecycle types shared by the control client and the
//! tunnel-management process

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Runtime state of a tunnel
///
/// `Toggle` is only ever requested; the tunnel manager resolves it to `Up`
/// or `Down`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelState {
    Up,
    Down,
    Toggle,
}

impl std::fmt::Display for TunnelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TunnelState::Up => write!(f, "up"),
            TunnelState::Down => write!(f, "down"),
            TunnelState::Toggle => write!(f, "toggle"),
        }
    }
}

/// Tunnel control errors
///
/// Reported either locally by the control client or by the tunnel-management
/// process, in which case they cross the IPC boundary as data.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TunnelError {
    #[error("Tunnel service is not connected")]
    ServiceDisconnected,

    #[error("Permission denied binding to tunnel service: {0}")]
    PermissionDenied(String),

    #[error("Tunnel '{0}' already exists")]
    AlreadyExists(String),

    #[error("Invalid tunnel name '{0}'")]
    InvalidName(String),

    #[error("Tunnel '{0}' not found")]
    NotFound(String),

    #[error("Tunnel '{0}' is already up")]
    AlreadyUp(String),

    #[error("Tunnel '{0}' is already down")]
    AlreadyDown(String),

    #[error("Tunnel '{0}' is already toggled")]
    AlreadyToggled(String),

    #[error("Not authorized to control tunnel '{0}'")]
    UnauthorizedAccess(String),

    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("Unknown tunnel error: {0}")]
    Unknown(String),
}
