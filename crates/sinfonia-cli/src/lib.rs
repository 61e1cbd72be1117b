//! Sinfonia command-line support

pub mod config;
#[cfg(unix)]
pub mod ipc;
