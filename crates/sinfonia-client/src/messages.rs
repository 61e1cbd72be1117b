//! User-facing messages for deployment and tunnel errors
//!
//! Every error kind maps to its own template. Templates use positional
//! `{0}` placeholders so a translated catalog can reorder arguments.

use crate::error::{DeployError, ServiceError};
use sinfonia_proto::TunnelError;
use std::collections::HashMap;
use std::error::Error as StdError;

/// Catalog keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKey {
    InvalidDirectoryUrl,
    InvalidDestinationId,
    DirectoryNotFound,
    DeploymentUnavailable,
    DirectoryOverloaded,
    UnexpectedStatus,
    ResponseDecode,
    NoDeploymentAvailable,
    Http,
    ServiceDisconnected,
    PermissionDenied,
    TunnelAlreadyExists,
    TunnelInvalidName,
    TunnelNotFound,
    TunnelAlreadyUp,
    TunnelAlreadyDown,
    TunnelAlreadyToggled,
    TunnelUnauthorized,
    TunnelIpc,
    TunnelUnknown,
    GenericError,
    FetchSuccess,
    FetchError,
    DeploySuccess,
    DeployFailure,
    TunnelCreateSuccess,
    TunnelCreateError,
    TunnelSetSuccess,
    TunnelSetError,
}

const ENGLISH: &[(MessageKey, &str)] = &[
    (MessageKey::InvalidDirectoryUrl, "Invalid tier-1 URL: {0}"),
    (MessageKey::InvalidDestinationId, "Invalid application UUID: {0}"),
    (MessageKey::DirectoryNotFound, "UUID {0} not found on tier-1"),
    (MessageKey::DeploymentUnavailable, "Deployment not found"),
    (MessageKey::DirectoryOverloaded, "Tier-1 is temporarily unavailable"),
    (MessageKey::UnexpectedStatus, "Tier-1 responded with status {0}"),
    (MessageKey::ResponseDecode, "Cannot read tier-1 response: {0}"),
    (MessageKey::NoDeploymentAvailable, "No cloudlet deployment available"),
    (MessageKey::Http, "Cannot reach tier-1: {0}"),
    (MessageKey::ServiceDisconnected, "WireGuard service not connected"),
    (MessageKey::PermissionDenied, "Permission denied by WireGuard service: {0}"),
    (MessageKey::TunnelAlreadyExists, "Tunnel {0} already exists"),
    (MessageKey::TunnelInvalidName, "Invalid tunnel name: {0}"),
    (MessageKey::TunnelNotFound, "Tunnel {0} not found"),
    (MessageKey::TunnelAlreadyUp, "Tunnel {0} is already up"),
    (MessageKey::TunnelAlreadyDown, "Tunnel {0} is already down"),
    (MessageKey::TunnelAlreadyToggled, "Tunnel {0} is already toggled"),
    (MessageKey::TunnelUnauthorized, "Unauthorized access to tunnel {0}"),
    (MessageKey::TunnelIpc, "WireGuard service error: {0}"),
    (MessageKey::TunnelUnknown, "Unknown tunnel error: {0}"),
    (MessageKey::GenericError, "An error occurred: {0}"),
    (MessageKey::FetchSuccess, "Fetched deployments for {0}"),
    (MessageKey::FetchError, "Unable to fetch deployments for {0}: {1}"),
    (MessageKey::DeploySuccess, "Deployed {0}"),
    (MessageKey::DeployFailure, "Unable to deploy {0}: {1}"),
    (MessageKey::TunnelCreateSuccess, "Created tunnel {0}"),
    (MessageKey::TunnelCreateError, "Unable to create tunnel: {0}"),
    (MessageKey::TunnelSetSuccess, "Tunnel {0} is now {1}"),
    (MessageKey::TunnelSetError, "Unable to set tunnel {0} {1}: {2}"),
];

/// Message catalog
#[derive(Debug, Clone)]
pub struct Messages {
    templates: HashMap<MessageKey, String>,
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            templates: ENGLISH
                .iter()
                .map(|(key, template)| (*key, template.to_string()))
                .collect(),
        }
    }
}

impl Messages {
    /// Replace one template, e.g. with a translation
    pub fn with_template(mut self, key: MessageKey, template: impl Into<String>) -> Self {
        self.templates.insert(key, template.into());
        self
    }

    /// Render a template with positional arguments
    pub fn format(&self, key: MessageKey, args: &[&str]) -> String {
        let mut message = self
            .templates
            .get(&key)
            .cloned()
            .unwrap_or_else(|| format!("{:?}", key));

        for (i, arg) in args.iter().enumerate() {
            message = message.replace(&format!("{{{}}}", i), arg);
        }
        message
    }

    /// Message for a deployment error
    pub fn deploy_error(&self, err: &DeployError) -> String {
        match err {
            DeployError::InvalidDirectoryUrl(url) => {
                self.format(MessageKey::InvalidDirectoryUrl, &[url.as_str()])
            }
            DeployError::InvalidDestinationId(id) => {
                self.format(MessageKey::InvalidDestinationId, &[id.as_str()])
            }
            DeployError::DirectoryNotFound(id) => {
                self.format(MessageKey::DirectoryNotFound, &[id.as_str()])
            }
            DeployError::DeploymentUnavailable => {
                self.format(MessageKey::DeploymentUnavailable, &[])
            }
            DeployError::DirectoryOverloaded => self.format(MessageKey::DirectoryOverloaded, &[]),
            DeployError::UnexpectedStatus(code) => {
                self.format(MessageKey::UnexpectedStatus, &[code.to_string().as_str()])
            }
            DeployError::ResponseDecode(reason) => {
                self.format(MessageKey::ResponseDecode, &[reason.as_str()])
            }
            DeployError::NoDeploymentAvailable => {
                self.format(MessageKey::NoDeploymentAvailable, &[])
            }
            DeployError::Http(reason) => self.format(MessageKey::Http, &[reason.as_str()]),
        }
    }

    /// Message for a tunnel error
    pub fn tunnel_error(&self, err: &TunnelError) -> String {
        match err {
            TunnelError::ServiceDisconnected => self.format(MessageKey::ServiceDisconnected, &[]),
            TunnelError::PermissionDenied(reason) => {
                self.format(MessageKey::PermissionDenied, &[reason.as_str()])
            }
            TunnelError::AlreadyExists(name) => {
                self.format(MessageKey::TunnelAlreadyExists, &[name.as_str()])
            }
            TunnelError::InvalidName(name) => {
                self.format(MessageKey::TunnelInvalidName, &[name.as_str()])
            }
            TunnelError::NotFound(name) => {
                self.format(MessageKey::TunnelNotFound, &[name.as_str()])
            }
            TunnelError::AlreadyUp(name) => {
                self.format(MessageKey::TunnelAlreadyUp, &[name.as_str()])
            }
            TunnelError::AlreadyDown(name) => {
                self.format(MessageKey::TunnelAlreadyDown, &[name.as_str()])
            }
            TunnelError::AlreadyToggled(name) => {
                self.format(MessageKey::TunnelAlreadyToggled, &[name.as_str()])
            }
            TunnelError::UnauthorizedAccess(name) => {
                self.format(MessageKey::TunnelUnauthorized, &[name.as_str()])
            }
            TunnelError::Ipc(reason) => self.format(MessageKey::TunnelIpc, &[reason.as_str()]),
            TunnelError::Unknown(reason) => {
                self.format(MessageKey::TunnelUnknown, &[reason.as_str()])
            }
        }
    }

    /// Message for any error
    ///
    /// Walks to the root cause. Known kinds get their own template; anything
    /// else uses the root cause's text. When that is empty the generic
    /// message names `E`, the type passed in: a root cause reached through
    /// `source()` is only known as `dyn Error` and has no type name.
    pub fn describe<E>(&self, err: &E) -> String
    where
        E: StdError + 'static,
    {
        let mut cause: &(dyn StdError + 'static) = err;
        while let Some(next) = cause.source() {
            cause = next;
        }

        if let Some(known) = self.known(cause).or_else(|| self.known(err)) {
            return known;
        }

        let text = cause.to_string();
        if !text.is_empty() {
            return text;
        }
        let type_name = std::any::type_name::<E>()
            .rsplit("::")
            .next()
            .unwrap_or("Error");
        self.format(MessageKey::GenericError, &[type_name])
    }

    fn known(&self, err: &(dyn StdError + 'static)) -> Option<String> {
        if let Some(err) = err.downcast_ref::<ServiceError>() {
            return Some(match err {
                ServiceError::Deploy(err) => self.deploy_error(err),
                ServiceError::Tunnel(err) => self.tunnel_error(err),
            });
        }
        if let Some(err) = err.downcast_ref::<DeployError>() {
            return Some(self.deploy_error(err));
        }
        err.downcast_ref::<TunnelError>()
            .map(|err| self.tunnel_error(err))
    }
}
