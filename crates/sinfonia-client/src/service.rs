//! Fetch and deploy orchestration
//!
//! [`SinfoniaService`] takes a [`DeployRequest`] from the caller and runs the
//! whole handoff: adopt tunnels left by earlier runs, bring them down,
//! negotiate with the tier-1 directory, then create and raise the new tunnel.
//! Each step is reported to a [`DeploymentListener`]; the first failing step
//! ends the flow.

use crate::config::DeployRequest;
use crate::deployment::CloudletDeployment;
use crate::directory::HttpClient;
use crate::error::ServiceError;
use crate::key_cache::KeyCache;
use crate::messages::{MessageKey, Messages};
use crate::tier3::SinfoniaTier3;
use crate::wireguard::WireGuardClient;
use sinfonia_proto::{TunnelError, TunnelState};
use std::sync::{Arc, Mutex};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

/// Receives the outcome of each orchestration step
pub trait DeploymentListener: Send + Sync {
    fn on_fetch(
        &self,
        _request: &DeployRequest,
        _result: Result<&[CloudletDeployment], &ServiceError>,
    ) {
    }

    fn on_deploy(
        &self,
        _request: &DeployRequest,
        _result: Result<&CloudletDeployment, &ServiceError>,
    ) {
    }

    fn on_tunnel_created(&self, _name: &str, _result: Result<(), &ServiceError>) {}

    fn on_tunnel_set(
        &self,
        _name: &str,
        _state: TunnelState,
        _result: Result<(), &ServiceError>,
    ) {
    }
}

/// Listener writing each outcome to the log
#[derive(Debug, Clone, Default)]
pub struct LoggingListener {
    messages: Messages,
}

impl LoggingListener {
    pub fn new(messages: Messages) -> Self {
        Self { messages }
    }
}

impl DeploymentListener for LoggingListener {
    fn on_fetch(
        &self,
        request: &DeployRequest,
        result: Result<&[CloudletDeployment], &ServiceError>,
    ) {
        let name = request.application_name.as_str();
        match result {
            Ok(_) => info!("{}", self.messages.format(MessageKey::FetchSuccess, &[name])),
            Err(e) => {
                let reason = self.messages.describe(e);
                error!(
                    "{}",
                    self.messages
                        .format(MessageKey::FetchError, &[name, reason.as_str()])
                );
            }
        }
    }

    fn on_deploy(
        &self,
        request: &DeployRequest,
        result: Result<&CloudletDeployment, &ServiceError>,
    ) {
        let name = request.application_name.as_str();
        match result {
            Ok(_) => info!("{}", self.messages.format(MessageKey::DeploySuccess, &[name])),
            Err(e) => {
                let reason = self.messages.describe(e);
                error!(
                    "{}",
                    self.messages
                        .format(MessageKey::DeployFailure, &[name, reason.as_str()])
                );
            }
        }
    }

    fn on_tunnel_created(&self, name: &str, result: Result<(), &ServiceError>) {
        match result {
            Ok(()) => info!(
                "{}",
                self.messages.format(MessageKey::TunnelCreateSuccess, &[name])
            ),
            Err(e) => {
                let reason = self.messages.describe(e);
                error!(
                    "{}",
                    self.messages
                        .format(MessageKey::TunnelCreateError, &[reason.as_str()])
                );
            }
        }
    }

    fn on_tunnel_set(&self, name: &str, state: TunnelState, result: Result<(), &ServiceError>) {
        let state = state.to_string();
        match result {
            Ok(()) => info!(
                "{}",
                self.messages
                    .format(MessageKey::TunnelSetSuccess, &[name, state.as_str()])
            ),
            Err(e) => {
                let reason = self.messages.describe(e);
                error!(
                    "{}",
                    self.messages.format(
                        MessageKey::TunnelSetError,
                        &[name, state.as_str(), reason.as_str()]
                    )
                );
            }
        }
    }
}

/// Runs fetch and deploy requests against injected collaborators
pub struct SinfoniaService {
    http: Arc<dyn HttpClient>,
    key_cache: KeyCache,
    wireguard: Arc<WireGuardClient>,
    listener: Arc<dyn DeploymentListener>,
    /// Abort handles of background requests
    tasks: Mutex<Vec<AbortHandle>>,
}

impl SinfoniaService {
    pub fn new(
        http: Arc<dyn HttpClient>,
        key_cache: KeyCache,
        wireguard: Arc<WireGuardClient>,
    ) -> Self {
        Self {
            http,
            key_cache,
            wireguard,
            listener: Arc::new(LoggingListener::default()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn DeploymentListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn wireguard(&self) -> &Arc<WireGuardClient> {
        &self.wireguard
    }

    /// List deployments of the requested application
    pub async fn fetch(
        &self,
        request: &DeployRequest,
    ) -> Result<Vec<CloudletDeployment>, ServiceError> {
        let result = self.run_fetch(request).await;
        self.listener.on_fetch(request, result.as_deref());
        result
    }

    /// Deploy the requested application and route its traffic through a
    /// fresh tunnel
    pub async fn deploy(
        &self,
        request: &DeployRequest,
    ) -> Result<CloudletDeployment, ServiceError> {
        let deployment = self.run_deploy(request).await;
        self.listener.on_deploy(request, deployment.as_ref());
        let deployment = deployment?;

        let name = request.tunnel_name();
        let created = self
            .wireguard
            .create_tunnel(name, &deployment.tunnel_config, request.overwrite)
            .await
            .map_err(ServiceError::from);
        self.listener.on_tunnel_created(name, created.as_ref().map(|_| ()));
        created?;

        let raised = match self.wireguard.set_tunnel_up(name).await {
            // An overwritten tunnel keeps its state and may already be up
            Err(TunnelError::AlreadyUp(_)) => {
                debug!("Tunnel {} was already up", name);
                Ok(())
            }
            other => other.map_err(ServiceError::from),
        };
        self.listener
            .on_tunnel_set(name, TunnelState::Up, raised.as_ref().map(|_| ()));
        raised?;

        Ok(deployment)
    }

    /// Run [`SinfoniaService::fetch`] on a background task
    pub fn spawn_fetch(self: &Arc<Self>, request: DeployRequest) -> JoinHandle<()> {
        let service = Arc::clone(self);
        self.track(tokio::spawn(async move {
            let _ = service.fetch(&request).await;
        }))
    }

    /// Run [`SinfoniaService::deploy`] on a background task
    pub fn spawn_deploy(self: &Arc<Self>, request: DeployRequest) -> JoinHandle<()> {
        let service = Arc::clone(self);
        self.track(tokio::spawn(async move {
            let _ = service.deploy(&request).await;
        }))
    }

    /// Abort background requests and destroy every owned tunnel
    ///
    /// Returns whether all owned tunnels were destroyed.
    pub async fn stop(&self) -> bool {
        let aborted = match self.tasks.lock() {
            Ok(mut tasks) => {
                let count = tasks.len();
                for task in tasks.drain(..) {
                    task.abort();
                }
                count
            }
            Err(e) => {
                warn!("Task list unavailable: {}", e);
                0
            }
        };
        debug!("Aborted {} background requests", aborted);

        let cleaned = self.wireguard.cleanup().await;
        info!("Sinfonia service stopped");
        cleaned
    }

    fn track(&self, handle: JoinHandle<()>) -> JoinHandle<()> {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.retain(|task| !task.is_finished());
            tasks.push(handle.abort_handle());
        }
        handle
    }

    /// Adopt and quiesce tunnels of the requested applications
    async fn prepare_tunnels(&self, request: &DeployRequest) -> Result<(), ServiceError> {
        self.wireguard.bind().await?;
        self.wireguard
            .fetch_my_tunnels(&request.applications)
            .await?;
        self.wireguard.set_tunnel_down_all().await;
        Ok(())
    }

    async fn run_fetch(
        &self,
        request: &DeployRequest,
    ) -> Result<Vec<CloudletDeployment>, ServiceError> {
        self.prepare_tunnels(request).await?;

        let mut tier3 = SinfoniaTier3::new(request, self.http.clone(), self.key_cache.clone())?;
        Ok(tier3.fetch().await?.to_vec())
    }

    async fn run_deploy(
        &self,
        request: &DeployRequest,
    ) -> Result<CloudletDeployment, ServiceError> {
        self.prepare_tunnels(request).await?;

        let mut tier3 = SinfoniaTier3::new(request, self.http.clone(), self.key_cache.clone())?;
        Ok(tier3.deploy().await?.clone())
    }
}

impl std::fmt::Debug for SinfoniaService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinfoniaService")
            .field("key_cache", &self.key_cache)
            .field("wireguard", &self.wireguard)
            .finish_non_exhaustive()
    }
}
