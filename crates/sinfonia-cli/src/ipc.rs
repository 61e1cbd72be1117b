//! Tunnel-management IPC over a Unix domain socket
//!
//! Newline-delimited JSON, one [`IpcRequest`] answered by one
//! [`IpcResponse`]. The client side implements [`TunnelService`] and
//! [`TunnelConnector`] so a [`sinfonia_client::WireGuardClient`] can drive a
//! remote tunnel manager; the server side exposes any [`TunnelService`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use sinfonia_client::{TunnelConnector, TunnelService};
use sinfonia_proto::{IpcRequest, IpcResponse, TunnelConfig, TunnelError, TunnelState};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// IPC client connection to the tunnel manager
pub struct IpcClient {
    stream: BufReader<UnixStream>,
}

impl IpcClient {
    pub fn new(stream: UnixStream) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    /// Connect to a socket path
    pub async fn connect_to(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path)
            .await
            .with_context(|| format!("Failed to connect to socket at {:?}", path))?;
        Ok(Self::new(stream))
    }

    /// Send a request and receive a response
    pub async fn request(&mut self, req: &IpcRequest) -> Result<IpcResponse> {
        let mut json = serde_json::to_string(req)?;
        json.push('\n');

        self.stream
            .get_mut()
            .write_all(json.as_bytes())
            .await
            .context("Failed to send request")?;

        self.stream
            .get_mut()
            .flush()
            .await
            .context("Failed to flush request")?;

        let mut response_line = String::new();
        let bytes_read = self
            .stream
            .read_line(&mut response_line)
            .await
            .context("Failed to read response")?;

        if bytes_read == 0 {
            return Err(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                "Tunnel manager closed the connection",
            )
            .into());
        }

        let response: IpcResponse =
            serde_json::from_str(&response_line).context("Failed to parse response")?;

        Ok(response)
    }
}

/// [`TunnelService`] backed by an IPC connection
///
/// Requests are serialized over the connection. The connection is taken out
/// for the duration of a request and only put back once its response has
/// been read, so a request that fails or is cancelled mid-flight never
/// leaves a stale response for the next one; the next request opens a new
/// connection instead.
///
/// A tunnel manager that hung up surfaces as
/// [`TunnelError::ServiceDisconnected`], other transport failures as
/// [`TunnelError::Ipc`]. Errors reported by the tunnel manager come back
/// unchanged.
pub struct IpcTunnelService {
    socket_path: PathBuf,
    client: Mutex<Option<IpcClient>>,
}

impl IpcTunnelService {
    pub fn new(socket_path: impl Into<PathBuf>, client: IpcClient) -> Self {
        Self {
            socket_path: socket_path.into(),
            client: Mutex::new(Some(client)),
        }
    }

    async fn call(&self, request: IpcRequest) -> Result<IpcResponse, TunnelError> {
        let mut slot = self.client.lock().await;
        let mut client = match slot.take() {
            Some(client) => client,
            None => {
                debug!("Reopening IPC connection to {:?}", self.socket_path);
                IpcClient::new(connect_stream(&self.socket_path).await?)
            }
        };

        match client.request(&request).await {
            Ok(response) => {
                *slot = Some(client);
                Ok(response)
            }
            Err(e) => {
                warn!("IPC request failed, dropping connection: {:#}", e);
                Err(transport_error(&e))
            }
        }
    }
}

/// Map a failed request to the error reported to callers
fn transport_error(err: &anyhow::Error) -> TunnelError {
    let hung_up = err
        .chain()
        .filter_map(|cause| cause.downcast_ref::<std::io::Error>())
        .any(|io| {
            matches!(
                io.kind(),
                ErrorKind::BrokenPipe
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::NotConnected
                    | ErrorKind::UnexpectedEof
            )
        });

    if hung_up {
        TunnelError::ServiceDisconnected
    } else {
        TunnelError::Ipc(format!("{:#}", err))
    }
}

async fn connect_stream(socket_path: &Path) -> Result<UnixStream, TunnelError> {
    UnixStream::connect(socket_path)
        .await
        .map_err(|e| match e.kind() {
            ErrorKind::PermissionDenied => {
                TunnelError::PermissionDenied(format!("{}: {}", socket_path.display(), e))
            }
            ErrorKind::NotFound | ErrorKind::ConnectionRefused => {
                debug!("Tunnel manager unavailable at {:?}: {}", socket_path, e);
                TunnelError::ServiceDisconnected
            }
            _ => TunnelError::Ipc(e.to_string()),
        })
}

#[async_trait]
impl TunnelService for IpcTunnelService {
    async fn fetch_my_tunnels(&self, applications: &[String]) -> Result<Vec<String>, TunnelError> {
        self.call(IpcRequest::FetchMyTunnels {
            applications: applications.to_vec(),
        })
        .await?
        .into_tunnels()
    }

    async fn refresh_tunnels(&self) -> Result<(), TunnelError> {
        self.call(IpcRequest::RefreshTunnels).await?.into_ok()
    }

    async fn create_tunnel(
        &self,
        name: &str,
        config: &TunnelConfig,
        overwrite: bool,
    ) -> Result<(), TunnelError> {
        self.call(IpcRequest::CreateTunnel {
            name: name.to_string(),
            config: config.clone(),
            overwrite,
        })
        .await?
        .into_ok()
    }

    async fn destroy_tunnel(&self, name: &str) -> Result<(), TunnelError> {
        self.call(IpcRequest::DestroyTunnel {
            name: name.to_string(),
        })
        .await?
        .into_ok()
    }

    async fn set_tunnel_state(&self, name: &str, state: TunnelState) -> Result<(), TunnelError> {
        self.call(IpcRequest::SetTunnelState {
            name: name.to_string(),
            state,
        })
        .await?
        .into_ok()
    }

    async fn get_tunnel_config(&self, name: &str) -> Result<Option<TunnelConfig>, TunnelError> {
        self.call(IpcRequest::GetTunnelConfig {
            name: name.to_string(),
        })
        .await?
        .into_config()
    }

    async fn set_tunnel_config(
        &self,
        name: &str,
        config: &TunnelConfig,
    ) -> Result<Option<TunnelConfig>, TunnelError> {
        self.call(IpcRequest::SetTunnelConfig {
            name: name.to_string(),
            config: config.clone(),
        })
        .await?
        .into_config()
    }
}

/// Opens IPC connections to the tunnel manager socket
#[derive(Debug, Clone)]
pub struct IpcConnector {
    socket_path: PathBuf,
}

impl IpcConnector {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }
}

#[async_trait]
impl TunnelConnector for IpcConnector {
    async fn connect(&self) -> Result<Arc<dyn TunnelService>, TunnelError> {
        let stream = connect_stream(&self.socket_path).await?;

        debug!("Connected to tunnel manager at {:?}", self.socket_path);
        Ok(Arc::new(IpcTunnelService::new(
            self.socket_path.clone(),
            IpcClient::new(stream),
        )))
    }
}

/// Tunnel manager side of the socket
pub struct IpcServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl IpcServer {
    /// Bind to a socket path, replacing a stale socket
    pub async fn bind_to(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if path.exists() {
            match UnixStream::connect(path).await {
                Ok(_) => {
                    anyhow::bail!(
                        "Another tunnel manager is already running (socket at {:?} is active)",
                        path
                    );
                }
                Err(_) => {
                    std::fs::remove_file(path)?;
                }
            }
        }

        let listener = UnixListener::bind(path)
            .with_context(|| format!("Failed to bind to socket at {:?}", path))?;

        Ok(Self {
            listener,
            socket_path: path.to_path_buf(),
        })
    }

    /// Accept an incoming connection
    pub async fn accept(&self) -> Result<IpcConnection> {
        let (stream, _) = self.listener.accept().await?;
        Ok(IpcConnection {
            stream: BufReader::new(stream),
        })
    }

    pub fn path(&self) -> &Path {
        &self.socket_path
    }

    /// Answer requests with `service` until accepting fails
    pub async fn serve(&self, service: Arc<dyn TunnelService>) -> Result<()> {
        info!("Tunnel manager listening on {:?}", self.socket_path);
        loop {
            let mut connection = self.accept().await?;
            let service = service.clone();

            tokio::spawn(async move {
                loop {
                    let request = match connection.recv().await {
                        Ok(Some(request)) => request,
                        Ok(None) => break,
                        Err(e) => {
                            warn!("Dropping IPC connection: {:#}", e);
                            break;
                        }
                    };

                    debug!("IPC request: {:?}", request);
                    let response = dispatch(service.as_ref(), request).await;
                    if let Err(e) = connection.send(&response).await {
                        error!("Failed to answer IPC request: {:#}", e);
                        break;
                    }
                }
            });
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

/// A single IPC connection from a client
pub struct IpcConnection {
    stream: BufReader<UnixStream>,
}

impl IpcConnection {
    /// Receive a request, `None` once the client hung up
    pub async fn recv(&mut self) -> Result<Option<IpcRequest>> {
        let mut line = String::new();
        let bytes_read = self
            .stream
            .read_line(&mut line)
            .await
            .context("Failed to read request")?;

        if bytes_read == 0 {
            return Ok(None);
        }

        let request: IpcRequest = serde_json::from_str(&line).context("Failed to parse request")?;
        Ok(Some(request))
    }

    /// Send a response to the client
    pub async fn send(&mut self, response: &IpcResponse) -> Result<()> {
        let mut json = serde_json::to_string(response)?;
        json.push('\n');

        self.stream
            .get_mut()
            .write_all(json.as_bytes())
            .await
            .context("Failed to send response")?;

        self.stream
            .get_mut()
            .flush()
            .await
            .context("Failed to flush response")?;

        Ok(())
    }
}

/// Run one request against a tunnel service
pub async fn dispatch(service: &dyn TunnelService, request: IpcRequest) -> IpcResponse {
    match request {
        IpcRequest::FetchMyTunnels { applications } => {
            match service.fetch_my_tunnels(&applications).await {
                Ok(names) => IpcResponse::Tunnels { names },
                Err(error) => IpcResponse::Error { error },
            }
        }
        IpcRequest::RefreshTunnels => service.refresh_tunnels().await.into(),
        IpcRequest::CreateTunnel {
            name,
            config,
            overwrite,
        } => service.create_tunnel(&name, &config, overwrite).await.into(),
        IpcRequest::DestroyTunnel { name } => service.destroy_tunnel(&name).await.into(),
        IpcRequest::SetTunnelState { name, state } => {
            service.set_tunnel_state(&name, state).await.into()
        }
        IpcRequest::GetTunnelConfig { name } => {
            config_response(service.get_tunnel_config(&name).await)
        }
        IpcRequest::SetTunnelConfig { name, config } => {
            config_response(service.set_tunnel_config(&name, &config).await)
        }
    }
}

fn config_response(result: Result<Option<TunnelConfig>, TunnelError>) -> IpcResponse {
    match result {
        Ok(config) => IpcResponse::Config { config },
        Err(error) => IpcResponse::Error { error },
    }
}
