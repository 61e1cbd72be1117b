//! Sinfonia CLI - deploy edge applications and route them through WireGuard

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sinfonia_cli::config::{self, RequestArgs};
use sinfonia_client::{
    CloudletDeployment, DeployRequest, FileKeyStore, KeyCache, Messages, ReqwestHttpClient,
    SinfoniaService, WireGuardClient,
};

#[cfg(unix)]
use sinfonia_cli::ipc::{IpcConnector, IpcServer};
#[cfg(unix)]
use sinfonia_client::InMemoryTunnelService;

/// Sinfonia tier-3 client
#[derive(Parser, Debug)]
#[command(name = "sinfonia")]
#[command(about = "Deploy edge applications on nearby cloudlets", long_about = None)]
#[command(version = env!("GIT_TAG"))]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Tunnel manager socket (default: ~/.sinfonia/wireguard.sock)
    #[arg(long, env = "SINFONIA_SOCKET")]
    socket: Option<PathBuf>,

    /// Key cache directory (default: ~/.sinfonia/keys)
    #[arg(long, env = "SINFONIA_KEY_DIR")]
    key_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List cloudlets already running an application
    Fetch(RequestArgs),

    /// Deploy an application and bring its tunnel up
    Deploy(RequestArgs),

    /// Destroy the tunnels of the given applications
    Cleanup {
        /// Local application whose tunnels are destroyed (repeatable)
        #[arg(short, long = "application", required = true)]
        applications: Vec<String>,
    },

    /// List tunnels routing the given applications
    Tunnels {
        /// Local application to look up (repeatable)
        #[arg(short, long = "application")]
        applications: Vec<String>,
    },

    /// Run an in-memory tunnel manager on the socket, for local testing
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    let socket = match cli.socket {
        Some(path) => path,
        None => config::default_socket_path()?,
    };

    match cli.command {
        Commands::Fetch(args) => {
            let request = args.resolve()?;
            let service = build_service(&request, &socket, cli.key_dir)?;
            handle_fetch(&service, &request).await
        }
        Commands::Deploy(args) => {
            let request = args.resolve()?;
            let service = build_service(&request, &socket, cli.key_dir)?;
            handle_deploy(&service, &request).await
        }
        Commands::Cleanup { applications } => handle_cleanup(&socket, &applications).await,
        Commands::Tunnels { applications } => handle_tunnels(&socket, &applications).await,
        Commands::Serve => handle_serve(&socket).await,
    }
}

fn init_logging(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))
        .context("Failed to initialize logging filter")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

#[cfg(unix)]
fn wireguard_client(socket: &std::path::Path) -> Result<Arc<WireGuardClient>> {
    Ok(Arc::new(WireGuardClient::new(Arc::new(IpcConnector::new(socket)))))
}

#[cfg(not(unix))]
fn wireguard_client(_socket: &std::path::Path) -> Result<Arc<WireGuardClient>> {
    anyhow::bail!("The tunnel manager requires Unix domain sockets")
}

fn build_service(
    request: &DeployRequest,
    socket: &std::path::Path,
    key_dir: Option<PathBuf>,
) -> Result<SinfoniaService> {
    let key_dir = match key_dir {
        Some(dir) => dir,
        None => config::default_key_dir()?,
    };
    let store = FileKeyStore::new(&key_dir)
        .with_context(|| format!("Failed to open key cache at {:?}", key_dir))?;
    debug!("Using key cache at {:?}", key_dir);

    let http = ReqwestHttpClient::with_timeout(request.http_timeout)?;

    Ok(SinfoniaService::new(
        Arc::new(http),
        KeyCache::new(Arc::new(store)),
        wireguard_client(socket)?,
    ))
}

async fn handle_fetch(service: &SinfoniaService, request: &DeployRequest) -> Result<()> {
    let deployments = service
        .fetch(request)
        .await
        .map_err(|e| anyhow::anyhow!(Messages::default().describe(&e)))?;

    if deployments.is_empty() {
        println!("No deployments of {} found", request.application_name);
        return Ok(());
    }

    println!("Deployments of {}:", request.application_name);
    for deployment in &deployments {
        print_deployment(deployment);
    }
    Ok(())
}

async fn handle_deploy(service: &SinfoniaService, request: &DeployRequest) -> Result<()> {
    let deployment = service
        .deploy(request)
        .await
        .map_err(|e| anyhow::anyhow!(Messages::default().describe(&e)))?;

    println!(
        "Deployed {}, tunnel {} is up",
        request.application_name,
        request.tunnel_name()
    );
    print_deployment(&deployment);
    Ok(())
}

async fn handle_cleanup(socket: &std::path::Path, applications: &[String]) -> Result<()> {
    let wireguard = wireguard_client(socket)?;
    let messages = Messages::default();

    wireguard
        .bind()
        .await
        .map_err(|e| anyhow::anyhow!(messages.describe(&e)))?;
    wireguard
        .fetch_my_tunnels(applications)
        .await
        .map_err(|e| anyhow::anyhow!(messages.describe(&e)))?;

    let owned = wireguard.owned_tunnels().await;
    if wireguard.cleanup().await {
        println!("Destroyed {} tunnels", owned.len());
        Ok(())
    } else {
        let left = wireguard.owned_tunnels().await;
        warn!("Tunnels left behind: {:?}", left.keys().collect::<Vec<_>>());
        anyhow::bail!("Failed to destroy {} of {} tunnels", left.len(), owned.len())
    }
}

async fn handle_tunnels(socket: &std::path::Path, applications: &[String]) -> Result<()> {
    let wireguard = wireguard_client(socket)?;
    let messages = Messages::default();

    wireguard
        .bind()
        .await
        .map_err(|e| anyhow::anyhow!(messages.describe(&e)))?;
    wireguard
        .fetch_my_tunnels(applications)
        .await
        .map_err(|e| anyhow::anyhow!(messages.describe(&e)))?;

    let owned = wireguard.owned_tunnels().await;
    if owned.is_empty() {
        println!("No tunnels");
    }
    for name in owned.keys() {
        let config = wireguard
            .get_tunnel_config(name)
            .await
            .map_err(|e| anyhow::anyhow!(messages.describe(&e)))?;
        let apps = config
            .map(|config| config.interface.included_applications.join(", "))
            .unwrap_or_default();
        println!("{:<16} {}", name, apps);
    }
    Ok(())
}

#[cfg(unix)]
async fn handle_serve(socket: &std::path::Path) -> Result<()> {
    let server = IpcServer::bind_to(socket).await?;
    let service = Arc::new(InMemoryTunnelService::new());

    tokio::select! {
        result = server.serve(service) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down tunnel manager");
            Ok(())
        }
    }
}

#[cfg(not(unix))]
async fn handle_serve(_socket: &std::path::Path) -> Result<()> {
    anyhow::bail!("The tunnel manager requires Unix domain sockets")
}

fn print_deployment(deployment: &CloudletDeployment) {
    let endpoint = deployment
        .tunnel_config
        .peers
        .first()
        .and_then(|peer| peer.endpoint.as_ref())
        .map(ToString::to_string)
        .unwrap_or_else(|| "-".to_string());

    println!(
        "  {} {} [{}] via {}",
        deployment.uuid,
        deployment.deployment_name.as_deref().unwrap_or("-"),
        deployment.status,
        endpoint
    );
}
