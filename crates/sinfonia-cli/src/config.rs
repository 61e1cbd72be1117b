//! CLI configuration: default paths and request loading
//!
//! State lives under `~/.sinfonia/`: cached keys in `keys/` and the tunnel
//! manager socket at `wireguard.sock`.

use anyhow::{Context, Result};
use clap::Args;
use sinfonia_client::DeployRequest;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory holding all sinfonia state
pub fn sinfonia_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Failed to get home directory")?;
    Ok(home.join(".sinfonia"))
}

/// Default tunnel manager socket
pub fn default_socket_path() -> Result<PathBuf> {
    Ok(sinfonia_dir()?.join("wireguard.sock"))
}

/// Default key cache directory
pub fn default_key_dir() -> Result<PathBuf> {
    Ok(sinfonia_dir()?.join("keys"))
}

/// Load a request from a YAML file; missing fields take their defaults
pub fn load_request(path: &Path) -> Result<DeployRequest> {
    let yaml =
        fs::read_to_string(path).context(format!("Failed to read request file: {:?}", path))?;
    let request: DeployRequest = serde_yaml::from_str(&yaml)
        .context(format!("Failed to parse request file: {:?}", path))?;
    Ok(request)
}

/// Request options shared by `fetch` and `deploy`
#[derive(Args, Debug, Clone, Default)]
pub struct RequestArgs {
    /// YAML request file; flags override its values
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Tier-1 directory URL
    #[arg(long, env = "SINFONIA_TIER1_URL")]
    pub tier1_url: Option<String>,

    /// Application name, also the default tunnel name
    #[arg(short = 'n', long)]
    pub application_name: Option<String>,

    /// Application UUID registered with tier-1
    #[arg(short, long)]
    pub uuid: Option<String>,

    /// Local application routed through the tunnel (repeatable)
    #[arg(short, long = "application")]
    pub applications: Vec<String>,

    /// Tunnel name (defaults to the application name)
    #[arg(short, long)]
    pub tunnel_name: Option<String>,

    /// Replace an existing tunnel of the same name
    #[arg(long)]
    pub overwrite: bool,

    /// Tier-1 request timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

impl RequestArgs {
    /// Build the request from the file, if any, and the flags
    pub fn resolve(&self) -> Result<DeployRequest> {
        let mut request = match &self.file {
            Some(path) => load_request(path)?,
            None => DeployRequest::default(),
        };

        if let Some(url) = &self.tier1_url {
            request.tier1_url = url.clone();
        }
        if let Some(name) = &self.application_name {
            request.application_name = name.clone();
        }
        if let Some(uuid) = &self.uuid {
            request.uuid = uuid.clone();
        }
        if !self.applications.is_empty() {
            request.applications = self.applications.clone();
        }
        if let Some(tunnel_name) = &self.tunnel_name {
            request.tunnel_name = Some(tunnel_name.clone());
        }
        if self.overwrite {
            request.overwrite = true;
        }
        if let Some(secs) = self.timeout {
            request.http_timeout = Duration::from_secs(secs);
        }

        request.validate()?;
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file() {
        let request = RequestArgs::default().resolve().unwrap();
        assert_eq!(request, DeployRequest::default());
    }

    #[test]
    fn test_flags_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "tier1_url: http://localhost:5000\n\
             application_name: demo\n\
             uuid: 737b5001-d27a-413f-9806-abf9bfce6746\n\
             applications: [org.example.a]\n\
             http_timeout: 10"
        )
        .unwrap();

        let args = RequestArgs {
            file: Some(file.path().to_path_buf()),
            tunnel_name: Some("wg-demo".to_string()),
            overwrite: true,
            ..Default::default()
        };
        let request = args.resolve().unwrap();

        assert_eq!(request.tier1_url, "http://localhost:5000");
        assert_eq!(request.application_name, "demo");
        assert_eq!(request.applications, vec!["org.example.a".to_string()]);
        assert_eq!(request.tunnel_name(), "wg-demo");
        assert_eq!(request.http_timeout, Duration::from_secs(10));
        assert!(request.overwrite);
    }

    #[test]
    fn test_invalid_uuid_rejected() {
        let args = RequestArgs {
            uuid: Some("helloworld".to_string()),
            ..Default::default()
        };
        let err = args.resolve().unwrap_err();
        assert!(err.to_string().contains("helloworld"));
    }

    #[test]
    fn test_non_http_directory_fails_at_resolve() {
        let args = RequestArgs {
            tier1_url: Some("ftp://cloudlet.example.com".to_string()),
            ..Default::default()
        };
        let err = args.resolve().unwrap_err();
        assert!(err.to_string().contains("ftp://cloudlet.example.com"));
    }

    #[test]
    fn test_missing_file() {
        let args = RequestArgs {
            file: Some(PathBuf::from("/nonexistent/request.yaml")),
            ..Default::default()
        };
        assert!(args.resolve().is_err());
    }
}
