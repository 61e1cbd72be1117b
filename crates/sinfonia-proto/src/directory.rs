//! Tier-1 directory service wire types
//!
//! Clients query or request deployments at:
//! `{base}/api/v1/deploy/{uuid}/{public_key}`
//!
//! The response body is a JSON array of [`DeploymentRecord`] objects.

use serde::{Deserialize, Serialize};

/// Path segments leading to the deploy endpoint
pub const DEPLOY_PATH: [&str; 3] = ["api", "v1", "deploy"];

/// Default tier-1 directory service
pub const DEFAULT_TIER1_URL: &str = "https://cmu.findcloudlet.org";

/// Status reported for a running deployment
pub const STATUS_DEPLOYED: &str = "deployed";

/// Directory request kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryMethod {
    /// Ask which deployments are available (GET, read-only)
    Query,
    /// Ask the directory to allocate a deployment (POST)
    Deploy,
}

impl DirectoryMethod {
    /// HTTP verb used for this request kind
    pub fn http_verb(&self) -> &'static str {
        match self {
            DirectoryMethod::Query => "GET",
            DirectoryMethod::Deploy => "POST",
        }
    }
}

impl std::fmt::Display for DirectoryMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DirectoryMethod::Query => write!(f, "query"),
            DirectoryMethod::Deploy => write!(f, "deploy"),
        }
    }
}

/// Tunnel parameters offered by a cloudlet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordTunnelConfig {
    /// Local interface addresses (CIDR)
    pub address: Vec<String>,
    /// DNS servers reachable through the tunnel
    #[serde(default)]
    pub dns: Vec<String>,
    /// Cloudlet WireGuard public key (base64)
    #[serde(rename = "publicKey")]
    pub public_key: String,
    /// Cloudlet endpoint (host:port)
    pub endpoint: String,
    /// Networks routed through the tunnel (CIDR)
    #[serde(rename = "allowedIPs")]
    pub allowed_ips: Vec<String>,
}

/// One deployment offered by the directory service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    #[serde(rename = "UUID")]
    pub uuid: String,
    #[serde(rename = "ApplicationKey")]
    pub application_key: String,
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "DeploymentName", default)]
    pub deployment_name: Option<String>,
    #[serde(rename = "Created", default)]
    pub created: Option<String>,
    #[serde(rename = "TunnelConfig")]
    pub tunnel_config: RecordTunnelConfig,
}

impl DeploymentRecord {
    /// Decode a directory response body
    pub fn decode_list(body: &str) -> Result<Vec<DeploymentRecord>, serde_json::Error> {
        serde_json::from_str(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"[{
        "UUID": "00000000-0000-0000-0000-000000000000",
        "ApplicationKey": "HUN1dBaBCwl27MO4QayVEJrjBC1zh1thTTYpti7FWSY=",
        "Status": "deployed",
        "DeploymentName": "hello-world",
        "Created": "2023-07-10T14:53:48+00:00",
        "TunnelConfig": {
            "address": ["10.0.0.2/32"],
            "dns": ["10.0.0.1"],
            "publicKey": "HUN1dBaBCwl27MO4QayVEJrjBC1zh1thTTYpti7FWSY=",
            "endpoint": "cloudlet.example.com:51820",
            "allowedIPs": ["0.0.0.0/0"]
        }
    }]"#;

    #[test]
    fn test_decode_sample_response() {
        let records = DeploymentRecord::decode_list(SAMPLE).unwrap();
        assert_eq!(records.len(), 1);

        let record = &records[0];
        assert_eq!(record.uuid, "00000000-0000-0000-0000-000000000000");
        assert_eq!(record.status, "deployed");
        assert_eq!(record.deployment_name.as_deref(), Some("hello-world"));
        assert_eq!(record.tunnel_config.endpoint, "cloudlet.example.com:51820");
        assert_eq!(record.tunnel_config.allowed_ips, vec!["0.0.0.0/0"]);
    }

    #[test]
    fn test_decode_empty_array() {
        let records = DeploymentRecord::decode_list("[]").unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_decode_optional_fields_absent() {
        let body = r#"[{
            "UUID": "00000000-0000-0000-0000-000000000000",
            "ApplicationKey": "HUN1dBaBCwl27MO4QayVEJrjBC1zh1thTTYpti7FWSY=",
            "Status": "pending",
            "TunnelConfig": {
                "address": ["10.0.0.2/32"],
                "publicKey": "HUN1dBaBCwl27MO4QayVEJrjBC1zh1thTTYpti7FWSY=",
                "endpoint": "cloudlet.example.com:51820",
                "allowedIPs": ["0.0.0.0/0"]
            }
        }]"#;
        let records = DeploymentRecord::decode_list(body).unwrap();
        assert!(records[0].deployment_name.is_none());
        assert!(records[0].created.is_none());
        assert!(records[0].tunnel_config.dns.is_empty());
    }

    #[test]
    fn test_decode_missing_required_field() {
        let body = r#"[{"UUID": "00000000-0000-0000-0000-000000000000", "Status": "deployed"}]"#;
        assert!(DeploymentRecord::decode_list(body).is_err());
    }

    #[test]
    fn test_decode_not_an_array() {
        assert!(DeploymentRecord::decode_list(r#"{"error": "oops"}"#).is_err());
    }

    #[test]
    fn test_method_verbs() {
        assert_eq!(DirectoryMethod::Query.http_verb(), "GET");
        assert_eq!(DirectoryMethod::Deploy.http_verb(), "POST");
    }
}
