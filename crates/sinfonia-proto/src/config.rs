//! Tunnel configuration model
//!
//! A [`TunnelConfig`] is one local interface plus its peers, mirroring a
//! wg-quick configuration file. Textual fields from the directory service are
//! parsed through the builders, which are the only validation boundary: a
//! config that exists has well-formed addresses and keys.

use crate::key::{Key, KeyFormatError};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use thiserror::Error;

/// Tunnel configuration errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid address '{0}'")]
    InvalidAddress(String),

    #[error("Invalid DNS server '{0}'")]
    InvalidDnsServer(String),

    #[error("Invalid endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("Invalid {field}: {source}")]
    InvalidKey {
        field: &'static str,
        #[source]
        source: KeyFormatError,
    },

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Cannot both include and exclude applications")]
    ConflictingApplications,
}

/// Remote peer endpoint in `host:port` form
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for Endpoint {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || ConfigError::InvalidEndpoint(s.to_string());

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            // [v6]:port
            let (host, port) = rest.split_once("]:").ok_or_else(invalid)?;
            (host, port)
        } else {
            s.rsplit_once(':').ok_or_else(invalid)?
        };

        if host.is_empty() || (host.contains(':') && !s.starts_with('[')) {
            return Err(invalid());
        }

        let port = port.parse::<u16>().map_err(|_| invalid())?;
        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for Endpoint {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Local side of a tunnel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interface {
    pub addresses: Vec<IpNetwork>,
    pub dns_servers: Vec<IpAddr>,
    #[serde(default)]
    pub included_applications: Vec<String>,
    #[serde(default)]
    pub excluded_applications: Vec<String>,
    pub private_key: Key,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u16>,
}

impl Interface {
    pub fn builder() -> InterfaceBuilder {
        InterfaceBuilder::default()
    }
}

/// Remote side of a tunnel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    pub public_key: Key,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<Endpoint>,
    #[serde(rename = "allowedIPs")]
    pub allowed_ips: Vec<IpNetwork>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_keepalive: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_shared_key: Option<Key>,
}

impl Peer {
    pub fn builder() -> PeerBuilder {
        PeerBuilder::default()
    }
}

/// Complete tunnel configuration: one interface and its peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelConfig {
    pub interface: Interface,
    pub peers: Vec<Peer>,
}

impl TunnelConfig {
    pub fn new(interface: Interface, peers: Vec<Peer>) -> Self {
        Self { interface, peers }
    }
}

/// Renders the configuration in wg-quick format
impl fmt::Display for TunnelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let iface = &self.interface;
        writeln!(f, "[Interface]")?;
        if !iface.addresses.is_empty() {
            writeln!(f, "Address = {}", join(&iface.addresses))?;
        }
        if !iface.dns_servers.is_empty() {
            writeln!(f, "DNS = {}", join(&iface.dns_servers))?;
        }
        if !iface.excluded_applications.is_empty() {
            writeln!(
                f,
                "ExcludedApplications = {}",
                iface.excluded_applications.join(", ")
            )?;
        }
        if !iface.included_applications.is_empty() {
            writeln!(
                f,
                "IncludedApplications = {}",
                iface.included_applications.join(", ")
            )?;
        }
        if let Some(port) = iface.listen_port {
            writeln!(f, "ListenPort = {}", port)?;
        }
        if let Some(mtu) = iface.mtu {
            writeln!(f, "MTU = {}", mtu)?;
        }
        writeln!(f, "PrivateKey = {}", iface.private_key)?;

        for peer in &self.peers {
            writeln!(f)?;
            writeln!(f, "[Peer]")?;
            if !peer.allowed_ips.is_empty() {
                writeln!(f, "AllowedIPs = {}", join(&peer.allowed_ips))?;
            }
            if let Some(endpoint) = &peer.endpoint {
                writeln!(f, "Endpoint = {}", endpoint)?;
            }
            if let Some(keepalive) = peer.persistent_keepalive {
                writeln!(f, "PersistentKeepalive = {}", keepalive)?;
            }
            if let Some(psk) = &peer.pre_shared_key {
                writeln!(f, "PreSharedKey = {}", psk)?;
            }
            writeln!(f, "PublicKey = {}", peer.public_key)?;
        }
        Ok(())
    }
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse an address that may be given with or without a prefix length
fn parse_network(value: &str) -> Option<IpNetwork> {
    let value = value.trim();
    IpNetwork::from_str(value)
        .ok()
        .or_else(|| IpAddr::from_str(value).ok().map(IpNetwork::from))
}

/// Builder for [`Interface`]
#[derive(Debug, Default)]
pub struct InterfaceBuilder {
    addresses: Vec<IpNetwork>,
    dns_servers: Vec<IpAddr>,
    included_applications: Vec<String>,
    excluded_applications: Vec<String>,
    private_key: Option<Key>,
    listen_port: Option<u16>,
    mtu: Option<u16>,
}

impl InterfaceBuilder {
    pub fn parse_addresses<I, S>(mut self, addresses: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for address in addresses {
            let address = address.as_ref();
            let network = parse_network(address)
                .ok_or_else(|| ConfigError::InvalidAddress(address.to_string()))?;
            self.addresses.push(network);
        }
        Ok(self)
    }

    pub fn parse_dns_servers<I, S>(mut self, servers: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for server in servers {
            let server = server.as_ref();
            let ip = IpAddr::from_str(server.trim())
                .map_err(|_| ConfigError::InvalidDnsServer(server.to_string()))?;
            self.dns_servers.push(ip);
        }
        Ok(self)
    }

    pub fn include_applications<I, S>(mut self, applications: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.included_applications
            .extend(applications.into_iter().map(Into::into));
        self
    }

    pub fn exclude_applications<I, S>(mut self, applications: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_applications
            .extend(applications.into_iter().map(Into::into));
        self
    }

    pub fn private_key(mut self, key: Key) -> Self {
        self.private_key = Some(key);
        self
    }

    pub fn listen_port(mut self, port: u16) -> Self {
        self.listen_port = Some(port);
        self
    }

    pub fn mtu(mut self, mtu: u16) -> Self {
        self.mtu = Some(mtu);
        self
    }

    pub fn build(self) -> Result<Interface, ConfigError> {
        let private_key = self
            .private_key
            .ok_or(ConfigError::MissingField("PrivateKey"))?;
        if !self.included_applications.is_empty() && !self.excluded_applications.is_empty() {
            return Err(ConfigError::ConflictingApplications);
        }

        Ok(Interface {
            addresses: self.addresses,
            dns_servers: self.dns_servers,
            included_applications: self.included_applications,
            excluded_applications: self.excluded_applications,
            private_key,
            listen_port: self.listen_port,
            mtu: self.mtu,
        })
    }
}

/// Builder for [`Peer`]
#[derive(Debug, Default)]
pub struct PeerBuilder {
    public_key: Option<Key>,
    endpoint: Option<Endpoint>,
    allowed_ips: Vec<IpNetwork>,
    persistent_keepalive: Option<u16>,
    pre_shared_key: Option<Key>,
}

impl PeerBuilder {
    pub fn parse_public_key(mut self, key: &str) -> Result<Self, ConfigError> {
        let key = Key::from_base64(key).map_err(|source| ConfigError::InvalidKey {
            field: "PublicKey",
            source,
        })?;
        self.public_key = Some(key);
        Ok(self)
    }

    pub fn public_key(mut self, key: Key) -> Self {
        self.public_key = Some(key);
        self
    }

    pub fn parse_endpoint(mut self, endpoint: &str) -> Result<Self, ConfigError> {
        self.endpoint = Some(endpoint.parse()?);
        Ok(self)
    }

    pub fn parse_allowed_ips<I, S>(mut self, networks: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for network in networks {
            let network = network.as_ref();
            let parsed = parse_network(network)
                .ok_or_else(|| ConfigError::InvalidAddress(network.to_string()))?;
            self.allowed_ips.push(parsed);
        }
        Ok(self)
    }

    pub fn persistent_keepalive(mut self, seconds: u16) -> Self {
        self.persistent_keepalive = Some(seconds);
        self
    }

    pub fn pre_shared_key(mut self, key: Key) -> Self {
        self.pre_shared_key = Some(key);
        self
    }

    pub fn build(self) -> Result<Peer, ConfigError> {
        let public_key = self
            .public_key
            .ok_or(ConfigError::MissingField("PublicKey"))?;

        Ok(Peer {
            public_key,
            endpoint: self.endpoint,
            allowed_ips: self.allowed_ips,
            persistent_keepalive: self.persistent_keepalive,
            pre_shared_key: self.pre_shared_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyPair;

    const PEER_KEY: &str = "HUN1dBaBCwl27MO4QayVEJrjBC1zh1thTTYpti7FWSY=";

    fn sample_config() -> TunnelConfig {
        let interface = Interface::builder()
            .private_key(*KeyPair::generate().private_key())
            .parse_addresses(["10.0.0.2/32"])
            .unwrap()
            .parse_dns_servers(["10.0.0.1"])
            .unwrap()
            .include_applications(["com.android.chrome"])
            .build()
            .unwrap();
        let peer = Peer::builder()
            .parse_public_key(PEER_KEY)
            .unwrap()
            .parse_endpoint("cloudlet.example.com:51820")
            .unwrap()
            .parse_allowed_ips(["0.0.0.0/0"])
            .unwrap()
            .persistent_keepalive(30)
            .build()
            .unwrap();
        TunnelConfig::new(interface, vec![peer])
    }

    #[test]
    fn test_endpoint_parse_hostname() {
        let endpoint: Endpoint = "cloudlet.example.com:51820".parse().unwrap();
        assert_eq!(endpoint.host(), "cloudlet.example.com");
        assert_eq!(endpoint.port(), 51820);
    }

    #[test]
    fn test_endpoint_parse_ipv6() {
        let endpoint: Endpoint = "[fd00::1]:51820".parse().unwrap();
        assert_eq!(endpoint.host(), "fd00::1");
        assert_eq!(endpoint.to_string(), "[fd00::1]:51820");
    }

    #[test]
    fn test_endpoint_parse_invalid() {
        assert!("cloudlet.example.com".parse::<Endpoint>().is_err());
        assert!("cloudlet.example.com:port".parse::<Endpoint>().is_err());
        assert!(":51820".parse::<Endpoint>().is_err());
        assert!("fd00::1:51820".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_interface_bare_address_gets_host_prefix() {
        let interface = Interface::builder()
            .private_key(*KeyPair::generate().private_key())
            .parse_addresses(["10.0.0.2"])
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(interface.addresses[0].to_string(), "10.0.0.2/32");
    }

    #[test]
    fn test_interface_invalid_address() {
        let result = Interface::builder().parse_addresses(["10.0.0.300/32"]);
        assert_eq!(
            result.unwrap_err(),
            ConfigError::InvalidAddress("10.0.0.300/32".to_string())
        );
    }

    #[test]
    fn test_interface_missing_private_key() {
        let result = Interface::builder().build();
        assert_eq!(result.unwrap_err(), ConfigError::MissingField("PrivateKey"));
    }

    #[test]
    fn test_interface_conflicting_applications() {
        let result = Interface::builder()
            .private_key(*KeyPair::generate().private_key())
            .include_applications(["a"])
            .exclude_applications(["b"])
            .build();
        assert_eq!(result.unwrap_err(), ConfigError::ConflictingApplications);
    }

    #[test]
    fn test_peer_invalid_public_key() {
        let result = Peer::builder().parse_public_key("short");
        assert!(matches!(
            result,
            Err(ConfigError::InvalidKey {
                field: "PublicKey",
                ..
            })
        ));
    }

    #[test]
    fn test_peer_missing_public_key() {
        let result = Peer::builder().build();
        assert_eq!(result.unwrap_err(), ConfigError::MissingField("PublicKey"));
    }

    #[test]
    fn test_config_json_field_names() {
        let config = sample_config();
        let json = serde_json::to_value(&config).unwrap();

        assert_eq!(json["interface"]["addresses"][0], "10.0.0.2/32");
        assert_eq!(
            json["interface"]["includedApplications"][0],
            "com.android.chrome"
        );
        assert_eq!(json["peers"][0]["allowedIPs"][0], "0.0.0.0/0");
        assert_eq!(json["peers"][0]["endpoint"], "cloudlet.example.com:51820");
        assert_eq!(json["peers"][0]["persistentKeepalive"], 30);

        let decoded: TunnelConfig = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, config);
    }

    #[test]
    fn test_config_wg_quick_format() {
        let config = sample_config();
        let text = config.to_string();

        assert!(text.starts_with("[Interface]\n"));
        assert!(text.contains("Address = 10.0.0.2/32\n"));
        assert!(text.contains("DNS = 10.0.0.1\n"));
        assert!(text.contains("IncludedApplications = com.android.chrome\n"));
        assert!(text.contains("[Peer]\n"));
        assert!(text.contains("Endpoint = cloudlet.example.com:51820\n"));
        assert!(text.contains("PersistentKeepalive = 30\n"));
        assert!(text.contains(&format!("PublicKey = {}\n", PEER_KEY)));
    }
}
