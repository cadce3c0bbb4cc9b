//! Core types shared across the relay.
//!
//! Defines the egress protocol, the parsed egress target and the TLS material
//! references used to reach the receiving TAK server.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Transport protocol used for the egress link.
///
/// - Tcp: plain stream transport
/// - Tls: TLS-encrypted TCP (client certificate authentication)
/// - Udp: connectionless datagrams, one CoT document per datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Unencrypted TCP connection
    Tcp,
    /// Unencrypted UDP datagrams
    Udp,
    /// TLS-encrypted TCP connection
    Tls,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
            Protocol::Tls => write!(f, "TLS"),
        }
    }
}

impl Protocol {
    /// Returns true if this protocol uses encryption.
    pub fn is_secure(&self) -> bool {
        matches!(self, Protocol::Tls)
    }

    /// Returns true if this protocol is connection-oriented.
    pub fn is_stream_based(&self) -> bool {
        matches!(self, Protocol::Tcp | Protocol::Tls)
    }

    /// Returns the default TAK port for this protocol.
    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::Tcp => 8087,
            Protocol::Udp => 8087,
            Protocol::Tls => 8089,
        }
    }

    /// Returns the URL scheme for this protocol.
    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Tls => "tls",
        }
    }

    fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "tcp" => Some(Protocol::Tcp),
            "udp" => Some(Protocol::Udp),
            "tls" | "ssl" => Some(Protocol::Tls),
            _ => None,
        }
    }
}

/// Receiving endpoint parsed from a `scheme://host:port` string.
///
/// # Examples
///
/// ```
/// use cotrelay_core::types::{EgressTarget, Protocol};
///
/// let target: EgressTarget = "tls://tak.example.com:8089".parse().unwrap();
/// assert_eq!(target.protocol, Protocol::Tls);
/// assert_eq!(target.address(), "tak.example.com:8089");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EgressTarget {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
}

impl EgressTarget {
    /// Returns `host:port`, bracketing IPv6 literals.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for EgressTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.protocol.scheme(), self.address())
    }
}

impl FromStr for EgressTarget {
    type Err = ConfigError;

    fn from_str(url: &str) -> Result<Self, Self::Err> {
        let url = url.trim();
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| ConfigError::invalid_target(url, "expected scheme://host:port"))?;

        let protocol = Protocol::from_scheme(scheme).ok_or_else(|| {
            ConfigError::invalid_target(url, format!("unsupported scheme '{}'", scheme))
        })?;

        let authority = rest.trim_end_matches('/');
        if authority.is_empty() || authority.contains('/') {
            return Err(ConfigError::invalid_target(url, "expected host[:port]"));
        }

        let (host, port) = if let Some(v6) = authority.strip_prefix('[') {
            let (host, tail) = v6
                .split_once(']')
                .ok_or_else(|| ConfigError::invalid_target(url, "unterminated IPv6 literal"))?;
            match tail.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None if tail.is_empty() => (host, None),
                None => return Err(ConfigError::invalid_target(url, "garbage after host")),
            }
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (authority, None),
            }
        };

        if host.is_empty() {
            return Err(ConfigError::invalid_target(url, "host cannot be empty"));
        }

        let port = match port {
            Some(p) => match p.parse::<u16>() {
                Ok(0) | Err(_) => {
                    return Err(ConfigError::invalid_target(
                        url,
                        format!("invalid port '{}'", p),
                    ))
                }
                Ok(port) => port,
            },
            None => protocol.default_port(),
        };

        Ok(Self {
            protocol,
            host: host.to_string(),
            port,
        })
    }
}

/// TLS material for the egress link.
///
/// All paths reference PEM files supplied out of band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Path to the CA bundle used to verify the server
    pub ca_cert_path: PathBuf,

    /// Path to the client certificate chain
    pub client_cert_path: PathBuf,

    /// Path to the client private key
    pub client_key_path: PathBuf,

    /// Server name for SNI (defaults to the target host)
    #[serde(default)]
    pub server_name: Option<String>,
}

impl TlsConfig {
    /// Creates a TLS configuration from the three material paths.
    pub fn new(ca_cert_path: PathBuf, client_cert_path: PathBuf, client_key_path: PathBuf) -> Self {
        Self {
            ca_cert_path,
            client_cert_path,
            client_key_path,
            server_name: None,
        }
    }

    /// Sets the server name for SNI.
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_properties() {
        assert!(Protocol::Tls.is_secure());
        assert!(!Protocol::Tcp.is_secure());
        assert!(Protocol::Tcp.is_stream_based());
        assert!(!Protocol::Udp.is_stream_based());
        assert_eq!(Protocol::Tls.default_port(), 8089);
        assert_eq!(Protocol::Udp.to_string(), "UDP");
    }

    #[test]
    fn test_target_parsing() {
        let target: EgressTarget = "tcp://localhost:8087".parse().unwrap();
        assert_eq!(target.protocol, Protocol::Tcp);
        assert_eq!(target.host, "localhost");
        assert_eq!(target.port, 8087);

        let target: EgressTarget = "udp://239.2.3.1:6969".parse().unwrap();
        assert_eq!(target.protocol, Protocol::Udp);
        assert_eq!(target.to_string(), "udp://239.2.3.1:6969");
    }

    #[test]
    fn test_target_default_ports() {
        let tls: EgressTarget = "tls://tak.example.com".parse().unwrap();
        assert_eq!(tls.port, 8089);

        let tcp: EgressTarget = "TCP://tak.example.com/".parse().unwrap();
        assert_eq!(tcp.protocol, Protocol::Tcp);
        assert_eq!(tcp.port, 8087);
    }

    #[test]
    fn test_target_ipv6() {
        let target: EgressTarget = "tcp://[::1]:9000".parse().unwrap();
        assert_eq!(target.host, "::1");
        assert_eq!(target.port, 9000);
        assert_eq!(target.address(), "[::1]:9000");
    }

    #[test]
    fn test_target_rejections() {
        assert!("localhost:8087".parse::<EgressTarget>().is_err());
        assert!("http://localhost:8087".parse::<EgressTarget>().is_err());
        assert!("tcp://:8087".parse::<EgressTarget>().is_err());
        assert!("tcp://localhost:0".parse::<EgressTarget>().is_err());
        assert!("tcp://localhost:99999".parse::<EgressTarget>().is_err());
        assert!("tcp://localhost:8087/path".parse::<EgressTarget>().is_err());
    }
}
