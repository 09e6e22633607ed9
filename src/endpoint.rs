//! Transport endpoints.
//!
//! An endpoint pairs a network name with an address (or socket path), plus
//! an optional TLS layer. The network names follow the usual socket
//! conventions:
//!
//! - `tcp`: TCP over IPv4 or IPv6
//! - `tcp4` / `tcp6`: TCP restricted to one address family
//! - `unix`: stream-oriented Unix domain socket, address is a path
//!
//! TCP addresses may omit the host (`:4040`), meaning all interfaces when
//! listening and the local host when dialing.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::str::FromStr;
use thiserror::Error;

/// Network protocol an endpoint runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Tcp,
    Tcp4,
    Tcp6,
    Unix,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Tcp => "tcp",
            Network::Tcp4 => "tcp4",
            Network::Tcp6 => "tcp6",
            Network::Unix => "unix",
        }
    }

    fn accepts(&self, addr: &SocketAddr) -> bool {
        match self {
            Network::Tcp4 => addr.is_ipv4(),
            Network::Tcp6 => addr.is_ipv6(),
            Network::Tcp | Network::Unix => true,
        }
    }
}

impl FromStr for Network {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Network::Tcp),
            "tcp4" => Ok(Network::Tcp4),
            "tcp6" => Ok(Network::Tcp6),
            "unix" => Ok(Network::Unix),
            other => Err(EndpointError::UnsupportedNetwork(other.to_string())),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport kind of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    StreamTcp,
    StreamUnix,
    StreamTls,
}

/// Endpoint construction errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointError {
    #[error("unsupported network protocol: {0}")]
    UnsupportedNetwork(String),

    #[error("endpoint address is empty")]
    EmptyAddress,
}

/// Where to listen or connect. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    network: Network,
    address: String,
    tls: bool,
}

impl Endpoint {
    pub fn new<S: Into<String>>(network: Network, address: S) -> Result<Self, EndpointError> {
        let address = address.into();
        if address.trim().is_empty() {
            return Err(EndpointError::EmptyAddress);
        }
        Ok(Self {
            network,
            address,
            tls: false,
        })
    }

    /// Parse a network name and build the endpoint.
    pub fn parse(network: &str, address: &str) -> Result<Self, EndpointError> {
        Self::new(network.parse()?, address)
    }

    /// The same endpoint with TLS layered over the transport.
    pub fn with_tls(mut self) -> Self {
        self.tls = true;
        self
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    pub fn kind(&self) -> EndpointKind {
        match (self.tls, self.network) {
            (true, _) => EndpointKind::StreamTls,
            (false, Network::Unix) => EndpointKind::StreamUnix,
            (false, _) => EndpointKind::StreamTcp,
        }
    }

    /// Host name used to verify a TLS peer.
    pub fn server_name(&self) -> &str {
        if self.network == Network::Unix {
            return "localhost";
        }
        match split_host_port(&self.address) {
            Ok(("", _)) | Err(_) => "localhost",
            Ok((host, _)) => host,
        }
    }

    /// Socket addresses to bind, filtered by address family.
    pub async fn listen_addrs(&self) -> io::Result<Vec<SocketAddr>> {
        let default_host = match self.network {
            Network::Tcp6 => "::",
            _ => "0.0.0.0",
        };
        self.resolve(default_host).await
    }

    /// Socket addresses to dial, filtered by address family.
    pub async fn dial_addrs(&self) -> io::Result<Vec<SocketAddr>> {
        let default_host = match self.network {
            Network::Tcp6 => "::1",
            Network::Tcp4 => "127.0.0.1",
            _ => "localhost",
        };
        self.resolve(default_host).await
    }

    async fn resolve(&self, default_host: &str) -> io::Result<Vec<SocketAddr>> {
        if self.network == Network::Unix {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unix endpoints have no socket address",
            ));
        }

        let (host, port) = split_host_port(&self.address)?;
        let host = if host.is_empty() { default_host } else { host };

        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await?
            .filter(|addr| self.network.accepts(addr))
            .collect();

        if addrs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no {} address for {}", self.network, self.address),
            ));
        }
        Ok(addrs)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.tls { "+tls" } else { "" };
        write!(f, "({}{}) {}", self.network, scheme, self.address)
    }
}

/// Split `host:port`, accepting `[v6]:port` and an empty host.
fn split_host_port(address: &str) -> io::Result<(&str, u16)> {
    let invalid = || {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid address '{address}', expected host:port"),
        )
    };

    let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    Ok((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_network() {
        assert_eq!("tcp".parse::<Network>().unwrap(), Network::Tcp);
        assert_eq!("TCP6".parse::<Network>().unwrap(), Network::Tcp6);
        assert_eq!("unix".parse::<Network>().unwrap(), Network::Unix);
        assert_eq!(
            "udp".parse::<Network>().unwrap_err(),
            EndpointError::UnsupportedNetwork("udp".to_string())
        );
    }

    #[test]
    fn test_endpoint_kind() {
        let tcp = Endpoint::parse("tcp", ":4040").unwrap();
        assert_eq!(tcp.kind(), EndpointKind::StreamTcp);

        let unix = Endpoint::parse("unix", "/tmp/curr.sock").unwrap();
        assert_eq!(unix.kind(), EndpointKind::StreamUnix);

        let tls = Endpoint::parse("tcp", "localhost:4443").unwrap().with_tls();
        assert_eq!(tls.kind(), EndpointKind::StreamTls);
        assert!(tls.is_tls());
    }

    #[test]
    fn test_empty_address_rejected() {
        assert_eq!(
            Endpoint::parse("tcp", " ").unwrap_err(),
            EndpointError::EmptyAddress
        );
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port(":4040").unwrap(), ("", 4040));
        assert_eq!(split_host_port("localhost:80").unwrap(), ("localhost", 80));
        assert_eq!(split_host_port("[::1]:4040").unwrap(), ("::1", 4040));
        assert!(split_host_port("localhost").is_err());
        assert!(split_host_port("localhost:http").is_err());
    }

    #[test]
    fn test_server_name() {
        let ep = Endpoint::parse("tcp", "currency.example:4443").unwrap();
        assert_eq!(ep.server_name(), "currency.example");
        assert_eq!(Endpoint::parse("tcp", ":4443").unwrap().server_name(), "localhost");
    }

    #[tokio::test]
    async fn test_listen_addrs_default_host() {
        let addrs = Endpoint::parse("tcp4", ":4040")
            .unwrap()
            .listen_addrs()
            .await
            .unwrap();
        assert_eq!(addrs, vec!["0.0.0.0:4040".parse::<SocketAddr>().unwrap()]);
    }

    #[tokio::test]
    async fn test_family_filter() {
        let err = Endpoint::parse("tcp6", "127.0.0.1:4040")
            .unwrap()
            .dial_addrs()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AddrNotAvailable);
    }

    #[test]
    fn test_display() {
        let ep = Endpoint::parse("unix", "/tmp/x.sock").unwrap();
        assert_eq!(ep.to_string(), "(unix) /tmp/x.sock");
    }
}
