//! Dialing physical connections.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpSocket, TcpStream, UdpSocket};

use super::conn::Conn;
use crate::core::{CA_FILE_SKIP_VERIFY, CA_FILE_SYSTEM_ROOTS, TransportError, TransportResult};

/// Network kinds understood by the dialer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    /// TCP over IPv4 or IPv6.
    Tcp,
    /// TCP over IPv4 only.
    Tcp4,
    /// TCP over IPv6 only.
    Tcp6,
    /// UDP over IPv4 or IPv6.
    Udp,
    /// UDP over IPv4 only.
    Udp4,
    /// UDP over IPv6 only.
    Udp6,
}

impl Network {
    /// Whether the network carries a byte stream (as opposed to datagrams).
    pub fn is_stream(self) -> bool {
        matches!(self, Network::Tcp | Network::Tcp4 | Network::Tcp6)
    }

    /// Whether `addr` belongs to an address family this network may use.
    pub fn accepts(self, addr: &SocketAddr) -> bool {
        match self {
            Network::Tcp4 | Network::Udp4 => addr.is_ipv4(),
            Network::Tcp6 | Network::Udp6 => addr.is_ipv6(),
            Network::Tcp | Network::Udp => true,
        }
    }

    /// Canonical lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Network::Tcp => "tcp",
            Network::Tcp4 => "tcp4",
            Network::Tcp6 => "tcp6",
            Network::Udp => "udp",
            Network::Udp4 => "udp4",
            Network::Udp6 => "udp6",
        }
    }
}

impl FromStr for Network {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Network::Tcp),
            "tcp4" => Ok(Network::Tcp4),
            "tcp6" => Ok(Network::Tcp6),
            "udp" => Ok(Network::Udp),
            "udp4" => Ok(Network::Udp4),
            "udp6" => Ok(Network::Udp6),
            other => Err(TransportError::UnsupportedNetwork(other.to_string())),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry key for a destination.
pub(crate) fn node_key(network: &str, address: &str) -> String {
    format!("{network}_{address}")
}

/// Where the TLS client gets its trust anchors from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaSource {
    /// Do not verify the server certificate at all.
    SkipVerify,
    /// Verify against the platform trust store.
    SystemRoots,
    /// Verify against the PEM bundle at this path.
    File(PathBuf),
}

impl CaSource {
    /// Parse a CA file setting, honouring the `"none"` and `"root"` sentinels.
    ///
    /// An empty value means "no TLS" and yields `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "" => None,
            CA_FILE_SKIP_VERIFY => Some(CaSource::SkipVerify),
            CA_FILE_SYSTEM_ROOTS => Some(CaSource::SystemRoots),
            path => Some(CaSource::File(PathBuf::from(path))),
        }
    }
}

/// TLS parameters for a stream dial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsOptions {
    /// Trust anchors for server verification.
    pub ca: CaSource,
    /// Client certificate chain (PEM) for mutual TLS.
    pub cert_file: Option<PathBuf>,
    /// Client private key (PEM) for mutual TLS.
    pub key_file: Option<PathBuf>,
    /// Server name to verify; defaults to the host part of the address.
    pub server_name: Option<String>,
}

impl TlsOptions {
    /// Create options that verify the server against `ca`.
    pub fn new(ca: CaSource) -> Self {
        Self {
            ca,
            cert_file: None,
            key_file: None,
            server_name: None,
        }
    }

    /// Build TLS options from raw file settings.
    ///
    /// Returns `None` when `ca_file` is empty, which disables TLS. Empty
    /// strings for the other fields are treated as unset.
    pub fn from_files(cert_file: &str, key_file: &str, ca_file: &str, server_name: &str) -> Option<Self> {
        let ca = CaSource::parse(ca_file)?;
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Some(Self {
            ca,
            cert_file: non_empty(cert_file).map(PathBuf::from),
            key_file: non_empty(key_file).map(PathBuf::from),
            server_name: non_empty(server_name),
        })
    }

    /// Present a client certificate.
    pub fn client_cert(mut self, cert_file: impl Into<PathBuf>, key_file: impl Into<PathBuf>) -> Self {
        self.cert_file = Some(cert_file.into());
        self.key_file = Some(key_file.into());
        self
    }

    /// Override the server name used for verification and SNI.
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }
}

/// Everything needed to open one physical connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialOptions {
    /// Network name (`tcp`, `udp4`, ...).
    pub network: String,
    /// Remote `host:port`.
    pub address: String,
    /// Local address to bind before connecting.
    pub local_addr: Option<String>,
    /// Dial timeout; zero means no timeout.
    pub timeout: Duration,
    /// TLS parameters; stream networks only.
    pub tls: Option<TlsOptions>,
}

impl DialOptions {
    /// Create dial options for `network`/`address` with no timeout.
    pub fn new(network: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            address: address.into(),
            local_addr: None,
            timeout: Duration::ZERO,
            tls: None,
        }
    }

    /// Set the dial timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Bind to a local address before connecting.
    pub fn local_addr(mut self, addr: impl Into<String>) -> Self {
        self.local_addr = Some(addr.into());
        self
    }

    /// Use TLS on top of the stream.
    pub fn tls(mut self, tls: TlsOptions) -> Self {
        self.tls = Some(tls);
        self
    }
}

/// Opens physical connections.
///
/// The pool and the multiplexer only ever talk to the network through this
/// trait, so tests and embedders can swap in their own dialer.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// Open a connection described by `opts`.
    async fn dial(&self, opts: &DialOptions) -> TransportResult<Conn>;
}

/// Default dialer backed by tokio sockets.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetDialer;

#[async_trait]
impl Dialer for NetDialer {
    async fn dial(&self, opts: &DialOptions) -> TransportResult<Conn> {
        let network: Network = opts.network.parse()?;
        if opts.timeout.is_zero() {
            return dial_network(network, opts).await;
        }
        tokio::time::timeout(opts.timeout, dial_network(network, opts))
            .await
            .map_err(|_| TransportError::Timeout(opts.timeout))?
    }
}

async fn dial_network(network: Network, opts: &DialOptions) -> TransportResult<Conn> {
    let remote = resolve(network, &opts.address).await?;
    let local = match opts.local_addr.as_deref() {
        Some(addr) => Some(resolve_local(network, addr).await?),
        None => None,
    };

    if !network.is_stream() {
        let bind = local.unwrap_or_else(|| unspecified(&remote));
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(remote).await?;
        return Ok(Conn::Udp(socket));
    }

    let stream = connect_stream(remote, local).await?;
    stream.set_nodelay(true)?;
    match &opts.tls {
        None => Ok(Conn::Tcp(stream)),
        #[cfg(feature = "tls")]
        Some(tls) => super::tls::connect(stream, &opts.address, tls).await,
        #[cfg(not(feature = "tls"))]
        Some(_) => Err(TransportError::TlsUnavailable),
    }
}

async fn connect_stream(remote: SocketAddr, local: Option<SocketAddr>) -> TransportResult<TcpStream> {
    let Some(local) = local else {
        return Ok(TcpStream::connect(remote).await?);
    };
    let socket = if remote.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.bind(local)?;
    Ok(socket.connect(remote).await?)
}

async fn resolve(network: Network, address: &str) -> TransportResult<SocketAddr> {
    if let Ok(addr) = address.parse::<SocketAddr>() {
        if network.accepts(&addr) {
            return Ok(addr);
        }
        return Err(TransportError::InvalidAddress(format!(
            "{address} is not a {network} address"
        )));
    }
    tokio::net::lookup_host(address)
        .await
        .map_err(|e| TransportError::InvalidAddress(format!("{address}: {e}")))?
        .find(|addr| network.accepts(addr))
        .ok_or_else(|| TransportError::InvalidAddress(format!("no {network} address for {address}")))
}

/// Local addresses may omit the port (`"10.0.0.2"`), which means "any port".
async fn resolve_local(network: Network, address: &str) -> TransportResult<SocketAddr> {
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, 0));
    }
    resolve(network, address).await
}

fn unspecified(remote: &SocketAddr) -> SocketAddr {
    let ip = if remote.is_ipv4() {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    } else {
        IpAddr::V6(Ipv6Addr::UNSPECIFIED)
    };
    SocketAddr::new(ip, 0)
}
