//! Stream transports: listening, accepting and connecting.
//!
//! The accept loop and the dialer work against two small traits,
//! [`Acceptor`] and [`Connector`], so they can run over real sockets or over
//! in-memory streams in tests. [`Listener`] and [`TransportConnector`] are the
//! socket-backed implementations for TCP and Unix domain sockets.

use crate::endpoint::{Endpoint, Network};
use socket2::{SockRef, TcpKeepalive};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};

/// Listen backlog for TCP sockets.
const LISTEN_BACKLOG: i32 = 1024;

/// Any bidirectional byte stream a session can run over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

/// A connected stream with its transport erased.
pub type Connection = Box<dyn AsyncStream>;

/// Source of inbound connections.
pub trait Acceptor: Send {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Wait for the next connection; returns the stream and a peer label.
    fn accept(&mut self) -> impl Future<Output = io::Result<(Self::Stream, String)>> + Send;
}

/// Opens outbound connections.
pub trait Connector: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Make a single connection attempt.
    fn connect(&self, endpoint: &Endpoint) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// A bound listening socket.
///
/// Dropping the listener closes it; for Unix sockets the socket file is
/// removed as well.
pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix {
        listener: UnixListener,
        path: PathBuf,
    },
}

impl Listener {
    /// Bind the endpoint. Fails if no address can be bound.
    pub async fn bind(endpoint: &Endpoint) -> io::Result<Self> {
        match endpoint.network() {
            #[cfg(unix)]
            Network::Unix => bind_unix(endpoint.address()),
            #[cfg(not(unix))]
            Network::Unix => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "unix domain sockets are not supported on this platform",
            )),
            _ => {
                let mut last_err = None;
                for addr in endpoint.listen_addrs().await? {
                    match bind_tcp(addr) {
                        Ok(listener) => return Ok(Listener::Tcp(listener)),
                        Err(e) => {
                            debug!(addr = %addr, error = %e, "Bind attempt failed");
                            last_err = Some(e);
                        }
                    }
                }
                Err(last_err.unwrap_or_else(|| {
                    io::Error::new(io::ErrorKind::AddrNotAvailable, "no address to bind")
                }))
            }
        }
    }

    /// Human-readable bound address.
    pub fn local_addr(&self) -> io::Result<String> {
        match self {
            Listener::Tcp(listener) => Ok(listener.local_addr()?.to_string()),
            #[cfg(unix)]
            Listener::Unix { path, .. } => Ok(path.display().to_string()),
        }
    }

    /// Bound TCP socket address, if this is a TCP listener.
    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        match self {
            Listener::Tcp(listener) => listener.local_addr().ok(),
            #[cfg(unix)]
            Listener::Unix { .. } => None,
        }
    }
}

#[cfg(unix)]
impl Drop for Listener {
    fn drop(&mut self) {
        if let Listener::Unix { path, .. } = self {
            if std::fs::remove_file(&*path).is_ok() {
                debug!(path = %path.display(), "Removed socket file");
            }
        }
    }
}

impl Acceptor for Listener {
    type Stream = Connection;

    fn accept(&mut self) -> impl Future<Output = io::Result<(Connection, String)>> + Send {
        async move {
            match self {
                Listener::Tcp(listener) => {
                    let (stream, addr) = listener.accept().await?;
                    let _ = stream.set_nodelay(true);
                    Ok((Box::new(stream) as Connection, addr.to_string()))
                }
                #[cfg(unix)]
                Listener::Unix { listener, path } => {
                    let (stream, _addr) = listener.accept().await?;
                    Ok((
                        Box::new(stream) as Connection,
                        format!("unix:{}", path.display()),
                    ))
                }
            }
        }
    }
}

/// Create a TCP listener with address reuse.
fn bind_tcp(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    TcpListener::from_std(socket.into())
}

#[cfg(unix)]
fn bind_unix(path: &str) -> io::Result<Listener> {
    let path = PathBuf::from(path);

    // A socket file left behind by a previous run blocks the bind.
    if path.exists() {
        info!(path = %path.display(), "Removing stale socket file");
        std::fs::remove_file(&path)?;
    }

    let listener = UnixListener::bind(&path)?;
    Ok(Listener::Unix { listener, path })
}

/// Socket-backed connector for TCP and Unix endpoints.
#[derive(Debug, Clone, Default)]
pub struct TransportConnector {
    keep_alive: Option<Duration>,
}

impl TransportConnector {
    pub fn new(keep_alive: Option<Duration>) -> Self {
        Self { keep_alive }
    }

    fn configure(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_nodelay(true)?;
        if let Some(time) = self.keep_alive {
            let keepalive = TcpKeepalive::new().with_time(time);
            SockRef::from(stream).set_tcp_keepalive(&keepalive)?;
        }
        Ok(())
    }
}

impl Connector for TransportConnector {
    type Stream = Connection;

    fn connect(&self, endpoint: &Endpoint) -> impl Future<Output = io::Result<Connection>> + Send {
        async move {
            match endpoint.network() {
                #[cfg(unix)]
                Network::Unix => {
                    let stream = UnixStream::connect(endpoint.address()).await?;
                    Ok(Box::new(stream) as Connection)
                }
                #[cfg(not(unix))]
                Network::Unix => Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "unix domain sockets are not supported on this platform",
                )),
                _ => {
                    let mut last_err = None;
                    for addr in endpoint.dial_addrs().await? {
                        match TcpStream::connect(addr).await {
                            Ok(stream) => {
                                self.configure(&stream)?;
                                return Ok(Box::new(stream) as Connection);
                            }
                            Err(e) => last_err = Some(e),
                        }
                    }
                    Err(last_err.unwrap_or_else(|| {
                        io::Error::new(io::ErrorKind::AddrNotAvailable, "no address to dial")
                    }))
                }
            }
        }
    }
}
