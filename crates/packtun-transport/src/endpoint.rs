use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Result, TransportError};
use crate::stream::TunnelStream;
use crate::tcp::TcpTransport;
#[cfg(unix)]
use crate::uds::UnixDomainSocket;

/// Where a peer listens.
///
/// Accepted forms: `unix:<path>`, `tcp:<host:port>`, or a bare path (treated
/// as a Unix socket path).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    Tcp(String),
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(TransportError::InvalidEndpoint(s.to_string()));
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }
        if let Some(addr) = s.strip_prefix("tcp:") {
            if !addr.contains(':') {
                return Err(TransportError::InvalidEndpoint(s.to_string()));
            }
            return Ok(Self::Tcp(addr.to_string()));
        }
        if s.is_empty() || s.contains("://") {
            return Err(TransportError::InvalidEndpoint(s.to_string()));
        }
        Ok(Self::Unix(PathBuf::from(s)))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
            Self::Tcp(addr) => write!(f, "tcp:{addr}"),
        }
    }
}

/// A bound listener of either kind.
pub enum Listener {
    #[cfg(unix)]
    Unix(UnixDomainSocket),
    Tcp(TcpTransport),
}

impl Listener {
    /// Bind to an endpoint.
    pub fn bind(endpoint: &Endpoint) -> Result<Self> {
        match endpoint {
            #[cfg(unix)]
            Endpoint::Unix(path) => Ok(Self::Unix(UnixDomainSocket::bind(path)?)),
            #[cfg(not(unix))]
            Endpoint::Unix(_) => Err(TransportError::Unsupported(endpoint.to_string())),
            Endpoint::Tcp(addr) => Ok(Self::Tcp(TcpTransport::bind(addr)?)),
        }
    }

    /// Accept the next connection (blocking).
    pub fn accept(&self) -> Result<TunnelStream> {
        match self {
            #[cfg(unix)]
            Self::Unix(socket) => socket.accept(),
            Self::Tcp(socket) => socket.accept(),
        }
    }

    /// The endpoint actually bound (resolves ephemeral TCP ports).
    pub fn local_endpoint(&self) -> Endpoint {
        match self {
            #[cfg(unix)]
            Self::Unix(socket) => Endpoint::Unix(socket.path().to_path_buf()),
            Self::Tcp(socket) => Endpoint::Tcp(socket.local_addr().to_string()),
        }
    }
}

/// Connect to an endpoint (blocking).
pub fn connect(endpoint: &Endpoint) -> Result<TunnelStream> {
    match endpoint {
        #[cfg(unix)]
        Endpoint::Unix(path) => UnixDomainSocket::connect(path),
        #[cfg(not(unix))]
        Endpoint::Unix(_) => Err(TransportError::Unsupported(endpoint.to_string())),
        Endpoint::Tcp(addr) => TcpTransport::connect(addr),
    }
}
