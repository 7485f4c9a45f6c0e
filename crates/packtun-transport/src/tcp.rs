use std::net::{SocketAddr, TcpListener, TcpStream};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::TunnelStream;

/// TCP listener for peers that are not on the same host.
pub struct TcpTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpTransport {
    /// Bind and listen on `addr` (e.g. `127.0.0.1:7000`, port 0 for ephemeral).
    pub fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).map_err(|source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "listening on tcp");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<TunnelStream> {
        let (stream, peer) = self.listener.accept().map_err(TransportError::Accept)?;
        // Frames are written header-then-payload; don't let Nagle hold the header back.
        stream.set_nodelay(true)?;
        debug!(%peer, "accepted tcp connection");
        Ok(TunnelStream::from_tcp(stream))
    }

    /// Connect to a listening TCP endpoint (blocking).
    pub fn connect(addr: &str) -> Result<TunnelStream> {
        let stream = TcpStream::connect(addr).map_err(|source| TransportError::Connect {
            addr: addr.to_string(),
            source,
        })?;
        stream.set_nodelay(true)?;
        debug!(addr, "connected over tcp");
        Ok(TunnelStream::from_tcp(stream))
    }

    /// The bound local address (useful after binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    #[test]
    fn bind_ephemeral_accept_connect() {
        let listener = TcpTransport::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().to_string();

        let handle = std::thread::spawn(move || {
            let mut client = TcpTransport::connect(&addr).unwrap();
            client.write_all(b"ping").unwrap();
        });

        let mut server = listener.accept().unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
        assert_eq!(server.transport_name(), "tcp");
        handle.join().unwrap();
    }

    #[test]
    fn connect_refused_reports_address() {
        let listener = TcpTransport::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().to_string();
        drop(listener);

        let err = TcpTransport::connect(&addr).unwrap_err();
        assert!(matches!(err, TransportError::Connect { addr: ref a, .. } if *a == addr));
    }
}
