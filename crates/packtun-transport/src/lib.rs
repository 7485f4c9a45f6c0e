//! Duplex byte-stream transports for packtun.
//!
//! Every packtun protocol runs over "N logical channels on exactly one
//! physical duplex stream". This crate provides that stream:
//! - Unix domain sockets (Linux/macOS)
//! - TCP
//!
//! Anything that implements [`DuplexStream`] can carry a tunnel. The trait
//! exposes the one capability the upper layers need beyond `Read + Write`:
//! splitting the stream into an independent read side and write side.

pub mod endpoint;
pub mod error;
pub mod stream;
pub mod tcp;

#[cfg(unix)]
pub mod uds;

pub use endpoint::{connect, Endpoint, Listener};
pub use error::{Result, TransportError};
pub use stream::{DuplexStream, TunnelStream};
pub use tcp::TcpTransport;

#[cfg(unix)]
pub use uds::UnixDomainSocket;
