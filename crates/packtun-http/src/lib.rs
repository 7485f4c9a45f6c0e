//! HTTP tunnel over a Packer-framed duplex stream.
//!
//! One request/response exchange travels over three logical channels:
//! - **Request** (8): one CBOR snapshot of the request head
//! - **Body** (16): the request body from the client, then the response body
//!   from the server, each ending with a close frame
//! - **Headers** (1): one CBOR snapshot of response headers and status
//!
//! The server side calls [`Tunnel::backend`] and gets a request whose body is
//! read lazily from the stream, plus a [`TunnelResponseWriter`]. The client
//! side calls [`Tunnel::frontend`], which sends the request on the calling
//! thread while a scoped thread forwards the response into any
//! [`ResponseWriter`].
//!
//! ```no_run
//! use std::io::{Read, Write};
//! use std::os::unix::net::UnixStream;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (client, server) = UnixStream::pair()?;
//!
//! let handle = std::thread::spawn(move || -> packtun_http::Result<()> {
//!     let (mut response, request) = packtun_http::backend(&server)?;
//!     let mut body = Vec::new();
//!     request.into_body().read_to_end(&mut body)?;
//!     response.write_all(&body)?;
//!     response.finish()?;
//!     Ok(())
//! });
//!
//! let request = http::Request::post("/echo").body(&b"hello"[..])?;
//! let mut response = packtun_http::BufferedResponse::new();
//! packtun_http::frontend(&mut response, request, &client)?;
//! assert_eq!(response.body(), b"hello");
//! # handle.join().unwrap()?;
//! # Ok(())
//! # }
//! ```

pub mod body;
pub mod config;
pub mod error;
pub mod payload;
pub mod response;
pub mod tunnel;

use std::io::Read;

use packtun_transport::DuplexStream;

pub use body::BodyReader;
pub use config::{
    TunnelChannels, TunnelConfig, BODY, DEFAULT_MAX_SNAPSHOT, HEADERS, REQUEST, TUNNEL_MAGIC,
    TUNNEL_VERSION,
};
pub use error::{NotBody, Result, TunnelError};
pub use payload::{RequestInfo, RequestSnapshot, ResponseHeaderSnapshot};
pub use response::{BufferedResponse, ResponseWriter, TunnelResponseWriter};
pub use tunnel::{Tunnel, TunnelRequest};

/// Server role with the default tunnel configuration.
pub fn backend<S: DuplexStream>(
    stream: &S,
) -> Result<(TunnelResponseWriter<S>, TunnelRequest<S>)> {
    Tunnel::default().backend(stream)
}

/// Client role with the default tunnel configuration.
pub fn frontend<S, Rw, B>(response: &mut Rw, request: http::Request<B>, stream: &S) -> Result<()>
where
    S: DuplexStream,
    Rw: ResponseWriter + Send,
    B: Read,
{
    Tunnel::default().frontend(response, request, stream)
}
