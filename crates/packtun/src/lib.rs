//! Channel-multiplexed framing and HTTP tunnelling over one duplex stream.
//!
//! packtun carries several logical channels over exactly one bidirectional
//! byte stream, and builds an HTTP request/response tunnel on top.
//!
//! # Crate Structure
//!
//! - [`transport`]: duplex stream transports (UDS, TCP) and endpoint parsing
//! - [`frame`]: the Packer framing codec
//! - [`command`]: CBOR command/response RPC (behind `command` feature)
//! - [`http`]: the HTTP tunnel backend and frontend (behind `http` feature)

/// Re-export transport types.
pub mod transport {
    pub use packtun_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use packtun_frame::*;
}

/// Re-export command types (requires `command` feature).
#[cfg(feature = "command")]
pub mod command {
    pub use packtun_command::*;
}

/// Re-export tunnel types (requires `http` feature).
#[cfg(feature = "http")]
pub mod http {
    pub use packtun_http::*;
}
