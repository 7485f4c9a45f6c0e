//! Structured command/response exchange over a Packer channel.
//!
//! Each [`Command`] and [`Response`] is one CBOR map in one data frame:
//! key `1` holds the command name, key `2` a map of named values. A command
//! that fails is answered with a close frame carrying the error message, so
//! the caller sees the peer's message verbatim.
//!
//! The exchange leaves the stream on a frame boundary, which lets a peer
//! negotiate with a command (for example `tun`) and then hand the same stream
//! to another protocol.

pub mod channel;
pub mod error;
pub mod message;
pub mod router;

pub use channel::{
    CommandChannel, COMMAND_CHANNEL, COMMAND_MAGIC, COMMAND_VERSION, MAX_MESSAGE_SIZE,
};
pub use error::{CommandError, Result};
pub use message::{Body, Command, Response};
pub use router::Router;

/// Re-exported so handlers can build body values without a direct dependency.
pub use ciborium::Value;
