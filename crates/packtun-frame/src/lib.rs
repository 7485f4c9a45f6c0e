//! Packer: stateless binary framing with channel multiplexing.
//!
//! Every frame on the wire carries:
//! - A 2-byte magic identifying the protocol variant
//! - A 2-byte little-endian version
//! - A 1-byte frame type (Data or Close)
//! - An 8-byte little-endian payload length
//! - A 1-byte channel ID
//!
//! A [`Packer`] holds only its `(magic, version)` pair. All connection state
//! lives in the reader/writer the caller passes in, so one `Packer` can be
//! shared freely and several protocol variants can coexist on one process.
//!
//! Close frames end a channel: an empty payload is a clean end, a non-empty
//! payload is the sender's error message.

pub mod channel;
pub mod codec;
pub mod error;
pub mod packer;

pub use channel::{Channel, Magic, Version};
pub use codec::{
    decode_frame, encode_frame, encode_header, Frame, FrameHeader, FrameType,
    DEFAULT_MAX_PAYLOAD, HEADER_SIZE,
};
#[cfg(feature = "async")]
pub use codec::PackerCodec;
pub use error::{FrameError, Result};
pub use packer::{Packer, Received, DEFAULT_CHUNK_SIZE};
