use std::io;

use crate::channel::{Channel, Magic, Version};

/// Errors that can occur while framing or unframing.
///
/// Everything except [`FrameError::Remote`] leaves the stream in an unknown
/// position and must be treated as fatal for that stream.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame does not start with the receiver's magic.
    #[error("wrong packer magic (expected {expected:02x?}, got {got:02x?})")]
    InvalidMagic { expected: Magic, got: Magic },

    /// The frame was produced by a different protocol version.
    #[error("wrong packer version (expected {expected}, got {got})")]
    VersionMismatch { expected: Version, got: Version },

    /// The type byte is neither Data nor Close.
    #[error("unknown frame type {0}")]
    UnknownFrameType(u8),

    /// The length field is negative.
    #[error("invalid frame length {0}")]
    InvalidLength(i64),

    /// The payload exceeds what the wire format or configuration allows.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: u64, max: u64 },

    /// Fewer payload bytes were available than the header announced.
    #[error("short write ({written} of {expected} payload bytes)")]
    ShortWrite { expected: u64, written: u64 },

    /// The stream ended in the middle of a frame.
    #[error("truncated frame ({got} of {expected} bytes)")]
    Truncated { expected: u64, got: u64 },

    /// The stream ended cleanly on a frame boundary.
    #[error("connection closed")]
    ConnectionClosed,

    /// The peer closed the channel with an error message.
    #[error("{message}")]
    Remote { channel: Channel, message: String },

    /// `stream` was asked to use an empty chunk buffer.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,

    /// The source reader failed while streaming.
    #[error("stream ended with {source}")]
    StreamRead {
        sent: u64,
        #[source]
        source: io::Error,
    },

    /// A data frame could not be sent while streaming.
    #[error("failed to send body payload with {source}")]
    StreamSend {
        sent: u64,
        #[source]
        source: Box<FrameError>,
    },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FrameError {
    /// True when the peer ended the channel with an error message.
    ///
    /// The stream itself is still positioned on a frame boundary.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }

    /// True when the stream ended on a frame boundary.
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosed)
    }
}

impl From<FrameError> for io::Error {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(err) => err,
            FrameError::ConnectionClosed | FrameError::Truncated { .. } => {
                io::Error::new(io::ErrorKind::UnexpectedEof, err)
            }
            FrameError::Remote { .. } => io::Error::other(err),
            FrameError::StreamRead { source, .. } => source,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
