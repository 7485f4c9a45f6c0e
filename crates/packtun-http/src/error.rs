use std::io;

use packtun_frame::{Channel, FrameError};

/// Errors that can occur while tunnelling an HTTP exchange.
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    /// Frame-level error (including a peer's error close).
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// I/O error on the stream or the local response writer.
    #[error("tunnel I/O error: {0}")]
    Io(#[from] io::Error),

    /// A snapshot could not be CBOR-encoded.
    #[error("failed to encode {what} payload: {message}")]
    Encode { what: &'static str, message: String },

    /// A snapshot could not be decoded or describes an invalid message.
    #[error("failed to decode {what} payload: {message}")]
    Decode { what: &'static str, message: String },

    /// The reconstructed request was rejected by `http`.
    #[error("invalid request: {0}")]
    Http(#[from] http::Error),

    /// A frame arrived on a channel that is not valid at this point.
    #[error("unexpected channel {got} (expected {expected})")]
    UnexpectedChannel { expected: Channel, got: Channel },

    /// The peer closed a channel before sending the request.
    #[error("channel {channel} closed before the request arrived")]
    UnexpectedEof { channel: Channel },

    /// A body frame could not be copied through completely.
    #[error("failed to forward body ({copied} of {expected} bytes)")]
    BodyForward { expected: u64, copied: u64 },

    /// The response reader thread panicked.
    #[error("response reader panicked")]
    ReaderPanicked,

    /// The tunnel configuration is inconsistent.
    #[error("invalid tunnel config: {0}")]
    Config(String),
}

impl TunnelError {
    /// True when the peer ended the exchange with an error message.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Frame(err) if err.is_remote())
    }
}

impl From<TunnelError> for io::Error {
    fn from(err: TunnelError) -> Self {
        match err {
            TunnelError::Io(err) => err,
            TunnelError::Frame(err) => err.into(),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

/// A frame on some other channel was discarded while reading the body.
///
/// Surfaced as an [`io::ErrorKind::Interrupted`] error, so `read_to_end`,
/// `io::copy` and friends simply retry.
#[derive(Debug, thiserror::Error)]
#[error("discarded {len} byte frame on channel {channel} while reading body")]
pub struct NotBody {
    pub channel: Channel,
    pub len: u64,
}

pub type Result<T> = std::result::Result<T, TunnelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_frame_errors_are_remote() {
        let err = TunnelError::from(FrameError::Remote {
            channel: 16,
            message: "boom".to_string(),
        });
        assert!(err.is_remote());
        assert!(!TunnelError::ReaderPanicked.is_remote());
    }

    #[test]
    fn io_conversion_keeps_frame_kinds() {
        let err: io::Error = TunnelError::from(FrameError::ConnectionClosed).into();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        let err: io::Error = TunnelError::BodyForward {
            expected: 10,
            copied: 3,
        }
        .into();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert_eq!(err.to_string(), "failed to forward body (3 of 10 bytes)");
    }
}
