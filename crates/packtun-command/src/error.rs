use packtun_frame::{Channel, FrameError};

/// Errors that can occur while exchanging commands.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// Frame-level error, including the peer's error close.
    #[error("{0}")]
    Frame(#[from] FrameError),

    /// A message could not be CBOR-encoded.
    #[error("failed to encode {what}: {message}")]
    Encode { what: &'static str, message: String },

    /// A message could not be decoded.
    #[error("failed to decode {what}: {message}")]
    Decode { what: &'static str, message: String },

    /// A frame arrived on a channel other than the command channel.
    #[error("unexpected channel {got} (expected {expected})")]
    UnexpectedChannel { expected: Channel, got: Channel },

    /// The peer closed the command channel instead of sending a message.
    #[error("command channel {channel} closed")]
    Closed { channel: Channel },

    /// No handler is defined for the command.
    #[error("unknown command `{0}`")]
    UnknownCommand(String),

    /// The handler answered with an error.
    #[error("command `{name}` failed: {message}")]
    Handler { name: String, message: String },

    /// A handler with this name is already defined.
    #[error("command `{0}` is already defined")]
    DuplicateCommand(String),
}

impl CommandError {
    /// True when the peer answered with an error instead of a response.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Frame(err) if err.is_remote())
    }
}

pub type Result<T> = std::result::Result<T, CommandError>;
