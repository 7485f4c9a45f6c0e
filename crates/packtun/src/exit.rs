use std::fmt;
use std::io;

use packtun_command::CommandError;
use packtun_frame::FrameError;
use packtun_http::TunnelError;
use packtun_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const REMOTE_ERROR: i32 = 40;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const CONFIG_INVALID: i32 = 78;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::NotFound
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::BrokenPipe => TRANSPORT_ERROR,
        io::ErrorKind::UnexpectedEof => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::InvalidEndpoint(_) => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::Remote { .. } => CliError::new(REMOTE_ERROR, format!("{context}: {err}")),
        FrameError::ConnectionClosed | FrameError::Truncated { .. } => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        FrameError::InvalidMagic { .. }
        | FrameError::VersionMismatch { .. }
        | FrameError::UnknownFrameType(_)
        | FrameError::InvalidLength(_)
        | FrameError::PayloadTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn tunnel_error(context: &str, err: TunnelError) -> CliError {
    match err {
        TunnelError::Frame(err) => frame_error(context, err),
        TunnelError::Io(err) => io_error(context, err),
        TunnelError::Config(_) => CliError::new(CONFIG_INVALID, format!("{context}: {err}")),
        TunnelError::ReaderPanicked => CliError::new(INTERNAL, format!("{context}: {err}")),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn command_error(context: &str, err: CommandError) -> CliError {
    match err {
        CommandError::Frame(err) => frame_error(context, err),
        CommandError::UnknownCommand(_) | CommandError::Handler { .. } => {
            CliError::new(REMOTE_ERROR, format!("{context}: {err}"))
        }
        CommandError::DuplicateCommand(_) => CliError::new(INTERNAL, format!("{context}: {err}")),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_map_to_timeout_code() {
        let err = io_error("read", io::Error::new(io::ErrorKind::WouldBlock, "slow"));
        assert_eq!(err.code, TIMEOUT);
        assert_eq!(err.to_string(), "read: slow");
    }

    #[test]
    fn remote_errors_keep_peer_message() {
        let err = tunnel_error(
            "fetch failed",
            TunnelError::Frame(FrameError::Remote {
                channel: 16,
                message: "handler exploded".to_string(),
            }),
        );
        assert_eq!(err.code, REMOTE_ERROR);
        assert_eq!(err.message, "fetch failed: handler exploded");
    }

    #[test]
    fn protocol_mismatch_is_data_invalid() {
        let err = command_error(
            "open tunnel",
            CommandError::Frame(FrameError::InvalidMagic {
                expected: *b"CM",
                got: *b"HT",
            }),
        );
        assert_eq!(err.code, DATA_INVALID);
    }

    #[test]
    fn bad_endpoint_is_usage() {
        let err = transport_error("connect", TransportError::InvalidEndpoint(String::new()));
        assert_eq!(err.code, USAGE);
    }
}
