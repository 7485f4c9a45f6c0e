use std::collections::HashMap;
use std::fmt;
use std::io::{Read, Write};

use tracing::{debug, warn};

use crate::channel::CommandChannel;
use crate::error::{CommandError, Result};
use crate::message::{Command, Response};

type Handler = Box<dyn Fn(&Command) -> std::result::Result<Response, String> + Send + Sync>;

/// Dispatches received commands to handlers by name.
///
/// A handler's `Err(message)` is sent to the caller as an error close.
#[derive(Default)]
pub struct Router {
    handlers: HashMap<String, Handler>,
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("Router").field("commands", &names).finish()
    }
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for commands named `name`.
    pub fn define<F>(&mut self, name: impl Into<String>, handler: F) -> Result<()>
    where
        F: Fn(&Command) -> std::result::Result<Response, String> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.handlers.contains_key(&name) {
            return Err(CommandError::DuplicateCommand(name));
        }
        self.handlers.insert(name, Box::new(handler));
        Ok(())
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Receive one command from `stream`, run its handler and answer.
    ///
    /// Returns the command once it has been answered successfully, so the
    /// caller can switch the stream to another protocol afterwards. Unknown
    /// commands and handler failures are answered with an error close and
    /// returned as errors.
    pub fn serve_one<S>(&self, channel: &CommandChannel, stream: &mut S) -> Result<Command>
    where
        S: Read + Write + ?Sized,
    {
        let command = channel.recv_command(stream)?;
        let Some(handler) = self.handlers.get(&command.name) else {
            warn!(command = %command.name, "unknown command");
            let err = CommandError::UnknownCommand(command.name);
            channel.send_error(stream, &err.to_string())?;
            return Err(err);
        };

        match handler(&command) {
            Ok(mut response) => {
                if response.name.is_empty() {
                    response.name.clone_from(&command.name);
                }
                channel.send_response(stream, &response)?;
                debug!(command = %command.name, "command answered");
                Ok(command)
            }
            Err(message) => {
                warn!(command = %command.name, error = %message, "command failed");
                channel.send_error(stream, &message)?;
                Err(CommandError::Handler {
                    name: command.name,
                    message,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    /// In-memory duplex: reads from `input`, writes to `output`.
    struct Duplex {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn duplex_with(command: &Command) -> Duplex {
        let mut input = Vec::new();
        CommandChannel::default()
            .send_command(&mut input, command)
            .unwrap();
        Duplex {
            input: Cursor::new(input),
            output: Vec::new(),
        }
    }

    fn router() -> Router {
        let mut router = Router::new();
        router
            .define("hi", |_| Ok(Response::default().with("message", "HI")))
            .unwrap();
        router
            .define("echo", |command| {
                let message = command
                    .get("message")
                    .and_then(|value| value.as_text())
                    .ok_or("missing message")?;
                Ok(Response::new("echo").with("message", message))
            })
            .unwrap();
        router
    }

    #[test]
    fn dispatches_by_name() {
        let channel = CommandChannel::default();
        let mut stream = duplex_with(&Command::new("echo").with("message", "ping"));

        let served = router().serve_one(&channel, &mut stream).unwrap();
        assert_eq!(served.name, "echo");

        let response = channel
            .recv_response(&mut Cursor::new(stream.output))
            .unwrap();
        assert_eq!(response.get_text("message"), Some("ping"));
    }

    #[test]
    fn response_name_defaults_to_command() {
        let channel = CommandChannel::default();
        let mut stream = duplex_with(&Command::new("hi"));
        router().serve_one(&channel, &mut stream).unwrap();

        let response = channel
            .recv_response(&mut Cursor::new(stream.output))
            .unwrap();
        assert_eq!(response.name, "hi");
    }

    #[test]
    fn unknown_command_is_answered_with_error() {
        let channel = CommandChannel::default();
        let mut stream = duplex_with(&Command::new("nope"));

        let err = router().serve_one(&channel, &mut stream).unwrap_err();
        assert!(matches!(err, CommandError::UnknownCommand(ref name) if name == "nope"));

        let remote = channel
            .recv_response(&mut Cursor::new(stream.output))
            .unwrap_err();
        assert_eq!(remote.to_string(), "unknown command `nope`");
    }

    #[test]
    fn handler_failure_is_answered_with_error() {
        let channel = CommandChannel::default();
        let mut stream = duplex_with(&Command::new("echo"));

        let err = router().serve_one(&channel, &mut stream).unwrap_err();
        assert!(matches!(err, CommandError::Handler { .. }));

        let remote = channel
            .recv_response(&mut Cursor::new(stream.output))
            .unwrap_err();
        assert!(remote.is_remote());
        assert_eq!(remote.to_string(), "missing message");
    }

    #[test]
    fn duplicate_definitions_are_rejected() {
        let mut router = router();
        let err = router.define("hi", |_| Ok(Response::default())).unwrap_err();
        assert!(matches!(err, CommandError::DuplicateCommand(_)));
        assert!(router.is_defined("echo"));
    }
}
