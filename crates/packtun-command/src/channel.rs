use std::io::{Read, Write};

use packtun_frame::{Channel, FrameError, Magic, Packer, Received, Version};
use tracing::debug;

use crate::error::{CommandError, Result};
use crate::message::{Command, Response};

/// Magic of the command protocol variant ("CM").
pub const COMMAND_MAGIC: Magic = *b"CM";

/// Command protocol version.
pub const COMMAND_VERSION: Version = 1;

/// Channel carrying commands and responses.
pub const COMMAND_CHANNEL: Channel = 1;

/// Upper bound on one encoded command or response: 1 MiB.
pub const MAX_MESSAGE_SIZE: u64 = 1024 * 1024;

/// One CBOR message per data frame on a single channel.
///
/// A failed command is answered with a close frame carrying the error
/// message, which [`CommandChannel::recv_response`] surfaces as
/// [`FrameError::Remote`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandChannel {
    packer: Packer,
    channel: Channel,
    max_message_size: u64,
}

impl Default for CommandChannel {
    fn default() -> Self {
        Self::new(Packer::new(COMMAND_MAGIC, COMMAND_VERSION), COMMAND_CHANNEL)
    }
}

impl CommandChannel {
    pub const fn new(packer: Packer, channel: Channel) -> Self {
        Self {
            packer,
            channel,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }

    pub const fn with_max_message_size(mut self, max: u64) -> Self {
        self.max_message_size = max;
        self
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn send_command<W: Write + ?Sized>(&self, w: &mut W, command: &Command) -> Result<()> {
        let payload = command.encode()?;
        self.packer.send_bytes(self.channel, w, &payload)?;
        debug!(command = %command.name, bytes = payload.len(), "command sent");
        Ok(())
    }

    pub fn recv_command<R: Read + ?Sized>(&self, r: &mut R) -> Result<Command> {
        let payload = self.recv_message(r)?;
        Command::decode(&payload)
    }

    pub fn send_response<W: Write + ?Sized>(&self, w: &mut W, response: &Response) -> Result<()> {
        let payload = response.encode()?;
        self.packer.send_bytes(self.channel, w, &payload)?;
        Ok(())
    }

    /// Answer with an error instead of a response.
    pub fn send_error<W: Write + ?Sized>(&self, w: &mut W, message: &str) -> Result<()> {
        let message = if message.is_empty() {
            "command failed"
        } else {
            message
        };
        self.packer.send_close(self.channel, w, Some(message))?;
        Ok(())
    }

    pub fn recv_response<R: Read + ?Sized>(&self, r: &mut R) -> Result<Response> {
        let payload = self.recv_message(r)?;
        Response::decode(&payload)
    }

    /// Send `command` and wait for its response on the same stream.
    pub fn call<S: Read + Write + ?Sized>(&self, stream: &mut S, command: &Command) -> Result<Response> {
        self.send_command(stream, command)?;
        self.recv_response(stream)
    }

    fn recv_message<R: Read + ?Sized>(&self, r: &mut R) -> Result<Vec<u8>> {
        match self.packer.next(r)? {
            Received::Data { channel, len } if channel == self.channel => {
                if len > self.max_message_size {
                    return Err(FrameError::PayloadTooLarge {
                        size: len,
                        max: self.max_message_size,
                    }
                    .into());
                }
                let mut payload = Vec::with_capacity(usize::try_from(len).unwrap_or_default());
                let got = (&mut *r)
                    .take(len)
                    .read_to_end(&mut payload)
                    .map_err(FrameError::from)? as u64;
                if got != len {
                    return Err(FrameError::Truncated { expected: len, got }.into());
                }
                Ok(payload)
            }
            Received::Data { channel, .. } => Err(CommandError::UnexpectedChannel {
                expected: self.channel,
                got: channel,
            }),
            Received::Eof { channel } => Err(CommandError::Closed { channel }),
        }
    }
}
