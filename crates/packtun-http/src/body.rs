use std::io::{self, ErrorKind, Read};

use packtun_frame::{Channel, FrameError, Packer, Received};
use tracing::{trace, warn};

use crate::error::NotBody;

#[derive(Debug)]
enum State {
    /// Between frames; the next read starts with a frame header.
    Awaiting,
    /// Inside a body data frame with `remaining` payload bytes left.
    InFrame { remaining: u64 },
    /// The body channel was closed cleanly.
    Eof,
    /// A terminal error; replayed on every later read.
    Failed { kind: ErrorKind, message: String },
}

/// Lazily reads a request or response body from body-channel frames.
///
/// Frames on other channels are drained and dropped, and the read that saw
/// them fails with [`ErrorKind::Interrupted`] wrapping [`NotBody`]. Readers
/// built on `std::io` (`read_to_end`, `io::copy`) retry on that kind, so the
/// discard is invisible to them. Any other failure is latched.
#[derive(Debug)]
pub struct BodyReader<R> {
    packer: Packer,
    channel: Channel,
    inner: R,
    state: State,
}

impl<R: Read> BodyReader<R> {
    pub fn new(packer: Packer, channel: Channel, inner: R) -> Self {
        Self {
            packer,
            channel,
            inner,
            state: State::Awaiting,
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// True once the body channel's close frame has been read.
    pub fn is_eof(&self) -> bool {
        matches!(self.state, State::Eof)
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn fail(&mut self, err: io::Error) -> io::Error {
        self.state = State::Failed {
            kind: err.kind(),
            message: err.to_string(),
        };
        err
    }

    /// Read frame headers until a body data frame with payload is current.
    ///
    /// Returns the frame's payload length, or `None` once the body has ended.
    fn advance(&mut self) -> io::Result<Option<u64>> {
        loop {
            let received = match self.packer.next(&mut self.inner) {
                Ok(received) => received,
                Err(err) => return Err(self.fail(err.into())),
            };

            match received {
                Received::Data { channel, len } if channel == self.channel => {
                    trace!(channel, len, "body frame");
                    if len > 0 {
                        self.state = State::InFrame { remaining: len };
                        return Ok(Some(len));
                    }
                }
                Received::Data { channel, len } => {
                    let drained = io::copy(&mut (&mut self.inner).take(len), &mut io::sink());
                    match drained {
                        Ok(drained) if drained == len => {}
                        Ok(drained) => {
                            let err = FrameError::Truncated {
                                expected: len,
                                got: drained,
                            };
                            return Err(self.fail(err.into()));
                        }
                        Err(err) => return Err(self.fail(err)),
                    }
                    warn!(channel, len, body_channel = self.channel, "discarded non-body frame");
                    return Err(io::Error::new(
                        ErrorKind::Interrupted,
                        NotBody { channel, len },
                    ));
                }
                Received::Eof { channel } if channel == self.channel => {
                    trace!(channel, "body closed");
                    self.state = State::Eof;
                    return Ok(None);
                }
                Received::Eof { channel } => {
                    warn!(channel, body_channel = self.channel, "discarded close on non-body channel");
                    return Err(io::Error::new(
                        ErrorKind::Interrupted,
                        NotBody { channel, len: 0 },
                    ));
                }
            }
        }
    }
}

impl<R: Read> Read for BodyReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let remaining = match self.state {
            State::Eof => return Ok(0),
            State::Failed { kind, ref message } => {
                return Err(io::Error::new(kind, message.clone()));
            }
            State::InFrame { remaining } => remaining,
            State::Awaiting => match self.advance()? {
                Some(remaining) => remaining,
                None => return Ok(0),
            },
        };

        let want = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let n = match self.inner.read(&mut buf[..want]) {
            Ok(0) => {
                let err = FrameError::Truncated {
                    expected: remaining,
                    got: 0,
                };
                return Err(self.fail(err.into()));
            }
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => return Err(err),
            Err(err) => return Err(self.fail(err)),
        };

        let left = remaining - n as u64;
        self.state = if left == 0 {
            State::Awaiting
        } else {
            State::InFrame { remaining: left }
        };
        Ok(n)
    }
}
