use std::io::{self, ErrorKind, Read, Write};

use bytes::BytesMut;
use tracing::{trace, warn};

use crate::channel::{Channel, Magic, Version};
use crate::codec::{
    check_magic, decode_header_tail, encode_header, FrameHeader, FrameType, HEADER_SIZE,
    HEADER_TAIL_SIZE, MAGIC_SIZE,
};
use crate::error::{FrameError, Result};

/// Chunk size used by callers of [`Packer::stream`] that have no better idea.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Outcome of reading one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// A data frame. For [`Packer::recv`], `len` bytes were copied out; for
    /// [`Packer::next`], `len` payload bytes are waiting on the reader.
    Data { channel: Channel, len: u64 },
    /// The channel was closed cleanly (close frame with empty payload).
    Eof { channel: Channel },
}

impl Received {
    pub fn channel(&self) -> Channel {
        match self {
            Self::Data { channel, .. } | Self::Eof { channel } => *channel,
        }
    }

    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Eof { .. })
    }
}

/// Stateless framing codec bound to one protocol variant.
///
/// Each call reads or writes exactly one frame (or, for [`Packer::stream`],
/// a run of frames ending with a close frame). After any error other than
/// [`FrameError::Remote`] the stream position is unknown: discard the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Packer {
    magic: Magic,
    version: Version,
}

impl Packer {
    pub const fn new(magic: Magic, version: Version) -> Self {
        Self { magic, version }
    }

    pub const fn magic(&self) -> Magic {
        self.magic
    }

    pub const fn version(&self) -> Version {
        self.version
    }

    /// Send one data frame, copying exactly `length` bytes from `r`.
    ///
    /// Fails with [`FrameError::ShortWrite`] if `r` runs dry first. The header
    /// is already on the wire by then; there is no rollback.
    pub fn send<W, R>(&self, channel: Channel, w: &mut W, r: &mut R, length: u64) -> Result<()>
    where
        W: Write + ?Sized,
        R: Read + ?Sized,
    {
        self.write_frame(FrameType::Data, channel, w, r, length)
    }

    /// Send one data frame holding `payload`.
    pub fn send_bytes<W>(&self, channel: Channel, w: &mut W, payload: &[u8]) -> Result<()>
    where
        W: Write + ?Sized,
    {
        let mut src = payload;
        self.send(channel, w, &mut src, payload.len() as u64)
    }

    /// Send a close frame. `None` or an empty reason is a clean end.
    pub fn send_close<W>(&self, channel: Channel, w: &mut W, reason: Option<&str>) -> Result<()>
    where
        W: Write + ?Sized,
    {
        let mut message = reason.unwrap_or_default().as_bytes();
        let length = message.len() as u64;
        self.write_frame(FrameType::Close, channel, w, &mut message, length)
    }

    /// Send everything `r` produces as data frames of at most `buf_size`
    /// bytes, then a close frame.
    ///
    /// The close frame is always attempted: empty when `r` reached
    /// end-of-file, carrying the error message otherwise. Returns the number
    /// of payload bytes sent when `r` ended cleanly.
    pub fn stream<W, R>(&self, channel: Channel, w: &mut W, r: &mut R, buf_size: usize) -> Result<u64>
    where
        W: Write + ?Sized,
        R: Read + ?Sized,
    {
        if buf_size == 0 {
            return Err(FrameError::InvalidChunkSize);
        }

        let mut buf = vec![0u8; buf_size];
        let mut sent = 0u64;
        let mut frames = 0u64;

        loop {
            let n = match r.read(&mut buf) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.close_after_failure(channel, w, &err.to_string());
                    return Err(FrameError::StreamRead { sent, source: err });
                }
            };

            if n == 0 {
                trace!(channel, frames, bytes = sent, "stream reached end of input");
                return match self.send_close(channel, w, None) {
                    Ok(()) => Ok(sent),
                    Err(err) => Err(FrameError::StreamSend {
                        sent,
                        source: Box::new(err),
                    }),
                };
            }

            if let Err(err) = self.send_bytes(channel, w, &buf[..n]) {
                self.close_after_failure(channel, w, &err.to_string());
                return Err(FrameError::StreamSend {
                    sent,
                    source: Box::new(err),
                });
            }
            sent += n as u64;
            frames += 1;
        }
    }

    /// Read one frame, copying a data payload into `w`.
    pub fn recv<R, W>(&self, r: &mut R, w: &mut W) -> Result<Received>
    where
        R: Read + ?Sized,
        W: Write + ?Sized,
    {
        match self.next(r)? {
            Received::Data { channel, len } => {
                let copied = io::copy(&mut r.take(len), w)?;
                if copied != len {
                    return Err(FrameError::Truncated {
                        expected: len,
                        got: copied,
                    });
                }
                Ok(Received::Data {
                    channel,
                    len: copied,
                })
            }
            eof => Ok(eof),
        }
    }

    /// Read one frame header, leaving a data payload on the reader.
    ///
    /// For [`Received::Data`] the caller must consume exactly `len` bytes from
    /// `r` before the next call. Close frames are consumed entirely.
    pub fn next<R>(&self, r: &mut R) -> Result<Received>
    where
        R: Read + ?Sized,
    {
        let header = self.read_header(r)?;
        match header.frame_type {
            FrameType::Data => Ok(Received::Data {
                channel: header.channel,
                len: header.length,
            }),
            FrameType::Close => read_close(r, header.channel, header.length),
        }
    }

    fn write_frame<W, R>(
        &self,
        frame_type: FrameType,
        channel: Channel,
        w: &mut W,
        r: &mut R,
        length: u64,
    ) -> Result<()>
    where
        W: Write + ?Sized,
        R: Read + ?Sized,
    {
        let mut header = BytesMut::with_capacity(HEADER_SIZE);
        encode_header(
            self.magic,
            self.version,
            FrameHeader {
                frame_type,
                length,
                channel,
            },
            &mut header,
        )?;
        w.write_all(&header)?;

        let written = io::copy(&mut r.take(length), w)?;
        if written != length {
            return Err(FrameError::ShortWrite {
                expected: length,
                written,
            });
        }

        w.flush()?;
        Ok(())
    }

    fn read_header<R>(&self, r: &mut R) -> Result<FrameHeader>
    where
        R: Read + ?Sized,
    {
        // The magic is validated before the rest of the header is consumed.
        let mut magic = [0u8; MAGIC_SIZE];
        match read_full(r, &mut magic)? {
            0 => return Err(FrameError::ConnectionClosed),
            MAGIC_SIZE => {}
            got => {
                return Err(FrameError::Truncated {
                    expected: HEADER_SIZE as u64,
                    got: got as u64,
                })
            }
        }
        check_magic(self.magic, &magic)?;

        let mut tail = [0u8; HEADER_TAIL_SIZE];
        let got = read_full(r, &mut tail)?;
        if got != HEADER_TAIL_SIZE {
            return Err(FrameError::Truncated {
                expected: HEADER_SIZE as u64,
                got: (MAGIC_SIZE + got) as u64,
            });
        }
        decode_header_tail(self.version, &tail)
    }

    fn close_after_failure<W>(&self, channel: Channel, w: &mut W, reason: &str)
    where
        W: Write + ?Sized,
    {
        if let Err(err) = self.send_close(channel, w, Some(reason)) {
            warn!(channel, error = %err, "failed to send close frame after stream failure");
        }
    }
}

fn read_close<R>(r: &mut R, channel: Channel, length: u64) -> Result<Received>
where
    R: Read + ?Sized,
{
    if length == 0 {
        return Ok(Received::Eof { channel });
    }

    let mut message = Vec::new();
    let got = r.take(length).read_to_end(&mut message)? as u64;
    if got != length {
        return Err(FrameError::Truncated {
            expected: length,
            got,
        });
    }

    Err(FrameError::Remote {
        channel,
        message: String::from_utf8_lossy(&message).into_owned(),
    })
}

/// Fill `buf` unless the reader hits end-of-file first; returns bytes read.
fn read_full<R>(r: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
    R: Read + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}
