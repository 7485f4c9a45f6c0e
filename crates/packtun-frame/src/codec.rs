use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::channel::{Channel, Magic, Version};
use crate::error::{FrameError, Result};
use crate::packer::Packer;

/// Frame header: magic (2) + version (2) + type (1) + length (8) + channel (1).
pub const HEADER_SIZE: usize = 14;

pub(crate) const MAGIC_SIZE: usize = 2;

/// Header bytes following the magic.
pub(crate) const HEADER_TAIL_SIZE: usize = HEADER_SIZE - MAGIC_SIZE;

/// Default maximum payload size for whole-frame decoding: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// What a frame means for its channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Carries `length` payload bytes.
    Data = 0,
    /// Ends the channel; the payload is an optional error message.
    Close = 1,
}

impl FrameType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Data),
            1 => Some(Self::Close),
            _ => None,
        }
    }
}

/// Decoded header of one frame (magic and version already validated).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_type: FrameType,
    pub length: u64,
    pub channel: Channel,
}

/// Encode a frame header.
///
/// Wire format:
/// ```text
/// ┌───────────┬─────────────┬──────────┬──────────────┬───────────┬──────────────┐
/// │ Magic (2B)│ Version     │ Type     │ Length       │ Channel   │ Payload      │
/// │           │ (2B LE u16) │ (1B)     │ (8B LE i64)  │ (1B)      │ (Length B)   │
/// └───────────┴─────────────┴──────────┴──────────────┴───────────┴──────────────┘
/// ```
pub fn encode_header(
    magic: Magic,
    version: Version,
    header: FrameHeader,
    dst: &mut BytesMut,
) -> Result<()> {
    let length = i64::try_from(header.length).map_err(|_| FrameError::PayloadTooLarge {
        size: header.length,
        max: i64::MAX as u64,
    })?;
    dst.reserve(HEADER_SIZE);
    dst.put_slice(&magic);
    dst.put_u16_le(version);
    dst.put_u8(header.frame_type as u8);
    dst.put_i64_le(length);
    dst.put_u8(header.channel);
    Ok(())
}

pub(crate) fn check_magic(expected: Magic, got: &[u8]) -> Result<()> {
    if got[..MAGIC_SIZE] != expected {
        return Err(FrameError::InvalidMagic {
            expected,
            got: [got[0], got[1]],
        });
    }
    Ok(())
}

/// Decode the 12 header bytes that follow the magic.
pub(crate) fn decode_header_tail(expected_version: Version, mut src: &[u8]) -> Result<FrameHeader> {
    let version = src.get_u16_le();
    if version != expected_version {
        return Err(FrameError::VersionMismatch {
            expected: expected_version,
            got: version,
        });
    }

    let raw_type = src.get_u8();
    let length = src.get_i64_le();
    let channel = src.get_u8();

    let frame_type = FrameType::from_u8(raw_type).ok_or(FrameError::UnknownFrameType(raw_type))?;
    let length = u64::try_from(length).map_err(|_| FrameError::InvalidLength(length))?;

    Ok(FrameHeader {
        frame_type,
        length,
        channel,
    })
}

/// A complete frame held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub channel: Channel,
    pub frame_type: FrameType,
    pub payload: Bytes,
}

impl Frame {
    /// A data frame.
    pub fn data(channel: Channel, payload: impl Into<Bytes>) -> Self {
        Self {
            channel,
            frame_type: FrameType::Data,
            payload: payload.into(),
        }
    }

    /// A close frame; `None` (or an empty reason) is a clean end.
    pub fn close(channel: Channel, reason: Option<&str>) -> Self {
        let payload = reason
            .map(|reason| Bytes::copy_from_slice(reason.as_bytes()))
            .unwrap_or_default();
        Self {
            channel,
            frame_type: FrameType::Close,
            payload,
        }
    }

    /// True for a close frame with no error message.
    pub fn is_eof(&self) -> bool {
        self.frame_type == FrameType::Close && self.payload.is_empty()
    }

    /// The error message carried by a non-empty close frame.
    pub fn close_reason(&self) -> Option<String> {
        (self.frame_type == FrameType::Close && !self.payload.is_empty())
            .then(|| String::from_utf8_lossy(&self.payload).into_owned())
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode a whole frame for `packer`'s protocol variant.
pub fn encode_frame(packer: &Packer, frame: &Frame, dst: &mut BytesMut) -> Result<()> {
    let header = FrameHeader {
        frame_type: frame.frame_type,
        length: frame.payload.len() as u64,
        channel: frame.channel,
    };
    encode_header(packer.magic(), packer.version(), header, dst)?;
    dst.put_slice(&frame.payload);
    Ok(())
}

/// Decode a whole frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer. The magic is checked
/// as soon as two bytes are available.
pub fn decode_frame(packer: &Packer, src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    if src.len() < MAGIC_SIZE {
        return Ok(None);
    }
    check_magic(packer.magic(), &src[..MAGIC_SIZE])?;

    if src.len() < HEADER_SIZE {
        return Ok(None);
    }
    let header = decode_header_tail(packer.version(), &src[MAGIC_SIZE..HEADER_SIZE])?;

    if header.length > max_payload as u64 {
        return Err(FrameError::PayloadTooLarge {
            size: header.length,
            max: max_payload as u64,
        });
    }

    let total = HEADER_SIZE + header.length as usize;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(header.length as usize).freeze();

    Ok(Some(Frame {
        channel: header.channel,
        frame_type: header.frame_type,
        payload,
    }))
}

/// `tokio_util` codec producing whole [`Frame`]s.
///
/// Unlike the streaming [`Packer`] calls this buffers each payload, so it
/// enforces a maximum payload size.
#[cfg(feature = "async")]
#[derive(Debug, Clone)]
pub struct PackerCodec {
    packer: Packer,
    max_payload: usize,
}

#[cfg(feature = "async")]
impl PackerCodec {
    pub fn new(packer: Packer) -> Self {
        Self::with_max_payload(packer, DEFAULT_MAX_PAYLOAD)
    }

    pub fn with_max_payload(packer: Packer, max_payload: usize) -> Self {
        Self {
            packer,
            max_payload,
        }
    }

    pub fn packer(&self) -> &Packer {
        &self.packer
    }
}

#[cfg(feature = "async")]
impl tokio_util::codec::Decoder for PackerCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        decode_frame(&self.packer, src, self.max_payload)
    }
}

#[cfg(feature = "async")]
impl tokio_util::codec::Encoder<Frame> for PackerCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        if frame.payload.len() > self.max_payload {
            return Err(FrameError::PayloadTooLarge {
                size: frame.payload.len() as u64,
                max: self.max_payload as u64,
            });
        }
        encode_frame(&self.packer, &frame, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PACKER: Packer = Packer::new(*b"TS", 3);

    #[test]
    fn header_layout_is_little_endian() {
        let mut buf = BytesMut::new();
        let header = FrameHeader {
            frame_type: FrameType::Close,
            length: 0x0102,
            channel: 16,
        };
        encode_header(*b"TS", 0x0A0B, header, &mut buf).unwrap();

        assert_eq!(
            buf.as_ref(),
            &[b'T', b'S', 0x0B, 0x0A, 1, 0x02, 0x01, 0, 0, 0, 0, 0, 0, 16]
        );
    }

    #[test]
    fn encode_decode_frame() {
        let mut buf = BytesMut::new();
        encode_frame(&PACKER, &Frame::data(8, "hello"), &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + 5);

        let frame = decode_frame(&PACKER, &mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        assert_eq!(frame.channel, 8);
        assert_eq!(frame.frame_type, FrameType::Data);
        assert_eq!(frame.payload.as_ref(), b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_needs_full_header_and_payload() {
        let mut wire = BytesMut::new();
        encode_frame(&PACKER, &Frame::data(1, "abc"), &mut wire).unwrap();

        let mut partial = BytesMut::from(&wire[..HEADER_SIZE - 1]);
        assert!(decode_frame(&PACKER, &mut partial, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .is_none());

        let mut partial = BytesMut::from(&wire[..HEADER_SIZE + 1]);
        assert!(decode_frame(&PACKER, &mut partial, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .is_none());
    }

    #[test]
    fn decode_rejects_foreign_magic_early() {
        let mut buf = BytesMut::from(&b"XY"[..]);
        let err = decode_frame(&PACKER, &mut buf, DEFAULT_MAX_PAYLOAD).unwrap_err();
        assert!(matches!(
            err,
            FrameError::InvalidMagic { expected, got } if expected == *b"TS" && got == *b"XY"
        ));
    }

    #[test]
    fn decode_rejects_other_version() {
        let mut buf = BytesMut::new();
        encode_frame(&Packer::new(*b"TS", 4), &Frame::data(1, "x"), &mut buf).unwrap();
        let err = decode_frame(&PACKER, &mut buf, DEFAULT_MAX_PAYLOAD).unwrap_err();
        assert!(matches!(err, FrameError::VersionMismatch { expected: 3, got: 4 }));
    }

    #[test]
    fn decode_rejects_unknown_type_and_negative_length() {
        let mut buf = BytesMut::new();
        buf.put_slice(b"TS");
        buf.put_u16_le(3);
        buf.put_u8(7);
        buf.put_i64_le(0);
        buf.put_u8(1);
        let err = decode_frame(&PACKER, &mut buf, DEFAULT_MAX_PAYLOAD).unwrap_err();
        assert!(matches!(err, FrameError::UnknownFrameType(7)));

        let mut buf = BytesMut::new();
        buf.put_slice(b"TS");
        buf.put_u16_le(3);
        buf.put_u8(0);
        buf.put_i64_le(-5);
        buf.put_u8(1);
        let err = decode_frame(&PACKER, &mut buf, DEFAULT_MAX_PAYLOAD).unwrap_err();
        assert!(matches!(err, FrameError::InvalidLength(-5)));
    }

    #[test]
    fn decode_enforces_max_payload() {
        let mut buf = BytesMut::new();
        encode_frame(&PACKER, &Frame::data(1, vec![0u8; 64]), &mut buf).unwrap();
        let err = decode_frame(&PACKER, &mut buf, 16).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 64, max: 16 }));
    }

    #[test]
    fn close_frames_carry_optional_reason() {
        let clean = Frame::close(4, None);
        assert!(clean.is_eof());
        assert_eq!(clean.close_reason(), None);

        let failed = Frame::close(4, Some("disk full"));
        assert!(!failed.is_eof());
        assert_eq!(failed.close_reason().as_deref(), Some("disk full"));
        assert_eq!(failed.wire_size(), HEADER_SIZE + 9);

        assert_eq!(Frame::data(4, "x").close_reason(), None);
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn codec_roundtrip_over_duplex() {
        use futures_util::{SinkExt, StreamExt};
        use tokio_util::codec::{FramedRead, FramedWrite};

        let (client, server) = tokio::io::duplex(64);
        let mut sink = FramedWrite::new(client, PackerCodec::new(PACKER));
        let mut stream = FramedRead::new(server, PackerCodec::new(PACKER));

        let writer = tokio::spawn(async move {
            sink.send(Frame::data(16, vec![7u8; 200])).await.unwrap();
            sink.send(Frame::close(16, None)).await.unwrap();
        });

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.channel, 16);
        assert_eq!(first.payload.len(), 200);
        let second = stream.next().await.unwrap().unwrap();
        assert!(second.is_eof());

        writer.await.unwrap();
    }

    #[cfg(feature = "async")]
    #[test]
    fn codec_encoder_enforces_max_payload() {
        use tokio_util::codec::Encoder;

        let mut codec = PackerCodec::with_max_payload(PACKER, 4);
        let mut dst = BytesMut::new();
        let err = codec.encode(Frame::data(1, "too long"), &mut dst).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
        assert!(dst.is_empty());
    }
}
