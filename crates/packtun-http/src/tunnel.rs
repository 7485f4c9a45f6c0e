use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread;

use http::{HeaderName, Request};
use packtun_frame::{FrameError, Packer, Received};
use packtun_transport::DuplexStream;
use tracing::{debug, trace, warn};

use crate::body::BodyReader;
use crate::config::TunnelConfig;
use crate::error::{Result, TunnelError};
use crate::payload::{RequestSnapshot, ResponseHeaderSnapshot};
use crate::response::{ResponseWriter, TunnelResponseWriter};

const NO_FAILURE: u8 = 0;
const SENDER_FAILED: u8 = 1;
const RECEIVER_FAILED: u8 = 2;

/// Remember `side` unless the other side already failed.
fn record_failure(first: &AtomicU8, side: u8) {
    let _ = first.compare_exchange(NO_FAILURE, side, Ordering::SeqCst, Ordering::SeqCst);
}

/// A request reconstructed by the backend, with its body still on the wire.
pub type TunnelRequest<R> = Request<BodyReader<R>>;

/// HTTP exchange transcoder over one duplex stream.
///
/// The backend (server role) turns the stream into a request plus a response
/// writer; the frontend (client role) turns a request plus a response writer
/// into traffic on the stream.
#[derive(Debug, Clone)]
pub struct Tunnel {
    config: TunnelConfig,
    packer: Packer,
}

impl Default for Tunnel {
    fn default() -> Self {
        let config = TunnelConfig::default();
        Self {
            packer: config.packer(),
            config,
        }
    }
}

impl Tunnel {
    pub fn new(config: TunnelConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            packer: config.packer(),
            config,
        })
    }

    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    pub fn packer(&self) -> Packer {
        self.packer
    }

    /// Server role: read the request snapshot from `stream`.
    ///
    /// The returned request's body reads the body channel lazily from a
    /// clone of `stream`; the writer sends the response on another clone.
    /// A configured read timeout applies to those body reads, so it stays set
    /// on `stream` after this returns.
    pub fn backend<S: DuplexStream>(
        &self,
        stream: &S,
    ) -> Result<(TunnelResponseWriter<S>, TunnelRequest<S>)> {
        let reader = stream.try_clone()?;
        if let Some(timeout) = self.config.read_timeout() {
            reader.set_read_timeout(Some(timeout))?;
        }
        let writer = stream.try_clone()?;
        self.backend_parts(reader, writer)
    }

    /// Server role over an already split stream.
    pub fn backend_parts<R: Read, W: Write>(
        &self,
        mut reader: R,
        writer: W,
    ) -> Result<(TunnelResponseWriter<W>, TunnelRequest<R>)> {
        let snapshot = self.read_request(&mut reader)?;
        debug!(
            method = %snapshot.method,
            url = %snapshot.url,
            content_length = ?snapshot.info.content_length,
            "tunnel request received"
        );

        let body = BodyReader::new(self.packer, self.config.channels.body, reader);
        let request = snapshot.into_request(body)?;
        let response = TunnelResponseWriter::new(self.packer, self.config.channels, writer);
        Ok((response, request))
    }

    /// Client role: send `request` over `stream` while forwarding the
    /// response into `response`.
    ///
    /// Sending runs on the calling thread and receiving on a scoped thread,
    /// so a peer that answers before draining the request body cannot
    /// deadlock the stream. Whichever side fails first shuts the stream down
    /// so the other side unblocks, and its error is the one returned unless
    /// the peer reported an error of its own. On failure `response` may hold
    /// a partial reply. A configured read timeout is cleared from `stream`
    /// before returning.
    pub fn frontend<S, Rw, B>(&self, response: &mut Rw, request: Request<B>, stream: &S) -> Result<()>
    where
        S: DuplexStream,
        Rw: ResponseWriter + Send,
        B: Read,
    {
        let mut reader = stream.try_clone()?;
        let timeout = self.config.read_timeout();
        if let Some(timeout) = timeout {
            reader.set_read_timeout(Some(timeout))?;
        }
        let mut writer = stream.try_clone()?;
        let closer = stream.try_clone()?;

        let (parts, mut body) = request.into_parts();
        let snapshot = RequestSnapshot::from_parts(&parts);
        debug!(method = %snapshot.method, url = %snapshot.url, "tunnel request starting");

        let first_failure = AtomicU8::new(NO_FAILURE);
        let first_failure = &first_failure;

        let result = thread::scope(|scope| {
            let receiving = scope.spawn(move || {
                let received = self.forward_response(&mut reader, response);
                if let Err(err) = &received {
                    record_failure(first_failure, RECEIVER_FAILED);
                    debug!(error = %err, "forwarding response failed, closing stream");
                    if let Err(err) = closer.shutdown() {
                        debug!(error = %err, "stream shutdown after receive failure");
                    }
                }
                received
            });

            let sent = self.send_request(&mut writer, &snapshot, &mut body);
            drop(body);
            if let Err(err) = &sent {
                record_failure(first_failure, SENDER_FAILED);
                warn!(error = %err, "sending tunnel request failed");
                if let Err(err) = stream.shutdown() {
                    debug!(error = %err, "stream shutdown after send failure");
                }
            }

            let received = receiving
                .join()
                .map_err(|_| TunnelError::ReaderPanicked)
                .and_then(|result| result);

            match (sent, received) {
                (Ok(bytes), received) => {
                    trace!(bytes, "request body sent");
                    received
                }
                (Err(send), Ok(())) => {
                    warn!(error = %send, "response completed although the request was not fully sent");
                    Ok(())
                }
                (Err(send), Err(recv))
                    if recv.is_remote()
                        || first_failure.load(Ordering::SeqCst) == RECEIVER_FAILED =>
                {
                    debug!(error = %send, "request send failed after the response failed");
                    Err(recv)
                }
                (Err(send), Err(recv)) => {
                    debug!(error = %recv, "response read failed after send failure");
                    Err(send)
                }
            }
        });

        if timeout.is_some() {
            if let Err(err) = stream.set_read_timeout(None) {
                debug!(error = %err, "clearing read timeout failed");
            }
        }
        result
    }

    /// Send the request snapshot and stream `body` on the body channel.
    ///
    /// Returns the number of body bytes sent.
    pub fn send_request<W, B>(&self, w: &mut W, snapshot: &RequestSnapshot, body: &mut B) -> Result<u64>
    where
        W: Write + ?Sized,
        B: Read + ?Sized,
    {
        let channels = self.config.channels;
        let payload = snapshot.encode()?;
        self.packer.send_bytes(channels.request, w, &payload)?;
        let sent = self
            .packer
            .stream(channels.body, w, body, self.config.chunk_size)?;
        Ok(sent)
    }

    /// Replay header and body frames from `r` onto `response` until a clean
    /// close arrives, normally on the body channel.
    ///
    /// A stream that ends on a frame boundary after the response started also
    /// counts as a complete response.
    pub fn forward_response<R, Rw>(&self, r: &mut R, response: &mut Rw) -> Result<()>
    where
        R: Read + ?Sized,
        Rw: ResponseWriter + ?Sized,
    {
        let channels = self.config.channels;
        let mut frames = 0u64;

        loop {
            let received = match self.packer.next(r) {
                Ok(received) => received,
                Err(FrameError::ConnectionClosed) if frames > 0 => {
                    debug!(frames, "peer closed the stream after the response");
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            };

            match received {
                Received::Eof { channel } if channel == channels.body => {
                    trace!(frames, "response body closed");
                    return Ok(());
                }
                Received::Eof { channel } => {
                    debug!(channel, frames, "response ended by close on another channel");
                    return Ok(());
                }
                Received::Data { channel, len } if channel == channels.headers => {
                    let payload = self.read_snapshot(r, len)?;
                    let snapshot = ResponseHeaderSnapshot::decode(&payload)?;
                    apply_headers(response, snapshot)?;
                }
                Received::Data { channel, len } if channel == channels.body => {
                    let copied = io::copy(&mut (&mut *r).take(len), response)?;
                    if copied != len {
                        return Err(TunnelError::BodyForward {
                            expected: len,
                            copied,
                        });
                    }
                }
                Received::Data { channel, .. } => {
                    return Err(TunnelError::UnexpectedChannel {
                        expected: channels.body,
                        got: channel,
                    });
                }
            }
            frames += 1;
        }
    }

    fn read_request<R: Read + ?Sized>(&self, reader: &mut R) -> Result<RequestSnapshot> {
        let expected = self.config.channels.request;
        match self.packer.next(reader)? {
            Received::Data { channel, len } if channel == expected => {
                let payload = self.read_snapshot(reader, len)?;
                RequestSnapshot::decode(&payload)
            }
            Received::Data { channel, .. } => Err(TunnelError::UnexpectedChannel {
                expected,
                got: channel,
            }),
            Received::Eof { channel } => Err(TunnelError::UnexpectedEof { channel }),
        }
    }

    fn read_snapshot<R: Read + ?Sized>(&self, r: &mut R, len: u64) -> Result<Vec<u8>> {
        let max = self.config.max_snapshot_size;
        if len > max {
            return Err(FrameError::PayloadTooLarge { size: len, max }.into());
        }

        let mut payload = Vec::with_capacity(usize::try_from(len).unwrap_or_default());
        let got = (&mut *r).take(len).read_to_end(&mut payload)? as u64;
        if got != len {
            return Err(FrameError::Truncated { expected: len, got }.into());
        }
        Ok(payload)
    }
}

/// Make `response`'s headers equal the snapshot's, then send its status.
fn apply_headers<Rw>(response: &mut Rw, snapshot: ResponseHeaderSnapshot) -> Result<()>
where
    Rw: ResponseWriter + ?Sized,
{
    let headers = response.headers_mut();
    let stale: Vec<HeaderName> = headers
        .keys()
        .filter(|name| !snapshot.headers.contains_key(*name))
        .cloned()
        .collect();
    for name in stale {
        headers.remove(name);
    }
    for name in snapshot.headers.keys() {
        headers.remove(name);
        for value in snapshot.headers.get_all(name) {
            headers.append(name.clone(), value.clone());
        }
    }

    if let Some(status) = snapshot.status {
        response.write_header(status)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use http::StatusCode;

    use super::*;
    use crate::config::TunnelChannels;
    use crate::response::BufferedResponse;

    fn wire_for(request: Request<&[u8]>) -> Vec<u8> {
        let tunnel = Tunnel::default();
        let (parts, mut body) = request.into_parts();
        let mut wire = Vec::new();
        tunnel
            .send_request(&mut wire, &RequestSnapshot::from_parts(&parts), &mut body)
            .unwrap();
        wire
    }

    #[test]
    fn new_rejects_invalid_config() {
        let config = TunnelConfig {
            chunk_size: 0,
            ..TunnelConfig::default()
        };
        assert!(matches!(Tunnel::new(config), Err(TunnelError::Config(_))));
    }

    #[test]
    fn backend_parts_rebuilds_request() {
        let wire = wire_for(
            Request::put("/things/7")
                .header("x-test", "1")
                .body(b"payload".as_slice())
                .unwrap(),
        );

        let (_response, request) = Tunnel::default()
            .backend_parts(Cursor::new(wire), Vec::new())
            .unwrap();
        assert_eq!(request.method(), http::Method::PUT);
        assert_eq!(request.uri().path(), "/things/7");
        assert_eq!(request.headers()["x-test"], "1");

        let mut body = Vec::new();
        request.into_body().read_to_end(&mut body).unwrap();
        assert_eq!(body, b"payload");
    }

    #[test]
    fn backend_rejects_wrong_channel() {
        let tunnel = Tunnel::default();
        let mut wire = Vec::new();
        tunnel.packer().send_bytes(16, &mut wire, b"body first").unwrap();

        let err = tunnel
            .backend_parts(Cursor::new(wire), Vec::new())
            .unwrap_err();
        assert!(matches!(
            err,
            TunnelError::UnexpectedChannel {
                expected: 8,
                got: 16
            }
        ));
    }

    #[test]
    fn backend_rejects_close_and_oversized_snapshot() {
        let tunnel = Tunnel::default();
        let mut wire = Vec::new();
        tunnel.packer().send_close(8, &mut wire, None).unwrap();
        let err = tunnel.backend_parts(Cursor::new(wire), Vec::new()).unwrap_err();
        assert!(matches!(err, TunnelError::UnexpectedEof { channel: 8 }));

        let small = Tunnel::new(TunnelConfig {
            max_snapshot_size: 8,
            ..TunnelConfig::default()
        })
        .unwrap();
        let wire = wire_for(Request::get("/").body(b"".as_slice()).unwrap());
        let err = small.backend_parts(Cursor::new(wire), Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            TunnelError::Frame(FrameError::PayloadTooLarge { max: 8, .. })
        ));
    }

    #[test]
    fn forward_response_replays_headers_and_body() {
        let tunnel = Tunnel::default();
        let mut writer = TunnelResponseWriter::new(tunnel.packer(), tunnel.config().channels, Vec::new());
        writer
            .headers_mut()
            .insert("x-reply", http::HeaderValue::from_static("ok"));
        writer.write_header(StatusCode::CREATED).unwrap();
        writer.write_all(b"done").unwrap();
        let wire = writer.finish().unwrap();

        let mut response = BufferedResponse::new();
        response
            .headers_mut()
            .insert("x-stale", http::HeaderValue::from_static("gone"));
        tunnel
            .forward_response(&mut Cursor::new(wire), &mut response)
            .unwrap();

        assert_eq!(response.status(), Some(StatusCode::CREATED));
        assert_eq!(response.headers()["x-reply"], "ok");
        assert!(!response.headers().contains_key("x-stale"));
        assert_eq!(response.body(), b"done");
    }

    #[test]
    fn forward_response_rejects_unknown_channel() {
        let tunnel = Tunnel::default();
        let mut wire = Vec::new();
        tunnel.packer().send_bytes(8, &mut wire, b"?").unwrap();

        let err = tunnel
            .forward_response(&mut Cursor::new(wire), &mut BufferedResponse::new())
            .unwrap_err();
        assert!(matches!(err, TunnelError::UnexpectedChannel { got: 8, .. }));
    }

    #[test]
    fn forward_response_reports_short_body() {
        let tunnel = Tunnel::default();
        let mut wire = Vec::new();
        tunnel.packer().send_bytes(16, &mut wire, b"0123456789").unwrap();
        wire.truncate(wire.len() - 3);

        let err = tunnel
            .forward_response(&mut Cursor::new(wire), &mut BufferedResponse::new())
            .unwrap_err();
        assert!(matches!(
            err,
            TunnelError::BodyForward {
                expected: 10,
                copied: 7
            }
        ));
        assert_eq!(err.to_string(), "failed to forward body (7 of 10 bytes)");
    }

    #[test]
    fn forward_response_end_of_stream_rules() {
        let tunnel = Tunnel::default();

        let err = tunnel
            .forward_response(&mut Cursor::new(Vec::new()), &mut BufferedResponse::new())
            .unwrap_err();
        assert!(matches!(err, TunnelError::Frame(FrameError::ConnectionClosed)));

        let mut wire = Vec::new();
        tunnel.packer().send_bytes(16, &mut wire, b"tail").unwrap();
        let mut response = BufferedResponse::new();
        tunnel
            .forward_response(&mut Cursor::new(wire), &mut response)
            .unwrap();
        assert_eq!(response.body(), b"tail");
    }

    #[test]
    fn clean_close_on_headers_channel_ends_response() {
        let tunnel = Tunnel::default();
        let snapshot = ResponseHeaderSnapshot {
            headers: http::HeaderMap::new(),
            status: Some(StatusCode::NO_CONTENT),
        };
        let mut wire = Vec::new();
        tunnel
            .packer()
            .send_bytes(1, &mut wire, &snapshot.encode().unwrap())
            .unwrap();
        tunnel.packer().send_close(1, &mut wire, None).unwrap();
        tunnel.packer().send_bytes(16, &mut wire, b"never read").unwrap();

        let mut response = BufferedResponse::new();
        tunnel
            .forward_response(&mut Cursor::new(wire), &mut response)
            .unwrap();
        assert_eq!(response.status(), Some(StatusCode::NO_CONTENT));
        assert!(response.body().is_empty());
    }

    #[test]
    fn custom_channels_are_honoured() {
        let config = TunnelConfig {
            channels: TunnelChannels {
                headers: 2,
                request: 3,
                body: 4,
            },
            ..TunnelConfig::default()
        };
        let tunnel = Tunnel::new(config).unwrap();
        let (parts, mut body) = Request::post("/x").body(b"abc".as_slice()).unwrap().into_parts();
        let mut wire = Vec::new();
        tunnel
            .send_request(&mut wire, &RequestSnapshot::from_parts(&parts), &mut body)
            .unwrap();

        let (_, request) = tunnel.backend_parts(Cursor::new(wire), Vec::new()).unwrap();
        assert_eq!(request.body().channel(), 4);
        let mut body = String::new();
        request.into_body().read_to_string(&mut body).unwrap();
        assert_eq!(body, "abc");
    }
}
