use std::io::{self, Write};

use http::{HeaderMap, Response, StatusCode};
use packtun_frame::Packer;
use tracing::debug;

use crate::config::TunnelChannels;
use crate::error::Result;
use crate::payload::ResponseHeaderSnapshot;

/// Destination for a response: mutable headers, a status line, then bytes.
///
/// Headers are collected until [`ResponseWriter::write_header`] is called,
/// explicitly or implicitly (status 200) by the first body write.
pub trait ResponseWriter: Write {
    fn headers_mut(&mut self) -> &mut HeaderMap;

    fn write_header(&mut self, status: StatusCode) -> io::Result<()>;
}

impl<T: ResponseWriter + ?Sized> ResponseWriter for &mut T {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        (**self).headers_mut()
    }

    fn write_header(&mut self, status: StatusCode) -> io::Result<()> {
        (**self).write_header(status)
    }
}

/// Serializes a handler's response onto the tunnel.
///
/// `write_header` sends one headers-channel frame; each `write` sends one
/// body-channel frame. Only the first `write_header` is sent; later calls are
/// ignored. End the response with [`TunnelResponseWriter::finish`] or
/// [`TunnelResponseWriter::fail`].
#[derive(Debug)]
pub struct TunnelResponseWriter<W> {
    packer: Packer,
    channels: TunnelChannels,
    inner: W,
    headers: HeaderMap,
    status: Option<StatusCode>,
}

impl<W: Write> TunnelResponseWriter<W> {
    pub fn new(packer: Packer, channels: TunnelChannels, inner: W) -> Self {
        Self {
            packer,
            channels,
            inner,
            headers: HeaderMap::new(),
            status: None,
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The status sent to the peer, if the header frame went out.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// End the response cleanly, sending a 200 header first if none was sent.
    pub fn finish(mut self) -> Result<W> {
        self.ensure_header()?;
        self.packer.send_close(self.channels.body, &mut self.inner, None)?;
        debug!(status = ?self.status, "response finished");
        Ok(self.inner)
    }

    /// End the response with an error the peer will see as its failure.
    pub fn fail(mut self, reason: &str) -> Result<W> {
        let reason = if reason.is_empty() {
            "response failed"
        } else {
            reason
        };
        self.packer
            .send_close(self.channels.body, &mut self.inner, Some(reason))?;
        debug!(reason, "response failed");
        Ok(self.inner)
    }

    fn send_header(&mut self, status: StatusCode) -> Result<()> {
        let snapshot = ResponseHeaderSnapshot {
            headers: self.headers.clone(),
            status: Some(status),
        };
        let payload = snapshot.encode()?;
        self.packer
            .send_bytes(self.channels.headers, &mut self.inner, &payload)?;
        self.status = Some(status);
        Ok(())
    }

    fn ensure_header(&mut self) -> Result<()> {
        if self.status.is_none() {
            self.send_header(StatusCode::OK)?;
        }
        Ok(())
    }
}

impl<W: Write> Write for TunnelResponseWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ensure_header()?;
        if buf.is_empty() {
            return Ok(0);
        }
        self.packer
            .send_bytes(self.channels.body, &mut self.inner, buf)
            .map_err(io::Error::from)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write> ResponseWriter for TunnelResponseWriter<W> {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_header(&mut self, status: StatusCode) -> io::Result<()> {
        if let Some(sent) = self.status {
            debug!(%sent, ignored = %status, "response header already sent");
            return Ok(());
        }
        self.send_header(status)?;
        Ok(())
    }
}

/// Collects a response in memory.
#[derive(Debug, Default)]
pub struct BufferedResponse {
    headers: HeaderMap,
    status: Option<StatusCode>,
    body: Vec<u8>,
}

impl BufferedResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// The recorded status; 200 once a body byte arrived without one.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_response(self) -> Response<Vec<u8>> {
        let mut response = Response::new(self.body);
        *response.status_mut() = self.status.unwrap_or(StatusCode::OK);
        *response.headers_mut() = self.headers;
        response
    }
}

impl Write for BufferedResponse {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.status.get_or_insert(StatusCode::OK);
        self.body.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ResponseWriter for BufferedResponse {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_header(&mut self, status: StatusCode) -> io::Result<()> {
        self.status.get_or_insert(status);
        Ok(())
    }
}
