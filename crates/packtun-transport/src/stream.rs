use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

/// A bidirectional byte stream that can be split by direction.
///
/// The tunnel needs one actor reading while another writes. Splitting is done
/// by cloning the handle: both clones refer to the same connection, and each
/// side only ever uses one direction.
pub trait DuplexStream: Read + Write + Send + Sized {
    /// Create a second handle to the same connection.
    fn try_clone(&self) -> io::Result<Self>;

    /// Set (or clear) the read deadline for blocking reads.
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    /// Shut down both directions, unblocking any reader on another handle.
    fn shutdown(&self) -> io::Result<()>;
}

#[cfg(unix)]
impl DuplexStream for std::os::unix::net::UnixStream {
    fn try_clone(&self) -> io::Result<Self> {
        std::os::unix::net::UnixStream::try_clone(self)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        std::os::unix::net::UnixStream::set_read_timeout(self, timeout)
    }

    fn shutdown(&self) -> io::Result<()> {
        std::os::unix::net::UnixStream::shutdown(self, Shutdown::Both)
    }
}

impl DuplexStream for TcpStream {
    fn try_clone(&self) -> io::Result<Self> {
        TcpStream::try_clone(self)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn shutdown(&self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

/// A connected transport stream, whichever endpoint kind produced it.
pub struct TunnelStream {
    inner: TunnelStreamInner,
}

enum TunnelStreamInner {
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
    Tcp(TcpStream),
}

impl TunnelStream {
    #[cfg(unix)]
    pub(crate) fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: TunnelStreamInner::Unix(stream),
        }
    }

    pub(crate) fn from_tcp(stream: TcpStream) -> Self {
        Self {
            inner: TunnelStreamInner::Tcp(stream),
        }
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            #[cfg(unix)]
            TunnelStreamInner::Unix(_) => "unix-domain-socket",
            TunnelStreamInner::Tcp(_) => "tcp",
        }
    }

    /// Get the credentials of the connected peer (Linux UDS only).
    ///
    /// Returns `(uid, gid, pid)` via `SO_PEERCRED`, or `None` if unavailable.
    #[cfg(target_os = "linux")]
    pub fn peer_credentials(&self) -> Option<(u32, u32, u32)> {
        use std::os::fd::AsRawFd;

        let fd = match &self.inner {
            TunnelStreamInner::Unix(stream) => stream.as_raw_fd(),
            TunnelStreamInner::Tcp(_) => return None,
        };

        let mut cred = libc::ucred {
            pid: 0,
            uid: 0,
            gid: 0,
        };
        let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

        // SAFETY: `cred` and `len` are valid writable pointers for the provided sizes,
        // and `fd` is an open Unix socket descriptor owned by this process.
        let rc = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                (&mut cred as *mut libc::ucred).cast::<libc::c_void>(),
                &mut len,
            )
        };

        if rc == 0 && len as usize == std::mem::size_of::<libc::ucred>() {
            Some((cred.uid, cred.gid, cred.pid as u32))
        } else {
            None
        }
    }

    /// Get the credentials of the connected peer.
    #[cfg(not(target_os = "linux"))]
    pub fn peer_credentials(&self) -> Option<(u32, u32, u32)> {
        None
    }
}

impl Read for TunnelStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            TunnelStreamInner::Unix(stream) => stream.read(buf),
            TunnelStreamInner::Tcp(stream) => stream.read(buf),
        }
    }
}

impl Write for TunnelStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            TunnelStreamInner::Unix(stream) => stream.write(buf),
            TunnelStreamInner::Tcp(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            TunnelStreamInner::Unix(stream) => stream.flush(),
            TunnelStreamInner::Tcp(stream) => stream.flush(),
        }
    }
}

impl DuplexStream for TunnelStream {
    fn try_clone(&self) -> io::Result<Self> {
        let inner = match &self.inner {
            #[cfg(unix)]
            TunnelStreamInner::Unix(stream) => TunnelStreamInner::Unix(stream.try_clone()?),
            TunnelStreamInner::Tcp(stream) => TunnelStreamInner::Tcp(stream.try_clone()?),
        };
        Ok(Self { inner })
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match &self.inner {
            #[cfg(unix)]
            TunnelStreamInner::Unix(stream) => stream.set_read_timeout(timeout),
            TunnelStreamInner::Tcp(stream) => stream.set_read_timeout(timeout),
        }
    }

    fn shutdown(&self) -> io::Result<()> {
        match &self.inner {
            #[cfg(unix)]
            TunnelStreamInner::Unix(stream) => stream.shutdown(Shutdown::Both),
            TunnelStreamInner::Tcp(stream) => stream.shutdown(Shutdown::Both),
        }
    }
}

impl std::fmt::Debug for TunnelStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelStream")
            .field("type", &self.transport_name())
            .finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::net::UnixStream;

    use super::*;

    #[test]
    fn clones_share_one_connection() {
        let (left, right) = UnixStream::pair().unwrap();
        let mut writer = TunnelStream::from_unix(left);
        let mut reader = TunnelStream::from_unix(right);
        let mut reader_clone = DuplexStream::try_clone(&reader).unwrap();

        writer.write_all(b"ab").unwrap();
        let mut one = [0u8; 1];
        reader.read_exact(&mut one).unwrap();
        assert_eq!(&one, b"a");
        reader_clone.read_exact(&mut one).unwrap();
        assert_eq!(&one, b"b");
    }

    #[test]
    fn shutdown_unblocks_reader_on_other_handle() {
        let (left, _right) = UnixStream::pair().unwrap();
        let stream = TunnelStream::from_unix(left);
        let mut reader = DuplexStream::try_clone(&stream).unwrap();

        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 8];
            reader.read(&mut buf)
        });

        std::thread::sleep(Duration::from_millis(20));
        DuplexStream::shutdown(&stream).unwrap();
        let read = handle.join().unwrap().unwrap();
        assert_eq!(read, 0);
    }

    #[test]
    fn read_timeout_surfaces_as_io_error() {
        let (left, _right) = UnixStream::pair().unwrap();
        let mut stream = TunnelStream::from_unix(left);
        DuplexStream::set_read_timeout(&stream, Some(Duration::from_millis(10))).unwrap();

        let mut buf = [0u8; 1];
        let err = stream.read(&mut buf).unwrap_err();
        assert!(matches!(
            err.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn unix_peer_credentials_name_this_process() {
        let (left, _right) = UnixStream::pair().unwrap();
        let stream = TunnelStream::from_unix(left);
        let (_, _, pid) = stream.peer_credentials().expect("credentials");
        assert_eq!(pid, std::process::id());
    }

    #[test]
    fn debug_names_transport() {
        let (left, _right) = UnixStream::pair().unwrap();
        let stream = TunnelStream::from_unix(left);
        assert_eq!(format!("{stream:?}"), "TunnelStream { type: \"unix-domain-socket\" }");
    }
}
