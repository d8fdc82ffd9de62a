//! Unix-socket link to an out-of-process board bridge.
//!
//! A bridge process owns the USB device and exposes it on a socket. Requests
//! are a single tag byte, optionally followed by a payload:
//!
//! ```text
//! 'W' len(u16 LE) bytes[len]   write a frame        (no reply)
//! 'S'                          read status vector   -> 6 bytes
//! 'V'                          read chip version    -> u32 LE
//! ```

use std::io::{ErrorKind, Read, Write};
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::{StatusBytes, Transport, STATUS_LEN};

/// Request tag: write a frame.
pub const REQUEST_WRITE: u8 = b'W';
/// Request tag: read the status vector.
pub const REQUEST_STATUS: u8 = b'S';
/// Request tag: read the chip version.
pub const REQUEST_VERSION: u8 = b'V';

/// Largest write payload the link accepts.
pub const MAX_WRITE_LEN: usize = 4096;

const WRITE_HEADER_SIZE: usize = 3;
const READ_CHUNK_SIZE: usize = 512;

/// A decoded link request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkRequest {
    Write(Bytes),
    Status,
    ChipVersion,
}

/// Encode a request into the link wire format.
pub fn encode_request(request: &LinkRequest, dst: &mut BytesMut) -> Result<()> {
    match request {
        LinkRequest::Write(data) => {
            if data.len() > MAX_WRITE_LEN {
                return Err(TransportError::Protocol(format!(
                    "write of {} bytes exceeds link maximum {MAX_WRITE_LEN}",
                    data.len()
                )));
            }
            dst.reserve(WRITE_HEADER_SIZE + data.len());
            dst.put_u8(REQUEST_WRITE);
            dst.put_u16_le(data.len() as u16);
            dst.put_slice(data);
        }
        LinkRequest::Status => dst.put_u8(REQUEST_STATUS),
        LinkRequest::ChipVersion => dst.put_u8(REQUEST_VERSION),
    }
    Ok(())
}

/// Decode one request from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't hold a complete request yet.
pub fn decode_request(src: &mut BytesMut) -> Result<Option<LinkRequest>> {
    let Some(&tag) = src.first() else {
        return Ok(None);
    };

    match tag {
        REQUEST_STATUS => {
            src.advance(1);
            Ok(Some(LinkRequest::Status))
        }
        REQUEST_VERSION => {
            src.advance(1);
            Ok(Some(LinkRequest::ChipVersion))
        }
        REQUEST_WRITE => {
            if src.len() < WRITE_HEADER_SIZE {
                return Ok(None);
            }
            let len = u16::from_le_bytes([src[1], src[2]]) as usize;
            if len > MAX_WRITE_LEN {
                return Err(TransportError::Protocol(format!(
                    "write of {len} bytes exceeds link maximum {MAX_WRITE_LEN}"
                )));
            }
            if src.len() < WRITE_HEADER_SIZE + len {
                return Ok(None);
            }
            src.advance(WRITE_HEADER_SIZE);
            Ok(Some(LinkRequest::Write(src.split_to(len).freeze())))
        }
        other => Err(TransportError::Protocol(format!(
            "unknown request tag {other:#04x}"
        ))),
    }
}

/// Client side of the link: a [`Transport`] backed by a bridge socket.
pub struct SocketTransport {
    path: PathBuf,
    stream: Option<UnixStream>,
    io_timeout: Option<Duration>,
    buf: BytesMut,
}

impl SocketTransport {
    /// Default read/write timeout on the bridge socket.
    pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(2);

    /// Create a closed transport for the socket at `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            stream: None,
            io_timeout: Some(Self::DEFAULT_IO_TIMEOUT),
            buf: BytesMut::with_capacity(64),
        }
    }

    /// Create a transport only if `path` currently names a socket.
    ///
    /// Used by transport selection to skip bridges that are not running.
    pub fn probe(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let metadata = std::fs::symlink_metadata(path).map_err(|e| TransportError::Refused {
            target: path.display().to_string(),
            source: e,
        })?;
        if !metadata.file_type().is_socket() {
            return Err(TransportError::Refused {
                target: path.display().to_string(),
                source: std::io::Error::new(ErrorKind::InvalidInput, "path is not a unix socket"),
            });
        }
        Ok(Self::new(path))
    }

    /// Override the socket read/write timeout.
    pub fn with_io_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// The bridge socket path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn stream(&mut self) -> Result<&mut UnixStream> {
        self.stream.as_mut().ok_or(TransportError::NotOpen)
    }

    fn request(&mut self, request: &LinkRequest) -> Result<()> {
        self.buf.clear();
        encode_request(request, &mut self.buf)?;
        let stream = self.stream.as_mut().ok_or(TransportError::NotOpen)?;
        stream.write_all(&self.buf)?;
        Ok(())
    }
}

impl Transport for SocketTransport {
    fn open(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = UnixStream::connect(&self.path).map_err(|e| TransportError::Refused {
            target: self.path.display().to_string(),
            source: e,
        })?;
        stream.set_read_timeout(self.io_timeout)?;
        stream.set_write_timeout(self.io_timeout)?;
        info!(path = ?self.path, "connected to board bridge");
        self.stream = Some(stream);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
            debug!(path = ?self.path, "closed board bridge connection");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.request(&LinkRequest::Write(Bytes::copy_from_slice(data)))
    }

    fn get_status(&mut self) -> Result<StatusBytes> {
        self.request(&LinkRequest::Status)?;
        let mut status = [0u8; STATUS_LEN];
        self.stream()?.read_exact(&mut status)?;
        Ok(status)
    }

    fn get_chip_version(&mut self) -> Result<u32> {
        self.request(&LinkRequest::ChipVersion)?;
        let mut version = [0u8; 4];
        self.stream()?.read_exact(&mut version)?;
        Ok(u32::from_le_bytes(version))
    }

    fn transport_name(&self) -> &'static str {
        "board-socket"
    }
}

/// Server side of the link: listens for bridge clients.
///
/// The socket file is created with restrictive permissions and removed on
/// drop, unless the path was replaced in the meantime.
pub struct BoardSocketListener {
    listener: UnixListener,
    path: PathBuf,
    created_inode: Option<(u64, u64)>,
}

impl BoardSocketListener {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// Maximum socket path length.
    /// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Bind and listen on a filesystem-path Unix domain socket.
    ///
    /// A stale socket at `path` is removed first; any other file is left
    /// alone and reported as a bind error.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let path_bytes = path.as_os_str().len();
        if path_bytes >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len: path_bytes,
                max: Self::MAX_PATH_LEN,
            });
        }

        let bind_err = |path: &Path, source: std::io::Error| TransportError::Bind {
            path: path.to_path_buf(),
            source,
        };

        if let Ok(metadata) = std::fs::symlink_metadata(&path) {
            if !metadata.file_type().is_socket() {
                return Err(bind_err(
                    &path,
                    std::io::Error::new(
                        ErrorKind::AlreadyExists,
                        "existing path is not a unix socket",
                    ),
                ));
            }
            debug!(?path, "removing stale board socket");
            std::fs::remove_file(&path).map_err(|e| bind_err(&path, e))?;
        }

        let listener = UnixListener::bind(&path).map_err(|e| bind_err(&path, e))?;
        std::fs::set_permissions(
            &path,
            std::fs::Permissions::from_mode(Self::DEFAULT_SOCKET_MODE),
        )
        .map_err(|e| bind_err(&path, e))?;
        let created = std::fs::symlink_metadata(&path).map_err(|e| bind_err(&path, e))?;

        info!(?path, "board socket listening");

        Ok(Self {
            listener,
            path,
            created_inode: Some((created.dev(), created.ino())),
        })
    }

    /// Accept the next bridge client (blocking).
    pub fn accept(&self) -> Result<BoardLink> {
        let (stream, _addr) = self.listener.accept().map_err(TransportError::Accept)?;
        // Accepted sockets inherit O_NONBLOCK from the listener on BSD-derived systems.
        stream
            .set_nonblocking(false)
            .map_err(TransportError::Accept)?;
        debug!("accepted board link client");
        Ok(BoardLink {
            stream,
            buf: BytesMut::with_capacity(READ_CHUNK_SIZE),
        })
    }

    /// Put the listener in non-blocking mode so `accept` returns `WouldBlock`.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.listener.set_nonblocking(nonblocking)?;
        Ok(())
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for BoardSocketListener {
    fn drop(&mut self) {
        let Some((expected_dev, expected_ino)) = self.created_inode else {
            return;
        };
        if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
            if metadata.file_type().is_socket()
                && metadata.dev() == expected_dev
                && metadata.ino() == expected_ino
            {
                debug!(path = ?self.path, "cleaning up board socket");
                let _ = std::fs::remove_file(&self.path);
            } else {
                debug!(path = ?self.path, "socket path identity changed; skipping cleanup");
            }
        }
    }
}

/// One accepted bridge client, read request by request.
pub struct BoardLink {
    stream: UnixStream,
    buf: BytesMut,
}

impl BoardLink {
    /// Read the next complete request (blocking).
    ///
    /// Returns `Ok(None)` when the client hung up between requests.
    pub fn next_request(&mut self) -> Result<Option<LinkRequest>> {
        loop {
            if let Some(request) = decode_request(&mut self.buf)? {
                return Ok(Some(request));
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.stream.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            };

            if read == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(TransportError::Protocol(
                    "client hung up mid-request".to_string(),
                ));
            }
            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Bound how long `next_request` blocks; expiry surfaces as an I/O error
    /// of kind `WouldBlock` or `TimedOut` and keeps any partial request.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.stream.set_read_timeout(timeout)?;
        Ok(())
    }

    /// Answer a status request.
    pub fn reply_status(&mut self, status: &StatusBytes) -> Result<()> {
        self.stream.write_all(status)?;
        Ok(())
    }

    /// Answer a chip version request.
    pub fn reply_chip_version(&mut self, version: u32) -> Result<()> {
        self.stream.write_all(&version.to_le_bytes())?;
        Ok(())
    }
}
