use std::path::PathBuf;

/// Errors that can occur in board transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The device could not be opened at all.
    #[error("connection refused by {target}: {source}")]
    Refused {
        target: String,
        source: std::io::Error,
    },

    /// Failed to bind the board socket.
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to accept an incoming bridge connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on an open transport.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// An operation was attempted before `open()` succeeded.
    #[error("transport is not open")]
    NotOpen,

    /// The peer answered with something the link protocol does not allow.
    #[error("link protocol violation: {0}")]
    Protocol(String),
}

impl TransportError {
    /// True when the device could not be opened, as opposed to failing
    /// mid-operation on an already open transport.
    pub fn is_refusal(&self) -> bool {
        matches!(self, TransportError::Refused { .. })
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
