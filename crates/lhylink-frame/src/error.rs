/// Errors that can occur while decoding a wire frame.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    /// The frame is not exactly 32 bytes long.
    #[error("invalid wire frame length {len} (expected {expected})")]
    InvalidWireLength { len: usize, expected: usize },

    /// The frame does not start with the `0x00` header byte.
    #[error("wire frame header is {0:#04x}, expected 0x00")]
    MissingHeader(u8),

    /// The trailing checksum does not match the payload.
    #[error("checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch { expected: u8, actual: u8 },
}

pub type Result<T> = std::result::Result<T, FrameError>;
