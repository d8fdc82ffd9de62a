//! Board status codes.
//!
//! The board answers a status request with 6 bytes; byte 1 carries the code.

/// Ready for the next packet / last packet accepted.
pub const STATUS_OK: u8 = 206;
/// Still processing the last packet.
pub const STATUS_BUSY: u8 = 238;
/// Last packet rejected (checksum or semantic failure).
pub const STATUS_ERROR: u8 = 207;
/// Job finished, output buffer empty.
pub const STATUS_FINISH: u8 = 236;
/// Low power warning.
pub const STATUS_POWER: u8 = 239;
/// Board in a bad state.
pub const STATUS_BAD_STATE: u8 = 204;
/// No reply (USB failure).
pub const STATUS_NO_REPLY: u8 = 0;

/// Bit that stays set while the board still has queued work.
const BUSY_BIT: u8 = 0x02;

/// Classified status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    NoReply,
    Ok,
    Busy,
    Error,
    Finish,
    Power,
    BadState,
    Unknown(u8),
}

impl StatusCode {
    /// Classify a raw status byte.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            STATUS_NO_REPLY => StatusCode::NoReply,
            STATUS_OK => StatusCode::Ok,
            STATUS_BUSY => StatusCode::Busy,
            STATUS_ERROR => StatusCode::Error,
            STATUS_FINISH => StatusCode::Finish,
            STATUS_POWER => StatusCode::Power,
            STATUS_BAD_STATE => StatusCode::BadState,
            other => StatusCode::Unknown(other),
        }
    }

    /// Classify a full status vector. A short vector counts as no reply.
    pub fn from_vector(status: &[u8]) -> Self {
        status
            .get(1)
            .copied()
            .map_or(StatusCode::NoReply, Self::from_byte)
    }

    /// The raw status byte.
    pub fn byte(self) -> u8 {
        match self {
            StatusCode::NoReply => STATUS_NO_REPLY,
            StatusCode::Ok => STATUS_OK,
            StatusCode::Busy => STATUS_BUSY,
            StatusCode::Error => STATUS_ERROR,
            StatusCode::Finish => STATUS_FINISH,
            StatusCode::Power => STATUS_POWER,
            StatusCode::BadState => STATUS_BAD_STATE,
            StatusCode::Unknown(byte) => byte,
        }
    }

    /// True once the board reports an empty output buffer.
    pub fn is_finished(self) -> bool {
        let byte = self.byte();
        byte != STATUS_NO_REPLY && byte & BUSY_BIT == 0
    }

    /// Human-readable status name.
    pub fn name(self) -> &'static str {
        match self {
            StatusCode::NoReply => "NO_REPLY",
            StatusCode::Ok => "OK",
            StatusCode::Busy => "BUSY",
            StatusCode::Error => "ERROR",
            StatusCode::Finish => "FINISH",
            StatusCode::Power => "POWER",
            StatusCode::BadState => "BAD_STATE",
            StatusCode::Unknown(_) => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusCode::Unknown(byte) => write!(f, "UNKNOWN({byte})"),
            other => f.write_str(other.name()),
        }
    }
}
