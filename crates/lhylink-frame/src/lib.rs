//! Packet framing for Lihuiyu laser boards.
//!
//! The board accepts fixed-size records only:
//! - a leading `0x00`
//! - exactly 30 payload bytes, padded when the command line is shorter
//! - a one-byte CRC over the payload
//!
//! Command lines may end in in-band control bytes that change controller
//! behavior instead of reaching the board. [`next_packet`] strips them and
//! reports them alongside the padded payload.

pub mod codec;
pub mod control;
pub mod crc;
pub mod error;
pub mod status;

pub use codec::{
    decode_wire, encode_wire, next_packet, wire_frame, Immediate, Packet, PostSend, FILLER,
    HEADER, PAYLOAD_LEN, WIRE_LEN,
};
pub use control::{ControlToken, LINE_END};
pub use crc::crc8;
pub use error::{FrameError, Result};
pub use status::{
    StatusCode, STATUS_BAD_STATE, STATUS_BUSY, STATUS_ERROR, STATUS_FINISH, STATUS_NO_REPLY,
    STATUS_OK, STATUS_POWER,
};
