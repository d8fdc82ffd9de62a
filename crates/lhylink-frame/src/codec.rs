use bytes::BufMut;
use tracing::trace;

use crate::control::{ControlToken, LINE_END};
use crate::crc::crc8;
use crate::error::{FrameError, Result};

/// Payload bytes per board record.
pub const PAYLOAD_LEN: usize = 30;

/// Bytes per wire frame: header + payload + checksum.
pub const WIRE_LEN: usize = PAYLOAD_LEN + 2;

/// Leading byte of every wire frame.
pub const HEADER: u8 = 0x00;

/// Default padding byte.
pub const FILLER: u8 = b'F';

/// Action run once the board confirmed the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostSend {
    /// Block until the board reports its buffer drained.
    WaitFinished,
    /// Abort the controller.
    Abort,
}

/// State change applied when the line is framed. Terminate waits until a
/// line with data has been confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Immediate {
    Pause,
    Resume,
    Terminate,
}

/// One packet extracted from the head of a command buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Bytes of the source buffer this packet accounts for.
    pub consumed: usize,
    /// Padded payload. `None` for a command-free packet that only carries
    /// control actions.
    pub payload: Option<[u8; PAYLOAD_LEN]>,
    /// Action to run after confirmation.
    pub post_send: Option<PostSend>,
    /// State changes in line order.
    pub immediate: Vec<Immediate>,
}

impl Packet {
    /// True when nothing has to be sent to the board.
    pub fn is_command_free(&self) -> bool {
        self.payload.is_none()
    }

    /// The 32-byte wire frame, if this packet carries a payload.
    pub fn wire(&self) -> Option<[u8; WIRE_LEN]> {
        self.payload.as_ref().map(wire_frame)
    }
}

/// Extract the next packet from the head of `buf`.
///
/// A packet ends at the first line end within 30 bytes, or after 30 bytes
/// when no line end is present. Returns `None` when `buf` holds neither, so
/// a partial frame is never produced.
pub fn next_packet(buf: &[u8]) -> Option<Packet> {
    let window = &buf[..buf.len().min(PAYLOAD_LEN)];
    let mut length = match window.iter().position(|&b| b == LINE_END) {
        Some(index) => index + 1,
        None if buf.len() >= PAYLOAD_LEN => PAYLOAD_LEN,
        None => {
            trace!(buffered = buf.len(), "deferring partial packet");
            return None;
        }
    };

    // A control byte in the last payload slot belongs to the line end that follows it.
    if length == PAYLOAD_LEN
        && buf[length - 1] != LINE_END
        && ControlToken::classify(buf[length - 1]).is_control()
    {
        match buf.get(length) {
            Some(&LINE_END) => length += 1,
            Some(_) => {}
            None => return None,
        }
    }

    let mut body = &buf[..length];
    let mut post_send = None;
    let mut immediate = Vec::new();
    let mut repeat_pad = false;

    if let Some(line) = body.strip_suffix(&[LINE_END]) {
        body = line;
        while let Some((&last, rest)) = body.split_last() {
            match ControlToken::classify(last) {
                ControlToken::Data => break,
                ControlToken::WaitFinished => {
                    post_send.get_or_insert(PostSend::WaitFinished);
                }
                ControlToken::Abort => {
                    post_send.get_or_insert(PostSend::Abort);
                }
                ControlToken::Pause => immediate.push(Immediate::Pause),
                ControlToken::Resume => immediate.push(Immediate::Resume),
                ControlToken::Terminate => immediate.push(Immediate::Terminate),
                ControlToken::RepeatPad => repeat_pad = true,
            }
            body = rest;
        }
        immediate.reverse();
    }

    let payload = body.last().map(|&last| {
        let pad = if repeat_pad { last } else { FILLER };
        let mut payload = [pad; PAYLOAD_LEN];
        payload[..body.len()].copy_from_slice(body);
        payload
    });

    trace!(
        consumed = length,
        command_free = payload.is_none(),
        ?post_send,
        "extracted packet"
    );

    Some(Packet {
        consumed: length,
        payload,
        post_send,
        immediate,
    })
}

/// Build the wire frame for a payload.
///
/// Wire format:
/// ```text
/// ┌────────┬──────────────────┬────────────┐
/// │ 0x00   │ Payload (30B)    │ CRC-8 (1B) │
/// └────────┴──────────────────┴────────────┘
/// ```
pub fn wire_frame(payload: &[u8; PAYLOAD_LEN]) -> [u8; WIRE_LEN] {
    let mut wire = [0u8; WIRE_LEN];
    wire[0] = HEADER;
    wire[1..=PAYLOAD_LEN].copy_from_slice(payload);
    wire[WIRE_LEN - 1] = crc8(payload);
    wire
}

/// Append the wire frame for a payload to `dst`.
pub fn encode_wire(payload: &[u8; PAYLOAD_LEN], dst: &mut impl BufMut) {
    dst.put_slice(&wire_frame(payload));
}

/// Validate a wire frame and return its payload.
pub fn decode_wire(wire: &[u8]) -> Result<[u8; PAYLOAD_LEN]> {
    if wire.len() != WIRE_LEN {
        return Err(FrameError::InvalidWireLength {
            len: wire.len(),
            expected: WIRE_LEN,
        });
    }
    if wire[0] != HEADER {
        return Err(FrameError::MissingHeader(wire[0]));
    }

    let mut payload = [0u8; PAYLOAD_LEN];
    payload.copy_from_slice(&wire[1..=PAYLOAD_LEN]);
    let expected = crc8(&payload);
    let actual = wire[WIRE_LEN - 1];
    if expected != actual {
        return Err(FrameError::ChecksumMismatch { expected, actual });
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;

    fn padded(prefix: &[u8], pad: u8) -> [u8; PAYLOAD_LEN] {
        let mut payload = [pad; PAYLOAD_LEN];
        payload[..prefix.len()].copy_from_slice(prefix);
        payload
    }

    #[test]
    fn short_line_padded_with_filler() {
        let packet = next_packet(b"G0X0Y0\n").unwrap();
        assert_eq!(packet.consumed, 7);
        assert_eq!(packet.payload, Some(padded(b"G0X0Y0", b'F')));
        assert!(packet.post_send.is_none());
        assert!(packet.immediate.is_empty());

        let wire = packet.wire().unwrap();
        assert_eq!(wire.len(), WIRE_LEN);
        assert_eq!(wire[0], 0x00);
        assert_eq!(&wire[1..7], b"G0X0Y0");
        assert_eq!(&wire[7..31], &[b'F'; 24][..]);
        assert_eq!(wire[31], 0xD6);
    }

    #[test]
    fn repeat_pad_uses_last_byte() {
        let packet = next_packet(b"IBzzz#\n").unwrap();
        assert_eq!(packet.payload, Some(padded(b"IBzzz", b'z')));
    }

    #[test]
    fn partial_line_is_deferred() {
        assert!(next_packet(b"").is_none());
        assert!(next_packet(b"IBzzzzzz").is_none());
        assert!(next_packet(&[b'a'; PAYLOAD_LEN - 1]).is_none());
    }

    #[test]
    fn full_window_without_line_end_is_sent_as_is() {
        let buf = [b'a'; 45];
        let packet = next_packet(&buf).unwrap();
        assert_eq!(packet.consumed, PAYLOAD_LEN);
        assert_eq!(packet.payload, Some([b'a'; PAYLOAD_LEN]));
    }

    #[test]
    fn only_first_line_is_taken() {
        let packet = next_packet(b"AB\nCD\n").unwrap();
        assert_eq!(packet.consumed, 3);
        assert_eq!(packet.payload, Some(padded(b"AB", b'F')));
    }

    #[test]
    fn wait_suffix_becomes_post_send() {
        let packet = next_packet(b"IBzzz-\n").unwrap();
        assert_eq!(packet.payload, Some(padded(b"IBzzz", b'F')));
        assert_eq!(packet.post_send, Some(PostSend::WaitFinished));
    }

    #[test]
    fn abort_suffix_becomes_post_send() {
        let packet = next_packet(b"@NSE*\n").unwrap();
        assert_eq!(packet.post_send, Some(PostSend::Abort));
        assert_eq!(packet.payload, Some(padded(b"@NSE", b'F')));
    }

    #[test]
    fn pause_resume_terminate_are_immediate() {
        assert_eq!(next_packet(b"PN!\n").unwrap().immediate, vec![Immediate::Pause]);
        assert_eq!(next_packet(b"PN&\n").unwrap().immediate, vec![Immediate::Resume]);
        assert_eq!(
            next_packet(b"\x18\n").unwrap().immediate,
            vec![Immediate::Terminate]
        );
    }

    #[test]
    fn stacked_suffixes_keep_line_order() {
        let packet = next_packet(b"AB!&-\n").unwrap();
        assert_eq!(packet.immediate, vec![Immediate::Pause, Immediate::Resume]);
        assert_eq!(packet.post_send, Some(PostSend::WaitFinished));
        assert_eq!(packet.payload, Some(padded(b"AB", b'F')));
    }

    #[test]
    fn only_one_post_send_survives() {
        let packet = next_packet(b"AB*-\n").unwrap();
        assert_eq!(packet.post_send, Some(PostSend::WaitFinished));
    }

    #[test]
    fn control_only_line_is_command_free() {
        let packet = next_packet(b"-\n").unwrap();
        assert!(packet.is_command_free());
        assert!(packet.wire().is_none());
        assert_eq!(packet.consumed, 2);
        assert_eq!(packet.post_send, Some(PostSend::WaitFinished));

        assert!(next_packet(b"\n").unwrap().is_command_free());
        assert!(next_packet(b"#\n").unwrap().is_command_free());
    }

    #[test]
    fn control_in_last_slot_pulls_line_end() {
        let mut buf = vec![b'a'; PAYLOAD_LEN - 1];
        buf.push(b'-');
        assert!(next_packet(&buf).is_none(), "line end not yet buffered");

        buf.push(LINE_END);
        let packet = next_packet(&buf).unwrap();
        assert_eq!(packet.consumed, PAYLOAD_LEN + 1);
        assert_eq!(packet.post_send, Some(PostSend::WaitFinished));
        assert_eq!(packet.payload, Some(padded(&[b'a'; PAYLOAD_LEN - 1], b'F')));
    }

    #[test]
    fn control_in_last_slot_followed_by_data_stays_payload() {
        let mut buf = vec![b'a'; PAYLOAD_LEN - 1];
        buf.extend_from_slice(b"-b");
        let packet = next_packet(&buf).unwrap();
        assert_eq!(packet.consumed, PAYLOAD_LEN);
        assert_eq!(packet.payload.unwrap()[PAYLOAD_LEN - 1], b'-');
        assert!(packet.post_send.is_none());
    }

    #[test]
    fn decode_accepts_encoded_frame() {
        let payload = padded(b"IPP", b'F');
        let mut dst = BytesMut::new();
        encode_wire(&payload, &mut dst);
        assert_eq!(decode_wire(&dst).unwrap(), payload);
    }

    #[test]
    fn decode_rejects_corruption() {
        let mut wire = wire_frame(&padded(b"IPP", b'F'));
        wire[5] ^= 0x01;
        assert!(matches!(
            decode_wire(&wire),
            Err(FrameError::ChecksumMismatch { .. })
        ));

        let mut wire = wire_frame(&padded(b"IPP", b'F'));
        wire[0] = 0xA0;
        assert_eq!(decode_wire(&wire), Err(FrameError::MissingHeader(0xA0)));

        assert!(matches!(
            decode_wire(&[0u8; 31]),
            Err(FrameError::InvalidWireLength { len: 31, .. })
        ));
    }
}
