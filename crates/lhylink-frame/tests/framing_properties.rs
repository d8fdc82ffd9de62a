use lhylink_frame::{crc8, next_packet, FILLER, PAYLOAD_LEN, WIRE_LEN};
use proptest::prelude::*;

fn data_byte() -> impl Strategy<Value = u8> {
    // Printable command bytes, never a line end or control byte.
    prop::sample::select(b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789@".to_vec())
}

proptest! {
    #[test]
    fn short_lines_are_padded_with_filler(payload in prop::collection::vec(data_byte(), 1..PAYLOAD_LEN)) {
        let mut line = payload.clone();
        line.push(b'\n');

        let packet = next_packet(&line).expect("terminated line should frame");
        let wire = packet.wire().expect("line has payload");

        let mut expected = [FILLER; PAYLOAD_LEN];
        expected[..payload.len()].copy_from_slice(&payload);

        prop_assert_eq!(packet.consumed, line.len());
        prop_assert_eq!(wire.len(), WIRE_LEN);
        prop_assert_eq!(wire[0], 0x00);
        prop_assert_eq!(&wire[1..=PAYLOAD_LEN], &expected[..]);
        prop_assert_eq!(wire[WIRE_LEN - 1], crc8(&expected));
    }

    #[test]
    fn repeat_suffix_pads_with_last_byte(payload in prop::collection::vec(data_byte(), 1..PAYLOAD_LEN - 1)) {
        let mut line = payload.clone();
        line.extend_from_slice(b"#\n");

        let packet = next_packet(&line).expect("terminated line should frame");
        let framed = packet.payload.expect("line has payload");
        let last = *payload.last().expect("payload is non-empty");

        prop_assert_eq!(&framed[..payload.len()], &payload[..]);
        prop_assert!(framed[payload.len()..].iter().all(|&b| b == last));
    }
}
