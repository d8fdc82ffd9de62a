//! One-wire CRC-8 as computed by the board firmware.
//!
//! Two 16-entry nibble tables (low nibble, then high nibble) stand in for the
//! usual 256-entry table. The result equals the Dallas/Maxim 1-Wire CRC
//! (reflected polynomial 0x8C, seed 0).

use crate::codec::PAYLOAD_LEN;

const CRC_TABLE: [u8; 32] = [
    0x00, 0x5E, 0xBC, 0xE2, 0x61, 0x3F, 0xDD, 0x83, //
    0xC2, 0x9C, 0x7E, 0x20, 0xA3, 0xFD, 0x1F, 0x41, //
    0x00, 0x9D, 0x23, 0xBE, 0x46, 0xDB, 0x65, 0xF8, //
    0x8C, 0x11, 0xAF, 0x32, 0xCA, 0x57, 0xE9, 0x74, //
];

/// Checksum of a 30-byte payload.
pub fn crc8(payload: &[u8; PAYLOAD_LEN]) -> u8 {
    crc8_bytes(payload)
}

/// Checksum of an arbitrary byte run.
pub fn crc8_bytes(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |crc, &byte| {
        let crc = crc ^ byte;
        CRC_TABLE[(crc & 0x0F) as usize] ^ CRC_TABLE[16 + ((crc >> 4) & 0x0F) as usize]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bitwise_onewire(data: &[u8]) -> u8 {
        let mut crc = 0u8;
        for &byte in data {
            crc ^= byte;
            for _ in 0..8 {
                crc = if crc & 1 != 0 { (crc >> 1) ^ 0x8C } else { crc >> 1 };
            }
        }
        crc
    }

    #[test]
    fn matches_onewire_check_value() {
        assert_eq!(crc8_bytes(b"123456789"), 0xA1);
    }

    #[test]
    fn table_matches_bitwise_for_every_byte() {
        for byte in 0..=255u8 {
            assert_eq!(crc8_bytes(&[byte]), bitwise_onewire(&[byte]), "byte {byte:#04x}");
        }
    }

    #[test]
    fn known_payloads() {
        assert_eq!(crc8(&[0u8; PAYLOAD_LEN]), 0x00);
        assert_eq!(crc8(&[b'F'; PAYLOAD_LEN]), 0x50);

        let mut payload = [b'F'; PAYLOAD_LEN];
        payload[..6].copy_from_slice(b"G0X0Y0");
        assert_eq!(crc8(&payload), 0xD6);
    }

    #[test]
    fn stable_across_calls() {
        let payload = *b"IPPzzzzzzzzzzzzzzzzzzzzzzzzzzz";
        assert_eq!(crc8(&payload), crc8(&payload));
        assert_eq!(crc8(&payload), 0xCC);
    }
}
