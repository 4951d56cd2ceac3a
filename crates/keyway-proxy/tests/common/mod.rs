#![allow(dead_code)]

/// CONNECT bytes between the Remaining Length and the client id length field,
/// starting with the zero byte that ends Remaining Length decoding.
pub const PREAMBLE: [u8; 12] = [
    0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x02, 0x00, 0x3C, 0x00, 0x00,
];

/// Builds a CONNECT packet whose Remaining Length covers the client id.
pub fn connect_packet(client_id: &[u8]) -> Vec<u8> {
    let remaining = PREAMBLE.len() + 2 + client_id.len();
    assert!(remaining < 128, "test helper only emits single-byte lengths");
    connect_packet_with_remaining(remaining as u8, client_id)
}

pub fn connect_packet_with_remaining(remaining: u8, client_id: &[u8]) -> Vec<u8> {
    let mut packet = vec![0x10, remaining];
    packet.extend_from_slice(&PREAMBLE);
    packet.extend_from_slice(&(client_id.len() as u16).to_be_bytes());
    packet.extend_from_slice(client_id);
    packet
}

/// A PUBLISH to topic "t" with payload "hi".
pub fn publish_packet() -> Vec<u8> {
    vec![0x30, 0x05, 0x00, 0x01, b't', b'h', b'i']
}
