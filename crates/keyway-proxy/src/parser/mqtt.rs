use crate::engine::tenant::RoutingKey;
use std::ops::RangeInclusive;

/// First-byte values that carry packet type 1 (CONNECT) with any flag bits.
pub const CONNECT_FIRST_BYTE: RangeInclusive<u8> = 0x10..=0x1F;

/// Fixed CONNECT bytes skipped after the Remaining Length stop position:
/// protocol name length (2), "MQTT" (4), level (1), connect flags (1),
/// keep-alive (2) and a two byte length prefix.
pub const CONNECT_PREAMBLE_LEN: usize = 12;

/// Maximum number of Remaining Length positions examined.
const MAX_REMAINING_LENGTH_BYTES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MqttPacketType {
    Reserved,
    Connect,
    Connack,
    Publish,
    Puback,
    Pubrec,
    Pubrel,
    Pubcomp,
    Subscribe,
    Suback,
    Unsubscribe,
    Unsuback,
    Pingreq,
    Pingresp,
    Disconnect,
    Auth,
}

impl MqttPacketType {
    pub fn from_first_byte(byte: u8) -> Self {
        match byte >> 4 {
            1 => Self::Connect,
            2 => Self::Connack,
            3 => Self::Publish,
            4 => Self::Puback,
            5 => Self::Pubrec,
            6 => Self::Pubrel,
            7 => Self::Pubcomp,
            8 => Self::Subscribe,
            9 => Self::Suback,
            10 => Self::Unsubscribe,
            11 => Self::Unsuback,
            12 => Self::Pingreq,
            13 => Self::Pingresp,
            14 => Self::Disconnect,
            15 => Self::Auth,
            _ => Self::Reserved,
        }
    }
}

/// What the decoder learned from the client id of a CONNECT packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectInfo {
    pub client_id: String,
    pub routing_key: RoutingKey,
    pub remaining_length: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// The buffer ends before a field the decoder has to read.
    NeedMoreBytes,
    /// First byte is not a CONNECT fixed header; carries that byte.
    NotConnect(u8),
    /// CONNECT framing was readable but the client id cannot be used.
    Malformed(&'static str),
    Success(ConnectInfo),
}

/// Seam between the inspector and the CONNECT decoder.
pub trait PacketDecoder {
    fn decode(&self, buf: &[u8]) -> DecodeOutcome;
}

impl<T: PacketDecoder + ?Sized> PacketDecoder for &T {
    fn decode(&self, buf: &[u8]) -> DecodeOutcome {
        (**self).decode(buf)
    }
}

/// Decode the Remaining Length that follows the fixed header byte.
///
/// `buf` starts at the first Remaining Length byte. Decoding stops at the
/// first byte equal to zero, or after four bytes. The continuation bit is not
/// consulted, so `[0x0A, 0x00]` decodes to 10 while `[0x0A, 0x04]` keeps
/// accumulating.
///
/// Returns `Some((value, used))` where `used` counts the non-zero bytes
/// consumed (the terminating zero is not included), or `None` when the buffer
/// ends before the stop condition is reached.
pub fn decode_remaining_length(buf: &[u8]) -> Option<(usize, usize)> {
    let mut multiplier: usize = 1;
    let mut value: usize = 0;

    for used in 0..MAX_REMAINING_LENGTH_BYTES {
        let b = *buf.get(used)?;
        if b == 0 {
            return Some((value, used));
        }
        value += (b & 0x7F) as usize * multiplier;
        multiplier *= 128;
    }

    Some((value, MAX_REMAINING_LENGTH_BYTES))
}

/// Extracts the tenant routing key from the client id of a CONNECT packet.
#[derive(Debug, Clone)]
pub struct ConnectDecoder {
    delimiter: char,
    suffix: String,
    enforce_remaining_length: bool,
}

impl Default for ConnectDecoder {
    fn default() -> Self {
        Self::new('|', "_Broker")
    }
}

impl ConnectDecoder {
    pub fn new(delimiter: char, suffix: impl Into<String>) -> Self {
        Self {
            delimiter,
            suffix: suffix.into(),
            enforce_remaining_length: false,
        }
    }

    /// Also reject client ids that end past the declared Remaining Length.
    pub fn enforce_remaining_length(mut self, enforce: bool) -> Self {
        self.enforce_remaining_length = enforce;
        self
    }

    fn routing_key_for(&self, client_id: &str) -> Option<RoutingKey> {
        let prefix = client_id
            .split_once(self.delimiter)
            .map_or(client_id, |(prefix, _)| prefix);
        if prefix.is_empty() {
            return None;
        }
        Some(RoutingKey::new(format!("{}{}", prefix, self.suffix)))
    }
}

impl PacketDecoder for ConnectDecoder {
    fn decode(&self, buf: &[u8]) -> DecodeOutcome {
        let Some(&first) = buf.first() else {
            return DecodeOutcome::NeedMoreBytes;
        };
        if !CONNECT_FIRST_BYTE.contains(&first) {
            return DecodeOutcome::NotConnect(first);
        }

        let Some((remaining_length, used)) = decode_remaining_length(&buf[1..]) else {
            return DecodeOutcome::NeedMoreBytes;
        };

        // Position in the packet where Remaining Length decoding stopped.
        let stop = 1 + used;
        let payload_offset = stop + CONNECT_PREAMBLE_LEN;

        let Some(len_bytes) = buf.get(payload_offset..payload_offset + 2) else {
            return DecodeOutcome::NeedMoreBytes;
        };
        let client_id_len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
        let id_start = payload_offset + 2;
        let id_end = id_start + client_id_len;

        if self.enforce_remaining_length && id_end > stop + remaining_length {
            return DecodeOutcome::Malformed("client id exceeds remaining length");
        }

        let Some(raw) = buf.get(id_start..id_end) else {
            return DecodeOutcome::NeedMoreBytes;
        };
        let Ok(client_id) = std::str::from_utf8(raw) else {
            return DecodeOutcome::Malformed("client id is not UTF-8");
        };

        match self.routing_key_for(client_id) {
            Some(routing_key) => DecodeOutcome::Success(ConnectInfo {
                client_id: client_id.to_string(),
                routing_key,
                remaining_length,
            }),
            None => DecodeOutcome::Malformed("empty tenant prefix"),
        }
    }
}
