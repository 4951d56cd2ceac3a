use crate::engine::tenant::RoutingKey;
use crate::parser::mqtt::{ConnectDecoder, DecodeOutcome, MqttPacketType, PacketDecoder};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

/// Answer to the host after each delivered buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Re-deliver the same packet once more bytes have arrived.
    Again,
    /// No reason to hold the connection back.
    Proceed,
}

/// Why the first client packet stopped being inspected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Tenant,
    UnexpectedPacketType(u8),
    Malformed(&'static str),
    /// The host stopped waiting for the packet (timeout, size cap, EOF).
    Abandoned(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InspectorState {
    AwaitingFirstPacket,
    Resolved(Resolution),
}

/// Per-connection state machine that decodes the first client packet exactly
/// once and keeps the resulting routing key.
#[derive(Debug)]
pub struct ConnectionInspector<D = ConnectDecoder> {
    decoder: D,
    state: InspectorState,
    routing_key: RoutingKey,
    packets_seen_from_client: u64,
}

impl Default for ConnectionInspector<ConnectDecoder> {
    fn default() -> Self {
        Self::new(ConnectDecoder::default())
    }
}

impl<D: PacketDecoder> ConnectionInspector<D> {
    pub fn new(decoder: D) -> Self {
        Self {
            decoder,
            state: InspectorState::AwaitingFirstPacket,
            routing_key: RoutingKey::default(),
            packets_seen_from_client: 0,
        }
    }

    /// Feed the bytes accumulated so far for the current packet.
    ///
    /// `buf` is cumulative: after an [`Verdict::Again`] the host delivers the
    /// whole packet prefix again, not just the new bytes.
    pub fn inspect(&mut self, direction: Direction, buf: &[u8]) -> Verdict {
        if direction == Direction::ServerToClient {
            return Verdict::Proceed;
        }

        if self.is_resolved() {
            self.packets_seen_from_client += 1;
            return Verdict::Proceed;
        }

        if buf.is_empty() {
            debug!("No client bytes yet; waiting");
            return Verdict::Again;
        }

        let resolution = match self.decoder.decode(buf) {
            DecodeOutcome::NeedMoreBytes => {
                debug!(buffered = buf.len(), "Partial CONNECT; waiting for more bytes");
                return Verdict::Again;
            }
            DecodeOutcome::NotConnect(byte) => {
                warn!(
                    packet_type_flags = byte,
                    "Expected CONNECT as first packet, detected {:?}; keeping default tenant",
                    MqttPacketType::from_first_byte(byte)
                );
                Resolution::UnexpectedPacketType(byte)
            }
            DecodeOutcome::Malformed(reason) => {
                warn!(reason, "Unusable CONNECT; keeping default tenant");
                Resolution::Malformed(reason)
            }
            DecodeOutcome::Success(info) => {
                info!(
                    client_id = %info.client_id,
                    tenant = %info.routing_key,
                    remaining_length = info.remaining_length,
                    "Tenant resolved from CONNECT"
                );
                self.routing_key = info.routing_key;
                Resolution::Tenant
            }
        };

        self.state = InspectorState::Resolved(resolution);
        self.packets_seen_from_client += 1;
        Verdict::Proceed
    }

    /// Stop waiting for the first packet and keep the default routing key.
    /// Has no effect once the connection is resolved.
    pub fn abandon(&mut self, reason: &'static str) {
        if self.is_resolved() {
            return;
        }
        debug!(reason, "Abandoning tenant extraction");
        self.state = InspectorState::Resolved(Resolution::Abandoned(reason));
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.state, InspectorState::Resolved(_))
    }

    pub fn state(&self) -> &InspectorState {
        &self.state
    }

    pub fn routing_key(&self) -> &RoutingKey {
        &self.routing_key
    }

    pub fn packets_seen_from_client(&self) -> u64 {
        self.packets_seen_from_client
    }

    pub fn decoder(&self) -> &D {
        &self.decoder
    }
}
