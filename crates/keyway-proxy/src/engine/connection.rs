use crate::engine::inspector::{ConnectionInspector, InspectorState, Resolution};
use crate::engine::preread::{preread, PrereadOutcome, Rewind};
use crate::engine::tenant::{ConnectionId, RoutingTable, TenantRegistry};
use crate::parser::mqtt::ConnectDecoder;
use bytes::BytesMut;
use keyway_common::{InspectionConfig, RoutingConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io;
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

pub static ACTIVE_CONNECTIONS: AtomicUsize = AtomicUsize::new(0);

/// Configuration for connection handling behavior.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub inspect: bool,
    pub preread_timeout: Duration,
    pub max_preread_bytes: usize,
    pub decoder: ConnectDecoder,
}

impl ConnectionConfig {
    pub fn from_config(inspection: &InspectionConfig, routing: &RoutingConfig) -> Self {
        Self {
            inspect: inspection.enabled,
            preread_timeout: Duration::from_millis(inspection.preread_timeout_ms),
            max_preread_bytes: inspection.max_preread_bytes,
            decoder: ConnectDecoder::new(routing.delimiter, routing.suffix.clone())
                .enforce_remaining_length(inspection.enforce_remaining_length),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        let inspection = InspectionConfig::default();
        Self {
            inspect: inspection.enabled,
            preread_timeout: Duration::from_millis(inspection.preread_timeout_ms),
            max_preread_bytes: inspection.max_preread_bytes,
            decoder: ConnectDecoder::default(),
        }
    }
}

struct ProxyConnectionGuard;

impl ProxyConnectionGuard {
    fn new() -> Self {
        ACTIVE_CONNECTIONS.fetch_add(1, Ordering::SeqCst);
        Self
    }
}

impl Drop for ProxyConnectionGuard {
    fn drop(&mut self) {
        ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::SeqCst);
    }
}

fn record_resolution(state: &InspectorState) {
    match state {
        InspectorState::Resolved(Resolution::Tenant) => crate::metrics::TENANTS_RESOLVED.inc(),
        InspectorState::Resolved(Resolution::UnexpectedPacketType(_)) => {
            crate::metrics::UNEXPECTED_PACKETS.inc()
        }
        InspectorState::Resolved(Resolution::Malformed(_)) => {
            crate::metrics::MALFORMED_CONNECTS.inc()
        }
        InspectorState::Resolved(Resolution::Abandoned(_)) => {
            crate::metrics::PREREAD_ABANDONED.inc()
        }
        InspectorState::AwaitingFirstPacket => {}
    }
}

/// Connect to upstream broker with timeout.
async fn connect_backend(
    target_addr: &str,
    client_peer: &str,
) -> Result<TcpStream, Box<dyn std::error::Error + Send + Sync>> {
    debug!(
        "Attempting upstream connect to {} for client {}",
        target_addr, client_peer
    );
    match timeout(Duration::from_secs(5), TcpStream::connect(target_addr)).await {
        Ok(stream) => {
            let s = stream?;
            debug!(
                "Successfully connected to upstream {} for client {}",
                target_addr, client_peer
            );
            Ok(s)
        }
        Err(_) => {
            warn!(
                "Could not connect to upstream at {} (connect timeout) for client {}",
                target_addr, client_peer
            );
            Err("upstream connect timeout".into())
        }
    }
}

/// Handle a single client connection: preread the first CONNECT to pick a
/// tenant, then proxy to that tenant's upstream.
///
/// Preread bytes are replayed to the upstream before live traffic, so the
/// broker sees the client's stream unchanged.
pub async fn handle_connection(
    mut source: TcpStream,
    routes: Arc<RoutingTable>,
    registry: Arc<TenantRegistry>,
    config: Arc<ConnectionConfig>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client_peer = source
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "<unknown>".to_string());

    let registration = registry.register(ConnectionId::next());
    let conn_id = registration.id();
    let mut initial_bytes = BytesMut::new();

    if config.inspect {
        let mut inspector = ConnectionInspector::new(&config.decoder);
        let outcome = preread(
            &mut source,
            &mut inspector,
            &mut initial_bytes,
            config.preread_timeout,
            config.max_preread_bytes,
        )
        .await?;
        record_resolution(inspector.state());

        match outcome {
            PrereadOutcome::Classified => {}
            PrereadOutcome::TimedOut => {
                warn!(client = %client_peer, %conn_id, "No classifiable CONNECT before preread timeout");
            }
            PrereadOutcome::LimitExceeded => {
                warn!(client = %client_peer, %conn_id, buffered = initial_bytes.len(), "Preread limit reached without a client id");
            }
            PrereadOutcome::ClosedEarly => {
                debug!(client = %client_peer, %conn_id, "Client closed before its first packet was classified");
                return Ok(());
            }
        }

        registry.publish(conn_id, inspector.routing_key().clone());
    } else {
        debug!(%conn_id, "MQTT inspection disabled; using default tenant");
    }

    let routing_key = registry.routing_key(conn_id);
    let target_addr = routes.resolve(&routing_key).to_string();
    info!(client = %client_peer, %conn_id, tenant = %routing_key, upstream = %target_addr, "Routing connection");

    let target = match connect_backend(&target_addr, &client_peer).await {
        Ok(s) => s,
        Err(e) => {
            crate::metrics::UPSTREAM_FAILURES.inc();
            warn!(client = %client_peer, %conn_id, upstream = %target_addr, error = %e, "Upstream unavailable");
            return Ok(());
        }
    };

    let _guard = ProxyConnectionGuard::new();

    let (source_read, mut source_write) = source.into_split();
    let (mut target_read, mut target_write) = target.into_split();
    let mut source_read = Rewind::new(initial_bytes.freeze(), source_read);

    // Start bidirectional copying between client and upstream
    let _ = tokio::select! {
        res = io::copy(&mut source_read, &mut target_write) => res,
        res = io::copy(&mut target_read, &mut source_write) => res,
    };

    debug!(%conn_id, "Connection closed.");
    Ok(())
}
