use crate::engine::connection::ACTIVE_CONNECTIONS;
use lazy_static::lazy_static;
use prometheus::{Encoder, Gauge, IntCounter, Registry, TextEncoder};
use std::sync::atomic::Ordering;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref CONNECTION_GAUGE: Gauge = Gauge::new(
        "keyway_active_connections",
        "Number of currently proxied MQTT connections"
    )
    .expect("metric can be created");
    pub static ref TENANTS_RESOLVED: IntCounter = IntCounter::new(
        "keyway_tenants_resolved_total",
        "Connections whose tenant was extracted from the CONNECT client id"
    )
    .expect("metric can be created");
    /// First client packet was not a CONNECT
    pub static ref UNEXPECTED_PACKETS: IntCounter = IntCounter::new(
        "keyway_unexpected_packet_total",
        "Connections whose first client packet was not CONNECT"
    )
    .expect("metric can be created");
    pub static ref MALFORMED_CONNECTS: IntCounter = IntCounter::new(
        "keyway_malformed_connect_total",
        "CONNECT packets whose client id could not be turned into a tenant"
    )
    .expect("metric can be created");
    /// Preread gave up: timeout, buffer cap or early client close
    pub static ref PREREAD_ABANDONED: IntCounter = IntCounter::new(
        "keyway_preread_abandoned_total",
        "Connections routed without a classified first packet"
    )
    .expect("metric can be created");
    pub static ref UPSTREAM_FAILURES: IntCounter = IntCounter::new(
        "keyway_upstream_failures_total",
        "Connections dropped because the selected upstream was unreachable"
    )
    .expect("metric can be created");
}

pub fn register_metrics() {
    let _ = REGISTRY.register(Box::new(CONNECTION_GAUGE.clone()));
    let _ = REGISTRY.register(Box::new(TENANTS_RESOLVED.clone()));
    let _ = REGISTRY.register(Box::new(UNEXPECTED_PACKETS.clone()));
    let _ = REGISTRY.register(Box::new(MALFORMED_CONNECTS.clone()));
    let _ = REGISTRY.register(Box::new(PREREAD_ABANDONED.clone()));
    let _ = REGISTRY.register(Box::new(UPSTREAM_FAILURES.clone()));
}

fn update_metrics() {
    let count = ACTIVE_CONNECTIONS.load(Ordering::SeqCst) as f64;
    CONNECTION_GAUGE.set(count);
}

pub fn render_metrics() -> String {
    update_metrics();

    let metric_families = REGISTRY.gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}", e);
    }

    String::from_utf8(buffer).unwrap_or_else(|_| "# Error: Invalid UTF8".to_string())
}
