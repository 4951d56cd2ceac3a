//! Tenant routing keys and their per-connection bookkeeping.
//!
//! Every connection owns its routing key. The [`TenantRegistry`] publishes
//! those keys by [`ConnectionId`] so routing and observability code can read
//! them, and a [`RegistryGuard`] removes the entry when the connection ends.

use dashmap::DashMap;
use keyway_common::RoutingConfig;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Routing key used until (or unless) a tenant is extracted.
pub const DEFAULT_ROUTING_KEY: &str = "-";

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingKey(String);

impl RoutingKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_default(&self) -> bool {
        self.0 == DEFAULT_ROUTING_KEY
    }
}

impl Default for RoutingKey {
    fn default() -> Self {
        Self(DEFAULT_ROUTING_KEY.to_string())
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocates a process-unique id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Read side of the routing keys: the last extracted (or default) key of each
/// live connection.
#[derive(Debug, Default)]
pub struct TenantRegistry {
    keys: DashMap<ConnectionId, RoutingKey>,
}

impl TenantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks `id` with the default key until the returned guard is dropped.
    pub fn register(self: &Arc<Self>, id: ConnectionId) -> RegistryGuard {
        self.keys.insert(id, RoutingKey::default());
        RegistryGuard {
            registry: Arc::clone(self),
            id,
        }
    }

    pub fn publish(&self, id: ConnectionId, key: RoutingKey) {
        self.keys.insert(id, key);
    }

    /// Returns the default key for unknown or already closed connections.
    pub fn routing_key(&self, id: ConnectionId) -> RoutingKey {
        self.keys
            .get(&id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Current keys of all live connections, in no particular order.
    pub fn snapshot(&self) -> Vec<(ConnectionId, RoutingKey)> {
        self.keys
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    pub fn remove(&self, id: ConnectionId) {
        self.keys.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Removes a connection's entry from the registry on drop.
pub struct RegistryGuard {
    registry: Arc<TenantRegistry>,
    id: ConnectionId,
}

impl RegistryGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for RegistryGuard {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

/// Maps routing keys to upstream broker addresses.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    default_upstream: String,
    tenants: HashMap<RoutingKey, String>,
}

impl RoutingTable {
    pub fn new(default_upstream: impl Into<String>) -> Self {
        Self {
            default_upstream: default_upstream.into(),
            tenants: HashMap::new(),
        }
    }

    pub fn from_config(config: &RoutingConfig) -> Self {
        let mut table = Self::new(config.default_upstream.clone());
        for (key, upstream) in &config.tenants {
            table = table.with_tenant(RoutingKey::new(key.clone()), upstream.clone());
        }
        table
    }

    pub fn with_tenant(mut self, key: RoutingKey, upstream: impl Into<String>) -> Self {
        self.tenants.insert(key, upstream.into());
        self
    }

    /// Upstream for `key`, falling back to the default upstream for the
    /// sentinel key and for tenants without an entry.
    pub fn resolve(&self, key: &RoutingKey) -> &str {
        self.tenants
            .get(key)
            .map(String::as_str)
            .unwrap_or(&self.default_upstream)
    }

    pub fn default_upstream(&self) -> &str {
        &self.default_upstream
    }
}
