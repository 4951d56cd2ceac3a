pub mod engine;
pub mod metrics;
pub mod parser;

pub use engine::connection::{handle_connection, ConnectionConfig, ACTIVE_CONNECTIONS};
pub use engine::inspector::{ConnectionInspector, Direction, Verdict};
pub use engine::tenant::{RoutingKey, RoutingTable, TenantRegistry};
