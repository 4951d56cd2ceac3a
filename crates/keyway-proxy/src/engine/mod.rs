pub mod connection;
pub mod inspector;
pub mod preread;
pub mod tenant;
