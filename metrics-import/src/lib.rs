pub mod api;
pub mod config;
pub mod decoder;
pub mod encoding;
pub mod forwarder;
pub mod health;
pub mod import_endpoint;
pub mod metric;
pub mod prometheus;
pub mod router;
pub mod server;
pub mod sinks;
pub mod stats;
