pub mod api;
pub mod charset;
pub mod compression;
pub mod config;
pub mod decoder;
pub mod endpoint;
pub mod event;
pub mod exchange;
pub mod middleware;
pub mod prometheus;
pub mod router;
pub mod server;
pub mod sinks;
pub mod stats;
