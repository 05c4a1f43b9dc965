use std::net::SocketAddr;

use envconfig::Envconfig;
use tracing::Level;

/// Character encoding of the event bodies handed to the sink.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub enum BodyEncoding {
    #[default]
    Utf8,
    /// Re-encode each body in the charset the request declared
    Request,
}

impl std::str::FromStr for BodyEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_ref() {
            "utf-8" | "utf8" => Ok(BodyEncoding::Utf8),
            "request" => Ok(BodyEncoding::Request),
            _ => Err(format!("Unknown body encoding: {s}")),
        }
    }
}

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(default = "127.0.0.1:3000")]
    pub address: SocketAddr,

    // Used for integration tests
    #[envconfig(default = "true")]
    pub export_prometheus: bool,

    #[envconfig(default = "utf-8")]
    pub body_encoding: BodyEncoding,

    /// Send `Accept-Encoding: gzip` on every response
    #[envconfig(default = "true")]
    pub advertise_gzip: bool,

    pub otel_url: Option<String>,

    #[envconfig(default = "1.0")]
    pub otel_sampling_rate: f64,

    #[envconfig(default = "ingest")]
    pub otel_service_name: String,

    #[envconfig(default = "info")]
    pub log_level: Level,
}
