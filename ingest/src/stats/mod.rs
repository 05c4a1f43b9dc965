//! In-process metric sink fed by the JSON decoder.
//!
//! One `MetricSink` is constructed by the server and shared by every request
//! handler. Each aggregate sits behind its own lock, so concurrent recorders
//! only contend when they touch the same aggregate, and readers always see a
//! whole update or none of it.

mod distribution;
mod meter;

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

pub use distribution::{Distribution, DistributionSnapshot};
pub use meter::{Meter, MeterSnapshot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricKind {
    /// A request reached the decoder with an accepted charset
    ArrivalCount,
    /// A request or one of its documents was rejected
    ParseError,
    /// Nanoseconds spent pulling one document off the stream
    ParseLatency,
    /// Characters in the canonical serialization of one document
    EventSize,
    DocumentsPerRequest,
    /// Nanoseconds spent turning a whole request into events
    EventGenerationLatency,
    Unrecognized(String),
}

impl MetricKind {
    pub fn as_str(&self) -> &str {
        match self {
            MetricKind::ArrivalCount => "arrival_count",
            MetricKind::ParseError => "parse_error",
            MetricKind::ParseLatency => "parse_latency",
            MetricKind::EventSize => "event_size",
            MetricKind::DocumentsPerRequest => "documents_per_request",
            MetricKind::EventGenerationLatency => "event_generation_latency",
            MetricKind::Unrecognized(name) => name,
        }
    }
}

impl FromStr for MetricKind {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_ref() {
            "arrival_count" => MetricKind::ArrivalCount,
            "parse_error" => MetricKind::ParseError,
            "parse_latency" => MetricKind::ParseLatency,
            "event_size" => MetricKind::EventSize,
            "documents_per_request" => MetricKind::DocumentsPerRequest,
            "event_generation_latency" => MetricKind::EventGenerationLatency,
            _ => MetricKind::Unrecognized(s.to_string()),
        })
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Instruction for the sink: which aggregate to update, and with what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricEvent {
    kind: MetricKind,
    value: Option<u64>,
}

impl MetricEvent {
    pub fn new(kind: MetricKind, value: Option<u64>) -> Self {
        Self { kind, value }
    }

    pub fn arrival() -> Self {
        Self::new(MetricKind::ArrivalCount, None)
    }

    pub fn parse_error() -> Self {
        Self::new(MetricKind::ParseError, None)
    }

    pub fn parse_latency(elapsed: Duration) -> Self {
        Self::new(MetricKind::ParseLatency, Some(nanos(elapsed)))
    }

    /// Size of a canonical document in UTF-16 code units.
    pub fn event_size(units: usize) -> Self {
        Self::new(MetricKind::EventSize, Some(units as u64))
    }

    pub fn documents_per_request(documents: usize) -> Self {
        Self::new(MetricKind::DocumentsPerRequest, Some(documents as u64))
    }

    pub fn event_generation_latency(elapsed: Duration) -> Self {
        Self::new(MetricKind::EventGenerationLatency, Some(nanos(elapsed)))
    }

    pub fn kind(&self) -> &MetricKind {
        &self.kind
    }

    pub fn value(&self) -> Option<u64> {
        self.value
    }
}

fn nanos(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
}

/// Point-in-time view of every aggregate kept by the sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub arrivals: MeterSnapshot,
    pub parse_errors: MeterSnapshot,
    pub parse_latency: DistributionSnapshot,
    pub event_generation_latency: DistributionSnapshot,
    pub event_size: DistributionSnapshot,
    pub documents_per_request: DistributionSnapshot,
}

impl MetricsSnapshot {
    /// The exported read surface: one named value per statistic.
    pub fn gauges(&self) -> Vec<(&'static str, f64)> {
        let mut gauges = Vec::with_capacity(32);
        meter_gauges(&mut gauges, &self.arrivals, ARRIVAL_GAUGES);
        meter_gauges(&mut gauges, &self.parse_errors, PARSE_ERROR_GAUGES);
        distribution_gauges(&mut gauges, &self.parse_latency, PARSE_LATENCY_GAUGES);
        distribution_gauges(
            &mut gauges,
            &self.event_generation_latency,
            EVENT_GENERATION_GAUGES,
        );
        distribution_gauges(&mut gauges, &self.event_size, EVENT_SIZE_GAUGES);
        distribution_gauges(
            &mut gauges,
            &self.documents_per_request,
            DOCUMENTS_PER_REQUEST_GAUGES,
        );
        gauges
    }
}

const ARRIVAL_GAUGES: [&str; 4] = [
    "ingest_arrivals_count",
    "ingest_arrivals_mean_rate",
    "ingest_arrivals_one_minute_rate",
    "ingest_arrivals_fifteen_minute_rate",
];
const PARSE_ERROR_GAUGES: [&str; 4] = [
    "ingest_parse_errors_count",
    "ingest_parse_errors_mean_rate",
    "ingest_parse_errors_one_minute_rate",
    "ingest_parse_errors_fifteen_minute_rate",
];
const PARSE_LATENCY_GAUGES: [&str; 6] = [
    "ingest_parse_latency_ns_mean",
    "ingest_parse_latency_ns_max",
    "ingest_parse_latency_ns_min",
    "ingest_parse_latency_ns_p95",
    "ingest_parse_latency_ns_p99",
    "ingest_parse_latency_ns_stddev",
];
const EVENT_GENERATION_GAUGES: [&str; 6] = [
    "ingest_event_generation_latency_ns_mean",
    "ingest_event_generation_latency_ns_max",
    "ingest_event_generation_latency_ns_min",
    "ingest_event_generation_latency_ns_p95",
    "ingest_event_generation_latency_ns_p99",
    "ingest_event_generation_latency_ns_stddev",
];
const EVENT_SIZE_GAUGES: [&str; 6] = [
    "ingest_event_size_units_mean",
    "ingest_event_size_units_max",
    "ingest_event_size_units_min",
    "ingest_event_size_units_p95",
    "ingest_event_size_units_p99",
    "ingest_event_size_units_stddev",
];
const DOCUMENTS_PER_REQUEST_GAUGES: [&str; 6] = [
    "ingest_documents_per_request_mean",
    "ingest_documents_per_request_max",
    "ingest_documents_per_request_min",
    "ingest_documents_per_request_p95",
    "ingest_documents_per_request_p99",
    "ingest_documents_per_request_stddev",
];

fn meter_gauges(
    out: &mut Vec<(&'static str, f64)>,
    meter: &MeterSnapshot,
    names: [&'static str; 4],
) {
    let values = [
        meter.count as f64,
        meter.mean_rate,
        meter.one_minute_rate,
        meter.fifteen_minute_rate,
    ];
    out.extend(names.into_iter().zip(values));
}

fn distribution_gauges(
    out: &mut Vec<(&'static str, f64)>,
    dist: &DistributionSnapshot,
    names: [&'static str; 6],
) {
    let values = [
        dist.mean,
        dist.max as f64,
        dist.min as f64,
        dist.p95,
        dist.p99,
        dist.stddev,
    ];
    out.extend(names.into_iter().zip(values));
}

pub struct MetricSink {
    arrivals: Mutex<Meter>,
    parse_errors: Mutex<Meter>,
    parse_latency: Mutex<Distribution>,
    event_generation_latency: Mutex<Distribution>,
    event_size: Mutex<Distribution>,
    documents_per_request: Mutex<Distribution>,
}

impl MetricSink {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            arrivals: Mutex::new(Meter::new(now)),
            parse_errors: Mutex::new(Meter::new(now)),
            parse_latency: Mutex::new(Distribution::new()),
            event_generation_latency: Mutex::new(Distribution::new()),
            event_size: Mutex::new(Distribution::new()),
            documents_per_request: Mutex::new(Distribution::new()),
        }
    }

    pub fn record(&self, event: MetricEvent) {
        let MetricEvent { kind, value } = event;
        match (kind, value) {
            (MetricKind::ArrivalCount, _) => self.arrivals.lock().mark(1, Instant::now()),
            (MetricKind::ParseError, _) => self.parse_errors.lock().mark(1, Instant::now()),
            (MetricKind::ParseLatency, Some(v)) => self.parse_latency.lock().update(v),
            (MetricKind::EventGenerationLatency, Some(v)) => {
                self.event_generation_latency.lock().update(v)
            }
            (MetricKind::EventSize, Some(v)) => self.event_size.lock().update(v),
            (MetricKind::DocumentsPerRequest, Some(v)) => {
                self.documents_per_request.lock().update(v)
            }
            (MetricKind::Unrecognized(name), _) => {
                tracing::warn!(kind = %name, "metric kind not recognized, ignoring");
            }
            (kind, None) => {
                tracing::warn!(kind = kind.as_str(), "metric event without a value, ignoring");
            }
        }
    }

    pub fn arrivals(&self) -> MeterSnapshot {
        self.arrivals.lock().snapshot(Instant::now())
    }

    pub fn parse_errors(&self) -> MeterSnapshot {
        self.parse_errors.lock().snapshot(Instant::now())
    }

    pub fn parse_latency(&self) -> DistributionSnapshot {
        self.parse_latency.lock().snapshot()
    }

    pub fn event_generation_latency(&self) -> DistributionSnapshot {
        self.event_generation_latency.lock().snapshot()
    }

    pub fn event_size(&self) -> DistributionSnapshot {
        self.event_size.lock().snapshot()
    }

    pub fn documents_per_request(&self) -> DistributionSnapshot {
        self.documents_per_request.lock().snapshot()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            arrivals: self.arrivals(),
            parse_errors: self.parse_errors(),
            parse_latency: self.parse_latency(),
            event_generation_latency: self.event_generation_latency(),
            event_size: self.event_size(),
            documents_per_request: self.documents_per_request(),
        }
    }
}

impl Default for MetricSink {
    fn default() -> Self {
        Self::new()
    }
}
