use async_trait::async_trait;
use metrics::histogram;
use tracing::Level;

use crate::api::IngestError;
use crate::event::Event;
use crate::prometheus::report_ingested_events;

/// Downstream consumer of decoded events.
#[async_trait]
pub trait EventSink {
    async fn send_batch(&self, events: Vec<Event>) -> Result<(), IngestError>;
}

/// Logs every event. Only meant for local runs.
pub struct PrintSink {}

#[async_trait]
impl EventSink for PrintSink {
    async fn send_batch(&self, events: Vec<Event>) -> Result<(), IngestError> {
        let span = tracing::span!(Level::INFO, "batch of events");
        let _enter = span.enter();

        histogram!("ingest_event_batch_size").record(events.len() as f64);
        report_ingested_events(events.len() as u64);
        for event in events {
            tracing::info!(
                body = %String::from_utf8_lossy(event.body()),
                headers = event.headers().len(),
                "event"
            );
        }

        Ok(())
    }
}
