#![allow(dead_code)]

use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use http_body_util::BodyExt;
use tower::ServiceExt;

use ingest::api::IngestError;
use ingest::config::BodyEncoding;
use ingest::event::Event;
use ingest::router::{router, RouterOptions};
use ingest::sinks::EventSink;
use ingest::stats::MetricSink;

#[derive(Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<Event>>>,
}

impl MemorySink {
    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn bodies(&self) -> Vec<String> {
        self.events()
            .iter()
            .map(|e| String::from_utf8(e.body().to_vec()).unwrap())
            .collect()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn send_batch(&self, events: Vec<Event>) -> Result<(), IngestError> {
        self.events.lock().unwrap().extend(events);
        Ok(())
    }
}

pub struct FailingSink;

#[async_trait]
impl EventSink for FailingSink {
    async fn send_batch(&self, _: Vec<Event>) -> Result<(), IngestError> {
        Err(IngestError::Sink("channel is full".to_string()))
    }
}

pub struct PanickingSink;

#[async_trait]
impl EventSink for PanickingSink {
    async fn send_batch(&self, _: Vec<Event>) -> Result<(), IngestError> {
        panic!("sink blew up")
    }
}

pub fn app<S: EventSink + Send + Sync + 'static>(
    sink: S,
    body_encoding: BodyEncoding,
) -> (Router, Arc<MetricSink>) {
    let metrics = Arc::new(MetricSink::new());
    let app = router(
        sink,
        metrics.clone(),
        RouterOptions {
            body_encoding,
            advertise_gzip: true,
            export_prometheus: false,
        },
    )
    .expect("router without prometheus");
    (app, metrics)
}

pub async fn call(app: Router, request: Request<Body>) -> (Response<Body>, Vec<u8>) {
    let response = app.oneshot(request).await.unwrap();
    let (parts, body) = response.into_parts();
    let bytes = body.collect().await.unwrap().to_bytes().to_vec();
    (Response::from_parts(parts, Body::empty()), bytes)
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn gunzip(data: &[u8]) -> Vec<u8> {
    let mut plain = Vec::new();
    MultiGzDecoder::new(data).read_to_end(&mut plain).unwrap();
    plain
}
