//! Turns a request body holding zero or more concatenated JSON objects into
//! events, feeding the metric sink as it goes.

use std::io::{self, BufReader, Read};
use std::iter::FusedIterator;
use std::sync::Arc;
use std::time::Instant;

use serde::de::Error as _;
use serde::Deserialize;
use serde_json::de::IoRead;
use serde_json::{Deserializer, Map, StreamDeserializer, Value};
use tracing::{debug, trace, warn};

use crate::api::IngestError;
use crate::charset::Charset;
use crate::compression::CorruptStreamError;
use crate::config::BodyEncoding;
use crate::event::{Event, HeaderSet};
use crate::exchange::Request;
use crate::stats::{MetricEvent, MetricSink};

pub type JsonDocument = Map<String, Value>;

/// One top-level value. Nesting depth is only bounded by memory: the parser
/// moves onto heap-allocated stack segments as it descends.
struct Document(Value);

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Value::deserialize(serde_stacker::Deserializer::new(deserializer)).map(Document)
    }
}

/// Lazy, forward-only sequence of the JSON objects found in a byte stream.
///
/// Whitespace between documents is ignored. A document that is not an object,
/// a syntax error or a failing read ends the sequence: the failure is yielded
/// once and every later call returns `None`.
pub struct JsonDocuments<R: Read> {
    inner: StreamDeserializer<'static, IoRead<BufReader<R>>, Document>,
    failed: bool,
}

impl<R: Read> JsonDocuments<R> {
    pub fn new(reader: R) -> Self {
        let mut deserializer = Deserializer::from_reader(BufReader::new(reader));
        deserializer.disable_recursion_limit();
        Self {
            inner: deserializer.into_iter::<Document>(),
            failed: false,
        }
    }
}

impl<R: Read> Iterator for JsonDocuments<R> {
    type Item = Result<JsonDocument, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        let item = match self.inner.next()? {
            Ok(Document(Value::Object(document))) => Ok(document),
            Ok(Document(other)) => Err(IngestError::MalformedJson(serde_json::Error::custom(
                format!("expected a JSON object, found {}", value_kind(&other)),
            ))),
            Err(err) => Err(classify(err)),
        };

        if item.is_err() {
            self.failed = true;
        }
        Some(item)
    }
}

impl<R: Read> FusedIterator for JsonDocuments<R> {}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Read failures surface from serde_json as I/O errors; recover the ones that
/// are really about the body's content.
fn classify(err: serde_json::Error) -> IngestError {
    if !err.is_io() {
        return IngestError::MalformedJson(err);
    }

    match CorruptStreamError::from_io(io::Error::from(err)) {
        Ok(corrupt) => IngestError::CorruptStream(corrupt),
        Err(io_err) if io_err.kind() == io::ErrorKind::InvalidData => IngestError::MalformedJson(
            serde_json::Error::custom(format!("request body is not valid text: {io_err}")),
        ),
        Err(io_err) => IngestError::BodyRead(io_err),
    }
}

/// Decodes request bodies into events. One instance serves every request and
/// shares the process-wide metric sink.
#[derive(Clone)]
pub struct JsonEventDecoder {
    metrics: Arc<MetricSink>,
    body_encoding: BodyEncoding,
}

impl JsonEventDecoder {
    pub fn new(metrics: Arc<MetricSink>, body_encoding: BodyEncoding) -> Self {
        Self {
            metrics,
            body_encoding,
        }
    }

    pub fn metrics(&self) -> &MetricSink {
        &self.metrics
    }

    /// Consumes the request body and returns one event per JSON object, in
    /// stream order.
    pub fn decode_request<R: Read>(
        &self,
        request: &mut Request<R>,
    ) -> Result<Vec<Event>, IngestError> {
        let body = request.take_body();
        self.decode(body, request.character_encoding(), request.header_set())
    }

    pub fn decode<R: Read>(
        &self,
        body: Option<R>,
        charset: Option<&str>,
        headers: HeaderSet,
    ) -> Result<Vec<Event>, IngestError> {
        let body = body.ok_or(IngestError::MissingBody)?;

        let charset = Charset::from_label(charset).map_err(|err| {
            self.metrics.record(MetricEvent::parse_error());
            err
        })?;
        self.metrics.record(MetricEvent::arrival());

        let output_charset = match self.body_encoding {
            BodyEncoding::Utf8 => Charset::Utf8,
            BodyEncoding::Request => charset,
        };
        let headers = Arc::new(headers);

        let started = Instant::now();
        let mut documents = JsonDocuments::new(charset.decoding_reader(body));
        let mut events = Vec::new();

        loop {
            let pull_started = Instant::now();
            let document = match documents.next() {
                None => break,
                Some(Ok(document)) => document,
                Some(Err(err)) => {
                    self.metrics.record(MetricEvent::parse_error());
                    warn!(
                        error = err.kind(),
                        decoded = events.len(),
                        "failed to decode request body: {}",
                        err
                    );
                    return Err(err);
                }
            };
            self.metrics.record(MetricEvent::parse_latency(pull_started.elapsed()));

            let canonical = serde_json::to_string(&document)
                .map_err(|e| IngestError::Internal(format!("failed to serialize document: {e}")))?;
            trace!(document = %canonical, "decoded document");
            self.metrics.record(MetricEvent::event_size(canonical.encode_utf16().count()));

            events.push(Event::new(output_charset.encode(&canonical), headers.clone()));
        }

        self.metrics.record(MetricEvent::documents_per_request(events.len()));
        self.metrics.record(MetricEvent::event_generation_latency(started.elapsed()));
        debug!(documents = events.len(), charset = %charset, "decoded request body");

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::write::GzEncoder;
    use flate2::Compression;

    use super::*;
    use crate::compression::DecodingStream;
    use crate::stats::MetricsSnapshot;

    fn decoder() -> (JsonEventDecoder, Arc<MetricSink>) {
        let metrics = Arc::new(MetricSink::new());
        (
            JsonEventDecoder::new(metrics.clone(), BodyEncoding::Utf8),
            metrics,
        )
    }

    fn bodies(events: &[Event]) -> Vec<&str> {
        events
            .iter()
            .map(|e| std::str::from_utf8(e.body()).unwrap())
            .collect()
    }

    #[test]
    fn documents_are_yielded_in_order() {
        let docs: Vec<_> = JsonDocuments::new(&b" {\"a\":1}\n\n{\"b\":[1,2]} {}"[..])
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[0]["a"], 1);
        assert!(docs[2].is_empty());
    }

    #[test]
    fn documents_stop_after_first_failure() {
        let mut docs = JsonDocuments::new(&b"{\"a\":1} {\"b\": } {\"c\":3}"[..]);
        assert!(docs.next().unwrap().is_ok());
        assert!(matches!(docs.next(), Some(Err(IngestError::MalformedJson(_)))));
        assert!(docs.next().is_none());
        assert!(docs.next().is_none());
    }

    #[test]
    fn non_object_documents_are_rejected() {
        let mut docs = JsonDocuments::new(&b"[1,2]"[..]);
        let err = docs.next().unwrap().unwrap_err();
        assert!(err.to_string().contains("an array"), "{err}");
    }

    #[test]
    fn canonicalizes_each_document() {
        let (decoder, metrics) = decoder();
        let headers: HeaderSet = [("User-Agent", "X")].into_iter().collect();

        let events = decoder
            .decode(
                Some(&b"{ \"b\" : 2, \"a\" : \"x\" }\n{\"c\":[1, 2]}"[..]),
                None,
                headers,
            )
            .unwrap();

        assert_eq!(bodies(&events), [r#"{"a":"x","b":2}"#, r#"{"c":[1,2]}"#]);
        assert!(events.iter().all(|e| e.headers().get("User-Agent") == Some("X")));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.arrivals.count, 1);
        assert_eq!(snapshot.parse_errors.count, 0);
        assert_eq!(snapshot.parse_latency.count, 2);
        assert_eq!(snapshot.event_size.count, 2);
        assert_eq!(snapshot.event_size.max, 15);
        assert_eq!(snapshot.event_size.min, 11);
        assert_eq!(snapshot.documents_per_request.max, 2);
        assert_eq!(snapshot.event_generation_latency.count, 1);
    }

    #[test]
    fn events_share_the_request_headers() {
        let (decoder, _) = decoder();
        let headers: HeaderSet = [("Accept", "text/html"), ("User-Agent", "X")]
            .into_iter()
            .collect();

        let events = decoder
            .decode(Some(&b"{\"a\":1}"[..]), None, headers.clone())
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].body(), br#"{"a":1}"#);
        assert_eq!(*events[0].headers(), headers);
    }

    #[test]
    fn numbers_keep_their_written_precision() {
        let (decoder, _) = decoder();
        let body = br#"{"id":123456789012345678901234567890,"big":1e400,"p":0.1000000000000000055511151231257827}"#;

        let events = decoder.decode(Some(&body[..]), None, HeaderSet::new()).unwrap();

        assert_eq!(
            bodies(&events),
            [r#"{"big":1e400,"id":123456789012345678901234567890,"p":0.1000000000000000055511151231257827}"#]
        );
    }

    #[test]
    fn deeply_nested_documents_decode() {
        let depth = 1000;
        let body = format!(
            "{{\"d\":{}0{}}}",
            "[".repeat(depth),
            "]".repeat(depth)
        );

        let (decoder, _) = decoder();
        let events = decoder
            .decode(Some(body.as_bytes()), None, HeaderSet::new())
            .unwrap();

        assert_eq!(bodies(&events), [body.as_str()]);
    }

    #[test]
    fn event_size_counts_utf16_units() {
        let (decoder, metrics) = decoder();
        decoder
            .decode(Some("{\"e\":\"😀\"}".as_bytes()), None, HeaderSet::new())
            .unwrap();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.event_size.max, 10);
        assert_eq!(snapshot.event_size.min, 10);
    }

    #[test]
    fn empty_body_yields_no_events() {
        let (decoder, metrics) = decoder();
        let events = decoder.decode(Some(&b"  \n"[..]), None, HeaderSet::new()).unwrap();

        assert!(events.is_empty());
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.arrivals.count, 1);
        assert_eq!(snapshot.documents_per_request.count, 1);
        assert_eq!(snapshot.documents_per_request.max, 0);
        assert_eq!(snapshot.event_size.count, 0);
    }

    #[test]
    fn missing_body_records_nothing() {
        let (decoder, metrics) = decoder();
        let err = decoder
            .decode(None::<&[u8]>, Some("ISO-8859-1"), HeaderSet::new())
            .unwrap_err();

        assert!(matches!(err, IngestError::MissingBody));
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn unsupported_charset_is_a_parse_error_without_arrival() {
        let (decoder, metrics) = decoder();
        let err = decoder
            .decode(Some(&b"{}"[..]), Some("ISO-8859-1"), HeaderSet::new())
            .unwrap_err();

        assert!(matches!(err, IngestError::UnsupportedCharset(_)));
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.arrivals.count, 0);
        assert_eq!(snapshot.parse_errors.count, 1);
    }

    #[test]
    fn malformed_document_fails_the_whole_request() {
        let (decoder, metrics) = decoder();
        let err = decoder
            .decode(Some(&b"{\"a\":1}{\"b\""[..]), None, HeaderSet::new())
            .unwrap_err();

        assert!(matches!(err, IngestError::MalformedJson(_)));
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.arrivals.count, 1);
        assert_eq!(snapshot.parse_errors.count, 1);
        assert_eq!(snapshot.parse_latency.count, 1);
        assert_eq!(snapshot.event_size.count, 1);
        assert_eq!(snapshot.documents_per_request.count, 0);
        assert_eq!(snapshot.event_generation_latency.count, 0);
    }

    #[test]
    fn corrupt_gzip_is_reported_as_such() {
        let (decoder, metrics) = decoder();
        let body = DecodingStream::new(&b"{\"not\":\"gzip\"}"[..]);
        let err = decoder.decode(Some(body), None, HeaderSet::new()).unwrap_err();

        assert!(matches!(err, IngestError::CorruptStream(_)), "{err:?}");
        assert_eq!(metrics.snapshot().parse_errors.count, 1);
    }

    #[test]
    fn reads_through_gzip() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"{\"a\":1}").unwrap();
        let compressed = encoder.finish().unwrap();

        let (decoder, _) = decoder();
        let events = decoder
            .decode(
                Some(DecodingStream::new(&compressed[..])),
                None,
                HeaderSet::new(),
            )
            .unwrap();
        assert_eq!(bodies(&events), [r#"{"a":1}"#]);
    }

    #[test]
    fn failing_reads_are_server_faults() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer went away"))
            }
        }

        let (decoder, _) = decoder();
        let err = decoder.decode(Some(Broken), None, HeaderSet::new()).unwrap_err();
        assert!(matches!(err, IngestError::BodyRead(_)), "{err:?}");
    }

    #[test]
    fn event_bodies_can_follow_request_charset() {
        let metrics = Arc::new(MetricSink::new());
        let decoder = JsonEventDecoder::new(metrics, BodyEncoding::Request);
        let body = Charset::Utf16.encode("{\"a\":\"é\"}");

        let events = decoder
            .decode(Some(&body[..]), Some("UTF-16"), HeaderSet::new())
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].body(), Charset::Utf16.encode(r#"{"a":"é"}"#));
    }

    #[test]
    fn decodes_requests() {
        let (decoder, _) = decoder();
        let mut request = Request::new(
            [("Content-Type", "application/json; charset=utf-8"), ("X-Id", "7")],
            Some(&b"{\"a\":1}"[..]),
        );

        let events = decoder.decode_request(&mut request).unwrap();
        assert_eq!(events[0].headers().get("X-Id"), Some("7"));
        assert!(request.take_body().is_none());
    }
}
