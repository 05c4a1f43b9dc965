use std::io;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Method};
use axum::response::{IntoResponse, Response};
use futures::TryStreamExt;
use tokio::runtime::Handle;
use tokio_util::io::{StreamReader, SyncIoBridge};
use tracing::instrument;

use crate::api::{IngestError, IngestResponse, IngestResponseCode};
use crate::exchange::Request;
use crate::middleware::Negotiation;
use crate::router;

/// Ingests one request body. Decoding is synchronous streaming work, so the
/// whole exchange runs on the blocking pool, pulling body chunks from the
/// connection as the parser asks for them; delivery to the sink is driven
/// back on the runtime from there.
#[instrument(
    skip_all,
    fields(method, content_encoding, accept_encoding, content_type, events)
)]
pub async fn ingest(
    state: State<router::State>,
    method: Method,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let span = tracing::Span::current();
    span.record("method", method.as_str());
    for (field, header) in [
        ("content_encoding", "content-encoding"),
        ("accept_encoding", "accept-encoding"),
        ("content_type", "content-type"),
    ] {
        if let Some(value) = headers.get(header).and_then(|v| v.to_str().ok()) {
            span.record(field, value);
        }
    }

    // Header values that are not visible ASCII are not handed on.
    let pairs: Vec<(String, String)> = headers
        .iter()
        .filter_map(|(name, value)| Some((name.to_string(), value.to_str().ok()?.to_string())))
        .collect();

    // The bridge has to be built on the runtime it will block on.
    let chunks = body.into_data_stream().map_err(io::Error::other);
    let reader = SyncIoBridge::new(StreamReader::new(chunks));
    let request = Request::new(pairs, Some(reader));

    let filter = state.filter;
    let negotiation = Negotiation::from_request(&request);
    let runtime = Handle::current();
    let task_span = span.clone();
    let exchange = tokio::task::spawn_blocking(move || {
        let _entered = task_span.enter();
        state.filter.handle(request, |request, response| {
            let events = state.decoder.decode_request(request)?;
            let count = events.len();
            if !events.is_empty() {
                runtime.block_on(state.sink.send_batch(events))?;
            }
            tracing::Span::current().record("events", count);

            response.write_json(&IngestResponse {
                status: IngestResponseCode::Ok,
                events: count,
            })
        })
    })
    .await;

    match exchange {
        Ok(completed) => completed.into_response(),
        Err(e) => filter
            .reject(
                negotiation,
                IngestError::Internal(format!("ingest task failed: {e}")),
            )
            .into_response(),
    }
}
