use std::future::ready;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::Method;
use axum::{extract, routing::get, Json, Router};
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::BodyEncoding;
use crate::decoder::JsonEventDecoder;
use crate::endpoint;
use crate::middleware::ContentEncodingFilter;
use crate::prometheus::{export_stats, setup_metrics_recorder, track_metrics};
use crate::sinks::EventSink;
use crate::stats::{MetricSink, MetricsSnapshot};

#[derive(Clone)]
pub struct State {
    pub sink: Arc<dyn EventSink + Send + Sync>,
    pub decoder: JsonEventDecoder,
    pub filter: ContentEncodingFilter,
    pub metrics: Arc<MetricSink>,
}

async fn index() -> &'static str {
    "ingest"
}

async fn stats(state: extract::State<State>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

pub struct RouterOptions {
    pub body_encoding: BodyEncoding,
    pub advertise_gzip: bool,
    /// Installs the global prometheus recorder and serves `/metrics`
    pub export_prometheus: bool,
}

pub fn router<S: EventSink + Send + Sync + 'static>(
    sink: S,
    metrics: Arc<MetricSink>,
    options: RouterOptions,
) -> anyhow::Result<Router> {
    let state = State {
        sink: Arc::new(sink),
        decoder: JsonEventDecoder::new(metrics.clone(), options.body_encoding),
        filter: ContentEncodingFilter::new(options.advertise_gzip),
        metrics: metrics.clone(),
    };

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
        .allow_origin(AllowOrigin::mirror_request());

    let router = Router::new()
        .route("/", get(index).post(endpoint::ingest).put(endpoint::ingest))
        .route("/_readiness", get(index))
        .route("/_liveness", get(index))
        .route("/stats", get(stats))
        // Bodies are streamed into the decoder, so no size cap applies.
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(axum::middleware::from_fn(track_metrics))
        .with_state(state);

    // Installing a global recorder when ingest is used as a library (during tests etc)
    // does not work well.
    if options.export_prometheus {
        let recorder_handle = setup_metrics_recorder()?;
        Ok(router.route(
            "/metrics",
            get(move || {
                export_stats(&metrics.snapshot());
                ready(recorder_handle.render())
            }),
        ))
    } else {
        Ok(router)
    }
}
