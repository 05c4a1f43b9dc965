//! Content-Encoding handling for the ingestion exchange.
//!
//! The filter sits in front of the decoder: gzip request bodies are
//! decompressed on the fly and, when the client accepts it, the response body
//! is compressed. Whatever goes wrong further down the chain is turned into an
//! error response here, encoded the same way a successful one would be.

use std::io::{Read, Write};

use axum::http::header::{ACCEPT_ENCODING, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use tracing::{error, warn};

use crate::api::IngestError;
use crate::compression::DecodingStream;
use crate::exchange::{CompletedResponse, Request, RequestStream, Response};
use crate::prometheus::report_rejected_request;

/// Which directions of the exchange are gzip encoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Negotiation {
    pub gzip_request: bool,
    pub gzip_response: bool,
}

impl Negotiation {
    pub fn from_request<R: Read>(request: &Request<R>) -> Self {
        Self {
            gzip_request: mentions_gzip(request.header("Content-Encoding")),
            gzip_response: mentions_gzip(request.header("Accept-Encoding")),
        }
    }
}

// Substring match: "gzip, deflate" and "x-gzip" both count.
fn mentions_gzip(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.to_ascii_lowercase().contains("gzip"))
}

#[derive(Debug, Clone, Copy)]
pub struct ContentEncodingFilter {
    advertise_gzip: bool,
}

impl ContentEncodingFilter {
    pub fn new(advertise_gzip: bool) -> Self {
        Self { advertise_gzip }
    }

    /// Runs `next` with encoding-aware request and response streams and
    /// returns the completed response.
    pub fn handle<R, F>(&self, request: Request<R>, next: F) -> CompletedResponse
    where
        R: Read,
        F: FnOnce(&mut Request<RequestStream<R>>, &mut Response) -> Result<(), IngestError>,
    {
        let negotiation = Negotiation::from_request(&request);
        let mut request = request.map_body(|body| {
            if negotiation.gzip_request {
                RequestStream::Gzip(DecodingStream::new(body))
            } else {
                RequestStream::Passthrough(body)
            }
        });

        let mut response = self.prepare(negotiation);
        let outcome = next(&mut request, &mut response).and_then(|()| {
            response
                .complete()
                .map_err(|e| IngestError::Internal(format!("failed to complete response: {e}")))
        });

        match outcome {
            Ok(completed) => completed,
            Err(err) => self.reject(negotiation, err),
        }
    }

    fn prepare(&self, negotiation: Negotiation) -> Response {
        let mut response = Response::new();
        if self.advertise_gzip {
            response
                .headers_mut()
                .insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        }
        if negotiation.gzip_response {
            response.enable_gzip();
        }
        response
    }

    /// Anything already written is discarded; the error message becomes the body.
    /// Also used by the hosting server for failures outside `handle`.
    pub fn reject(&self, negotiation: Negotiation, err: IngestError) -> CompletedResponse {
        warn!(
            error = err.kind(),
            gzip_request = negotiation.gzip_request,
            "rejecting request: {}",
            err
        );
        report_rejected_request(err.kind());

        let mut response = self.prepare(negotiation);
        response.set_status(err.status_code());
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );

        let written = response
            .body_mut()
            .write_all(err.to_string().as_bytes())
            .and_then(|()| response.complete());
        match written {
            Ok(completed) => completed,
            Err(write_err) => {
                error!("failed to write error response: {}", write_err);
                CompletedResponse {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    headers: HeaderMap::new(),
                    body: Vec::new(),
                }
            }
        }
    }
}
