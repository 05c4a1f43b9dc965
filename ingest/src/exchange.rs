//! The request/response pair a single ingestion call works on.
//!
//! Bodies are plain `Read` / `Write` streams. The content-encoding filter swaps
//! in the compressing variants of `RequestStream` and `ResponseStream`, so the
//! stages after it never know whether gzip is involved.

use std::io::{self, Read, Write};

use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use serde::Serialize;

use crate::api::IngestError;
use crate::compression::{DecodingStream, EncodingStream};
use crate::event::HeaderSet;

pub struct Request<R> {
    headers: Vec<(String, String)>,
    character_encoding: Option<String>,
    body: Option<R>,
}

impl<R: Read> Request<R> {
    /// Builds a request from the headers as received and an optional body.
    /// The declared character encoding is read from the `charset` parameter
    /// of `Content-Type`.
    pub fn new<I, K, V>(headers: I, body: Option<R>) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let headers: Vec<(String, String)> = headers
            .into_iter()
            .map(|(name, value)| (name.into(), value.into()))
            .collect();
        let character_encoding = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .and_then(|(_, value)| charset_param(value));

        Self {
            headers,
            character_encoding,
            body,
        }
    }

    /// First value of a header, looked up case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn header_set(&self) -> HeaderSet {
        self.headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect()
    }

    pub fn character_encoding(&self) -> Option<&str> {
        self.character_encoding.as_deref()
    }

    pub fn take_body(&mut self) -> Option<R> {
        self.body.take()
    }

    pub fn map_body<S: Read>(self, f: impl FnOnce(R) -> S) -> Request<S> {
        Request {
            headers: self.headers,
            character_encoding: self.character_encoding,
            body: self.body.map(f),
        }
    }
}

fn charset_param(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_string())
    })
}

pub enum RequestStream<R: Read> {
    Passthrough(R),
    Gzip(DecodingStream<R>),
}

impl<R: Read> Read for RequestStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            RequestStream::Passthrough(inner) => inner.read(buf),
            RequestStream::Gzip(inner) => inner.read(buf),
        }
    }
}

pub enum ResponseStream<W: Write> {
    Passthrough(W),
    Gzip(EncodingStream<W>),
}

impl<W: Write> ResponseStream<W> {
    /// Completes the body, emitting the gzip trailer when compressing, and
    /// returns the sink.
    pub fn close(self) -> io::Result<W> {
        match self {
            ResponseStream::Passthrough(mut inner) => {
                inner.flush()?;
                Ok(inner)
            }
            ResponseStream::Gzip(inner) => inner.close(),
        }
    }
}

impl<W: Write> Write for ResponseStream<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            ResponseStream::Passthrough(inner) => inner.write(buf),
            ResponseStream::Gzip(inner) => inner.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            ResponseStream::Passthrough(inner) => inner.flush(),
            ResponseStream::Gzip(inner) => inner.flush(),
        }
    }
}

/// Response under construction while the exchange runs.
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: ResponseStream<Vec<u8>>,
}

impl Response {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: ResponseStream::Passthrough(Vec::new()),
        }
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body_mut(&mut self) -> &mut ResponseStream<Vec<u8>> {
        &mut self.body
    }

    /// Routes everything written from now on through a gzip encoder.
    pub fn enable_gzip(&mut self) {
        let sink = match &mut self.body {
            ResponseStream::Passthrough(sink) => std::mem::take(sink),
            ResponseStream::Gzip(_) => return,
        };
        self.body = ResponseStream::Gzip(EncodingStream::new(sink, &mut self.headers));
    }

    pub fn write_json<T: Serialize>(&mut self, value: &T) -> Result<(), IngestError> {
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        serde_json::to_writer(&mut self.body, value)
            .map_err(|e| IngestError::Internal(format!("failed to write response: {e}")))
    }

    /// Finishes the body stream and releases the buffered bytes.
    pub fn complete(self) -> io::Result<CompletedResponse> {
        let body = self.body.close()?;
        Ok(CompletedResponse {
            status: self.status,
            headers: self.headers,
            body,
        })
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

/// What the hosting server sends back once the exchange is over.
#[derive(Debug)]
pub struct CompletedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl IntoResponse for CompletedResponse {
    fn into_response(self) -> axum::response::Response {
        (self.status, self.headers, self.body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use axum::http::header::CONTENT_ENCODING;

    use super::*;

    #[test]
    fn reads_charset_from_content_type() {
        let request = Request::new(
            [("Content-Type", "application/json; charset=\"UTF-16\"")],
            Some(Cursor::new(Vec::new())),
        );
        assert_eq!(request.character_encoding(), Some("UTF-16"));

        let request = Request::new([("content-type", "application/json")], Some(&b""[..]));
        assert_eq!(request.character_encoding(), None);
    }

    #[test]
    fn header_lookup_ignores_case_but_set_keeps_it() {
        let request = Request::new(
            [("User-Agent", "X"), ("Accept", "text/html")],
            Some(&b""[..]),
        );

        assert_eq!(request.header("user-agent"), Some("X"));
        assert_eq!(request.header("Accept-Encoding"), None);

        let set = request.header_set();
        assert_eq!(set.get("User-Agent"), Some("X"));
        assert_eq!(set.get("user-agent"), None);
    }

    #[test]
    fn gzip_response_is_marked_and_finished() {
        let mut response = Response::new();
        response.enable_gzip();
        response.enable_gzip();
        assert!(matches!(response.body_mut(), ResponseStream::Gzip(_)));
        assert_eq!(response.headers().get(CONTENT_ENCODING).unwrap(), "gzip");

        response.body_mut().write_all(b"ok").unwrap();
        let completed = response.complete().unwrap();

        assert_eq!(completed.status, StatusCode::OK);
        let mut plain = Vec::new();
        DecodingStream::new(&completed.body[..]).read_to_end(&mut plain).unwrap();
        assert_eq!(plain, b"ok");
    }
}
