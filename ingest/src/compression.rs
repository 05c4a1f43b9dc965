//! Gzip adapters presenting compressed request and response bodies as plain
//! `Read` / `Write` streams.
//!
//! Both adapters work incrementally: nothing is buffered beyond the codec's
//! own window, so a body is never held in memory in full.

use std::io::{self, Read, Write};

use axum::http::header::{CONTENT_ENCODING, CONTENT_LENGTH};
use axum::http::{HeaderMap, HeaderValue};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;

/// The bytes behind a `DecodingStream` are not a valid gzip stream, or the
/// stream ended before its trailer.
#[derive(Error, Debug)]
#[error("corrupt gzip stream: {reason}")]
pub struct CorruptStreamError {
    reason: String,
}

impl CorruptStreamError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Recovers the error raised by a `DecodingStream` from the `io::Error`
    /// that carried it through a reader stack. Any other io error is handed
    /// back untouched.
    pub fn from_io(err: io::Error) -> Result<Self, io::Error> {
        let carried = err
            .get_ref()
            .is_some_and(|inner| inner.is::<CorruptStreamError>());
        if !carried {
            return Err(err);
        }

        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<CorruptStreamError>()) {
            Some(Ok(corrupt)) => Ok(*corrupt),
            _ => Err(io::Error::from(kind)),
        }
    }
}

/// Lazily inflates a gzip-compressed source. Concatenated gzip members are
/// decoded back to back, as produced by clients that flush per document.
pub struct DecodingStream<R: Read> {
    decoder: MultiGzDecoder<R>,
}

impl<R: Read> DecodingStream<R> {
    pub fn new(source: R) -> Self {
        Self {
            decoder: MultiGzDecoder::new(source),
        }
    }

}

impl<R: Read> Read for DecodingStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.decoder.read(buf).map_err(|err| match err.kind() {
            // flate2 reports bad headers and corrupt deflate data as InvalidInput,
            // checksum mismatches as InvalidInput and a missing trailer as
            // UnexpectedEof. Anything else comes from the source itself.
            io::ErrorKind::InvalidInput
            | io::ErrorKind::InvalidData
            | io::ErrorKind::UnexpectedEof => io::Error::new(
                io::ErrorKind::InvalidData,
                CorruptStreamError::new(err.to_string()),
            ),
            _ => err,
        })
    }
}

/// Lazily deflates everything written into a gzip stream on `sink`.
///
/// `finish` (directly or through `close`) must run before the response is
/// considered complete, otherwise the gzip trailer is missing and the body
/// cannot be decoded by the client.
pub struct EncodingStream<W: Write> {
    encoder: GzEncoder<W>,
    finished: bool,
}

impl<W: Write> EncodingStream<W> {
    /// Creating the stream marks the response as gzip-encoded. A previously
    /// set `Content-Length` no longer describes the body and is dropped.
    pub fn new(sink: W, response_headers: &mut HeaderMap) -> Self {
        response_headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        response_headers.remove(CONTENT_LENGTH);

        Self {
            encoder: GzEncoder::new(sink, Compression::default()),
            finished: false,
        }
    }

    /// Writes all pending compressed data and the gzip trailer into the sink,
    /// leaving the sink open. Calling it again is a no-op.
    pub fn finish(&mut self) -> io::Result<()> {
        self.encoder.try_finish()?;
        self.finished = true;
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn get_ref(&self) -> &W {
        self.encoder.get_ref()
    }

    /// Finishes the stream, releases the codec and returns the sink.
    pub fn close(self) -> io::Result<W> {
        self.encoder.finish()
    }
}

impl<W: Write> Write for EncodingStream<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.finished {
            return Err(io::Error::new(io::ErrorKind::Other, "gzip stream already finished"));
        }
        self.encoder.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.encoder.flush()
    }
}
