use std::io;

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::compression::CorruptStreamError;

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum IngestResponseCode {
    Ok = 1,
}

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct IngestResponse {
    pub status: IngestResponseCode,
    /// Number of events produced from the request body
    pub events: usize,
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("request has no readable body")]
    MissingBody,
    #[error("unsupported charset {0}: only UTF-8, UTF-16 and UTF-32 are accepted")]
    UnsupportedCharset(String),
    #[error("failed to parse request: {0}")]
    MalformedJson(#[from] serde_json::Error),
    #[error(transparent)]
    CorruptStream(#[from] CorruptStreamError),

    #[error("failed to read request body: {0}")]
    BodyRead(#[source] io::Error),
    #[error("failed to deliver events: {0}")]
    Sink(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl IngestError {
    /// Client faults are reported as 400, everything else as 500.
    pub fn status_code(&self) -> StatusCode {
        match self {
            IngestError::MissingBody
            | IngestError::UnsupportedCharset(_)
            | IngestError::MalformedJson(_)
            | IngestError::CorruptStream(_) => StatusCode::BAD_REQUEST,

            IngestError::BodyRead(_) | IngestError::Sink(_) | IngestError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Short label used for logging and metric tags.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::MissingBody => "missing_body",
            IngestError::UnsupportedCharset(_) => "unsupported_charset",
            IngestError::MalformedJson(_) => "malformed_json",
            IngestError::CorruptStream(_) => "corrupt_stream",
            IngestError::BodyRead(_) => "body_read",
            IngestError::Sink(_) => "sink",
            IngestError::Internal(_) => "internal",
        }
    }
}
