//! Error taxonomy for the structured OCR pipeline.
//!
//! Every failure keeps its own variant internally so logs can tell them apart.
//! Only the HTTP boundary flattens them into a status code and a `detail` string.

use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OcrError {
    /// No credential in the request header nor in the environment.
    #[error("Mistral API key not provided")]
    Auth,

    /// File extension outside {jpg, jpeg, png, pdf}.
    #[error("Unsupported file format: {extension}")]
    UnsupportedFormat { extension: String },

    /// A provider call failed, returned non-2xx, or sent an unreadable body.
    #[error("Mistral {operation} failed{}: {message}", fmt_status(.status))]
    Upstream {
        operation: &'static str,
        status: Option<u16>,
        message: String,
    },

    /// Structured output did not match the requested schema.
    #[error("Structured output failed schema validation: {0}")]
    SchemaValidation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn fmt_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({})", s)).unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, OcrError>;

impl OcrError {
    pub fn upstream(operation: &'static str, err: reqwest::Error) -> Self {
        Self::Upstream {
            operation,
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }

    /// Stable label used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::UnsupportedFormat { .. } => "unsupported_format",
            Self::Upstream { .. } => "upstream",
            Self::SchemaValidation(_) => "schema_validation",
            Self::Io(_) => "io",
        }
    }

    /// Status code returned to HTTP callers.
    ///
    /// Everything except a missing credential surfaces as 500. Stricter
    /// mapping (400 / 502 / 422) can be introduced here alone.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Auth => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
