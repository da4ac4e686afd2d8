//! Error handling module for the card store.
//!
//! Provides one error type shared by the document store, the card store, the
//! replication engine and the sync server, plus the wire payload callers
//! pattern-match on.

use std::error::Error as _;
use std::io::ErrorKind;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Error names and codes as constants to avoid stringly-typed errors.
pub mod codes {
    pub const NOT_FOUND: &str = "not_found";
    pub const CONFLICT: &str = "conflict";
    pub const BAD_REQUEST: &str = "bad_request";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const INVALID_SERVER: &str = "INVALID_SERVER";
    pub const CONFIG_ERROR: &str = "config_error";
    pub const DATABASE_ERROR: &str = "database_error";
    pub const SEARCH_ERROR: &str = "search_error";
    pub const INTERNAL_ERROR: &str = "internal_error";

    pub const ECONNREFUSED: &str = "ECONNREFUSED";
    pub const ENOTFOUND: &str = "ENOTFOUND";
    pub const ENOENT: &str = "ENOENT";
    pub const ETIMEDOUT: &str = "ETIMEDOUT";
    pub const ECONNRESET: &str = "ECONNRESET";
    pub const EIO: &str = "EIO";
}

/// Why a document could not be found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundReason {
    /// The document never existed.
    Missing,
    /// A tombstone exists for the document.
    Deleted,
}

impl NotFoundReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotFoundReason::Missing => "missing",
            NotFoundReason::Deleted => "deleted",
        }
    }
}

/// Store error type.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Document is missing or deleted
    NotFound(NotFoundReason),
    /// A live document already occupies the id
    Conflict(String),
    /// Malformed request (bad revision token, bad JSON)
    BadRequest(String),
    /// Authentication required
    Unauthorized(String),
    /// Sync server reference is malformed or of the wrong kind
    InvalidServer(String),
    /// Transport failure talking to a sync server, with the transport's code
    Network { code: String, message: String },
    /// Invalid configuration value
    Config(String),
    /// Database error
    Database(String),
    /// Search index error
    Search(String),
    /// Internal error
    Internal(String),
}

impl StoreError {
    pub fn missing() -> Self {
        StoreError::NotFound(NotFoundReason::Missing)
    }

    pub fn deleted() -> Self {
        StoreError::NotFound(NotFoundReason::Deleted)
    }

    /// Get the numeric status for this error.
    pub fn status(&self) -> u16 {
        match self {
            StoreError::NotFound(_) => 404,
            StoreError::Conflict(_) => 409,
            StoreError::BadRequest(_) => 400,
            StoreError::Unauthorized(_) => 401,
            StoreError::InvalidServer(_) => 400,
            StoreError::Network { .. } => 503,
            StoreError::Config(_) => 500,
            StoreError::Database(_) => 500,
            StoreError::Search(_) => 500,
            StoreError::Internal(_) => 500,
        }
    }

    /// Get the error name.
    pub fn name(&self) -> &'static str {
        match self {
            StoreError::NotFound(_) => codes::NOT_FOUND,
            StoreError::Conflict(_) => codes::CONFLICT,
            StoreError::BadRequest(_) => codes::BAD_REQUEST,
            StoreError::Unauthorized(_) => codes::UNAUTHORIZED,
            StoreError::InvalidServer(_) => codes::INVALID_SERVER,
            StoreError::Network { .. } => "network_error",
            StoreError::Config(_) => codes::CONFIG_ERROR,
            StoreError::Database(_) => codes::DATABASE_ERROR,
            StoreError::Search(_) => codes::SEARCH_ERROR,
            StoreError::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Machine-readable code. Transport errors report the transport's code verbatim.
    pub fn code(&self) -> &str {
        match self {
            StoreError::Network { code, .. } => code,
            other => other.name(),
        }
    }

    /// Get the error message.
    pub fn message(&self) -> String {
        match self {
            StoreError::NotFound(_) => "missing".to_string(),
            StoreError::Conflict(msg) => msg.clone(),
            StoreError::BadRequest(msg) => msg.clone(),
            StoreError::Unauthorized(msg) => msg.clone(),
            StoreError::InvalidServer(msg) => msg.clone(),
            StoreError::Network { message, .. } => message.clone(),
            StoreError::Config(msg) => msg.clone(),
            StoreError::Database(msg) => msg.clone(),
            StoreError::Search(msg) => msg.clone(),
            StoreError::Internal(msg) => msg.clone(),
        }
    }

    pub fn reason(&self) -> Option<&'static str> {
        match self {
            StoreError::NotFound(reason) => Some(reason.as_str()),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn payload(&self) -> ErrorPayload {
        ErrorPayload {
            status: self.status(),
            name: self.name().to_string(),
            message: self.message(),
            reason: self.reason().map(str::to_string),
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.reason() {
            Some(reason) => write!(f, "{}: {} ({})", self.name(), self.message(), reason),
            None => write!(f, "{}: {}", self.code(), self.message()),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        StoreError::Database(format!("Database error: {}", err))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("JSON error: {:?}", err);
        StoreError::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<tantivy::TantivyError> for StoreError {
    fn from(err: tantivy::TantivyError) -> Self {
        tracing::error!("Search error: {:?}", err);
        StoreError::Search(format!("Search error: {}", err))
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            tracing::error!("Malformed sync response: {:?}", err);
            return StoreError::Internal(format!("Malformed sync response: {}", err));
        }
        let code = transport_code(&err);
        tracing::debug!("Transport error {}: {:?}", code, err);
        StoreError::Network {
            code: code.to_string(),
            message: err.to_string(),
        }
    }
}

/// Map a transport failure onto the socket-level code a caller can match on.
fn transport_code(err: &reqwest::Error) -> &'static str {
    if err.is_timeout() {
        return codes::ETIMEDOUT;
    }

    let mut source = err.source();
    while let Some(inner) = source {
        if let Some(io) = inner.downcast_ref::<std::io::Error>() {
            match io.kind() {
                ErrorKind::ConnectionRefused => return codes::ECONNREFUSED,
                ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => {
                    return codes::ECONNRESET
                }
                ErrorKind::TimedOut => return codes::ETIMEDOUT,
                ErrorKind::NotFound => return codes::ENOENT,
                _ => {}
            }
        }
        let text = inner.to_string();
        if text.contains("dns error") || text.contains("failed to lookup address") {
            return codes::ENOTFOUND;
        }
        source = inner.source();
    }

    if err.is_connect() {
        codes::ECONNREFUSED
    } else {
        codes::EIO
    }
}

/// Error payload as seen by callers: `{ status, name, message, reason? }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub status: u16,
    pub name: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<ErrorPayload> for StoreError {
    fn from(payload: ErrorPayload) -> Self {
        match payload.name.as_str() {
            codes::NOT_FOUND => match payload.reason.as_deref() {
                Some("deleted") => StoreError::deleted(),
                _ => StoreError::missing(),
            },
            codes::CONFLICT => StoreError::Conflict(payload.message),
            codes::BAD_REQUEST => StoreError::BadRequest(payload.message),
            codes::UNAUTHORIZED => StoreError::Unauthorized(payload.message),
            codes::DATABASE_ERROR => StoreError::Database(payload.message),
            codes::SEARCH_ERROR => StoreError::Search(payload.message),
            _ => StoreError::Internal(payload.message),
        }
    }
}

/// Error response envelope.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorPayload,
    pub update_seq: i64,
}

impl ErrorResponse {
    pub fn new(error: &StoreError, update_seq: i64) -> Self {
        Self {
            success: false,
            error: error.payload(),
            update_seq,
        }
    }
}

/// Wrapper type for errors that carry the store's update sequence.
pub struct StoreErrorWithSeq {
    pub error: StoreError,
    pub update_seq: i64,
}

impl IntoResponse for StoreErrorWithSeq {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.error.status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse::new(&self.error, self.update_seq);
        (status, Json(body)).into_response()
    }
}
