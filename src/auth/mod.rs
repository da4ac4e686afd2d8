//! Pre-shared key authentication for the sync routes.
//!
//! Keys are compared in constant time.

use axum::{
    extract::Request,
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

use crate::db::DocumentStore;
use crate::errors::{StoreError, StoreErrorWithSeq};

/// Header name for the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Reject requests that do not carry `expected_psk`.
///
/// Without a configured key every request passes.
pub async fn psk_auth_layer(
    expected_psk: Option<String>,
    store: DocumentStore,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = expected_psk else {
        return next.run(request).await;
    };

    match presented_key(&request) {
        Some(key) if constant_time_compare(&key, &expected) => next.run(request).await,
        Some(_) => {
            tracing::warn!("Rejected sync request with invalid API key");
            unauthorized_response(&store, "Invalid API key").await
        }
        None => unauthorized_response(&store, "Missing API key").await,
    }
}

/// The key from `x-api-key`, or else from an `Authorization: Bearer` header.
fn presented_key(request: &Request) -> Option<String> {
    let headers = request.headers();
    headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.strip_prefix("Bearer "))
        })
        .map(str::to_string)
}

/// Perform constant-time string comparison.
fn constant_time_compare(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

async fn unauthorized_response(store: &DocumentStore, message: &str) -> Response {
    StoreErrorWithSeq {
        error: StoreError::Unauthorized(message.to_string()),
        update_seq: store.update_seq().await.unwrap_or(0),
    }
    .into_response()
}
