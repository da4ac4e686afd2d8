//! Sync server HTTP API.
//!
//! Serves one document store to replicating clients.

mod documents;

pub use documents::*;

use std::sync::Arc;

use axum::{
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth;
use crate::config::Config;
use crate::db::DocumentStore;
use crate::errors::{StoreError, StoreErrorWithSeq};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: DocumentStore,
    pub config: Arc<Config>,
}

/// Success response envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
    pub update_seq: i64,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T, update_seq: i64) -> Self {
        Self {
            success: true,
            data,
            update_seq,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Response type that can be either success or error.
pub type ApiResult<T> = Result<ApiResponse<T>, StoreErrorWithSeq>;

/// Wrap a store result in the response envelope, stamped with the current
/// update sequence.
pub async fn respond<T: Serialize>(
    store: &DocumentStore,
    result: Result<T, StoreError>,
) -> ApiResult<T> {
    let update_seq = store.update_seq().await.unwrap_or(0);
    match result {
        Ok(data) => Ok(ApiResponse::new(data, update_seq)),
        Err(error) => Err(StoreErrorWithSeq { error, update_seq }),
    }
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let psk = state.config.api_psk.clone();
    let store = state.store.clone();

    let db_routes = Router::new()
        .route("/", get(get_info))
        .route("/_changes", get(get_changes))
        .route("/_revs_diff", post(post_revs_diff))
        .route("/_bulk_docs", post(post_bulk_docs))
        .route("/_all_docs", get(get_all_docs))
        .route("/{id}", get(get_document))
        .layer(middleware::from_fn(move |req, next| {
            auth::psk_auth_layer(psk.clone(), store.clone(), req, next)
        }));

    Router::new()
        .nest("/db", db_routes)
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}
