//! Replication endpoints.

use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use super::{respond, ApiResult, AppState};
use crate::errors::StoreError;
use crate::models::{
    BulkDocsRequest, BulkDocsResponse, ChangesPage, DbInfo, Document, RevRef, RevsDiffRequest,
};

/// Longest a `_changes` request may hold the connection.
const MAX_LONG_POLL: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
pub struct ChangesQuery {
    #[serde(default)]
    pub since: i64,
    pub limit: Option<usize>,
    /// Long-poll wait in milliseconds
    pub timeout: Option<u64>,
}

/// GET /db - Database info.
pub async fn get_info(State(state): State<AppState>) -> ApiResult<DbInfo> {
    let result = state.store.info().await;
    respond(&state.store, result).await
}

/// GET /db/_changes - Changes after `since`, optionally waiting for one.
pub async fn get_changes(
    State(state): State<AppState>,
    Query(query): Query<ChangesQuery>,
) -> ApiResult<ChangesPage> {
    let limit = query.limit.unwrap_or(state.config.batch_size).max(1);
    let result = changes(&state, query.since, limit, query.timeout).await;
    respond(&state.store, result).await
}

async fn changes(
    state: &AppState,
    since: i64,
    limit: usize,
    timeout: Option<u64>,
) -> Result<ChangesPage, StoreError> {
    let page = state.store.changes_since(since, limit).await?;
    let Some(timeout) = timeout else {
        return Ok(page);
    };
    if !page.results.is_empty() {
        return Ok(page);
    }

    let wait = Duration::from_millis(timeout).min(MAX_LONG_POLL);
    if state.store.wait_for_change(since, wait).await? {
        state.store.changes_since(since, limit).await
    } else {
        Ok(page)
    }
}

/// POST /db/_revs_diff - Which of the offered revisions this store wants.
pub async fn post_revs_diff(
    State(state): State<AppState>,
    Json(request): Json<RevsDiffRequest>,
) -> ApiResult<Vec<RevRef>> {
    let result = state.store.revs_diff(&request.revs).await;
    respond(&state.store, result).await
}

/// POST /db/_bulk_docs - Store replicated revisions.
pub async fn post_bulk_docs(
    State(state): State<AppState>,
    Json(request): Json<BulkDocsRequest>,
) -> ApiResult<BulkDocsResponse> {
    let offered = request.docs.len();
    let result = state
        .store
        .apply_replicated(request.docs)
        .await
        .map(|accepted| BulkDocsResponse {
            accepted: accepted.len(),
        });

    if let Ok(response) = &result {
        tracing::debug!("Accepted {} of {} replicated docs", response.accepted, offered);
    }
    respond(&state.store, result).await
}

/// GET /db/_all_docs - All live documents, newest first.
pub async fn get_all_docs(State(state): State<AppState>) -> ApiResult<Vec<Document>> {
    let result = state.store.get_all().await;
    respond(&state.store, result).await
}

/// GET /db/{id} - A single live document.
pub async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Document> {
    let result = state.store.get(&id).await;
    respond(&state.store, result).await
}
