//! Replication peers.

use std::time::Duration;

use async_trait::async_trait;

use crate::db::DocumentStore;
use crate::errors::StoreError;
use crate::models::{ChangesPage, DbInfo, Document, RevRef};

/// The remote end of a replication.
#[async_trait]
pub trait Peer: Send + Sync {
    /// Human-readable name of the peer.
    fn describe(&self) -> String;

    async fn info(&self) -> Result<DbInfo, StoreError>;

    async fn changes(&self, since: i64, limit: usize) -> Result<ChangesPage, StoreError>;

    /// Which of the offered revisions the peer wants.
    async fn revs_diff(&self, offered: &[RevRef]) -> Result<Vec<RevRef>, StoreError>;

    /// Store replicated revisions. Returns how many were accepted.
    async fn bulk_docs(&self, docs: Vec<Document>) -> Result<usize, StoreError>;

    /// Block until the peer has a change after `since` or `timeout` passes.
    async fn wait_for_change(&self, since: i64, timeout: Duration) -> Result<bool, StoreError>;
}

/// A peer in the same process.
#[derive(Clone, Debug)]
pub struct LocalPeer {
    store: DocumentStore,
}

impl LocalPeer {
    pub fn new(store: DocumentStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Peer for LocalPeer {
    fn describe(&self) -> String {
        format!("local:{}", self.store.instance_id())
    }

    async fn info(&self) -> Result<DbInfo, StoreError> {
        self.store.info().await
    }

    async fn changes(&self, since: i64, limit: usize) -> Result<ChangesPage, StoreError> {
        self.store.changes_since(since, limit).await
    }

    async fn revs_diff(&self, offered: &[RevRef]) -> Result<Vec<RevRef>, StoreError> {
        self.store.revs_diff(offered).await
    }

    async fn bulk_docs(&self, docs: Vec<Document>) -> Result<usize, StoreError> {
        Ok(self.store.apply_replicated(docs).await?.len())
    }

    async fn wait_for_change(&self, since: i64, timeout: Duration) -> Result<bool, StoreError> {
        self.store.wait_for_change(since, timeout).await
    }
}
