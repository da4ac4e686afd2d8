//! One live replication between the local store and a peer.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::options::{ActiveInfo, SyncChange, SyncDirection, SyncOptions};
use super::peer::Peer;
use crate::cards::{from_body, to_body};
use crate::db::{ChangeSubscription, DocumentStore};
use crate::errors::StoreError;
use crate::models::{ChangesPage, DocChange, Document, RevRef};

/// Changes requested per page while scanning a feed.
const PAGE_SIZE: usize = 500;
/// Long-poll window when waiting for the peer to change.
const REMOTE_POLL: Duration = Duration::from_secs(25);

/// Delivers callbacks for one association only.
///
/// Each delivery holds the read side of the shared generation lock and
/// checks that its association is still current. Replacing the association
/// takes the write side, so once it returns no stale callback can run.
pub(crate) struct Emitter {
    gate: Arc<RwLock<u64>>,
    generation: u64,
    options: SyncOptions,
}

impl Emitter {
    pub(crate) fn new(gate: Arc<RwLock<u64>>, generation: u64, options: SyncOptions) -> Self {
        Self {
            gate,
            generation,
            options,
        }
    }

    async fn emit(&self, deliver: impl FnOnce(&SyncOptions)) {
        let current = self.gate.read().await;
        if *current == self.generation {
            deliver(&self.options);
        }
    }

    async fn change(&self, change: &SyncChange) {
        self.emit(|options| {
            if let Some(callback) = &options.on_change {
                callback(change);
            }
        })
        .await
    }

    async fn active(&self, direction: SyncDirection) {
        self.emit(|options| {
            if let Some(callback) = &options.on_active {
                callback(&ActiveInfo { direction });
            }
        })
        .await
    }

    async fn idle(&self) {
        self.emit(|options| {
            if let Some(callback) = &options.on_idle {
                callback();
            }
        })
        .await
    }

    async fn error(&self, err: &StoreError) {
        self.emit(|options| {
            if let Some(callback) = &options.on_error {
                callback(err);
            }
        })
        .await
    }
}

/// Replication position, stored as a local document per peer.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Checkpoint {
    pull_since: i64,
    push_since: i64,
}

pub(crate) struct Session {
    local: DocumentStore,
    remote: Arc<dyn Peer>,
    checkpoint_id: String,
    emitter: Emitter,
    batch_size: usize,
    cancel: CancellationToken,
}

impl Session {
    pub(crate) fn new(
        local: DocumentStore,
        remote: Arc<dyn Peer>,
        remote_instance: &str,
        emitter: Emitter,
        cancel: CancellationToken,
    ) -> Self {
        let batch_size = emitter.options.batch_size.max(1);
        Self {
            local,
            remote,
            checkpoint_id: format!("sync-{}", remote_instance),
            emitter,
            batch_size,
            cancel,
        }
    }

    /// Replicate until cancelled or a transport error occurs.
    pub(crate) async fn run(self) {
        let result = tokio::select! {
            _ = self.cancel.cancelled() => Ok(()),
            result = self.replicate() => result,
        };

        match result {
            Ok(()) => tracing::debug!("Sync session with {} stopped", self.remote.describe()),
            Err(err) => {
                tracing::warn!("Sync with {} failed: {}", self.remote.describe(), err);
                self.emitter.error(&err).await;
            }
        }
    }

    async fn replicate(&self) -> Result<(), StoreError> {
        let mut checkpoint = self.load_checkpoint().await?;
        let mut local_feed = self.local.subscribe();
        let mut first_exchange = true;
        let mut idle = false;

        tracing::info!("Sync session with {} started", self.remote.describe());

        loop {
            local_feed.clear();

            let (pull, pull_since) = self.pending_pull(checkpoint.pull_since).await?;
            let (push, push_since) = self.pending_push(checkpoint.push_since).await?;

            // The total is only known for a one-way catch-up.
            let determinate = first_exchange && (pull.is_empty() != push.is_empty());
            first_exchange = false;
            let quiescent = pull.is_empty() && push.is_empty();

            if !pull.is_empty() {
                idle = false;
                self.transfer(SyncDirection::Pull, pull, determinate).await?;
            }
            if !push.is_empty() {
                idle = false;
                self.transfer(SyncDirection::Push, push, determinate).await?;
            }

            let advanced = Checkpoint {
                pull_since,
                push_since,
            };
            if advanced.pull_since != checkpoint.pull_since
                || advanced.push_since != checkpoint.push_since
            {
                self.save_checkpoint(&advanced).await?;
            }
            checkpoint = advanced;

            if quiescent {
                if !idle {
                    idle = true;
                    self.emitter.idle().await;
                }
                self.wait_for_work(&mut local_feed, checkpoint.pull_since)
                    .await?;
            }
        }
    }

    async fn transfer(
        &self,
        direction: SyncDirection,
        docs: Vec<Document>,
        determinate: bool,
    ) -> Result<(), StoreError> {
        self.emitter.active(direction).await;

        let total = docs.len();
        let mut done = 0;
        for batch in docs.chunks(self.batch_size) {
            match direction {
                SyncDirection::Pull => {
                    self.local.apply_replicated(batch.to_vec()).await?;
                }
                SyncDirection::Push => {
                    self.remote.bulk_docs(batch.to_vec()).await?;
                }
            }

            done += batch.len();
            let change = SyncChange {
                direction,
                progress: determinate.then(|| done as f64 / total as f64),
                docs: batch.to_vec(),
            };
            tracing::debug!(
                "Sync {} batch of {} ({}/{})",
                direction.as_str(),
                batch.len(),
                done,
                total
            );
            self.emitter.change(&change).await;
        }

        Ok(())
    }

    /// Remote revisions the local store wants, and the remote sequence scanned to.
    async fn pending_pull(&self, since: i64) -> Result<(Vec<Document>, i64), StoreError> {
        let mut wanted = Vec::new();
        let mut seq = since;

        loop {
            let page = self.remote.changes(seq, PAGE_SIZE).await?;
            let exhausted = page.results.len() < PAGE_SIZE;
            seq = seq.max(page.last_seq);

            let offered = offered_revs(&page);
            if !offered.is_empty() {
                let missing = self.local.revs_diff(&offered).await?;
                wanted.extend(select_wanted(page.results, missing));
            }
            if exhausted {
                break;
            }
        }

        Ok((wanted, seq))
    }

    /// Local revisions the peer wants, and the local sequence scanned to.
    async fn pending_push(&self, since: i64) -> Result<(Vec<Document>, i64), StoreError> {
        let mut wanted = Vec::new();
        let mut seq = since;

        loop {
            let page = self.local.changes_since(seq, PAGE_SIZE).await?;
            let exhausted = page.results.len() < PAGE_SIZE;
            seq = seq.max(page.last_seq);

            let offered = offered_revs(&page);
            if !offered.is_empty() {
                let missing = self.remote.revs_diff(&offered).await?;
                wanted.extend(select_wanted(page.results, missing));
            }
            if exhausted {
                break;
            }
        }

        Ok((wanted, seq))
    }

    async fn wait_for_work(
        &self,
        local_feed: &mut ChangeSubscription,
        remote_since: i64,
    ) -> Result<(), StoreError> {
        loop {
            tokio::select! {
                // A lagged feed also means there is work.
                _ = local_feed.recv() => return Ok(()),
                changed = self.remote.wait_for_change(remote_since, REMOTE_POLL) => {
                    if changed? {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn load_checkpoint(&self) -> Result<Checkpoint, StoreError> {
        match self.local.get_local(&self.checkpoint_id).await? {
            Some(body) => from_body(&body),
            None => Ok(Checkpoint::default()),
        }
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        self.local
            .put_local(&self.checkpoint_id, &to_body(checkpoint)?)
            .await
    }
}

fn offered_revs(page: &ChangesPage) -> Vec<RevRef> {
    page.results
        .iter()
        .map(|change| RevRef::new(&change.id, &change.rev))
        .collect()
}

fn select_wanted(changes: Vec<DocChange>, missing: Vec<RevRef>) -> Vec<Document> {
    let missing: HashSet<(String, String)> = missing
        .into_iter()
        .map(|rev| (rev.id, rev.rev))
        .collect();

    changes
        .into_iter()
        .filter(|change| missing.contains(&(change.id.clone(), change.rev.clone())))
        .map(|change| change.to_document())
        .collect()
}
