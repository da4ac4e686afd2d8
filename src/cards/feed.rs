//! Card-level change feed.
//!
//! Translates raw document changes into card and review events. A card is
//! stored as two documents, so the translation joins them and suppresses the
//! progress half of a write whose content event will report it anyway.

use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

use super::{from_body, DocKind};
use crate::db::{ChangeSubscription, DocumentStore};
use crate::errors::StoreError;
use crate::models::{Card, CardChange, CardContent, DocChange, Progress, ReviewSummary};

/// An event on the card store's feed.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Card(CardChange),
    /// The persisted review summary changed; `None` when it was deleted
    Review(Option<ReviewSummary>),
}

/// A subscription to card store events. Dropping it de-registers it.
pub struct StoreEvents {
    receiver: broadcast::Receiver<StoreEvent>,
}

impl StoreEvents {
    pub(crate) fn new(receiver: broadcast::Receiver<StoreEvent>) -> Self {
        Self { receiver }
    }

    /// Wait for the next event. `Ok(None)` means the store has shut down.
    pub async fn recv(&mut self) -> Result<Option<StoreEvent>, StoreError> {
        match self.receiver.recv().await {
            Ok(event) => Ok(Some(event)),
            Err(RecvError::Closed) => Ok(None),
            Err(RecvError::Lagged(skipped)) => Err(StoreError::Internal(format!(
                "Card feed subscriber missed {} events",
                skipped
            ))),
        }
    }

    pub fn unsubscribe(self) {}
}

/// Changes read per query when replaying after falling behind.
const REPLAY_PAGE: usize = 256;

/// Run until `shutdown` fires or the document feed closes.
///
/// If the translator falls behind the document feed it replays everything
/// after the last change it translated from the store, then skips the
/// buffered changes the replay already covered.
pub(crate) async fn translate_changes(
    docs: DocumentStore,
    mut feed: ChangeSubscription,
    events: broadcast::Sender<StoreEvent>,
    shutdown: CancellationToken,
) {
    let mut last_seq = feed.position();
    let mut replayed_to = 0;

    loop {
        let change = tokio::select! {
            _ = shutdown.cancelled() => break,
            change = feed.recv() => change,
        };

        match change {
            Ok(Some(change)) => {
                if change.seq <= replayed_to {
                    continue;
                }
                last_seq = change.seq;
                emit(&docs, &events, &change).await;
            }
            Ok(None) => break,
            Err(err) => {
                tracing::warn!("Card feed fell behind after seq {}: {}", last_seq, err);
                match replay(&docs, &events, last_seq).await {
                    Ok(seq) => {
                        last_seq = seq;
                        replayed_to = seq;
                    }
                    Err(err) => tracing::error!("Card feed replay failed: {}", err),
                }
            }
        }
    }

    tracing::debug!("Card feed translator stopped");
}

async fn emit(docs: &DocumentStore, events: &broadcast::Sender<StoreEvent>, change: &DocChange) {
    match translate(docs, change).await {
        Ok(Some(event)) => {
            let _ = events.send(event);
        }
        Ok(None) => {}
        Err(err) => tracing::warn!("Dropped change for {}: {}", change.id, err),
    }
}

/// Translate every change committed after `since`, read from the store.
/// Returns the last sequence replayed.
async fn replay(
    docs: &DocumentStore,
    events: &broadcast::Sender<StoreEvent>,
    since: i64,
) -> Result<i64, StoreError> {
    let mut seq = since;
    loop {
        let page = docs.changes_since(seq, REPLAY_PAGE).await?;
        for change in &page.results {
            emit(docs, events, change).await;
        }
        seq = seq.max(page.last_seq);
        if page.results.len() < REPLAY_PAGE {
            tracing::info!("Card feed replayed up to seq {}", seq);
            return Ok(seq);
        }
    }
}

async fn translate(docs: &DocumentStore, change: &DocChange) -> Result<Option<StoreEvent>, StoreError> {
    match DocKind::of(&change.id) {
        DocKind::Card(id) => {
            let Some(body) = change.doc.as_ref().filter(|_| !change.deleted) else {
                return Ok(Some(StoreEvent::Card(CardChange::deleted(id))));
            };
            let content: CardContent = from_body(body)?;
            let progress = match docs.get_document(&DocKind::progress_key(id)).await? {
                Some(doc) if !doc.deleted => from_body(&doc.body)?,
                _ => Progress::default(),
            };
            let card = Card::from_parts(id.to_string(), change.rev.clone(), content, progress);
            Ok(Some(StoreEvent::Card(CardChange::updated(card))))
        }
        DocKind::Progress(id) => {
            let Some(body) = change.doc.as_ref().filter(|_| !change.deleted) else {
                return Ok(None);
            };
            // Only report progress that is newer than the content; otherwise
            // the content change reports it.
            match docs.get_document(&DocKind::card_key(id)).await? {
                Some(card_doc) if !card_doc.deleted && card_doc.seq < change.seq => {
                    let content: CardContent = from_body(&card_doc.body)?;
                    let progress: Progress = from_body(body)?;
                    let card = Card::from_parts(id.to_string(), card_doc.rev, content, progress);
                    Ok(Some(StoreEvent::Card(CardChange::updated(card))))
                }
                _ => Ok(None),
            }
        }
        DocKind::Review => {
            let summary = match change.doc.as_ref().filter(|_| !change.deleted) {
                Some(body) => Some(from_body(body)?),
                None => None,
            };
            Ok(Some(StoreEvent::Review(summary)))
        }
        DocKind::Other => Ok(None),
    }
}
