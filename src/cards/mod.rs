//! Card store: the domain layer over the document store.
//!
//! A card lives in two documents, `card-<id>` for its content and
//! `progress-<id>` for its review progress. The review summary is stored as
//! `review-default`. Callers only ever see the bare `<id>`.

mod feed;

pub use crate::db::IdGenerator;
pub use feed::*;

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::db::{DocumentStore, FEED_CAPACITY};
use crate::errors::StoreError;
use crate::models::{
    AvailableCards, Body, Card, CardContent, CardPatch, DocWrite, Document, Progress,
    ReviewSummary,
};
use crate::sync::{Replicator, ServerRef, SyncOptions};

const CARD_PREFIX: &str = "card-";
const PROGRESS_PREFIX: &str = "progress-";
const REVIEW_ID: &str = "review-default";

/// What a storage key refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DocKind<'a> {
    Card(&'a str),
    Progress(&'a str),
    Review,
    Other,
}

impl<'a> DocKind<'a> {
    pub(crate) fn of(doc_id: &'a str) -> Self {
        if let Some(id) = doc_id.strip_prefix(CARD_PREFIX) {
            DocKind::Card(id)
        } else if let Some(id) = doc_id.strip_prefix(PROGRESS_PREFIX) {
            DocKind::Progress(id)
        } else if doc_id == REVIEW_ID {
            DocKind::Review
        } else {
            DocKind::Other
        }
    }

    pub(crate) fn card_key(id: &str) -> String {
        format!("{}{}", CARD_PREFIX, id)
    }

    pub(crate) fn progress_key(id: &str) -> String {
        format!("{}{}", PROGRESS_PREFIX, id)
    }
}

pub(crate) fn to_body<T: Serialize>(value: &T) -> Result<Body, StoreError> {
    match serde_json::to_value(value)? {
        Value::Object(body) => Ok(body),
        other => Err(StoreError::Internal(format!(
            "Expected a JSON object, got {}",
            other
        ))),
    }
}

pub(crate) fn from_body<T: DeserializeOwned>(body: &Body) -> Result<T, StoreError> {
    Ok(serde_json::from_value(Value::Object(body.clone()))?)
}

/// Trim entries, drop blanks and repeats, keep the first occurrence order.
fn normalize_list(values: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty() && seen.insert(value.clone()))
        .collect()
}

/// Handle to a card store. Clones share the same store.
#[derive(Clone)]
pub struct CardStore {
    inner: Arc<CardStoreInner>,
}

struct CardStoreInner {
    docs: DocumentStore,
    events: broadcast::Sender<StoreEvent>,
    replicator: Replicator,
    shutdown: CancellationToken,
}

impl Drop for CardStoreInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl CardStore {
    /// Wrap a document store. Must be called within a tokio runtime.
    pub fn new(docs: DocumentStore) -> Self {
        let (events, _) = broadcast::channel(FEED_CAPACITY);
        let shutdown = CancellationToken::new();

        tokio::spawn(feed::translate_changes(
            docs.clone(),
            docs.subscribe(),
            events.clone(),
            shutdown.clone(),
        ));

        Self {
            inner: Arc::new(CardStoreInner {
                replicator: Replicator::new(docs.clone()),
                docs,
                events,
                shutdown,
            }),
        }
    }

    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(DocumentStore::open(path).await?))
    }

    pub async fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(DocumentStore::in_memory().await?))
    }

    /// The underlying document store.
    pub fn documents(&self) -> &DocumentStore {
        &self.inner.docs
    }

    /// Generate a card id. Successive ids strictly increase in collation order.
    pub fn generate_card_id(&self) -> String {
        self.inner.docs.next_id()
    }

    // ==================== CARDS ====================

    pub async fn get_card(&self, id: &str) -> Result<Card, StoreError> {
        let content = self.inner.docs.get(&DocKind::card_key(id)).await?;
        let progress = self.progress_of(id).await?.unwrap_or_default();
        card_from_document(id, &content, progress)
    }

    /// All live cards, newest first.
    pub async fn get_cards(&self) -> Result<Vec<Card>, StoreError> {
        let mut progress = self.progress_by_card().await?;
        let docs = self.inner.docs.all_with_prefix(CARD_PREFIX).await?;

        docs.iter()
            .map(|doc| {
                let id = &doc.id[CARD_PREFIX.len()..];
                let progress = progress.remove(id).unwrap_or_default();
                card_from_document(id, doc, progress)
            })
            .collect()
    }

    /// Create a card (no id) or apply a partial update to an existing one.
    pub async fn put_card(&self, patch: CardPatch) -> Result<Card, StoreError> {
        match patch.id.clone() {
            None => self.create_card(patch).await,
            Some(id) => self.update_card(&id, patch).await,
        }
    }

    async fn create_card(&self, patch: CardPatch) -> Result<Card, StoreError> {
        let id = self.generate_card_id();
        let now = Utc::now();
        let progress = patch.progress.unwrap_or_default();
        let content = CardContent {
            question: patch.question.unwrap_or_default(),
            answer: patch.answer.unwrap_or_default(),
            keywords: normalize_list(patch.keywords.unwrap_or_default()),
            tags: normalize_list(patch.tags.unwrap_or_default()),
            created: now,
            modified: now,
        };

        // Progress first so the content event sees it.
        self.write_progress(&id, &progress).await?;
        let doc = self
            .inner
            .docs
            .create(&DocKind::card_key(&id), to_body(&content)?)
            .await?;

        tracing::debug!("Created card {}", id);
        Ok(Card::from_parts(id, doc.rev, content, progress))
    }

    async fn update_card(&self, id: &str, patch: CardPatch) -> Result<Card, StoreError> {
        let key = DocKind::card_key(id);
        let current = self.inner.docs.get(&key).await?;
        let mut content: CardContent = from_body(&current.body)?;

        let touches_content = patch.question.is_some()
            || patch.answer.is_some()
            || patch.keywords.is_some()
            || patch.tags.is_some();

        let rev = if touches_content {
            if let Some(question) = patch.question {
                content.question = question;
            }
            if let Some(answer) = patch.answer {
                content.answer = answer;
            }
            if let Some(keywords) = patch.keywords {
                content.keywords = normalize_list(keywords);
            }
            if let Some(tags) = patch.tags {
                content.tags = normalize_list(tags);
            }
            content.modified = Utc::now().max(content.created);

            let mut write = DocWrite::update(&key, to_body(&content)?);
            write.rev = patch.rev;
            self.inner.docs.put(write).await?.rev
        } else {
            current.rev
        };

        let progress = match patch.progress {
            Some(progress) => {
                self.write_progress(id, &progress).await?;
                progress
            }
            None => self.progress_of(id).await?.unwrap_or_default(),
        };

        Ok(Card::from_parts(id.to_string(), rev, content, progress))
    }

    /// Delete a card and its progress record.
    pub async fn delete_card(&self, id: &str, rev: Option<&str>) -> Result<(), StoreError> {
        self.inner.docs.delete(&DocKind::card_key(id), rev).await?;

        match self.inner.docs.delete(&DocKind::progress_key(id), None).await {
            Ok(_) | Err(StoreError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }

        tracing::debug!("Deleted card {}", id);
        Ok(())
    }

    // ==================== PROGRESS ====================

    async fn progress_of(&self, id: &str) -> Result<Option<Progress>, StoreError> {
        match self.inner.docs.get_document(&DocKind::progress_key(id)).await? {
            Some(doc) if !doc.deleted => Ok(Some(from_body(&doc.body)?)),
            _ => Ok(None),
        }
    }

    async fn progress_by_card(&self) -> Result<HashMap<String, Progress>, StoreError> {
        let docs = self.inner.docs.all_with_prefix(PROGRESS_PREFIX).await?;
        docs.iter()
            .map(|doc| {
                let id = doc.id[PROGRESS_PREFIX.len()..].to_string();
                Ok((id, from_body(&doc.body)?))
            })
            .collect()
    }

    async fn write_progress(&self, id: &str, progress: &Progress) -> Result<(), StoreError> {
        let key = DocKind::progress_key(id);
        let body = to_body(progress)?;
        match self.inner.docs.get_document(&key).await? {
            Some(doc) if !doc.deleted => {
                self.inner.docs.put(DocWrite::update(key, body)).await?;
            }
            _ => {
                self.inner.docs.create(&key, body).await?;
            }
        }
        Ok(())
    }

    // ==================== ORPHANS ====================

    /// Cards that have no progress record.
    pub async fn get_orphaned_cards(&self) -> Result<Vec<Card>, StoreError> {
        let progress = self.progress_by_card().await?;
        let docs = self.inner.docs.all_with_prefix(CARD_PREFIX).await?;

        docs.iter()
            .filter(|doc| !progress.contains_key(&doc.id[CARD_PREFIX.len()..]))
            .map(|doc| card_from_document(&doc.id[CARD_PREFIX.len()..], doc, Progress::default()))
            .collect()
    }

    /// Ids of progress records whose card no longer exists.
    pub async fn get_orphaned_progress(&self) -> Result<Vec<String>, StoreError> {
        let cards: HashSet<String> = self
            .inner
            .docs
            .all_with_prefix(CARD_PREFIX)
            .await?
            .into_iter()
            .map(|doc| doc.id[CARD_PREFIX.len()..].to_string())
            .collect();

        Ok(self
            .inner
            .docs
            .all_with_prefix(PROGRESS_PREFIX)
            .await?
            .into_iter()
            .map(|doc| doc.id[PROGRESS_PREFIX.len()..].to_string())
            .filter(|id| !cards.contains(id))
            .collect())
    }

    pub async fn add_progress_record_for_card(&self, id: &str) -> Result<(), StoreError> {
        self.inner
            .docs
            .create(&DocKind::progress_key(id), to_body(&Progress::default())?)
            .await?;
        Ok(())
    }

    pub async fn delete_progress_record(&self, id: &str) -> Result<(), StoreError> {
        self.inner
            .docs
            .delete(&DocKind::progress_key(id), None)
            .await?;
        Ok(())
    }

    // ==================== REVIEW ====================

    pub async fn get_review(&self) -> Result<Option<ReviewSummary>, StoreError> {
        match self.inner.docs.get_document(REVIEW_ID).await? {
            Some(doc) if !doc.deleted => Ok(Some(from_body(&doc.body)?)),
            _ => Ok(None),
        }
    }

    pub async fn put_review(&self, summary: &ReviewSummary) -> Result<(), StoreError> {
        let body = to_body(summary)?;
        match self.inner.docs.get_document(REVIEW_ID).await? {
            Some(doc) if !doc.deleted => {
                self.inner.docs.put(DocWrite::update(REVIEW_ID, body)).await?;
            }
            _ => {
                self.inner.docs.create(REVIEW_ID, body).await?;
            }
        }
        Ok(())
    }

    /// Delete the persisted review. Deleting an absent review is a no-op.
    pub async fn delete_review(&self) -> Result<(), StoreError> {
        match self.inner.docs.delete(REVIEW_ID, None).await {
            Ok(_) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Count cards that are new or due at `review_time`.
    pub async fn get_available_cards(
        &self,
        review_time: DateTime<Utc>,
    ) -> Result<AvailableCards, StoreError> {
        let mut available = AvailableCards::default();
        for card in self.get_cards().await? {
            if card.progress.is_new() {
                available.new_cards += 1;
            } else if card.progress.overdueness(review_time) >= 0.0 {
                available.overdue_cards += 1;
            }
        }
        Ok(available)
    }

    /// Cards to start a review with: overdue cards, most overdue first, then
    /// new cards, oldest first.
    pub async fn get_cards_for_review(
        &self,
        review_time: DateTime<Utc>,
        max_new_cards: usize,
        max_cards: usize,
    ) -> Result<Vec<Card>, StoreError> {
        let (new_cards, reviewed): (Vec<Card>, Vec<Card>) = self
            .get_cards()
            .await?
            .into_iter()
            .partition(|card| card.progress.is_new());

        let mut overdue: Vec<(f64, Card)> = reviewed
            .into_iter()
            .map(|card| (card.progress.overdueness(review_time), card))
            .filter(|(overdueness, _)| *overdueness >= 0.0)
            .collect();
        overdue.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut selected: Vec<Card> = overdue
            .into_iter()
            .map(|(_, card)| card)
            .take(max_cards)
            .collect();

        let new_budget = max_new_cards.min(max_cards - selected.len());
        // Listing is newest first.
        selected.extend(new_cards.into_iter().rev().take(new_budget));

        Ok(selected)
    }

    // ==================== FEED & SYNC ====================

    pub fn subscribe(&self) -> StoreEvents {
        StoreEvents::new(self.inner.events.subscribe())
    }

    /// Associate a sync server, replacing any previous one. `None` or a
    /// blank URL clears the association.
    pub async fn set_sync_server(
        &self,
        server: Option<ServerRef>,
        options: SyncOptions,
    ) -> Result<(), StoreError> {
        self.inner.replicator.set_sync_server(server, options).await
    }

    /// Description of the associated sync server, if any.
    pub async fn get_sync_server(&self) -> Option<String> {
        self.inner.replicator.sync_server().await
    }
}

fn card_from_document(id: &str, doc: &Document, progress: Progress) -> Result<Card, StoreError> {
    let content: CardContent = from_body(&doc.body)?;
    Ok(Card::from_parts(id.to_string(), doc.rev.clone(), content, progress))
}
