//! Revision-tracked document store.
//!
//! Every mutation runs inside a transaction under a single write lock and is
//! published on the change feed before the lock is released, so subscribers
//! observe mutations in commit order.

use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tokio::sync::{broadcast, Mutex};

use super::feed::{ChangeSubscription, FEED_CAPACITY};
use super::id::IdGenerator;
use super::revision::Revision;
use super::{init_database, init_memory_database};
use crate::errors::StoreError;
use crate::models::{Body, ChangesPage, DbInfo, DocChange, DocWrite, Document, RevRef};

/// Prefix of bookkeeping documents that never leave the store.
pub const LOCAL_PREFIX: &str = "_local/";

const SELECT_DOCUMENT: &str = "SELECT id, rev, deleted, seq, body FROM documents";

/// Handle to a document store. Clones share the same store.
#[derive(Clone)]
pub struct DocumentStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    pool: SqlitePool,
    instance_id: String,
    ids: IdGenerator,
    write_lock: Mutex<()>,
    changes: broadcast::Sender<DocChange>,
    /// Sequence of the last published change
    published_seq: AtomicI64,
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("instance_id", &self.inner.instance_id)
            .finish()
    }
}

impl DocumentStore {
    /// Open (or create) a store backed by a database file.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let pool = init_database(path).await?;
        Self::from_pool(pool).await
    }

    /// Open a private in-memory store.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = init_memory_database().await?;
        Self::from_pool(pool).await
    }

    /// Wrap an already migrated pool.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let row = sqlx::query("SELECT instance_id, update_seq FROM meta WHERE id = 1")
            .fetch_one(&pool)
            .await?;
        let instance_id: String = row.get("instance_id");
        let update_seq: i64 = row.get("update_seq");
        let (changes, _) = broadcast::channel(FEED_CAPACITY);

        tracing::debug!("Opened document store {}", instance_id);

        Ok(Self {
            inner: Arc::new(StoreInner {
                pool,
                instance_id,
                ids: IdGenerator::new(),
                write_lock: Mutex::new(()),
                changes,
                published_seq: AtomicI64::new(update_seq),
            }),
        })
    }

    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    /// Generate an id that sorts after every id this handle generated before.
    pub fn next_id(&self) -> String {
        self.inner.ids.next_id()
    }

    /// Whether two handles refer to the same store.
    pub fn same_store(&self, other: &DocumentStore) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ==================== READS ====================

    /// Get a live document.
    pub async fn get(&self, id: &str) -> Result<Document, StoreError> {
        match self.get_document(id).await? {
            None => Err(StoreError::missing()),
            Some(doc) if doc.deleted => Err(StoreError::deleted()),
            Some(doc) => Ok(doc),
        }
    }

    /// Get the stored revision of a document, tombstones included.
    pub async fn get_document(&self, id: &str) -> Result<Option<Document>, StoreError> {
        let mut conn = self.inner.pool.acquire().await?;
        fetch_document(&mut conn, id).await
    }

    /// All live documents, newest first, bookkeeping documents excluded.
    pub async fn get_all(&self) -> Result<Vec<Document>, StoreError> {
        let rows = sqlx::query(&format!(
            "{} WHERE deleted = 0 AND substr(id, 1, 1) <> '_' ORDER BY id COLLATE doc_collate DESC",
            SELECT_DOCUMENT
        ))
        .fetch_all(&self.inner.pool)
        .await?;

        rows.iter().map(document_from_row).collect()
    }

    /// Live documents whose id starts with `prefix`, newest first.
    pub async fn all_with_prefix(&self, prefix: &str) -> Result<Vec<Document>, StoreError> {
        let rows = sqlx::query(&format!(
            "{} WHERE deleted = 0 AND substr(id, 1, 1) <> '_' AND substr(id, 1, length(?)) = ? \
             ORDER BY id COLLATE doc_collate DESC",
            SELECT_DOCUMENT
        ))
        .bind(prefix)
        .bind(prefix)
        .fetch_all(&self.inner.pool)
        .await?;

        rows.iter().map(document_from_row).collect()
    }

    /// The latest change of each document committed after `since`, oldest first.
    pub async fn changes_since(&self, since: i64, limit: usize) -> Result<ChangesPage, StoreError> {
        let rows = sqlx::query(&format!(
            "{} WHERE seq > ? AND substr(id, 1, 1) <> '_' ORDER BY seq ASC LIMIT ?",
            SELECT_DOCUMENT
        ))
        .bind(since)
        .bind(limit.max(1) as i64)
        .fetch_all(&self.inner.pool)
        .await?;

        let results: Vec<DocChange> = rows
            .iter()
            .map(|row| document_from_row(row).map(|doc| DocChange::from_document(&doc)))
            .collect::<Result<_, _>>()?;
        let last_seq = results.last().map(|change| change.seq).unwrap_or(since);

        Ok(ChangesPage { results, last_seq })
    }

    /// The offered revisions this store does not have and would accept.
    pub async fn revs_diff(&self, offered: &[RevRef]) -> Result<Vec<RevRef>, StoreError> {
        let mut conn = self.inner.pool.acquire().await?;
        let mut missing = Vec::new();

        for candidate in offered {
            let incoming = Revision::parse(&candidate.rev)?;
            match fetch_document(&mut conn, &candidate.id).await? {
                None => missing.push(candidate.clone()),
                Some(existing) => {
                    if incoming.beats(&Revision::parse(&existing.rev)?) {
                        missing.push(candidate.clone());
                    }
                }
            }
        }

        Ok(missing)
    }

    pub async fn update_seq(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT update_seq FROM meta WHERE id = 1")
            .fetch_one(&self.inner.pool)
            .await?;
        Ok(row.get("update_seq"))
    }

    pub async fn info(&self) -> Result<DbInfo, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS doc_count FROM documents WHERE deleted = 0 AND substr(id, 1, 1) <> '_'",
        )
        .fetch_one(&self.inner.pool)
        .await?;

        Ok(DbInfo {
            instance_id: self.inner.instance_id.clone(),
            update_seq: self.update_seq().await?,
            doc_count: row.get("doc_count"),
        })
    }

    // ==================== WRITES ====================

    /// Create or update a document.
    ///
    /// Without an id a new document is created under a generated id. With an
    /// id the current revision is replaced whatever revision the caller
    /// supplied, as long as the document is live.
    pub async fn put(&self, write: DocWrite) -> Result<Document, StoreError> {
        let DocWrite { id, rev, body } = write;
        if let Some(rev) = rev.as_deref() {
            Revision::parse(rev)?;
        }

        let _guard = self.inner.write_lock.lock().await;
        let mut tx = self.inner.pool.begin().await?;

        let (id, previous) = match id {
            None => (self.inner.ids.next_id(), None),
            Some(id) => {
                validate_id(&id)?;
                match fetch_document(&mut tx, &id).await? {
                    None => return Err(StoreError::missing()),
                    Some(doc) if doc.deleted => return Err(StoreError::deleted()),
                    Some(doc) => {
                        let previous = Revision::parse(&doc.rev)?;
                        (id, Some(previous))
                    }
                }
            }
        };

        let rev = Revision::next(previous.as_ref(), false, &body);
        let doc = write_document(&mut tx, &id, &rev.to_string(), false, body).await?;
        tx.commit().await?;

        self.publish(&doc);
        Ok(doc)
    }

    /// Create a document under a caller-chosen id.
    ///
    /// Fails with a conflict if a live document holds the id. A tombstoned
    /// id is resurrected.
    pub async fn create(&self, id: &str, body: Body) -> Result<Document, StoreError> {
        validate_id(id)?;

        let _guard = self.inner.write_lock.lock().await;
        let mut tx = self.inner.pool.begin().await?;

        let previous = match fetch_document(&mut tx, id).await? {
            Some(doc) if !doc.deleted => {
                return Err(StoreError::Conflict("Document update conflict".to_string()))
            }
            Some(doc) => Some(Revision::parse(&doc.rev)?),
            None => None,
        };

        let rev = Revision::next(previous.as_ref(), false, &body);
        let doc = write_document(&mut tx, id, &rev.to_string(), false, body).await?;
        tx.commit().await?;

        self.publish(&doc);
        Ok(doc)
    }

    /// Delete a live document, leaving a tombstone.
    pub async fn delete(&self, id: &str, rev: Option<&str>) -> Result<Document, StoreError> {
        if let Some(rev) = rev {
            Revision::parse(rev)?;
        }

        let _guard = self.inner.write_lock.lock().await;
        let mut tx = self.inner.pool.begin().await?;

        let previous = match fetch_document(&mut tx, id).await? {
            Some(doc) if !doc.deleted => Revision::parse(&doc.rev)?,
            _ => return Err(StoreError::deleted()),
        };

        let body = Body::new();
        let rev = Revision::next(Some(&previous), true, &body);
        let doc = write_document(&mut tx, id, &rev.to_string(), true, body).await?;
        tx.commit().await?;

        self.publish(&doc);
        Ok(doc)
    }

    /// Store revisions received from a peer.
    ///
    /// A revision is kept only when it beats the local one. Each accepted
    /// revision is a separate change on the feed. Returns what was accepted.
    pub async fn apply_replicated(&self, docs: Vec<Document>) -> Result<Vec<Document>, StoreError> {
        let _guard = self.inner.write_lock.lock().await;
        let mut tx = self.inner.pool.begin().await?;
        let mut accepted = Vec::new();

        for doc in docs {
            validate_id(&doc.id)?;
            let incoming = Revision::parse(&doc.rev)?;
            let wins = match fetch_document(&mut tx, &doc.id).await? {
                None => true,
                Some(existing) => incoming.beats(&Revision::parse(&existing.rev)?),
            };
            if !wins {
                continue;
            }

            let body = if doc.deleted { Body::new() } else { doc.body };
            let stored =
                write_document(&mut tx, &doc.id, &incoming.to_string(), doc.deleted, body).await?;
            accepted.push(stored);
        }

        tx.commit().await?;

        for doc in &accepted {
            self.publish(doc);
        }
        if !accepted.is_empty() {
            tracing::debug!("Applied {} replicated revisions", accepted.len());
        }

        Ok(accepted)
    }

    // ==================== LOCAL DOCUMENTS ====================

    /// Write a bookkeeping document. It is never listed, replicated or
    /// published on the change feed.
    pub async fn put_local(&self, id: &str, body: &Body) -> Result<(), StoreError> {
        let id = local_id(id);
        sqlx::query(
            "INSERT INTO local_documents (id, body) VALUES (?, ?) \
             ON CONFLICT(id) DO UPDATE SET body = excluded.body",
        )
        .bind(&id)
        .bind(serde_json::to_string(body)?)
        .execute(&self.inner.pool)
        .await?;
        Ok(())
    }

    pub async fn get_local(&self, id: &str) -> Result<Option<Body>, StoreError> {
        let row = sqlx::query("SELECT body FROM local_documents WHERE id = ?")
            .bind(local_id(id))
            .fetch_optional(&self.inner.pool)
            .await?;

        match row {
            Some(row) => {
                let body: String = row.get("body");
                Ok(Some(serde_json::from_str(&body)?))
            }
            None => Ok(None),
        }
    }

    // ==================== CHANGE FEED ====================

    pub fn subscribe(&self) -> ChangeSubscription {
        let position = self.inner.published_seq.load(AtomicOrdering::Acquire);
        ChangeSubscription::new(self.inner.changes.subscribe(), position)
    }

    /// Wait until a change after `since` is committed, or `timeout` passes.
    ///
    /// Returns whether such a change exists.
    pub async fn wait_for_change(&self, since: i64, timeout: Duration) -> Result<bool, StoreError> {
        let mut subscription = self.subscribe();
        if self.update_seq().await? > since {
            return Ok(true);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            match subscription.recv_timeout(remaining).await {
                Ok(Some(change)) if change.seq > since => return Ok(true),
                Ok(Some(_)) => continue,
                Ok(None) => return Ok(false),
                // Lagging means plenty has changed.
                Err(_) => return Ok(true),
            }
        }
    }

    fn publish(&self, doc: &Document) {
        tracing::debug!("Committed {} rev {} (seq {})", doc.id, doc.rev, doc.seq);
        self.inner
            .published_seq
            .fetch_max(doc.seq, AtomicOrdering::AcqRel);
        // No receivers is not an error.
        let _ = self.inner.changes.send(DocChange::from_document(doc));
    }
}

fn local_id(id: &str) -> String {
    if id.starts_with(LOCAL_PREFIX) {
        id.to_string()
    } else {
        format!("{}{}", LOCAL_PREFIX, id)
    }
}

fn validate_id(id: &str) -> Result<(), StoreError> {
    if id.is_empty() {
        return Err(StoreError::BadRequest("Document id must not be empty".to_string()));
    }
    if id.starts_with('_') {
        return Err(StoreError::BadRequest(format!(
            "Only reserved document ids may start with underscore: {}",
            id
        )));
    }
    Ok(())
}

async fn fetch_document(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<Document>, StoreError> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_DOCUMENT))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(document_from_row).transpose()
}

/// Bump the update sequence and store one revision under it.
async fn write_document(
    conn: &mut SqliteConnection,
    id: &str,
    rev: &str,
    deleted: bool,
    body: Body,
) -> Result<Document, StoreError> {
    sqlx::query("UPDATE meta SET update_seq = update_seq + 1 WHERE id = 1")
        .execute(&mut *conn)
        .await?;
    let seq: i64 = sqlx::query("SELECT update_seq FROM meta WHERE id = 1")
        .fetch_one(&mut *conn)
        .await?
        .get("update_seq");

    sqlx::query(
        "INSERT INTO documents (id, rev, deleted, seq, body) VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET rev = excluded.rev, deleted = excluded.deleted, \
         seq = excluded.seq, body = excluded.body",
    )
    .bind(id)
    .bind(rev)
    .bind(deleted as i32)
    .bind(seq)
    .bind(serde_json::to_string(&body)?)
    .execute(&mut *conn)
    .await?;

    Ok(Document {
        id: id.to_string(),
        rev: rev.to_string(),
        deleted,
        seq,
        body,
    })
}

fn document_from_row(row: &SqliteRow) -> Result<Document, StoreError> {
    let body: String = row.get("body");
    let deleted: i32 = row.get("deleted");

    Ok(Document {
        id: row.get("id"),
        rev: row.get("rev"),
        deleted: deleted != 0,
        seq: row.get("seq"),
        body: serde_json::from_str(&body)?,
    })
}
