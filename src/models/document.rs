//! Generic document model for the revision-tracked store.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A document body: an arbitrary JSON object.
pub type Body = Map<String, Value>;

/// A stored document, live or tombstoned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub rev: String,
    #[serde(default)]
    pub deleted: bool,
    /// Sequence number of the mutation that produced this revision
    #[serde(default)]
    pub seq: i64,
    #[serde(default)]
    pub body: Body,
}

/// A write request for [`crate::db::DocumentStore::put`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocWrite {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub rev: Option<String>,
    #[serde(default)]
    pub body: Body,
}

impl DocWrite {
    /// A write that creates a document under a freshly generated id.
    pub fn new(body: Body) -> Self {
        Self {
            id: None,
            rev: None,
            body,
        }
    }

    /// A write addressed at an existing document.
    pub fn update(id: impl Into<String>, body: Body) -> Self {
        Self {
            id: Some(id.into()),
            rev: None,
            body,
        }
    }

    pub fn with_rev(mut self, rev: impl Into<String>) -> Self {
        self.rev = Some(rev.into());
        self
    }
}

/// One committed mutation as seen on the change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocChange {
    pub seq: i64,
    pub id: String,
    pub rev: String,
    pub deleted: bool,
    /// Resulting body, `None` for deletions
    pub doc: Option<Body>,
}

impl DocChange {
    pub fn from_document(doc: &Document) -> Self {
        Self {
            seq: doc.seq,
            id: doc.id.clone(),
            rev: doc.rev.clone(),
            deleted: doc.deleted,
            doc: if doc.deleted {
                None
            } else {
                Some(doc.body.clone())
            },
        }
    }

    /// The document revision this change carries, suitable for replication.
    pub fn to_document(&self) -> Document {
        Document {
            id: self.id.clone(),
            rev: self.rev.clone(),
            deleted: self.deleted,
            seq: self.seq,
            body: self.doc.clone().unwrap_or_default(),
        }
    }
}

/// A page of the change feed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangesPage {
    pub results: Vec<DocChange>,
    pub last_seq: i64,
}

/// An `(id, rev)` pair offered during replication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevRef {
    pub id: String,
    pub rev: String,
}

impl RevRef {
    pub fn new(id: impl Into<String>, rev: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rev: rev.into(),
        }
    }
}

/// Store identity and counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbInfo {
    pub instance_id: String,
    pub update_seq: i64,
    pub doc_count: i64,
}

/// Body of a `_revs_diff` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevsDiffRequest {
    pub revs: Vec<RevRef>,
}

/// Body of a `_bulk_docs` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkDocsRequest {
    pub docs: Vec<Document>,
}

/// Result of a `_bulk_docs` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkDocsResponse {
    pub accepted: usize,
}
