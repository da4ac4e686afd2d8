//! Replication between a local document store and one sync server.
//!
//! A store is associated with at most one server at a time. Associating a
//! new server, or clearing the association, cancels the previous session and
//! guarantees none of its callbacks run afterwards.

mod http;
mod options;
mod peer;
mod session;

pub use http::*;
pub use options::*;
pub use peer::*;

use std::sync::Arc;

use reqwest::Url;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::db::DocumentStore;
use crate::errors::StoreError;
use session::{Emitter, Session};

/// What to sync with.
#[derive(Debug, Clone)]
pub enum ServerRef {
    /// URL of a database on a `cardsync-server`
    Url(String),
    /// Another store in the same process
    Store(DocumentStore),
}

impl From<&str> for ServerRef {
    fn from(url: &str) -> Self {
        ServerRef::Url(url.to_string())
    }
}

impl From<String> for ServerRef {
    fn from(url: String) -> Self {
        ServerRef::Url(url)
    }
}

impl From<DocumentStore> for ServerRef {
    fn from(store: DocumentStore) -> Self {
        ServerRef::Store(store)
    }
}

struct Association {
    description: String,
    cancel: CancellationToken,
}

/// Owns the sync association of one local store.
pub struct Replicator {
    local: DocumentStore,
    gate: Arc<RwLock<u64>>,
    association: Mutex<Option<Association>>,
}

impl Replicator {
    pub fn new(local: DocumentStore) -> Self {
        Self {
            local,
            gate: Arc::new(RwLock::new(0)),
            association: Mutex::new(None),
        }
    }

    /// Replace the sync association.
    ///
    /// `None` or a blank URL just clears it. A malformed URL, a non-HTTP
    /// scheme or the local store itself is `InvalidServer`. An unreachable
    /// server is reported to `on_error` and returned with its transport
    /// code; nothing stays associated in either case.
    pub async fn set_sync_server(
        &self,
        server: Option<ServerRef>,
        options: SyncOptions,
    ) -> Result<(), StoreError> {
        let mut association = self.association.lock().await;

        let generation = {
            let mut generation = self.gate.write().await;
            *generation += 1;
            if let Some(previous) = association.take() {
                previous.cancel.cancel();
                tracing::info!("Disassociated sync server {}", previous.description);
            }
            *generation
        };

        let Some(peer) = self.resolve(server, &options)? else {
            return Ok(());
        };

        let info = match peer.info().await {
            Ok(info) => info,
            Err(err) => {
                tracing::warn!("Sync server {} unavailable: {}", peer.describe(), err);
                if let Some(on_error) = &options.on_error {
                    on_error(&err);
                }
                return Err(err);
            }
        };

        let description = peer.describe();
        let cancel = CancellationToken::new();
        let emitter = Emitter::new(self.gate.clone(), generation, options);
        let session = Session::new(
            self.local.clone(),
            peer,
            &info.instance_id,
            emitter,
            cancel.clone(),
        );
        tokio::spawn(session.run());

        tracing::info!("Associated sync server {}", description);
        *association = Some(Association {
            description,
            cancel,
        });

        Ok(())
    }

    /// Description of the associated server, if any.
    pub async fn sync_server(&self) -> Option<String> {
        self.association
            .lock()
            .await
            .as_ref()
            .map(|association| association.description.clone())
    }

    fn resolve(
        &self,
        server: Option<ServerRef>,
        options: &SyncOptions,
    ) -> Result<Option<Arc<dyn Peer>>, StoreError> {
        match server {
            None => Ok(None),
            Some(ServerRef::Url(raw)) => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    return Ok(None);
                }
                let url = parse_server_url(trimmed)?;
                Ok(Some(Arc::new(HttpPeer::new(url, options.api_key.clone())?)))
            }
            Some(ServerRef::Store(store)) => {
                if store.same_store(&self.local) {
                    return Err(StoreError::InvalidServer(
                        "Cannot sync a store with itself".to_string(),
                    ));
                }
                Ok(Some(Arc::new(LocalPeer::new(store))))
            }
        }
    }
}

impl Drop for Replicator {
    fn drop(&mut self) {
        if let Some(association) = self.association.get_mut().take() {
            association.cancel.cancel();
        }
    }
}

fn parse_server_url(raw: &str) -> Result<Url, StoreError> {
    let url = Url::parse(raw)
        .map_err(|err| StoreError::InvalidServer(format!("Invalid server {}: {}", raw, err)))?;

    match url.scheme() {
        "http" | "https" if url.host().is_some() => Ok(url),
        scheme => Err(StoreError::InvalidServer(format!(
            "Unsupported server scheme '{}' in {}",
            scheme, raw
        ))),
    }
}
