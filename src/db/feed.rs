//! Change feed subscriptions.

use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};

use crate::errors::StoreError;
use crate::models::DocChange;

/// Buffered events per subscriber before it is considered lagging.
pub(crate) const FEED_CAPACITY: usize = 1024;

/// A registered listener on a store's change feed.
///
/// Every subscriber sees every committed mutation, in commit order.
/// Dropping the subscription de-registers it.
pub struct ChangeSubscription {
    receiver: broadcast::Receiver<DocChange>,
    position: i64,
}

impl ChangeSubscription {
    pub(crate) fn new(receiver: broadcast::Receiver<DocChange>, position: i64) -> Self {
        Self { receiver, position }
    }

    /// Sequence of the last change received, or of the last change committed
    /// before subscribing.
    pub fn position(&self) -> i64 {
        self.position
    }

    /// Wait for the next change. `Ok(None)` means the store has gone away.
    ///
    /// A subscriber that falls more than the feed capacity behind gets an
    /// error and must resynchronize from `changes_since`.
    pub async fn recv(&mut self) -> Result<Option<DocChange>, StoreError> {
        match self.receiver.recv().await {
            Ok(change) => {
                self.position = self.position.max(change.seq);
                Ok(Some(change))
            }
            Err(RecvError::Closed) => Ok(None),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Change feed subscriber lagged by {} events", skipped);
                Err(StoreError::Internal(format!(
                    "Change feed subscriber missed {} events",
                    skipped
                )))
            }
        }
    }

    /// Like [`recv`](Self::recv) but gives up after `timeout`.
    pub async fn recv_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<DocChange>, StoreError> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(result) => result,
            Err(_) => Ok(None),
        }
    }

    /// Discard everything already buffered.
    pub fn clear(&mut self) {
        self.receiver = self.receiver.resubscribe();
    }

    pub fn unsubscribe(self) {}
}
