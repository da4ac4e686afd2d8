//! Debounced saving of edit forms.
//!
//! A scheduled save waits `save_delay` and then writes the form's card. The
//! wait can be cancelled; once the write has started it always runs to
//! completion, and whoever supersedes it waits for the id it produced so a
//! draft is never created twice.

use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{EditAction, EditForm, FormId};
use crate::cards::CardStore;
use crate::errors::StoreError;
use crate::models::{Card, CardPatch};

/// Default debounce before an edit is written.
pub const SAVE_DELAY: Duration = Duration::from_millis(2000);

/// How a scheduled save ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    /// Cancelled before the write started
    Cancelled,
    Saved(Card),
    /// The write failed; the failure was reported as `FailSaveCard`
    Failed(String),
}

impl SaveOutcome {
    /// Id of the card the save produced, if it wrote one.
    pub fn card_id(&self) -> Option<&str> {
        match self {
            SaveOutcome::Saved(card) => Some(&card.id),
            _ => None,
        }
    }
}

struct PendingSave {
    cancel: CancellationToken,
    handle: JoinHandle<SaveOutcome>,
}

/// Saves edit forms in the background and reports results as edit actions.
pub struct AutoSaver {
    store: CardStore,
    save_delay: Duration,
    actions: mpsc::UnboundedSender<EditAction>,
    pending: Mutex<Option<PendingSave>>,
}

impl AutoSaver {
    /// Results are sent to `actions` as `FinishSaveCard` / `FailSaveCard`.
    pub fn new(store: CardStore, actions: mpsc::UnboundedSender<EditAction>) -> Self {
        Self {
            store,
            save_delay: SAVE_DELAY,
            actions,
            pending: Mutex::new(None),
        }
    }

    pub fn with_save_delay(mut self, save_delay: Duration) -> Self {
        self.save_delay = save_delay;
        self
    }

    /// Schedule a save of `form`, superseding any pending one.
    ///
    /// Returns `false` when the form has nothing to save.
    pub async fn schedule(&self, form: &EditForm) -> bool {
        if !form.is_dirty() {
            return false;
        }

        let mut pending = self.pending.lock().await;
        let adopted = settle(pending.take()).await;
        let (form_id, card) = target(form, adopted);

        let cancel = CancellationToken::new();
        let task = auto_save(
            self.store.clone(),
            self.actions.clone(),
            form_id,
            card,
            self.save_delay,
            cancel.clone(),
        );
        *pending = Some(PendingSave {
            cancel,
            handle: tokio::spawn(task),
        });
        true
    }

    /// Save `form` now, superseding any pending save.
    ///
    /// Returns `Ok(None)` when the form has nothing to save.
    pub async fn flush(&self, form: &EditForm) -> Result<Option<Card>, StoreError> {
        let mut pending = self.pending.lock().await;
        let adopted = settle(pending.take()).await;
        if !form.is_dirty() {
            return Ok(None);
        }

        let (form_id, card) = target(form, adopted);
        save(&self.store, &self.actions, form_id, card).await.map(Some)
    }

    /// Cancel a pending save, or wait for it if it is already writing.
    pub async fn settle(&self) -> SaveOutcome {
        let pending = self.pending.lock().await.take();
        match pending {
            Some(pending) => finish(pending).await,
            None => SaveOutcome::Cancelled,
        }
    }
}

impl Drop for AutoSaver {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.get_mut().take() {
            pending.cancel.cancel();
        }
    }
}

/// Settle `pending` and return the id it produced, if any.
async fn settle(pending: Option<PendingSave>) -> Option<String> {
    let pending = pending?;
    finish(pending).await.card_id().map(str::to_string)
}

async fn finish(pending: PendingSave) -> SaveOutcome {
    pending.cancel.cancel();
    match pending.handle.await {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::warn!("Autosave task ended abnormally: {}", err);
            SaveOutcome::Failed(err.to_string())
        }
    }
}

/// Form id and card to write, given the id an earlier save produced.
fn target(form: &EditForm, adopted: Option<String>) -> (FormId, CardPatch) {
    let mut card = form.card.clone();
    card.progress = None;
    if card.id.is_none() {
        card.id = adopted;
    }
    (form.form_id.clone(), card)
}

async fn auto_save(
    store: CardStore,
    actions: mpsc::UnboundedSender<EditAction>,
    form_id: FormId,
    card: CardPatch,
    save_delay: Duration,
    cancel: CancellationToken,
) -> SaveOutcome {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => return SaveOutcome::Cancelled,
        _ = tokio::time::sleep(save_delay) => {}
    }

    // Past this point the write is not cancellable.
    match save(&store, &actions, form_id, card).await {
        Ok(card) => SaveOutcome::Saved(card),
        Err(err) => {
            tracing::warn!("Autosave failed: {}", err);
            SaveOutcome::Failed(err.to_string())
        }
    }
}

async fn save(
    store: &CardStore,
    actions: &mpsc::UnboundedSender<EditAction>,
    form_id: FormId,
    card: CardPatch,
) -> Result<Card, StoreError> {
    match store.put_card(card).await {
        Ok(saved) => {
            tracing::debug!("Saved card {}", saved.id);
            let _ = actions.send(EditAction::FinishSaveCard {
                form_id,
                card: saved.clone(),
            });
            Ok(saved)
        }
        Err(err) => {
            let _ = actions.send(EditAction::fail_save_card(form_id, &err));
            Err(err)
        }
    }
}
