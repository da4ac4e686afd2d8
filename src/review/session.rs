//! Drives the review reducer against a card store.
//!
//! The reducer stays pure; this layer loads cards, writes progress after
//! each answer and keeps the persisted summary in step with the state.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;

use super::actions::ReviewAction;
use super::reducer::review;
use super::state::ReviewState;
use super::sync::store_event_action;
use crate::cards::{CardStore, StoreEvent, StoreEvents};
use crate::errors::StoreError;
use crate::models::{CardPatch, ReviewSummary};

pub struct ReviewSession {
    store: CardStore,
    state: Arc<ReviewState>,
    /// Summaries written here whose feed events have not come back yet
    echoes: VecDeque<ReviewSummary>,
}

impl ReviewSession {
    pub fn new(store: CardStore) -> Self {
        Self {
            store,
            state: Arc::new(ReviewState::default()),
            echoes: VecDeque::new(),
        }
    }

    pub fn state(&self) -> &Arc<ReviewState> {
        &self.state
    }

    /// Start a review and load its cards.
    pub async fn start(&mut self, max_new_cards: u32, max_cards: u32) -> Result<(), StoreError> {
        self.dispatch(ReviewAction::new_review(max_new_cards, max_cards))
            .await?;
        Ok(())
    }

    /// Resume the persisted review, if there is one.
    pub async fn resume(&mut self) -> Result<bool, StoreError> {
        let Some(summary) = self.store.get_review().await? else {
            return Ok(false);
        };
        self.apply(ReviewAction::set_review_time(Utc::now()));
        self.apply(ReviewAction::load_review(summary));
        self.load_cards().await?;
        Ok(true)
    }

    /// Fetch cards for the current limits and hand them to the reducer.
    ///
    /// Cards a resumed summary refers to are fetched by id first, so failed
    /// cards return to their queues and answered ones to the history. The
    /// reducer caps the heap at what the session still has room for.
    pub async fn load_cards(&mut self) -> Result<(), StoreError> {
        let mut cards = Vec::new();
        let mut changed = false;
        for id in self.state.pending.ids() {
            match self.store.get_card(&id).await {
                Ok(card) => cards.push(card),
                Err(err) if err.is_not_found() => {
                    tracing::warn!("Card {} from the saved review no longer exists", id);
                    changed |= self.apply(ReviewAction::delete_review_card(id));
                }
                Err(err) => return Err(err),
            }
        }

        cards.extend(
            self.store
                .get_cards_for_review(
                    self.state.review_time,
                    self.state.max_new_cards as usize,
                    self.state.max_cards as usize,
                )
                .await?,
        );
        tracing::debug!("Loaded {} cards for review", cards.len());
        changed |= self.apply(ReviewAction::review_loaded(cards));
        if changed {
            self.save_summary().await?;
        }
        Ok(())
    }

    /// Apply a local action and persist its effects.
    ///
    /// Returns whether the state changed.
    pub async fn dispatch(&mut self, action: ReviewAction) -> Result<bool, StoreError> {
        if !self.apply(action.clone()) {
            return Ok(false);
        }

        match action {
            ReviewAction::PassCard | ReviewAction::FailCard => {
                self.save_answered().await?;
                self.save_summary().await?;
            }
            ReviewAction::NewReview { .. } | ReviewAction::SetReviewLimit { .. } => {
                self.load_cards().await?;
            }
            ReviewAction::ReviewLoaded { .. } => self.save_summary().await?,
            ReviewAction::CancelReview => {
                self.echoes.clear();
                self.store.delete_review().await?;
            }
            _ => {}
        }
        Ok(true)
    }

    /// Receive one store event and apply it.
    ///
    /// Returns `false` once the store has shut down.
    pub async fn follow(&mut self, events: &mut StoreEvents) -> Result<bool, StoreError> {
        match events.recv().await? {
            Some(event) => {
                self.handle_event(&event).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Apply a store event that originated outside this session.
    pub async fn handle_event(&mut self, event: &StoreEvent) -> Result<bool, StoreError> {
        if let StoreEvent::Review(Some(summary)) = event {
            if let Some(position) = self.echoes.iter().position(|echo| echo == summary) {
                self.echoes.drain(..=position);
                return Ok(false);
            }
        }

        let Some(action) = store_event_action(&self.state, event) else {
            return Ok(false);
        };
        let reload = matches!(action, ReviewAction::LoadReview { .. });
        let changed = self.apply(action);
        if reload && changed {
            tracing::info!("Merging review summary written elsewhere");
            self.load_cards().await?;
        }
        Ok(changed)
    }

    fn apply(&mut self, action: ReviewAction) -> bool {
        let next = review(&self.state, &action);
        if Arc::ptr_eq(&next, &self.state) {
            return false;
        }
        self.state = next;
        true
    }

    async fn save_answered(&self) -> Result<(), StoreError> {
        let Some(card) = self.state.history.last() else {
            return Ok(());
        };

        let patch = CardPatch {
            progress: Some(card.progress.clone()),
            ..CardPatch::for_id(card.id.clone())
        };
        match self.store.put_card(patch).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => {
                tracing::warn!("Card {} went away before its progress was saved", card.id);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn save_summary(&mut self) -> Result<(), StoreError> {
        if !self.state.is_active() {
            return Ok(());
        }
        let summary = self.state.summary();
        self.store.put_review(&summary).await?;
        self.echoes.push_back(summary);
        Ok(())
    }
}
