//! Review session state.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Card, ReviewSummary};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewPhase {
    /// No review in progress
    #[default]
    Idle,
    Loading,
    Question,
    Answer,
    Complete,
}

/// Which queue a slotted card was drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CardOrigin {
    Heap,
    FailedLevel1,
    FailedLevel2,
}

/// A card occupying the current or next slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewSlot {
    pub card: Card,
    pub origin: CardOrigin,
}

/// The screen a note was requested from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteContext {
    pub screen: String,
}

/// A note being drafted during a review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewNote {
    pub new_id: u32,
    pub content: String,
}

/// Ids restored from a persisted summary whose cards have not been
/// delivered yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCards {
    pub failed_cards_level1: Vec<String>,
    pub failed_cards_level2: Vec<String>,
    pub history: Vec<String>,
}

impl PendingCards {
    pub fn is_empty(&self) -> bool {
        self.failed_cards_level1.is_empty()
            && self.failed_cards_level2.is_empty()
            && self.history.is_empty()
    }

    /// Whether the id waits in a failed queue.
    pub fn is_failed(&self, id: &str) -> bool {
        self.failed_cards_level1.iter().any(|pending| pending == id)
            || self.failed_cards_level2.iter().any(|pending| pending == id)
    }

    pub fn mentions(&self, id: &str) -> bool {
        self.is_failed(id) || self.history.iter().any(|pending| pending == id)
    }

    /// Every pending id, once.
    pub fn ids(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.failed_cards_level1
            .iter()
            .chain(self.failed_cards_level2.iter())
            .chain(self.history.iter())
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect()
    }

    pub fn remove(&mut self, id: &str) {
        for ids in [
            &mut self.failed_cards_level1,
            &mut self.failed_cards_level2,
            &mut self.history,
        ] {
            ids.retain(|pending| pending != id);
        }
    }
}

/// State of a review session.
///
/// A card id appears in at most one of `current`, `next`, `heap`,
/// `failed_cards_level1` and `failed_cards_level2`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewState {
    pub phase: ReviewPhase,
    pub max_cards: u32,
    pub max_new_cards: u32,
    pub review_time: DateTime<Utc>,
    pub current: Option<ReviewSlot>,
    pub next: Option<ReviewSlot>,
    /// Cards not yet presented
    pub heap: Vec<Card>,
    /// Failed cards that need one more correct answer
    pub failed_cards_level1: Vec<Card>,
    /// Failed cards that need two more correct answers
    pub failed_cards_level2: Vec<Card>,
    /// Answered cards, one entry per card, most recent last
    pub history: Vec<Card>,
    pub completed: u32,
    pub new_cards_in_play: u32,
    pub new_cards_completed: u32,
    /// Cards that were new when they entered a slot
    pub new_card_ids: BTreeSet<String>,
    #[serde(default)]
    pub pending: PendingCards,
    pub notes: Vec<ReviewNote>,
}

impl ReviewState {
    pub fn current_card(&self) -> Option<&Card> {
        self.current.as_ref().map(|slot| &slot.card)
    }

    pub fn next_card(&self) -> Option<&Card> {
        self.next.as_ref().map(|slot| &slot.card)
    }

    pub fn is_active(&self) -> bool {
        self.phase != ReviewPhase::Idle
    }

    /// Whether the card is in a slot or one of the queues, or waits to be
    /// put back into a failed queue.
    pub fn contains(&self, id: &str) -> bool {
        self.current_card().is_some_and(|card| card.id == id)
            || self.next_card().is_some_and(|card| card.id == id)
            || self.heap.iter().any(|card| card.id == id)
            || self.failed_cards_level1.iter().any(|card| card.id == id)
            || self.failed_cards_level2.iter().any(|card| card.id == id)
            || self.pending.is_failed(id)
    }

    /// Whether the card is anywhere in the session, history included.
    pub fn mentions(&self, id: &str) -> bool {
        self.contains(id)
            || self.history.iter().any(|card| card.id == id)
            || self.pending.mentions(id)
    }

    /// How many more cards the heap may take without the session exceeding
    /// `max_cards`. The heap itself is not counted.
    pub fn remaining_capacity(&self) -> usize {
        let held = self.current.iter().count()
            + self.next.iter().count()
            + self.failed_cards_level1.len()
            + self.failed_cards_level2.len()
            + self.pending.failed_cards_level1.len()
            + self.pending.failed_cards_level2.len();
        (self.max_cards as usize).saturating_sub(self.completed as usize + held)
    }

    /// Ids of every card in a slot or queue, in no particular order.
    pub fn ids_in_play(&self) -> Vec<&str> {
        self.current_card()
            .into_iter()
            .chain(self.next_card())
            .chain(self.heap.iter())
            .chain(self.failed_cards_level1.iter())
            .chain(self.failed_cards_level2.iter())
            .map(|card| card.id.as_str())
            .collect()
    }

    /// The resumable part of this state.
    ///
    /// Slotted cards drawn from a failed queue are reported at the front of
    /// that queue, followed by ids still waiting for their cards.
    pub fn summary(&self) -> ReviewSummary {
        let slotted_from = |origin: CardOrigin| -> Vec<String> {
            [&self.current, &self.next]
                .into_iter()
                .flatten()
                .filter(|slot| slot.origin == origin)
                .map(|slot| slot.card.id.clone())
                .collect()
        };

        let mut level1 = slotted_from(CardOrigin::FailedLevel1);
        level1.extend(self.pending.failed_cards_level1.iter().cloned());
        level1.extend(self.failed_cards_level1.iter().map(|card| card.id.clone()));
        let mut level2 = slotted_from(CardOrigin::FailedLevel2);
        level2.extend(self.pending.failed_cards_level2.iter().cloned());
        level2.extend(self.failed_cards_level2.iter().map(|card| card.id.clone()));

        let mut history = self.pending.history.clone();
        history.extend(self.history.iter().map(|card| card.id.clone()));

        ReviewSummary {
            max_cards: self.max_cards,
            max_new_cards: self.max_new_cards,
            completed: self.completed,
            new_cards_completed: self.new_cards_completed,
            history,
            failed_cards_level1: level1,
            failed_cards_level2: level2,
        }
    }
}
