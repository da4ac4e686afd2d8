//! Actions accepted by the review reducer.

use chrono::{DateTime, Utc};

use super::state::NoteContext;
use crate::models::{Card, ReviewSummary};

#[derive(Debug, Clone, PartialEq)]
pub enum ReviewAction {
    NewReview {
        max_new_cards: u32,
        max_cards: u32,
        review_time: DateTime<Utc>,
    },
    SetReviewLimit {
        max_new_cards: u32,
        max_cards: u32,
    },
    SetReviewTime {
        review_time: DateTime<Utc>,
    },
    /// Cards available for the session; `seed` drives the new-card draw
    ReviewLoaded {
        cards: Vec<Card>,
        seed: u64,
    },
    ShowAnswer,
    PassCard,
    FailCard,
    UpdateReviewCard {
        card: Card,
    },
    DeleteReviewCard {
        id: String,
    },
    CancelReview,
    LoadReview {
        summary: ReviewSummary,
    },
    AddNote {
        context: NoteContext,
    },
}

impl ReviewAction {
    pub fn new_review(max_new_cards: u32, max_cards: u32) -> Self {
        ReviewAction::NewReview {
            max_new_cards,
            max_cards,
            review_time: Utc::now(),
        }
    }

    pub fn set_review_limit(max_new_cards: u32, max_cards: u32) -> Self {
        ReviewAction::SetReviewLimit {
            max_new_cards,
            max_cards,
        }
    }

    pub fn set_review_time(review_time: DateTime<Utc>) -> Self {
        ReviewAction::SetReviewTime { review_time }
    }

    pub fn review_loaded(cards: Vec<Card>) -> Self {
        ReviewAction::ReviewLoaded {
            cards,
            seed: rand::random(),
        }
    }

    pub fn update_review_card(card: Card) -> Self {
        ReviewAction::UpdateReviewCard { card }
    }

    pub fn delete_review_card(id: impl Into<String>) -> Self {
        ReviewAction::DeleteReviewCard { id: id.into() }
    }

    pub fn load_review(summary: ReviewSummary) -> Self {
        ReviewAction::LoadReview { summary }
    }

    pub fn add_note(screen: impl Into<String>) -> Self {
        ReviewAction::AddNote {
            context: NoteContext {
                screen: screen.into(),
            },
        }
    }
}
