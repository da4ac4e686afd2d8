//! Maps card store events onto review actions.

use super::actions::ReviewAction;
use super::state::ReviewState;
use crate::cards::StoreEvent;
use crate::models::{CardChange, ReviewSummary};

/// Action for a card change, if it touches a card in the running review or
/// its history.
pub fn card_change_action(state: &ReviewState, change: &CardChange) -> Option<ReviewAction> {
    if !state.is_active() || !state.mentions(&change.id) {
        return None;
    }

    match &change.card {
        Some(card) if !change.deleted => Some(ReviewAction::update_review_card(card.clone())),
        _ => Some(ReviewAction::delete_review_card(change.id.clone())),
    }
}

/// Action for a change to the persisted review summary.
///
/// A deleted summary cancels an active review. A summary that differs from
/// the local one was written elsewhere and is merged in.
pub fn review_change_action(
    state: &ReviewState,
    summary: Option<&ReviewSummary>,
) -> Option<ReviewAction> {
    match summary {
        None if state.is_active() => Some(ReviewAction::CancelReview),
        None => None,
        Some(summary) if state.is_active() && *summary == state.summary() => None,
        Some(summary) => Some(ReviewAction::load_review(summary.clone())),
    }
}

pub fn store_event_action(state: &ReviewState, event: &StoreEvent) -> Option<ReviewAction> {
    match event {
        StoreEvent::Card(change) => card_change_action(state, change),
        StoreEvent::Review(summary) => review_change_action(state, summary.as_ref()),
    }
}
