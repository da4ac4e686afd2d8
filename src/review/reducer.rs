//! The review state machine.
//!
//! `review` is a pure function over `(state, action)`. Actions that change
//! nothing return the very same `Arc`, so callers can detect no-ops with
//! `Arc::ptr_eq`.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use super::actions::ReviewAction;
use super::scheduling::{passed, reset, weighted_pick};
use super::state::{
    CardOrigin, NoteContext, PendingCards, ReviewNote, ReviewPhase, ReviewSlot, ReviewState,
};
use crate::models::{Card, ReviewSummary};

/// Screen on which review notes are collected.
pub const REVIEW_SCREEN: &str = "review";

pub fn review(state: &Arc<ReviewState>, action: &ReviewAction) -> Arc<ReviewState> {
    match action {
        ReviewAction::NewReview {
            max_new_cards,
            max_cards,
            review_time,
        } => Arc::new(ReviewState {
            phase: ReviewPhase::Loading,
            max_new_cards: *max_new_cards,
            max_cards: *max_cards,
            review_time: *review_time,
            ..ReviewState::default()
        }),

        ReviewAction::SetReviewLimit {
            max_new_cards,
            max_cards,
        } => {
            let mut next = (**state).clone();
            next.phase = ReviewPhase::Loading;
            next.max_new_cards = *max_new_cards;
            next.max_cards = *max_cards;
            Arc::new(next)
        }

        ReviewAction::SetReviewTime { review_time } => {
            let mut next = (**state).clone();
            next.review_time = *review_time;
            Arc::new(next)
        }

        ReviewAction::ReviewLoaded { cards, seed } => {
            if !state.is_active() {
                return state.clone();
            }
            Arc::new(review_loaded(state, cards, *seed))
        }

        ReviewAction::ShowAnswer => {
            if state.phase != ReviewPhase::Question || state.current.is_none() {
                return state.clone();
            }
            let mut next = (**state).clone();
            next.phase = ReviewPhase::Answer;
            Arc::new(next)
        }

        ReviewAction::PassCard => match answerable(state) {
            Some(mut next) => {
                pass_current(&mut next);
                Arc::new(next)
            }
            None => state.clone(),
        },

        ReviewAction::FailCard => match answerable(state) {
            Some(mut next) => {
                fail_current(&mut next);
                Arc::new(next)
            }
            None => state.clone(),
        },

        ReviewAction::UpdateReviewCard { card } => match update_card(state, card) {
            Some(next) => Arc::new(next),
            None => state.clone(),
        },

        ReviewAction::DeleteReviewCard { id } => match delete_card(state, id) {
            Some(next) => Arc::new(next),
            None => state.clone(),
        },

        ReviewAction::CancelReview => Arc::new(ReviewState::default()),

        ReviewAction::LoadReview { summary } => Arc::new(load_review(state, summary)),

        ReviewAction::AddNote { context } => match add_note(state, context) {
            Some(next) => Arc::new(next),
            None => state.clone(),
        },
    }
}

// ==================== LOADING ====================

fn review_loaded(state: &ReviewState, cards: &[Card], seed: u64) -> ReviewState {
    let mut next = state.clone();
    resolve_pending(&mut next, cards);

    // Answered cards and cards already held stay out of the heap.
    let heap: Vec<Card> = {
        let pending_ids = next.pending.ids();
        let held: HashSet<&str> = next
            .current_card()
            .into_iter()
            .chain(next.next_card())
            .chain(next.failed_cards_level1.iter())
            .chain(next.failed_cards_level2.iter())
            .chain(next.history.iter())
            .map(|card| card.id.as_str())
            .chain(pending_ids.iter().map(|id| id.as_str()))
            .collect();

        let mut seen = HashSet::new();
        let incoming: Vec<&Card> = cards
            .iter()
            .filter(|card| !held.contains(card.id.as_str()) && seen.insert(card.id.as_str()))
            .collect();

        // Admit only as many new cards as the limit still allows.
        let new_budget = next.max_new_cards.saturating_sub(next.new_cards_in_play) as usize;
        let new_cards: Vec<&Card> = incoming
            .iter()
            .copied()
            .filter(|card| card.progress.is_new())
            .collect();
        let admitted: HashSet<&str> = weighted_pick(&new_cards, new_budget, next.review_time, seed)
            .into_iter()
            .map(|index| new_cards[index].id.as_str())
            .collect();

        incoming
            .into_iter()
            .filter(|card| !card.progress.is_new() || admitted.contains(card.id.as_str()))
            .take(next.remaining_capacity())
            .cloned()
            .collect()
    };
    next.heap = heap;

    fill_slots(&mut next);

    next.phase = match (next.current.is_some(), state.phase) {
        (false, _) => ReviewPhase::Complete,
        (true, ReviewPhase::Loading | ReviewPhase::Complete) => ReviewPhase::Question,
        (true, phase) => phase,
    };

    next
}

fn load_review(state: &ReviewState, summary: &ReviewSummary) -> ReviewState {
    let mut known: HashMap<&str, &Card> = HashMap::new();
    for card in state
        .history
        .iter()
        .chain(state.heap.iter())
        .chain(state.failed_cards_level2.iter())
        .chain(state.failed_cards_level1.iter())
        .chain(state.next_card())
        .chain(state.current_card())
    {
        known.insert(card.id.as_str(), card);
    }
    // Ids without a card here wait until the card is delivered.
    let resolve = |ids: &[String]| -> (Vec<Card>, Vec<String>) {
        let mut cards = Vec::new();
        let mut missing = Vec::new();
        for id in ids {
            match known.get(id.as_str()) {
                Some(card) => cards.push((*card).clone()),
                None => missing.push(id.clone()),
            }
        }
        (cards, missing)
    };

    let (failed_cards_level1, pending_level1) = resolve(&summary.failed_cards_level1);
    let (failed_cards_level2, pending_level2) = resolve(&summary.failed_cards_level2);
    let (history, pending_history) = resolve(&summary.history);

    let new_card_ids: BTreeSet<String> = state
        .new_card_ids
        .iter()
        .filter(|id| {
            failed_cards_level1.iter().any(|card| &card.id == *id)
                || failed_cards_level2.iter().any(|card| &card.id == *id)
        })
        .cloned()
        .collect();

    ReviewState {
        phase: ReviewPhase::Loading,
        max_cards: summary.max_cards,
        max_new_cards: summary.max_new_cards,
        review_time: state.review_time,
        current: None,
        next: None,
        heap: Vec::new(),
        failed_cards_level1,
        failed_cards_level2,
        history,
        completed: summary.completed,
        new_cards_in_play: summary.new_cards_completed + new_card_ids.len() as u32,
        new_cards_completed: summary.new_cards_completed,
        new_card_ids,
        pending: PendingCards {
            failed_cards_level1: pending_level1,
            failed_cards_level2: pending_level2,
            history: pending_history,
        },
        notes: state.notes.clone(),
    }
}

/// Put delivered cards whose ids wait in `pending` back where the summary
/// had them. They go in front of their queue, which only holds later
/// arrivals.
fn resolve_pending(state: &mut ReviewState, cards: &[Card]) {
    if state.pending.is_empty() {
        return;
    }

    let by_id: HashMap<&str, &Card> = cards.iter().map(|card| (card.id.as_str(), card)).collect();
    let pending = std::mem::take(&mut state.pending);
    let split = |ids: Vec<String>| -> (Vec<Card>, Vec<String>) {
        let mut found = Vec::new();
        let mut waiting = Vec::new();
        for id in ids {
            match by_id.get(id.as_str()) {
                Some(card) => found.push((*card).clone()),
                None => waiting.push(id),
            }
        }
        (found, waiting)
    };

    let (level1, waiting_level1) = split(pending.failed_cards_level1);
    let (level2, waiting_level2) = split(pending.failed_cards_level2);
    let (history, waiting_history) = split(pending.history);

    state.failed_cards_level1.splice(0..0, level1);
    state.failed_cards_level2.splice(0..0, level2);
    state.history.splice(0..0, history);
    state.pending = PendingCards {
        failed_cards_level1: waiting_level1,
        failed_cards_level2: waiting_level2,
        history: waiting_history,
    };
}

// ==================== ANSWERING ====================

/// A copy of the state if it has a card to answer.
fn answerable(state: &ReviewState) -> Option<ReviewState> {
    match state.phase {
        ReviewPhase::Question | ReviewPhase::Answer if state.current.is_some() => {
            Some(state.clone())
        }
        _ => None,
    }
}

fn pass_current(state: &mut ReviewState) {
    let Some(ReviewSlot { mut card, origin }) = state.current.take() else {
        return;
    };

    match origin {
        CardOrigin::FailedLevel2 => {
            card.progress = reset(state.review_time);
            remove_by_id(&mut state.failed_cards_level1, &card.id);
            state.failed_cards_level1.push(card.clone());
        }
        CardOrigin::FailedLevel1 | CardOrigin::Heap => {
            card.progress = passed(&card.progress, state.review_time);
            state.completed += 1;
            if state.new_card_ids.remove(&card.id) {
                state.new_cards_completed += 1;
            }
        }
    }

    record_history(state, card);
    advance(state);
}

fn fail_current(state: &mut ReviewState) {
    let Some(ReviewSlot { mut card, .. }) = state.current.take() else {
        return;
    };

    card.progress = reset(state.review_time);
    remove_by_id(&mut state.failed_cards_level1, &card.id);
    remove_by_id(&mut state.failed_cards_level2, &card.id);
    state.failed_cards_level2.push(card.clone());

    record_history(state, card);
    advance(state);
}

/// Move the next card up and draw a new next card.
fn advance(state: &mut ReviewState) {
    state.current = state.next.take();
    fill_slots(state);
    state.phase = if state.current.is_some() {
        ReviewPhase::Question
    } else {
        ReviewPhase::Complete
    };
}

fn record_history(state: &mut ReviewState, card: Card) {
    state.pending.history.retain(|id| id != &card.id);
    remove_by_id(&mut state.history, &card.id);
    state.history.push(card);
}

// ==================== EXTERNAL CHANGES ====================

fn update_card(state: &ReviewState, card: &Card) -> Option<ReviewState> {
    if !state.mentions(&card.id) {
        return None;
    }

    let mut next = state.clone();
    resolve_pending(&mut next, std::slice::from_ref(card));
    for slot in [&mut next.current, &mut next.next].into_iter().flatten() {
        if slot.card.id == card.id {
            slot.card = card.clone();
        }
    }
    for queue in [
        &mut next.heap,
        &mut next.failed_cards_level1,
        &mut next.failed_cards_level2,
        &mut next.history,
    ] {
        for entry in queue.iter_mut().filter(|entry| entry.id == card.id) {
            *entry = card.clone();
        }
    }

    Some(next)
}

fn delete_card(state: &ReviewState, id: &str) -> Option<ReviewState> {
    if !state.mentions(id) {
        return None;
    }

    let mut next = state.clone();
    let was_current = next.current_card().is_some_and(|card| card.id == id);

    if was_current {
        next.current = next.next.take();
    } else if next.next_card().is_some_and(|card| card.id == id) {
        next.next = None;
    }
    remove_by_id(&mut next.heap, id);
    remove_by_id(&mut next.failed_cards_level1, id);
    remove_by_id(&mut next.failed_cards_level2, id);
    remove_by_id(&mut next.history, id);
    next.pending.remove(id);
    // A deleted new card no longer uses up the new card budget.
    if next.new_card_ids.remove(id) {
        next.new_cards_in_play = next.new_cards_in_play.saturating_sub(1);
    }

    fill_slots(&mut next);

    if next.current.is_none() {
        if matches!(next.phase, ReviewPhase::Question | ReviewPhase::Answer) {
            next.phase = ReviewPhase::Complete;
        }
    } else if was_current && next.phase == ReviewPhase::Answer {
        next.phase = ReviewPhase::Question;
    }

    Some(next)
}

fn add_note(state: &ReviewState, context: &NoteContext) -> Option<ReviewState> {
    if context.screen != REVIEW_SCREEN {
        return None;
    }

    let mut next = state.clone();
    let new_id = next.notes.iter().map(|note| note.new_id).max().unwrap_or(0) + 1;
    next.notes.push(ReviewNote {
        new_id,
        content: String::new(),
    });
    Some(next)
}

// ==================== QUEUES ====================

/// Fill whichever slots are empty, current first.
fn fill_slots(state: &mut ReviewState) {
    if state.current.is_none() {
        state.current = draw(state);
    }
    if state.next.is_none() {
        state.next = draw(state);
    }
}

/// Take the next card to present: heap first, then level 1, then level 2.
fn draw(state: &mut ReviewState) -> Option<ReviewSlot> {
    let (card, origin) = if !state.heap.is_empty() {
        (state.heap.remove(0), CardOrigin::Heap)
    } else if !state.failed_cards_level1.is_empty() {
        (state.failed_cards_level1.remove(0), CardOrigin::FailedLevel1)
    } else if !state.failed_cards_level2.is_empty() {
        (state.failed_cards_level2.remove(0), CardOrigin::FailedLevel2)
    } else {
        return None;
    };

    if origin == CardOrigin::Heap && card.progress.is_new() && state.new_card_ids.insert(card.id.clone()) {
        state.new_cards_in_play += 1;
    }

    Some(ReviewSlot { card, origin })
}

fn remove_by_id(queue: &mut Vec<Card>, id: &str) {
    queue.retain(|card| card.id != id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Progress;
    use chrono::{DateTime, Duration, Utc};

    fn card(id: &str, progress: Progress, review_time: DateTime<Utc>) -> Card {
        Card {
            id: id.to_string(),
            rev: "1-00".into(),
            question: format!("Question {}", id),
            answer: format!("Answer {}", id),
            keywords: vec![],
            tags: vec![],
            created: review_time - Duration::days(10),
            modified: review_time - Duration::days(10),
            progress,
        }
    }

    /// `max_new` new cards followed by overdue cards, `max_cards` in all.
    fn generate_cards(max_new: usize, max_cards: usize, review_time: DateTime<Utc>) -> Vec<Card> {
        (0..max_cards)
            .map(|i| {
                let progress = if i < max_new {
                    Progress::default()
                } else {
                    Progress {
                        level: 1.0,
                        reviewed: Some(review_time - Duration::days(2)),
                    }
                };
                card(&format!("c{}", i), progress, review_time)
            })
            .collect()
    }

    fn new_review(max_new: u32, max_cards: u32) -> (Arc<ReviewState>, Vec<Card>, DateTime<Utc>) {
        let review_time = Utc::now();
        let state = review(
            &Arc::new(ReviewState::default()),
            &ReviewAction::NewReview {
                max_new_cards: max_new,
                max_cards,
                review_time,
            },
        );
        let cards = generate_cards(max_new as usize, max_cards as usize, review_time);
        (state, cards, review_time)
    }

    fn loaded(state: &Arc<ReviewState>, cards: &[Card]) -> Arc<ReviewState> {
        review(
            state,
            &ReviewAction::ReviewLoaded {
                cards: cards.to_vec(),
                seed: 0,
            },
        )
    }

    fn ids(cards: &[Card]) -> Vec<&str> {
        cards.iter().map(|card| card.id.as_str()).collect()
    }

    fn current_id(state: &ReviewState) -> Option<&str> {
        state.current_card().map(|card| card.id.as_str())
    }

    fn next_id(state: &ReviewState) -> Option<&str> {
        state.next_card().map(|card| card.id.as_str())
    }

    fn assert_exclusive(state: &ReviewState) {
        let ids = state.ids_in_play();
        let unique: HashSet<&str> = ids.iter().copied().collect();
        assert_eq!(ids.len(), unique.len(), "duplicate card in {:?}", ids);
    }

    #[test]
    fn test_new_review_goes_to_loading() {
        let (state, _, _) = new_review(2, 10);
        assert_eq!(state.phase, ReviewPhase::Loading);
        assert_eq!(state.max_new_cards, 2);
        assert_eq!(state.max_cards, 10);
    }

    #[test]
    fn test_set_review_limit_keeps_review_time() {
        let (state, _, review_time) = new_review(1, 3);
        let updated = review(&state, &ReviewAction::set_review_limit(2, 10));

        assert_eq!(updated.phase, ReviewPhase::Loading);
        assert_eq!(updated.max_new_cards, 2);
        assert_eq!(updated.max_cards, 10);
        assert_eq!(updated.review_time, review_time);
    }

    #[test]
    fn test_set_review_time() {
        let (state, _, review_time) = new_review(1, 3);
        let later = review_time + Duration::days(1);
        let updated = review(&state, &ReviewAction::set_review_time(later));

        assert_eq!(updated.review_time, later);
        assert_eq!(updated.phase, ReviewPhase::Loading);
        assert_eq!(updated.max_cards, 3);
    }

    #[test]
    fn test_review_loaded_fills_slots_and_heap() {
        let (state, cards, _) = new_review(1, 3);
        let updated = loaded(&state, &cards);

        assert_eq!(updated.phase, ReviewPhase::Question);
        assert_eq!(current_id(&updated), Some("c0"));
        assert_eq!(next_id(&updated), Some("c1"));
        assert_eq!(ids(&updated.heap), vec!["c2"]);
        assert_exclusive(&updated);
    }

    #[test]
    fn test_review_loaded_without_cards_completes() {
        let (state, _, _) = new_review(1, 3);
        let updated = loaded(&state, &[]);

        assert_eq!(updated.phase, ReviewPhase::Complete);
        assert!(updated.current.is_none());
        assert!(updated.next.is_none());
    }

    #[test]
    fn test_review_loaded_after_complete_returns_to_question() {
        let (state, cards, _) = new_review(1, 3);
        let complete = loaded(&state, &[]);
        let updated = loaded(&complete, &cards);
        assert_eq!(updated.phase, ReviewPhase::Question);
    }

    #[test]
    fn test_review_loaded_keeps_current_card() {
        let (state, cards, _) = new_review(0, 3);
        let first = loaded(&state, &cards[..1]);
        assert_eq!(current_id(&first), Some("c0"));
        assert!(first.next.is_none());

        let second = loaded(&first, &cards[1..]);
        assert_eq!(current_id(&second), Some("c0"));
        assert_eq!(next_id(&second), Some("c1"));
        assert_eq!(ids(&second.heap), vec!["c2"]);
    }

    #[test]
    fn test_review_loaded_skips_cards_in_play() {
        let (state, cards, _) = new_review(0, 3);
        let first = loaded(&state, &cards);
        let again = loaded(&first, &cards);
        assert_eq!(ids(&again.heap), vec!["c2"]);
        assert_exclusive(&again);
    }

    #[test]
    fn test_new_cards_are_limited() {
        let (state, _, review_time) = new_review(2, 5);
        let cards = generate_cards(5, 5, review_time);
        let updated = loaded(&state, &cards);

        let in_heap_or_slot = updated
            .ids_in_play()
            .len();
        assert_eq!(in_heap_or_slot, 2);
        assert_eq!(updated.new_cards_in_play, 2);
    }

    #[test]
    fn test_new_cards_in_play_counts_slotted_new_cards() {
        let (state, cards, _) = new_review(2, 3);
        let updated = loaded(&state, &cards);
        // c0 and c1 are new and slotted, c2 is overdue.
        assert_eq!(updated.new_cards_in_play, 2);

        let (state, cards, _) = new_review(0, 3);
        let updated = loaded(&state, &cards);
        assert_eq!(updated.new_cards_in_play, 0);
    }

    #[test]
    fn test_show_answer() {
        let (state, cards, _) = new_review(1, 3);
        let question = loaded(&state, &cards);
        let answer = review(&question, &ReviewAction::ShowAnswer);
        assert_eq!(answer.phase, ReviewPhase::Answer);

        let again = review(&answer, &ReviewAction::ShowAnswer);
        assert!(Arc::ptr_eq(&again, &answer));
    }

    #[test]
    fn test_fail_then_pass_scenario() {
        let (state, cards, _) = new_review(1, 3);
        let state = loaded(&state, &cards);

        let state = review(&state, &ReviewAction::FailCard);
        assert_eq!(current_id(&state), Some("c1"));
        assert_eq!(next_id(&state), Some("c2"));
        assert!(state.heap.is_empty());
        assert_eq!(ids(&state.failed_cards_level2), vec!["c0"]);
        assert_exclusive(&state);

        let state = review(&state, &ReviewAction::PassCard);
        assert_eq!(state.completed, 1);
        assert_eq!(current_id(&state), Some("c2"));
        assert_eq!(next_id(&state), Some("c0"));
        assert!(state.failed_cards_level2.is_empty());
        assert_exclusive(&state);

        let state = review(&state, &ReviewAction::PassCard);
        assert_eq!(state.completed, 2);
        assert_eq!(current_id(&state), Some("c0"));
        assert!(state.next.is_none());

        // c0 still owes two correct answers.
        let state = review(&state, &ReviewAction::PassCard);
        assert_eq!(state.completed, 2);
        assert_eq!(ids(&state.failed_cards_level1), Vec::<&str>::new());
        assert_eq!(current_id(&state), Some("c0"));
        assert_eq!(state.phase, ReviewPhase::Question);

        let state = review(&state, &ReviewAction::PassCard);
        assert_eq!(state.completed, 3);
        assert!(state.current.is_none());
        assert_eq!(state.phase, ReviewPhase::Complete);
    }

    #[test]
    fn test_pass_from_level2_demotes_to_level1() {
        let (state, cards, _) = new_review(0, 3);
        let state = loaded(&state, &cards);
        let state = review(&state, &ReviewAction::FailCard);
        let state = review(&state, &ReviewAction::FailCard);
        let state = review(&state, &ReviewAction::FailCard);
        assert_eq!(current_id(&state), Some("c0"));
        assert_eq!(next_id(&state), Some("c1"));
        assert_eq!(ids(&state.failed_cards_level2), vec!["c2"]);

        let state = review(&state, &ReviewAction::PassCard);
        assert_eq!(state.completed, 0);
        assert_eq!(current_id(&state), Some("c1"));
        let next = state.next.as_ref().unwrap();
        assert_eq!(next.card.id, "c0");
        assert_eq!(next.origin, CardOrigin::FailedLevel1);
        assert_eq!(next.card.progress.level, 0.0);
        assert_exclusive(&state);
    }

    #[test]
    fn test_pass_from_level2_resets_corrupt_level() {
        let (state, cards, review_time) = new_review(1, 1);
        let state = loaded(&state, &cards);
        let mut failed = (*review(&state, &ReviewAction::FailCard)).clone();
        // Fail with only one card puts it straight back into the current slot.
        assert_eq!(current_id(&failed), Some("c0"));
        failed.current.as_mut().unwrap().card.progress.level = 13.0;

        let state = review(&Arc::new(failed), &ReviewAction::PassCard);
        assert_eq!(current_id(&state), Some("c0"));
        let slot = state.current.as_ref().unwrap();
        assert_eq!(slot.origin, CardOrigin::FailedLevel1);
        assert_eq!(slot.card.progress.level, 0.0);
        assert_eq!(slot.card.progress.reviewed, Some(review_time));
    }

    #[test]
    fn test_refail_moves_card_to_tail() {
        let (state, cards, _) = new_review(3, 3);
        let state = loaded(&state, &cards);

        let state = review(&state, &ReviewAction::FailCard);
        let state = review(&state, &ReviewAction::FailCard);
        let state = review(&state, &ReviewAction::FailCard);
        assert_eq!(current_id(&state), Some("c0"));
        assert_eq!(next_id(&state), Some("c1"));
        assert_eq!(ids(&state.failed_cards_level2), vec!["c2"]);

        let state = review(&state, &ReviewAction::FailCard);
        assert_eq!(ids(&state.failed_cards_level2), vec!["c0"]);
        assert_eq!(current_id(&state), Some("c1"));
        assert_eq!(next_id(&state), Some("c2"));
        assert_exclusive(&state);
    }

    #[test]
    fn test_fail_resets_progress() {
        let (state, mut cards, review_time) = new_review(0, 1);
        cards[0].progress = Progress {
            level: 3.0,
            reviewed: Some(review_time - Duration::days(5)),
        };
        let state = loaded(&state, &cards);
        let state = review(&state, &ReviewAction::FailCard);

        let card = state.current_card().unwrap();
        assert_eq!(card.progress.level, 0.0);
        assert_eq!(card.progress.reviewed, Some(review_time));
        assert_eq!(state.completed, 0);
        assert_eq!(state.phase, ReviewPhase::Question);
    }

    #[test]
    fn test_pass_overdue_card_level() {
        let (state, mut cards, review_time) = new_review(0, 1);
        cards[0].progress = Progress {
            level: 3.0,
            reviewed: Some(review_time - Duration::days(5)),
        };
        let state = loaded(&state, &cards);
        let state = review(&state, &ReviewAction::PassCard);

        assert_eq!(state.history[0].progress.level, 10.0);
        assert_eq!(state.history[0].progress.reviewed, Some(review_time));
    }

    #[test]
    fn test_pass_early_card_keeps_level() {
        let (state, mut cards, review_time) = new_review(0, 1);
        cards[0].progress = Progress {
            level: 3.0,
            reviewed: Some(review_time - Duration::days(1)),
        };
        let state = loaded(&state, &cards);
        let state = review(&state, &ReviewAction::PassCard);

        assert_eq!(state.history[0].progress.level, 3.0);
    }

    #[test]
    fn test_pass_new_card_level() {
        let (state, cards, _) = new_review(1, 1);
        let state = loaded(&state, &cards);
        assert_eq!(state.current_card().unwrap().progress.level, 0.0);

        let state = review(&state, &ReviewAction::PassCard);
        assert_eq!(state.history[0].progress.level, 0.5);
        assert_eq!(state.new_cards_completed, 1);
    }

    #[test]
    fn test_completed_counts() {
        let (state, cards, _) = new_review(2, 2);
        let state = loaded(&state, &cards);
        assert_eq!(state.completed, 0);

        let state = review(&state, &ReviewAction::PassCard);
        assert_eq!(state.completed, 1);
        let state = review(&state, &ReviewAction::PassCard);
        assert_eq!(state.completed, 2);
        assert_eq!(state.phase, ReviewPhase::Complete);
    }

    #[test]
    fn test_failed_card_needs_two_passes() {
        let (state, cards, _) = new_review(1, 1);
        let state = loaded(&state, &cards);

        let state = review(&state, &ReviewAction::FailCard);
        assert!(state.current.is_some());
        let state = review(&state, &ReviewAction::PassCard);
        assert!(state.current.is_some());
        assert_eq!(state.completed, 0);
        let state = review(&state, &ReviewAction::PassCard);
        assert!(state.current.is_none());
        assert_eq!(state.completed, 1);
    }

    #[test]
    fn test_history_one_entry_per_card() {
        let (state, cards, _) = new_review(0, 2);
        let state = loaded(&state, &cards);

        let state = review(&state, &ReviewAction::FailCard);
        assert_eq!(ids(&state.history), vec!["c0"]);
        let state = review(&state, &ReviewAction::FailCard);
        assert_eq!(ids(&state.history), vec!["c0", "c1"]);
        assert_eq!(current_id(&state), Some("c0"));

        let state = review(&state, &ReviewAction::PassCard);
        assert_eq!(ids(&state.history), vec!["c1", "c0"]);
    }

    #[test]
    fn test_current_and_next_advance() {
        let (state, cards, _) = new_review(1, 3);
        let state = loaded(&state, &cards);

        let state = review(&state, &ReviewAction::PassCard);
        assert_eq!((current_id(&state), next_id(&state)), (Some("c1"), Some("c2")));
        let state = review(&state, &ReviewAction::PassCard);
        assert_eq!((current_id(&state), next_id(&state)), (Some("c2"), None));
        let state = review(&state, &ReviewAction::PassCard);
        assert_eq!((current_id(&state), next_id(&state)), (None, None));
    }

    #[test]
    fn test_pass_without_current_card_is_noop() {
        let (state, _, _) = new_review(1, 3);
        let complete = loaded(&state, &[]);
        assert!(Arc::ptr_eq(&complete, &review(&complete, &ReviewAction::PassCard)));
        assert!(Arc::ptr_eq(&complete, &review(&complete, &ReviewAction::FailCard)));
    }

    #[test]
    fn test_update_review_card_in_every_position() {
        let (state, cards, _) = new_review(0, 3);
        let state = loaded(&state, &cards);

        for id in ["c0", "c1", "c2"] {
            let mut edited = cards.iter().find(|c| c.id == id).unwrap().clone();
            edited.question = "Updated question".into();
            let updated = review(&state, &ReviewAction::update_review_card(edited.clone()));
            let found = updated
                .current_card()
                .into_iter()
                .chain(updated.next_card())
                .chain(updated.heap.iter())
                .find(|c| c.id == id)
                .unwrap();
            assert_eq!(found, &edited);
        }
    }

    #[test]
    fn test_update_unknown_card_is_same_state() {
        let (state, cards, _) = new_review(0, 3);
        let state = loaded(&state, &cards);
        let mut stranger = cards[0].clone();
        stranger.id = "something-random".into();

        let updated = review(&state, &ReviewAction::update_review_card(stranger));
        assert!(Arc::ptr_eq(&updated, &state));
    }

    #[test]
    fn test_delete_current_card() {
        let (state, cards, _) = new_review(0, 3);
        let state = loaded(&state, &cards);

        let updated = review(&state, &ReviewAction::delete_review_card("c0"));
        assert_eq!(current_id(&updated), Some("c1"));
        assert_eq!(next_id(&updated), Some("c2"));
        assert!(updated.heap.is_empty());
        assert!(updated.history.is_empty());
        assert_exclusive(&updated);
    }

    #[test]
    fn test_delete_last_card_completes() {
        let (state, cards, _) = new_review(0, 1);
        let state = loaded(&state, &cards);

        let updated = review(&state, &ReviewAction::delete_review_card("c0"));
        assert!(updated.current.is_none());
        assert!(updated.next.is_none());
        assert!(updated.history.is_empty());
        assert_eq!(updated.phase, ReviewPhase::Complete);
    }

    #[test]
    fn test_delete_next_and_heap_cards() {
        let (state, cards, _) = new_review(0, 4);
        let state = loaded(&state, &cards);

        let updated = review(&state, &ReviewAction::delete_review_card("c1"));
        assert_eq!(next_id(&updated), Some("c2"));
        assert_eq!(ids(&updated.heap), vec!["c3"]);

        let updated = review(&state, &ReviewAction::delete_review_card("c3"));
        assert_eq!(ids(&updated.heap), vec!["c2"]);
    }

    #[test]
    fn test_delete_failed_card() {
        let (state, cards, _) = new_review(0, 3);
        let state = loaded(&state, &cards);
        let state = review(&state, &ReviewAction::FailCard);

        let updated = review(&state, &ReviewAction::delete_review_card("c0"));
        assert!(updated.failed_cards_level2.is_empty());
        assert!(updated.history.is_empty());
    }

    #[test]
    fn test_delete_answered_card_leaves_history() {
        let (state, cards, _) = new_review(0, 3);
        let state = loaded(&state, &cards);
        let state = review(&state, &ReviewAction::PassCard);
        assert_eq!(ids(&state.history), vec!["c0"]);

        let updated = review(&state, &ReviewAction::delete_review_card("c0"));
        assert!(updated.history.is_empty());
        assert_eq!(updated.completed, 1);
        assert!(updated.summary().history.is_empty());
    }

    #[test]
    fn test_delete_new_card_frees_new_card_budget() {
        let (state, _, review_time) = new_review(1, 3);
        let cards: Vec<Card> = (0..3)
            .map(|i| card(&format!("n{}", i), Progress::default(), review_time))
            .collect();
        let state = loaded(&state, &cards);
        assert_eq!(state.new_cards_in_play, 1);
        let admitted = current_id(&state).unwrap().to_string();

        let updated = review(&state, &ReviewAction::delete_review_card(admitted.as_str()));
        assert_eq!(updated.new_cards_in_play, 0);
        assert_eq!(updated.phase, ReviewPhase::Complete);

        let remaining: Vec<Card> = cards.into_iter().filter(|c| c.id != admitted).collect();
        let reloaded = loaded(&updated, &remaining);
        assert_eq!(reloaded.new_cards_in_play, 1);
        assert!(reloaded.current.is_some());
        assert_ne!(current_id(&reloaded), Some(admitted.as_str()));
    }

    #[test]
    fn test_delete_unknown_card_is_same_state() {
        let (state, cards, _) = new_review(0, 3);
        let state = loaded(&state, &cards);
        let updated = review(&state, &ReviewAction::delete_review_card("random-id"));
        assert!(Arc::ptr_eq(&updated, &state));
    }

    #[test]
    fn test_cancel_resets_state() {
        let (state, cards, _) = new_review(1, 3);
        let state = loaded(&state, &cards);
        let cancelled = review(&state, &ReviewAction::CancelReview);
        assert_eq!(*cancelled, ReviewState::default());
    }

    #[test]
    fn test_load_review_merges_counts() {
        let (state, cards, _) = new_review(1, 3);
        let state = loaded(&state, &cards);
        assert_eq!(state.new_cards_in_play, 1);

        let summary = ReviewSummary {
            completed: 1,
            new_cards_completed: 1,
            ..state.summary()
        };
        let updated = review(&state, &ReviewAction::load_review(summary));

        assert_eq!(updated.phase, ReviewPhase::Loading);
        assert_eq!(updated.completed, 1);
        assert_eq!(updated.new_cards_in_play, 1);
        assert!(updated.current.is_none());
        assert!(updated.heap.is_empty());
    }

    #[test]
    fn test_load_review_restores_failed_queues() {
        let (state, cards, _) = new_review(0, 3);
        let state = loaded(&state, &cards);
        let state = review(&state, &ReviewAction::FailCard);

        let summary = state.summary();
        assert_eq!(summary.failed_cards_level2, vec!["c0".to_string()]);
        assert_eq!(summary.history, vec!["c0".to_string()]);

        let restored = review(&state, &ReviewAction::load_review(summary));
        assert_eq!(ids(&restored.failed_cards_level2), vec!["c0"]);
        assert_eq!(ids(&restored.history), vec!["c0"]);

        let reloaded = loaded(&restored, &cards);
        assert_eq!(current_id(&reloaded), Some("c1"));
        assert_eq!(next_id(&reloaded), Some("c2"));
        assert_exclusive(&reloaded);
    }

    #[test]
    fn test_reload_after_resume_respects_card_limit() {
        let (state, _, review_time) = new_review(0, 2);
        let cards = generate_cards(0, 5, review_time);
        let state = loaded(&state, &cards);
        let state = review(&state, &ReviewAction::PassCard);
        assert_eq!(state.completed, 1);

        let fresh = review(
            &Arc::new(ReviewState::default()),
            &ReviewAction::load_review(state.summary()),
        );
        assert!(fresh.history.is_empty());
        assert_eq!(fresh.pending.history, vec!["c0".to_string()]);

        let reloaded = loaded(&fresh, &cards);
        assert_eq!(ids(&reloaded.history), vec!["c0"]);
        assert!(reloaded.pending.is_empty());
        assert_eq!(reloaded.completed as usize + reloaded.ids_in_play().len(), 2);
        assert!(!reloaded.ids_in_play().contains(&"c0"));
        assert_exclusive(&reloaded);
    }

    #[test]
    fn test_pending_failed_card_returns_to_its_queue() {
        let (state, cards, _) = new_review(0, 3);
        let state = loaded(&state, &cards);
        let state = review(&state, &ReviewAction::FailCard);
        let summary = state.summary();

        let fresh = review(
            &Arc::new(ReviewState::default()),
            &ReviewAction::load_review(summary.clone()),
        );
        assert!(fresh.failed_cards_level2.is_empty());
        assert!(fresh.contains("c0"));
        assert_eq!(fresh.remaining_capacity(), 2);

        let reloaded = loaded(&fresh, &cards);
        assert_eq!(current_id(&reloaded), Some("c1"));
        assert_eq!(next_id(&reloaded), Some("c2"));
        assert!(reloaded.heap.is_empty());
        assert_eq!(ids(&reloaded.failed_cards_level2), vec!["c0"]);
        assert_eq!(reloaded.summary().failed_cards_level2, summary.failed_cards_level2);
        assert_eq!(reloaded.summary().history, summary.history);
        assert_exclusive(&reloaded);

        // Through both levels before it counts as completed.
        let state = review(&reloaded, &ReviewAction::PassCard);
        let state = review(&state, &ReviewAction::PassCard);
        assert_eq!(current_id(&state), Some("c0"));
        assert_eq!(state.current.as_ref().unwrap().origin, CardOrigin::FailedLevel2);
        let state = review(&state, &ReviewAction::PassCard);
        assert_eq!(current_id(&state), Some("c0"));
        assert_eq!(state.completed, 2);
        let state = review(&state, &ReviewAction::PassCard);
        assert_eq!(state.completed, 3);
        assert_eq!(state.phase, ReviewPhase::Complete);
    }

    #[test]
    fn test_update_resolves_pending_card() {
        let (state, cards, _) = new_review(0, 3);
        let state = loaded(&state, &cards);
        let state = review(&state, &ReviewAction::FailCard);

        let fresh = review(
            &Arc::new(ReviewState::default()),
            &ReviewAction::load_review(state.summary()),
        );
        let mut edited = cards[0].clone();
        edited.question = "Updated question".into();
        let updated = review(&fresh, &ReviewAction::update_review_card(edited.clone()));

        assert!(updated.pending.is_empty());
        assert_eq!(updated.failed_cards_level2, vec![edited.clone()]);
        assert_eq!(updated.history, vec![edited]);
    }

    #[test]
    fn test_add_note_only_on_review_screen() {
        let (state, _, _) = new_review(1, 3);

        let updated = review(&state, &ReviewAction::add_note(REVIEW_SCREEN));
        assert_eq!(updated.notes.len(), 1);

        let ignored = review(&state, &ReviewAction::add_note("lookup"));
        assert!(Arc::ptr_eq(&ignored, &state));
    }

    #[test]
    fn test_exclusive_through_random_sequence() {
        let (state, _, review_time) = new_review(3, 8);
        let cards = generate_cards(3, 8, review_time);
        let mut state = loaded(&state, &cards);

        let script = [
            ReviewAction::FailCard,
            ReviewAction::PassCard,
            ReviewAction::FailCard,
            ReviewAction::delete_review_card("c4"),
            ReviewAction::FailCard,
            ReviewAction::PassCard,
            ReviewAction::ReviewLoaded {
                cards: cards.clone(),
                seed: 3,
            },
            ReviewAction::PassCard,
            ReviewAction::FailCard,
            ReviewAction::PassCard,
            ReviewAction::PassCard,
        ];
        for action in &script {
            state = review(&state, action);
            assert_exclusive(&state);
        }
    }
}
