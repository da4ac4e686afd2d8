//! Key collation for the document store.
//!
//! Document ids are ordered by UTF-16 code units rather than by Rust's
//! code-point order. The two agree for most text but differ once characters
//! outside the basic multilingual plane meet characters in U+E000..U+FFFF.
//! The same comparator is registered with SQLite so listings and in-memory
//! searches agree.

use std::cmp::Ordering;

use crate::models::{Card, CardChange};

/// Name of the SQLite collation backed by [`collate`].
pub const COLLATION_NAME: &str = "doc_collate";

/// Compare two document keys in the store's native order.
pub fn collate(a: &str, b: &str) -> Ordering {
    a.encode_utf16().cmp(b.encode_utf16())
}

/// Binary search over a sequence sorted in *descending* order under `cmp`.
///
/// Returns `Ok(index)` when an element with `key` exists, otherwise
/// `Err(index)` with the position where it would be inserted to keep the
/// order.
pub fn find_sorted<T, K, C>(items: &[T], key: &str, key_of: K, cmp: C) -> Result<usize, usize>
where
    K: Fn(&T) -> &str,
    C: Fn(&str, &str) -> Ordering,
{
    let mut low = 0;
    let mut high = items.len();

    while low < high {
        let mid = low + (high - low) / 2;
        match cmp(key_of(&items[mid]), key) {
            Ordering::Equal => return Ok(mid),
            Ordering::Greater => low = mid + 1,
            Ordering::Less => high = mid,
        }
    }

    Err(low)
}

/// A newest-first listing of cards kept current from the change feed.
#[derive(Debug, Clone, Default)]
pub struct SortedCards {
    cards: Vec<Card>,
}

impl SortedCards {
    /// Build a listing, sorting the given cards newest-first.
    pub fn new(mut cards: Vec<Card>) -> Self {
        cards.sort_by(|a, b| collate(&b.id, &a.id));
        cards.dedup_by(|a, b| a.id == b.id);
        Self { cards }
    }

    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.find(id).ok()
    }

    fn find(&self, id: &str) -> Result<usize, usize> {
        find_sorted(&self.cards, id, |card| card.id.as_str(), collate)
    }

    /// Apply a change: replace on update, remove on delete, insert on add.
    ///
    /// Returns `true` when the listing changed.
    pub fn apply(&mut self, change: &CardChange) -> bool {
        let found = self.find(&change.id);

        match (&change.card, found) {
            (Some(card), Ok(index)) if !change.deleted => {
                self.cards[index] = card.clone();
                true
            }
            (Some(card), Err(index)) if !change.deleted => {
                self.cards.insert(index, card.clone());
                true
            }
            (_, Ok(index)) => {
                self.cards.remove(index);
                true
            }
            (_, Err(_)) => false,
        }
    }
}
