//! Persisted review summary.

use serde::{Deserialize, Serialize};

/// The resumable part of a review session, stored as `review-default`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewSummary {
    pub max_cards: u32,
    pub max_new_cards: u32,
    #[serde(default)]
    pub completed: u32,
    #[serde(default)]
    pub new_cards_completed: u32,
    /// Ids of cards answered so far, most recent last
    #[serde(default)]
    pub history: Vec<String>,
    #[serde(default)]
    pub failed_cards_level1: Vec<String>,
    #[serde(default)]
    pub failed_cards_level2: Vec<String>,
}
