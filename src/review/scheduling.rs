//! Interval growth and new-card selection.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::models::{Card, Progress};

const MS_PER_DAY: f64 = 24.0 * 60.0 * 60.0 * 1000.0;

/// Level a card reaches when passed at `review_time`.
///
/// The interval becomes twice the time since the last review but never
/// shrinks. A card without a usable level starts at half a day.
pub fn next_level(progress: &Progress, review_time: DateTime<Utc>) -> f64 {
    let level = progress.level;
    let Some(reviewed) = progress.reviewed else {
        return 0.5;
    };
    if !level.is_finite() || level <= 0.0 {
        return 0.5;
    }

    let elapsed_days = (review_time - reviewed).num_milliseconds() as f64 / MS_PER_DAY;
    (2.0 * elapsed_days).max(level)
}

/// Progress after a pass.
pub fn passed(progress: &Progress, review_time: DateTime<Utc>) -> Progress {
    Progress {
        level: next_level(progress, review_time),
        reviewed: Some(review_time),
    }
}

/// Progress after a fail, or after a pass that only clears one failure level.
pub fn reset(review_time: DateTime<Utc>) -> Progress {
    Progress {
        level: 0.0,
        reviewed: Some(review_time),
    }
}

/// Choose `count` of `candidates` without replacement, favouring older cards.
///
/// Returns the chosen indices in ascending order. Deterministic for a seed.
pub fn weighted_pick(
    candidates: &[&Card],
    count: usize,
    review_time: DateTime<Utc>,
    seed: u64,
) -> Vec<usize> {
    if count >= candidates.len() {
        return (0..candidates.len()).collect();
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut remaining: Vec<(usize, f64)> = candidates
        .iter()
        .enumerate()
        .map(|(index, card)| {
            let age = (review_time - card.created).num_milliseconds() as f64 / MS_PER_DAY;
            (index, 1.0 + age.max(0.0))
        })
        .collect();

    let mut chosen = Vec::with_capacity(count);
    while chosen.len() < count && !remaining.is_empty() {
        let total: f64 = remaining.iter().map(|(_, weight)| weight).sum();
        let mut target = rng.gen::<f64>() * total;
        let mut pick = remaining.len() - 1;
        for (position, (_, weight)) in remaining.iter().enumerate() {
            if target < *weight {
                pick = position;
                break;
            }
            target -= weight;
        }
        chosen.push(remaining.remove(pick).0);
    }

    chosen.sort_unstable();
    chosen
}
