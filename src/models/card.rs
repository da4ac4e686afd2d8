//! Card model and the records it is assembled from.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

const MS_PER_DAY: f64 = 24.0 * 60.0 * 60.0 * 1000.0;

/// Review progress for a card.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    /// Interval in days; 0 means the card has never been passed
    #[serde(default)]
    pub level: f64,
    #[serde(default)]
    pub reviewed: Option<DateTime<Utc>>,
}

impl Progress {
    /// A card that has never been reviewed.
    pub fn is_new(&self) -> bool {
        self.reviewed.is_none()
    }

    /// When the card next falls due, if it has ever been reviewed.
    pub fn due(&self) -> Option<DateTime<Utc>> {
        let reviewed = self.reviewed?;
        let level = if self.level.is_finite() && self.level > 0.0 {
            self.level
        } else {
            0.0
        };
        Some(reviewed + Duration::milliseconds((level * MS_PER_DAY) as i64))
    }

    /// Fraction by which the card is overdue at `review_time`.
    ///
    /// Zero or less means the card is not yet due.
    pub fn overdueness(&self, review_time: DateTime<Utc>) -> f64 {
        let Some(reviewed) = self.reviewed else {
            return 0.0;
        };
        let elapsed = (review_time - reviewed).num_milliseconds() as f64 / MS_PER_DAY;
        if self.level > 0.0 && self.level.is_finite() {
            (elapsed - self.level) / self.level
        } else {
            elapsed
        }
    }
}

/// Card content as stored in its `card-` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardContent {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

/// A card as returned to callers, content joined with progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: String,
    pub rev: String,
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    #[serde(default)]
    pub progress: Progress,
}

impl Card {
    pub fn from_parts(id: String, rev: String, content: CardContent, progress: Progress) -> Self {
        Self {
            id,
            rev,
            question: content.question,
            answer: content.answer,
            keywords: content.keywords,
            tags: content.tags,
            created: content.created,
            modified: content.modified,
            progress,
        }
    }
}

/// A partial card write. Only the supplied fields change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardPatch {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub rev: Option<String>,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub keywords: Option<Vec<String>>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    /// Written only by the review path
    #[serde(default)]
    pub progress: Option<Progress>,
}

impl CardPatch {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: Some(question.into()),
            answer: Some(answer.into()),
            ..Default::default()
        }
    }

    pub fn for_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }
}

impl From<&Card> for CardPatch {
    fn from(card: &Card) -> Self {
        Self {
            id: Some(card.id.clone()),
            rev: Some(card.rev.clone()),
            question: Some(card.question.clone()),
            answer: Some(card.answer.clone()),
            keywords: Some(card.keywords.clone()),
            tags: Some(card.tags.clone()),
            progress: None,
        }
    }
}

/// A card change record: `{ id, doc, deleted }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardChange {
    pub id: String,
    #[serde(rename = "doc")]
    pub card: Option<Card>,
    pub deleted: bool,
}

impl CardChange {
    pub fn updated(card: Card) -> Self {
        Self {
            id: card.id.clone(),
            card: Some(card),
            deleted: false,
        }
    }

    pub fn deleted(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            card: None,
            deleted: true,
        }
    }
}

/// Counts of cards eligible for review.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableCards {
    pub new_cards: usize,
    pub overdue_cards: usize,
}
