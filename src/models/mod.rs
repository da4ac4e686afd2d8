//! Data models for the card store.
//!
//! Field names serialize in camelCase so stored documents stay readable by
//! other clients of the same database.

mod card;
mod document;
mod review;

pub use card::*;
pub use document::*;
pub use review::*;
