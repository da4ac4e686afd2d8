//! Spaced-repetition review.
//!
//! [`review`] is the pure state machine; [`ReviewSession`] feeds it cards
//! from a [`crate::cards::CardStore`] and persists what it decides.

mod actions;
mod reducer;
mod scheduling;
mod session;
mod state;
pub mod sync;

pub use actions::*;
pub use reducer::*;
pub use scheduling::*;
pub use session::*;
pub use state::*;
