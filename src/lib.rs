//! Cardsync
//!
//! A spaced-repetition card store on top of a replicating document store:
//! SQLite persistence, a change feed, peer-to-peer sync over HTTP, a review
//! scheduler and Tantivy card lookup.

pub mod api;
pub mod auth;
pub mod cards;
pub mod collate;
pub mod config;
pub mod db;
pub mod edit;
pub mod errors;
pub mod lookup;
pub mod models;
pub mod review;
pub mod sync;
