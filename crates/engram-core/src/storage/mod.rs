//! Storage Module
//!
//! SQLite-backed store for the persisted collections: memories with
//! their learning state, relationships, temporal patterns, per-principal
//! weights, the prediction cache, and the learning metric series.
//! Cascade deletes and per-record atomic updates are enforced here.

mod migrations;
mod sqlite;

pub use migrations::MIGRATIONS;
pub use sqlite::{EmbeddingUpdate, Store, StoreStats};
