//! Persistence layer for completed turns
//!
//! Provides:
//! - The `TurnStore` interface
//! - An in-memory store and an append-only JSON-lines store
//! - `spawn_append`, the fire-and-forget write used on the response path

pub mod error;
pub mod turns;

pub use error::PersistenceError;
pub use turns::{spawn_append, InMemoryTurnStore, JsonlTurnStore, TurnRecord, TurnStore};

use std::sync::Arc;

use parley_config::PersistenceConfig;

/// Build the turn store selected by configuration
pub fn init(config: &PersistenceConfig) -> Arc<dyn TurnStore> {
    match &config.turn_log_path {
        Some(path) => {
            tracing::info!(path = %path, "Persisting turns to JSON-lines log");
            Arc::new(JsonlTurnStore::new(path))
        }
        None => {
            tracing::info!(
                capacity = config.memory_capacity,
                "No turn log configured, keeping recent turns in memory"
            );
            Arc::new(InMemoryTurnStore::with_capacity(config.memory_capacity))
        }
    }
}
