//! Persistent relational-style stores
//!
//! Patterns and Suggestions live in sled trees with JSON values and explicit
//! IDs; all cross-component references use those IDs. The schema is
//! versioned by `migrations`.

pub mod migrations;
pub mod patterns;
pub mod suggestions;

use std::path::Path;
use std::sync::Arc;

pub use patterns::PatternStore;
pub use suggestions::SuggestionStore;

/// Store errors shared across the trees.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("illegal transition: {0}")]
    IllegalTransition(String),
    #[error("migration failed: {0}")]
    Migration(String),
}

/// Open the shared database, run migrations, and hand out the typed stores.
pub fn open(data_dir: &Path) -> Result<(PatternStore, SuggestionStore), StoreError> {
    std::fs::create_dir_all(data_dir)
        .map_err(|e| StoreError::Migration(format!("create data dir: {e}")))?;
    let db = Arc::new(sled::open(data_dir.join("hestia.db"))?);
    migrations::run(&db)?;
    Ok((PatternStore::new(Arc::clone(&db))?, SuggestionStore::new(db)?))
}
