//! Pattern store
//!
//! Keyed by the deterministic pattern id, so re-detection of the same
//! regularity updates in place (earliest `first_seen` is kept). A marker
//! tree tracks which patterns already produced a suggestion.

use sled::Db;
use std::sync::Arc;

use crate::types::Pattern;

use super::StoreError;

pub const TREE_PATTERNS: &str = "patterns";
pub const TREE_SUGGESTED: &str = "suggested_patterns";

#[derive(Clone)]
pub struct PatternStore {
    patterns: sled::Tree,
    suggested: sled::Tree,
}

impl PatternStore {
    pub fn new(db: Arc<Db>) -> Result<Self, StoreError> {
        Ok(Self {
            patterns: db.open_tree(TREE_PATTERNS)?,
            suggested: db.open_tree(TREE_SUGGESTED)?,
        })
    }

    /// Insert or update a pattern. Existing records keep their earliest
    /// `first_seen`; everything else is replaced by the fresh detection.
    pub fn upsert(&self, pattern: &Pattern) -> Result<(), StoreError> {
        let mut record = pattern.clone();
        if let Some(existing) = self.get(&pattern.pattern_id)? {
            record.first_seen = record.first_seen.min(existing.first_seen);
        }
        let value = serde_json::to_vec(&record)?;
        self.patterns.insert(record.pattern_id.as_bytes(), value)?;
        Ok(())
    }

    pub fn upsert_all(&self, patterns: &[Pattern]) -> Result<usize, StoreError> {
        for pattern in patterns {
            self.upsert(pattern)?;
        }
        Ok(patterns.len())
    }

    pub fn get(&self, pattern_id: &str) -> Result<Option<Pattern>, StoreError> {
        Ok(self
            .patterns
            .get(pattern_id.as_bytes())?
            .and_then(|v| serde_json::from_slice(&v).ok()))
    }

    /// Patterns above the quality floor with no suggestion yet, newest first.
    pub fn unsuggested(&self, quality_floor: f64) -> Result<Vec<Pattern>, StoreError> {
        let mut out = Vec::new();
        for item in self.patterns.iter() {
            let (key, value) = item?;
            if self.suggested.contains_key(&key)? {
                continue;
            }
            let Ok(pattern) = serde_json::from_slice::<Pattern>(&value) else {
                continue;
            };
            if pattern.confidence >= quality_floor {
                out.push(pattern);
            }
        }
        out.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        Ok(out)
    }

    /// Mark a pattern as having produced a suggestion.
    pub fn mark_suggested(&self, pattern_id: &str) -> Result<(), StoreError> {
        self.suggested.insert(pattern_id.as_bytes(), &[1])?;
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.patterns.len()
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.patterns.flush()?;
        self.suggested.flush()?;
        Ok(())
    }
}
