//! Durable spill queue for unflushed write batches
//!
//! Append-only file of `<epoch_ms> <line protocol>` rows. Batches land here
//! when the store stays unreachable past the retry budget; the writer drains
//! the file on startup and after the first successful write. Rows older than
//! the retention window are dropped at drain time with a warning.

use chrono::{DateTime, Utc};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use tracing::{info, warn};

/// How long undrained rows are kept before being abandoned.
pub const SPILL_RETENTION_HOURS: i64 = 72;

#[derive(Debug, thiserror::Error)]
pub enum SpillError {
    #[error("spill I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Append-only spill file.
pub struct SpillQueue {
    path: PathBuf,
}

impl SpillQueue {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SpillError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    /// Append a batch of line-protocol lines, stamped with `now`.
    pub fn append(&self, lines: &[String], now: DateTime<Utc>) -> Result<(), SpillError> {
        if lines.is_empty() {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let stamp = now.timestamp_millis();
        for line in lines {
            writeln!(file, "{stamp} {line}")?;
        }
        file.sync_data()?;
        info!(lines = lines.len(), path = %self.path.display(), "spilled batch to disk");
        Ok(())
    }

    /// Read back every retained line and truncate the file. Rows older than
    /// `SPILL_RETENTION_HOURS` relative to `now` are dropped with a warning.
    pub fn drain(&self, now: DateTime<Utc>) -> Result<Vec<String>, SpillError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let cutoff_ms = (now - chrono::Duration::hours(SPILL_RETENTION_HOURS)).timestamp_millis();
        let reader = BufReader::new(File::open(&self.path)?);

        let mut fresh = Vec::new();
        let mut expired = 0usize;
        for line in reader.lines() {
            let line = line?;
            let Some((stamp, payload)) = line.split_once(' ') else {
                expired += 1;
                continue;
            };
            match stamp.parse::<i64>() {
                Ok(ms) if ms >= cutoff_ms => fresh.push(payload.to_string()),
                Ok(_) => expired += 1,
                Err(_) => expired += 1,
            }
        }

        // Truncate: drained rows are gone whether or not the caller's write
        // later succeeds (the caller re-spills on failure).
        File::create(&self.path)?;

        if expired > 0 {
            warn!(
                dropped_lines = expired,
                retention_hours = SPILL_RETENTION_HOURS,
                "dropped expired spill rows"
            );
        }
        if !fresh.is_empty() {
            info!(lines = fresh.len(), "drained spill file");
        }
        Ok(fresh)
    }

    /// Pending row count (for health reporting).
    pub fn pending_lines(&self) -> usize {
        let Ok(file) = File::open(&self.path) else {
            return 0;
        };
        BufReader::new(file).lines().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn append_then_drain_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let queue = SpillQueue::open(dir.path().join("spill.lp")).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();

        queue
            .append(
                &["m,entity_id=light.a state=\"on\" 1".to_string(),
                  "m,entity_id=light.b state=\"off\" 2".to_string()],
                now,
            )
            .unwrap();
        assert_eq!(queue.pending_lines(), 2);

        let drained = queue.drain(now).unwrap();
        assert_eq!(drained.len(), 2);
        assert!(drained[0].starts_with("m,entity_id=light.a"));

        // Drain truncates.
        assert_eq!(queue.pending_lines(), 0);
        assert!(queue.drain(now).unwrap().is_empty());
    }

    #[test]
    fn expired_rows_are_dropped_at_drain() {
        let dir = tempfile::tempdir().unwrap();
        let queue = SpillQueue::open(dir.path().join("spill.lp")).unwrap();
        let old = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();

        queue.append(&["m state=1 1".to_string()], old).unwrap();

        let later = old + chrono::Duration::hours(SPILL_RETENTION_HOURS + 1);
        let drained = queue.drain(later).unwrap();
        assert!(drained.is_empty());
    }

    #[test]
    fn drain_on_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let queue = SpillQueue::open(dir.path().join("never_written.lp")).unwrap();
        assert!(queue.drain(Utc::now()).unwrap().is_empty());
    }
}
