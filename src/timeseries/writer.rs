//! Batching time-series writer
//!
//! Consumes enriched events, builds and validates one point each, and
//! flushes in bounded batches (N points or T milliseconds, whichever first).
//! Transient store failures retry with exponential backoff; exhausted
//! batches spill to the durable queue and the writer keeps accepting events.

use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::types::EnrichedEvent;

use super::client::{TimeseriesClient, WriteError};
use super::point::Point;
use super::spill::SpillQueue;

/// Retry schedule: exponential from 100 ms, capped at 30 s, 5 attempts.
const BACKOFF_INITIAL_MS: u64 = 100;
const BACKOFF_CAP_MS: u64 = 30_000;
const MAX_WRITE_ATTEMPTS: u32 = 5;

/// Writer counters for the observability surface. Written with atomic adds.
#[derive(Debug, Default)]
pub struct WriterMetrics {
    pub points_written: AtomicU64,
    pub points_dropped_schema: AtomicU64,
    pub batches_flushed: AtomicU64,
    pub batches_spilled: AtomicU64,
    pub spill_drained_lines: AtomicU64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WriterSnapshot {
    pub points_written: u64,
    pub points_dropped_schema: u64,
    pub batches_flushed: u64,
    pub batches_spilled: u64,
    pub spill_drained_lines: u64,
    pub degraded: bool,
}

impl WriterMetrics {
    pub fn snapshot(&self) -> WriterSnapshot {
        let spilled = self.batches_spilled.load(Ordering::Relaxed);
        WriterSnapshot {
            points_written: self.points_written.load(Ordering::Relaxed),
            points_dropped_schema: self.points_dropped_schema.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            batches_spilled: spilled,
            spill_drained_lines: self.spill_drained_lines.load(Ordering::Relaxed),
            degraded: spilled > 0,
        }
    }
}

/// The writer task. Owns the batch buffer and the spill queue.
pub struct TimeseriesWriter {
    client: TimeseriesClient,
    spill: SpillQueue,
    batch_size: usize,
    flush_interval: Duration,
    metrics: Arc<WriterMetrics>,
    buffer: Vec<String>,
}

impl TimeseriesWriter {
    pub fn new(
        client: TimeseriesClient,
        spill: SpillQueue,
        batch_size: usize,
        flush_interval: Duration,
    ) -> Self {
        Self {
            client,
            spill,
            batch_size: batch_size.max(1),
            flush_interval,
            metrics: Arc::new(WriterMetrics::default()),
            buffer: Vec::new(),
        }
    }

    pub fn metrics(&self) -> Arc<WriterMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Drive the writer until the channel closes or cancellation, flushing
    /// remaining points on the way out. Drains the spill file at startup.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<EnrichedEvent>,
        cancel: CancellationToken,
    ) {
        info!(batch_size = self.batch_size, "time-series writer started");
        self.drain_spill().await;

        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe_event = rx.recv() => {
                    match maybe_event {
                        Some(event) => {
                            self.buffer_event(&event);
                            if self.buffer.len() >= self.batch_size {
                                self.flush().await;
                            }
                        }
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    self.flush().await;
                }
                _ = cancel.cancelled() => {
                    // Drain whatever the pipeline already queued.
                    while let Ok(event) = rx.try_recv() {
                        self.buffer_event(&event);
                    }
                    break;
                }
            }
        }

        self.flush().await;
        info!(
            written = self.metrics.points_written.load(Ordering::Relaxed),
            "time-series writer stopped"
        );
    }

    /// Build, validate, and buffer the point for one enriched event.
    /// Schema violations drop the point with a fingerprinted log line.
    fn buffer_event(&mut self, event: &EnrichedEvent) {
        let point = Point::from_enriched(event);
        match point.validate() {
            Ok(()) => self.buffer.push(point.to_line_protocol()),
            Err(violation) => {
                self.metrics
                    .points_dropped_schema
                    .fetch_add(1, Ordering::Relaxed);
                error!(
                    fingerprint = %violation.fingerprint(),
                    entity_id = %event.event.entity_id,
                    "schema violation, point dropped"
                );
            }
        }
    }

    /// Flush the buffer: retry transient failures with backoff, preserve
    /// order within the batch, spill on exhaustion.
    async fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.buffer);

        match self.write_with_retry(&batch).await {
            Ok(()) => {
                self.metrics
                    .points_written
                    .fetch_add(batch.len() as u64, Ordering::Relaxed);
                self.metrics.batches_flushed.fetch_add(1, Ordering::Relaxed);
                // The store is reachable again; recover spilled history.
                if self.spill.pending_lines() > 0 {
                    self.drain_spill().await;
                }
            }
            Err(WriteError::Fatal(reason)) => {
                error!(reason = %reason, lines = batch.len(), "fatal write failure, batch dropped");
            }
            Err(WriteError::Retryable(reason)) => {
                warn!(reason = %reason, lines = batch.len(), "write retries exhausted, spilling batch");
                if let Err(e) = self.spill.append(&batch, Utc::now()) {
                    error!(error = %e, "spill append failed, batch lost");
                }
                self.metrics.batches_spilled.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    async fn write_with_retry(&self, batch: &[String]) -> Result<(), WriteError> {
        let mut delay_ms = BACKOFF_INITIAL_MS;
        let mut last_error = WriteError::Retryable("no attempt made".to_string());

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            match self.client.write_lines(batch).await {
                Ok(()) => return Ok(()),
                Err(fatal @ WriteError::Fatal(_)) => return Err(fatal),
                Err(retryable) => {
                    warn!(attempt, error = %retryable, "transient write failure");
                    last_error = retryable;
                    if attempt < MAX_WRITE_ATTEMPTS {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        delay_ms = (delay_ms * 2).min(BACKOFF_CAP_MS);
                    }
                }
            }
        }
        Err(last_error)
    }

    async fn drain_spill(&mut self) {
        let lines = match self.spill.drain(Utc::now()) {
            Ok(lines) => lines,
            Err(e) => {
                error!(error = %e, "failed to drain spill file");
                return;
            }
        };
        if lines.is_empty() {
            return;
        }

        // Re-submit in original order, in store-sized chunks.
        let count = lines.len() as u64;
        for chunk in lines.chunks(self.batch_size) {
            match self.write_with_retry(chunk).await {
                Ok(()) => {
                    self.metrics
                        .points_written
                        .fetch_add(chunk.len() as u64, Ordering::Relaxed);
                }
                Err(WriteError::Fatal(reason)) => {
                    error!(reason = %reason, "fatal failure draining spill chunk, dropped");
                }
                Err(WriteError::Retryable(_)) => {
                    // Still unreachable: put the remainder back and stop.
                    if let Err(e) = self.spill.append(chunk, Utc::now()) {
                        error!(error = %e, "failed to re-spill chunk");
                    }
                    return;
                }
            }
        }
        self.metrics
            .spill_drained_lines
            .fetch_add(count, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InfluxConfig;
    use crate::types::{EntityMetadata, NormalizedEvent, StateValue};
    use chrono::TimeZone;

    fn enriched(entity_id: &str) -> EnrichedEvent {
        EnrichedEvent {
            event: NormalizedEvent {
                event_type: "state_changed".into(),
                entity_id: entity_id.into(),
                domain: entity_id.split('.').next().unwrap_or("x").into(),
                time_fired: chrono::Utc.with_ymd_and_hms(2025, 6, 1, 7, 0, 0).unwrap(),
                synthetic_timestamp: false,
                state: StateValue::Bool(true),
                previous_state: None,
                attributes: serde_json::Map::new(),
                metadata: EntityMetadata {
                    domain: "light".into(),
                    ..EntityMetadata::default()
                },
                context: crate::types::EventContext::default(),
            },
            weather: None,
            occupancy: None,
            duration_in_state_seconds: None,
        }
    }

    fn writer(dir: &std::path::Path) -> TimeseriesWriter {
        let config = InfluxConfig {
            // Closed port: every write fails fast as retryable.
            url: "http://127.0.0.1:9".to_string(),
            token: "t".to_string(),
            ..InfluxConfig::default()
        };
        TimeseriesWriter::new(
            TimeseriesClient::new(&config),
            SpillQueue::open(dir.join("spill.lp")).unwrap(),
            10,
            Duration::from_millis(50),
        )
    }

    #[test]
    fn schema_violation_drops_point_without_buffering() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = writer(dir.path());

        w.buffer_event(&enriched("light.kitchen"));
        assert_eq!(w.buffer.len(), 1);

        w.buffer_event(&enriched("Not.Valid"));
        assert_eq!(w.buffer.len(), 1);
        assert_eq!(
            w.metrics.points_dropped_schema.load(Ordering::Relaxed),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_store_spills_batch() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = writer(dir.path());
        let metrics = w.metrics();

        w.buffer_event(&enriched("light.kitchen"));
        w.flush().await;

        assert_eq!(metrics.batches_spilled.load(Ordering::Relaxed), 1);
        assert_eq!(w.spill.pending_lines(), 1);
        assert_eq!(metrics.points_written.load(Ordering::Relaxed), 0);
        assert!(metrics.snapshot().degraded);
    }
}
