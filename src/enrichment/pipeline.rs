//! The enrichment pipeline task
//!
//! One long-lived task owns the normalizer, the last-state map, and the
//! quality collector. Raw events arrive through a bounded inbox that drops
//! the oldest entry on overflow so the hub receive path never blocks.

use chrono::{DateTime, Utc};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::collections::VecDeque;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::calendar::ActiveEventsSet;
use crate::context::clock::SharedClock;
use crate::context::weather::WeatherProvider;
use crate::types::{EnrichedEvent, RawEvent, StateValue};

use super::normalize::Normalizer;
use super::quality::{QualityCollector, QualityReader};

/// Publish the quality snapshot every this many processed events.
const QUALITY_PUBLISH_EVERY: u64 = 100;

/// Bounded inbox between the session manager and the pipeline.
///
/// `push` never blocks: at capacity the oldest event is dropped, a warning
/// is logged, and the drop counter is bumped. This is the back-pressure
/// policy of the ingestion boundary.
pub struct EventInbox {
    queue: Mutex<VecDeque<RawEvent>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
}

impl EventInbox {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        })
    }

    /// Enqueue an event, dropping the oldest when full. Never blocks.
    pub fn push(&self, event: RawEvent) {
        let mut dropped_one = false;
        if let Ok(mut queue) = self.queue.lock() {
            if queue.len() >= self.capacity {
                queue.pop_front();
                dropped_one = true;
            }
            queue.push_back(event);
        }
        if dropped_one {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(dropped_total = total, "event inbox full, dropped oldest event");
        }
        self.notify.notify_one();
    }

    /// Await the next event. Returns None only after `close()` was observed
    /// with an empty queue.
    async fn pop(&self, cancel: &CancellationToken) -> Option<RawEvent> {
        loop {
            if let Ok(mut queue) = self.queue.lock() {
                if let Some(event) = queue.pop_front() {
                    return Some(event);
                }
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = cancel.cancelled() => {
                    // Drain what is left before exiting.
                    return self.queue.lock().ok().and_then(|mut q| q.pop_front());
                }
            }
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Pipeline counters surfaced over the observability API.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PipelineStats {
    pub events_received: u64,
    pub events_enriched: u64,
    pub events_rejected: u64,
    pub events_dropped: u64,
}

/// The pipeline itself: single-owner state driven by `run()`.
pub struct EnrichmentPipeline {
    inbox: Arc<EventInbox>,
    writer_tx: mpsc::Sender<EnrichedEvent>,
    weather: Arc<WeatherProvider>,
    calendar: Arc<ActiveEventsSet>,
    clock: SharedClock,
    normalizer: Normalizer,
    quality: QualityCollector,
    /// entity_id → (transition instant, state at that instant)
    last_state: LruCache<String, (DateTime<Utc>, StateValue)>,
    weather_refresh_in_flight: Arc<AtomicBool>,
    stats: PipelineStats,
}

impl EnrichmentPipeline {
    pub fn new(
        inbox: Arc<EventInbox>,
        writer_tx: mpsc::Sender<EnrichedEvent>,
        weather: Arc<WeatherProvider>,
        calendar: Arc<ActiveEventsSet>,
        clock: SharedClock,
        last_state_capacity: usize,
    ) -> Self {
        let capacity =
            NonZeroUsize::new(last_state_capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inbox,
            writer_tx,
            weather,
            calendar,
            clock,
            normalizer: Normalizer::new(),
            quality: QualityCollector::new(),
            last_state: LruCache::new(capacity),
            weather_refresh_in_flight: Arc::new(AtomicBool::new(false)),
            stats: PipelineStats::default(),
        }
    }

    /// Quality read handle for the observability surface. Take before `run`.
    pub fn quality_reader(&self) -> QualityReader {
        self.quality.reader()
    }

    /// Drive the pipeline until cancellation. Consumes self: the pipeline
    /// state is single-owner by design.
    pub async fn run(mut self, cancel: CancellationToken) -> PipelineStats {
        info!("enrichment pipeline started");

        loop {
            let Some(raw) = self.inbox.pop(&cancel).await else {
                break;
            };
            self.process_one(raw).await;

            if self.stats.events_received % QUALITY_PUBLISH_EVERY == 0 {
                self.sync_quality();
            }
            if cancel.is_cancelled() && self.inbox.is_empty() {
                break;
            }
        }

        self.sync_quality();
        info!(
            enriched = self.stats.events_enriched,
            rejected = self.stats.events_rejected,
            "enrichment pipeline stopped"
        );
        self.stats
    }

    async fn process_one(&mut self, raw: RawEvent) {
        self.stats.events_received += 1;
        let received_at = self.clock.now();

        // 1. Validate & normalize; rejects are accounted and dropped.
        let (normalized, result) = self.normalizer.normalize(&raw, received_at);
        self.quality.record(&result);
        let Some(event) = normalized else {
            self.stats.events_rejected += 1;
            debug!(domain = %result.domain, "event rejected by validation");
            return;
        };

        // 2. Weather: cached value only; kick a background refresh if stale.
        let weather = self.weather.cached();
        if weather.is_none() {
            self.spawn_weather_refresh();
        }

        // 3. Duration in previous state from the last-state map.
        let duration_in_state_seconds = if event.event_type == "state_changed" {
            let prev = self.last_state.put(
                event.entity_id.clone(),
                (event.time_fired, event.state.clone()),
            );
            prev.and_then(|(prev_time, _)| {
                let delta = (event.time_fired - prev_time).num_milliseconds();
                (delta >= 0).then(|| delta as f64 / 1000.0)
            })
        } else {
            None
        };

        // 4. Occupancy from the background-refreshed active calendar set.
        let occupancy = self.calendar.occupancy_at(event.time_fired);

        // 5. Hand off to the writer.
        let enriched = EnrichedEvent {
            event,
            weather,
            occupancy,
            duration_in_state_seconds,
        };
        if self.writer_tx.send(enriched).await.is_err() {
            warn!("time-series writer channel closed; event lost");
            return;
        }
        self.stats.events_enriched += 1;
    }

    /// At most one weather refresh in flight at a time.
    fn spawn_weather_refresh(&self) {
        if self
            .weather_refresh_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let weather = Arc::clone(&self.weather);
        let flag = Arc::clone(&self.weather_refresh_in_flight);
        tokio::spawn(async move {
            weather.refresh().await;
            flag.store(false, Ordering::Release);
        });
    }

    fn sync_quality(&mut self) {
        let inbox_dropped = self.inbox.dropped_count();
        if inbox_dropped > self.stats.events_dropped {
            self.quality
                .record_dropped(inbox_dropped - self.stats.events_dropped);
            self.stats.events_dropped = inbox_dropped;
        }
        self.quality.publish();
    }
}
