//! Periodic job scheduler
//!
//! Four recurring jobs: the pattern-detection sweep, aggregate rollups,
//! capability cache refresh, and the weather-opportunity scan (plus the
//! fast calendar refresh backing occupancy enrichment). Jobs are
//! single-instance: a tick that lands while the previous run is still going
//! is skipped and counted.

pub mod aggregates;

use chrono::Duration as ChronoDuration;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::capabilities::CapabilityStore;
use crate::config::{DetectorConfig, SchedulerConfig};
use crate::context::calendar::{ActiveEventsSet, CalendarParser};
use crate::context::clock::SharedClock;
use crate::context::weather::WeatherProvider;
use crate::hub::HubRestClient;
use crate::patterns::{self, DetectorTuning, EventsTable};
use crate::storage::PatternStore;
use crate::suggestions::SuggestionGenerator;
use crate::timeseries::{point, FieldValue, Point, TimeseriesClient};
use crate::types::RawCalendarEvent;

/// Per-job run counters for the observability surface.
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    pub detection_runs: AtomicU64,
    pub rollup_runs: AtomicU64,
    pub capability_refreshes: AtomicU64,
    pub weather_scans: AtomicU64,
    pub skipped_overlap: AtomicU64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerSnapshot {
    pub detection_runs: u64,
    pub rollup_runs: u64,
    pub capability_refreshes: u64,
    pub weather_scans: u64,
    pub skipped_overlap: u64,
}

impl SchedulerMetrics {
    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            detection_runs: self.detection_runs.load(Ordering::Relaxed),
            rollup_runs: self.rollup_runs.load(Ordering::Relaxed),
            capability_refreshes: self.capability_refreshes.load(Ordering::Relaxed),
            weather_scans: self.weather_scans.load(Ordering::Relaxed),
            skipped_overlap: self.skipped_overlap.load(Ordering::Relaxed),
        }
    }
}

/// Guard that lets one run of a job in at a time.
struct SingleInstance {
    running: AtomicBool,
}

impl SingleInstance {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
        }
    }

    fn try_enter(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn exit(&self) {
        self.running.store(false, Ordering::Release);
    }
}

pub struct Scheduler {
    config: SchedulerConfig,
    detector_config: DetectorConfig,
    client: TimeseriesClient,
    patterns: PatternStore,
    generator: Arc<SuggestionGenerator>,
    capabilities: Arc<CapabilityStore>,
    weather: Arc<WeatherProvider>,
    calendar: Arc<ActiveEventsSet>,
    rest: HubRestClient,
    clock: SharedClock,
    metrics: Arc<SchedulerMetrics>,
    detection_guard: SingleInstance,
    rollup_guard: SingleInstance,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SchedulerConfig,
        detector_config: DetectorConfig,
        client: TimeseriesClient,
        patterns: PatternStore,
        generator: Arc<SuggestionGenerator>,
        capabilities: Arc<CapabilityStore>,
        weather: Arc<WeatherProvider>,
        calendar: Arc<ActiveEventsSet>,
        rest: HubRestClient,
        clock: SharedClock,
    ) -> Self {
        Self {
            config,
            detector_config,
            client,
            patterns,
            generator,
            capabilities,
            weather,
            calendar,
            rest,
            clock,
            metrics: Arc::new(SchedulerMetrics::default()),
            detection_guard: SingleInstance::new(),
            rollup_guard: SingleInstance::new(),
        }
    }

    pub fn metrics(&self) -> Arc<SchedulerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Run every job once, sequentially. Backs the `--once` CLI flag.
    pub async fn run_once(&self) {
        self.calendar_refresh_job().await;
        self.detection_job().await;
        self.rollup_job().await;
        self.capability_refresh_job().await;
        self.weather_scan_job().await;
    }

    /// Drive the periodic jobs until cancellation.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            detection_secs = self.config.detection_interval_secs,
            rollup_secs = self.config.rollup_interval_secs,
            "scheduler started"
        );

        let mut detection = interval(self.config.detection_interval_secs);
        let mut rollup = interval(self.config.rollup_interval_secs);
        let mut capability = interval(self.config.capability_refresh_secs);
        let mut weather = interval(self.config.weather_scan_secs);
        let mut calendar = interval(self.config.calendar_refresh_secs);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = detection.tick() => self.detection_job().await,
                _ = rollup.tick() => self.rollup_job().await,
                _ = capability.tick() => self.capability_refresh_job().await,
                _ = weather.tick() => self.weather_scan_job().await,
                _ = calendar.tick() => self.calendar_refresh_job().await,
            }
        }
        info!("scheduler stopped");
    }

    /// Pattern detection sweep over the look-back window, followed by the
    /// suggestion generation sweep over whatever was found.
    async fn detection_job(&self) {
        if !self.detection_guard.try_enter() {
            self.metrics.skipped_overlap.fetch_add(1, Ordering::Relaxed);
            warn!(job = "detection", "previous run still active, tick skipped");
            return;
        }
        self.metrics.detection_runs.fetch_add(1, Ordering::Relaxed);

        let end = self.clock.now();
        let start = end - ChronoDuration::hours(self.detector_config.lookback_hours);
        let result = self.client.query_event_window(start, end).await;

        match result {
            Ok(records) => {
                info!(events = records.len(), "detection sweep starting");
                let table = EventsTable::new(records);
                let tuning = DetectorTuning::from(&self.detector_config);

                // CPU-bound suite on the dedicated pool, off the runtime.
                let outcome = tokio::task::spawn_blocking(move || {
                    let detectors = patterns::detector_suite(&tuning);
                    let pool = patterns::detection_pool()?;
                    Ok::<_, rayon::ThreadPoolBuildError>(patterns::run_suite(
                        &pool, &detectors, &table,
                    ))
                })
                .await;

                match outcome {
                    Ok(Ok((found, stats))) => {
                        for stat in &stats {
                            info!(
                                detector = %stat.detector,
                                patterns = stat.total_patterns,
                                time_ms = stat.processing_time_ms,
                                "detector stats"
                            );
                        }
                        match self.patterns.upsert_all(&found) {
                            Ok(count) => info!(patterns = count, "patterns persisted"),
                            Err(e) => warn!(error = %e, "failed to persist patterns"),
                        }
                        if let Err(e) = self.generator.generate_sweep().await {
                            warn!(error = %e, "suggestion sweep failed");
                        }
                    }
                    Ok(Err(e)) => warn!(error = %e, "detection pool unavailable"),
                    Err(e) => warn!(error = %e, "detection task panicked"),
                }
            }
            Err(e) => warn!(error = %e, "detection sweep query failed"),
        }
        self.detection_guard.exit();
    }

    /// Hourly rollup of the previous day's events into aggregate points.
    async fn rollup_job(&self) {
        if !self.rollup_guard.try_enter() {
            self.metrics.skipped_overlap.fetch_add(1, Ordering::Relaxed);
            warn!(job = "rollup", "previous run still active, tick skipped");
            return;
        }
        self.metrics.rollup_runs.fetch_add(1, Ordering::Relaxed);

        let end = self.clock.now();
        let start = end - ChronoDuration::hours(24);
        match self.client.query_event_window(start, end).await {
            Ok(records) => {
                let mut lines = Vec::new();
                for granularity in [
                    aggregates::Granularity::Daily,
                    aggregates::Granularity::Weekly,
                    aggregates::Granularity::Monthly,
                ] {
                    for point in aggregates::build_rollup_points(&records, granularity) {
                        lines.push(point.to_line_protocol());
                    }
                }
                if lines.is_empty() {
                    return self.rollup_guard.exit();
                }
                match self.client.write_lines(&lines).await {
                    Ok(()) => info!(points = lines.len(), "aggregate rollup written"),
                    Err(e) => warn!(error = %e, "aggregate rollup write failed"),
                }
            }
            Err(e) => warn!(error = %e, "rollup query failed"),
        }
        self.rollup_guard.exit();
    }

    /// Discovery fallback refresh: re-derive the entity map from the REST
    /// states snapshot. The full exposes-based index refreshes with every
    /// session discovery pass.
    async fn capability_refresh_job(&self) {
        self.metrics
            .capability_refreshes
            .fetch_add(1, Ordering::Relaxed);
        match self.rest.get_states().await {
            Ok(states) => {
                self.capabilities.refresh_entity_models(&states);
                info!(entities = states.len(), "capability entity map refreshed");
            }
            Err(e) => warn!(error = %e, "capability refresh failed"),
        }
    }

    /// Weather-opportunity scan: refresh conditions, persist a weather
    /// point, and log automation-worthy swings as contextual opportunities.
    async fn weather_scan_job(&self) {
        self.metrics.weather_scans.fetch_add(1, Ordering::Relaxed);
        let before = self.weather.cached();
        self.weather.refresh().await;
        let Some(current) = self.weather.cached() else {
            return;
        };

        let mut point = Point::new(
            point::MEASUREMENT_WEATHER,
            self.clock.now().timestamp_millis(),
        )
        .tag("location", current.location.clone())
        .field("temperature", FieldValue::Float(current.temperature));
        if let Some(condition) = &current.condition {
            point = point.tag("condition", condition.clone());
        }
        if let Some(humidity) = current.humidity {
            point = point.field("humidity", FieldValue::Integer(humidity));
        }
        if let Some(pressure) = current.pressure {
            point = point.field("pressure", FieldValue::Float(pressure));
        }
        if let Some(wind) = current.wind_speed {
            point = point.field("wind_speed", FieldValue::Float(wind));
        }
        if let Err(e) = self.client.write_lines(&[point.to_line_protocol()]).await {
            warn!(error = %e, "weather point write failed");
        }

        if let Some(previous) = before {
            let swing = (current.temperature - previous.temperature).abs();
            if swing >= 8.0 {
                info!(
                    previous = previous.temperature,
                    current = current.temperature,
                    "large temperature swing: climate automation opportunity"
                );
            }
        }
        if matches!(current.condition.as_deref(), Some("Rain" | "Snow" | "Thunderstorm")) {
            info!(
                condition = current.condition.as_deref().unwrap_or(""),
                "active precipitation: cover/irrigation automation opportunity"
            );
        }
    }

    /// Fast refresh of today's calendar events into the active set.
    async fn calendar_refresh_job(&self) {
        let now = self.clock.now();
        let start = now - ChronoDuration::hours(12);
        let end = now + ChronoDuration::hours(24);
        // The hub calendar surface rides on the same REST client.
        match self.rest.call_service("calendar", "list_events", &serde_json::json!({
            "start_date_time": start.to_rfc3339(),
            "end_date_time": end.to_rfc3339(),
        })).await {
            Ok(payload) => {
                let raw_events: Vec<RawCalendarEvent> = payload
                    .get("events")
                    .and_then(|e| serde_json::from_value(e.clone()).ok())
                    .unwrap_or_default();
                let parser = CalendarParser::new();
                let parsed = parser.parse_all(&raw_events);
                self.calendar.replace(parsed);
            }
            Err(e) => {
                tracing::debug!(error = %e, "calendar refresh unavailable");
            }
        }
    }
}

fn interval(secs: u64) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(Duration::from_secs(secs.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_instance_guard() {
        let guard = SingleInstance::new();
        assert!(guard.try_enter());
        assert!(!guard.try_enter());
        guard.exit();
        assert!(guard.try_enter());
    }
}
