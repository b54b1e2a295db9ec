//! Pipeline Integration Tests
//!
//! Drives raw hub events through the enrichment pipeline into the writer's
//! point builder and asserts the end-to-end invariants: every accepted
//! event produces exactly one schema-valid point, rejects never reach the
//! writer, and weather degradation leaves points without weather fields
//! while the quality collector stays clean.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use hestia::context::calendar::ActiveEventsSet;
use hestia::context::clock::FixedClock;
use hestia::context::weather::{WeatherConfigView, WeatherProvider};
use hestia::enrichment::{EnrichmentPipeline, EventInbox, HealthRating};
use hestia::timeseries::Point;
use hestia::types::{EnrichedEvent, RawEvent};

fn raw_event(entity_id: &str, state: &str, time_fired: &str) -> RawEvent {
    serde_json::from_value(serde_json::json!({
        "event_type": "state_changed",
        "time_fired": time_fired,
        "new_state": {
            "entity_id": entity_id,
            "state": state,
            "attributes": {
                "friendly_name": "Test Entity",
                "unit_of_measurement": "°C"
            }
        },
        "context": {"id": "ctx-1"}
    }))
    .expect("raw event fixture")
}

struct Fixture {
    inbox: Arc<EventInbox>,
    rx: mpsc::Receiver<EnrichedEvent>,
    pipeline: EnrichmentPipeline,
}

fn fixture() -> Fixture {
    let clock = FixedClock::at(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap());
    // Weather provider pointed at a closed port: lookups fail, cache stays
    // empty, and the pipeline must keep flowing without weather context.
    let weather = Arc::new(WeatherProvider::new(
        WeatherConfigView {
            base_url: "http://127.0.0.1:9".into(),
            api_key: "unused".into(),
            latitude: 51.5,
            longitude: -0.12,
            units: "metric".into(),
            cache_ttl: Duration::from_secs(300),
            location: "home".into(),
        },
        clock.clone(),
    ));
    let inbox = EventInbox::new(1000);
    let (tx, rx) = mpsc::channel(256);
    let pipeline = EnrichmentPipeline::new(
        Arc::clone(&inbox),
        tx,
        weather,
        Arc::new(ActiveEventsSet::new()),
        clock,
        10_000,
    );
    Fixture { inbox, rx, pipeline }
}

#[tokio::test]
async fn every_valid_event_yields_exactly_one_schema_valid_point() {
    let mut f = fixture();
    let quality = f.pipeline.quality_reader();

    for i in 0..10 {
        f.inbox.push(raw_event(
            "sensor.living_room_temp",
            &format!("2{i}.5"),
            &format!("2025-06-01T07:{i:02}:00+00:00"),
        ));
    }
    let cancel = CancellationToken::new();
    cancel.cancel();
    let stats = f.pipeline.run(cancel).await;
    assert_eq!(stats.events_enriched, 10);

    let mut points = 0;
    while let Ok(enriched) = f.rx.try_recv() {
        let point = Point::from_enriched(&enriched);
        point.validate().expect("point must satisfy the schema");
        assert_eq!(point.tags["entity_id"], "sensor.living_room_temp");
        assert_eq!(point.tags["domain"], "sensor");
        assert!(point.fields.contains_key("state"));
        points += 1;
    }
    assert_eq!(points, 10, "exactly one point per enriched event");

    let snapshot = quality.snapshot();
    assert_eq!(snapshot.invalid_events, 0);
    assert_eq!(snapshot.health(), HealthRating::Healthy);
}

#[tokio::test]
async fn weather_outage_degrades_gracefully() {
    let mut f = fixture();
    let quality = f.pipeline.quality_reader();

    for i in 0..20 {
        f.inbox.push(raw_event(
            "light.kitchen",
            if i % 2 == 0 { "on" } else { "off" },
            &format!("2025-06-01T08:{i:02}:00+00:00"),
        ));
    }
    let cancel = CancellationToken::new();
    cancel.cancel();
    let stats = f.pipeline.run(cancel).await;

    // Throughput unaffected by the provider being down.
    assert_eq!(stats.events_enriched, 20);

    while let Ok(enriched) = f.rx.try_recv() {
        assert!(enriched.weather.is_none(), "no weather fields during outage");
        let point = Point::from_enriched(&enriched);
        assert!(!point.fields.contains_key("weather_temp"));
        assert!(!point.tags.contains_key("weather_condition"));
    }

    // A provider outage is not a validation problem.
    assert_eq!(quality.snapshot().invalid_events, 0);
}

#[tokio::test]
async fn rejects_are_counted_and_never_reach_the_writer() {
    let mut f = fixture();
    let quality = f.pipeline.quality_reader();

    f.inbox.push(raw_event("light.kitchen", "on", "2025-06-01T08:00:00Z"));
    f.inbox.push(raw_event("light..double_dot", "on", "2025-06-01T08:00:01Z"));
    f.inbox.push(raw_event("light.trailing_", "on", "2025-06-01T08:00:02Z"));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let stats = f.pipeline.run(cancel).await;

    assert_eq!(stats.events_enriched, 1);
    assert_eq!(stats.events_rejected, 2);

    let mut delivered = Vec::new();
    while let Ok(enriched) = f.rx.try_recv() {
        delivered.push(enriched.event.entity_id);
    }
    assert_eq!(delivered, vec!["light.kitchen".to_string()]);

    let snapshot = quality.snapshot();
    assert_eq!(snapshot.invalid_events, 2);
    assert!(snapshot.errors_by_class.contains_key("invalid_format"));
}

#[tokio::test]
async fn duration_chain_flows_into_points() {
    let mut f = fixture();

    f.inbox.push(raw_event("switch.heater", "on", "2025-06-01T06:00:00Z"));
    f.inbox.push(raw_event("switch.heater", "off", "2025-06-01T06:45:00Z"));

    let cancel = CancellationToken::new();
    cancel.cancel();
    f.pipeline.run(cancel).await;

    let first = f.rx.try_recv().unwrap();
    assert!(first.duration_in_state_seconds.is_none());

    let second = f.rx.try_recv().unwrap();
    assert_eq!(second.duration_in_state_seconds, Some(2700.0));
    let point = Point::from_enriched(&second);
    let line = point.to_line_protocol();
    assert!(line.contains("duration_in_state_seconds=2700"));
    // Millisecond timestamp of 06:45 UTC.
    let expected_ms = Utc
        .with_ymd_and_hms(2025, 6, 1, 6, 45, 0)
        .unwrap()
        .timestamp_millis();
    assert!(line.ends_with(&format!(" {expected_ms}")));
}
