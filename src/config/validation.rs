//! Config validation: unknown-key detection with Levenshtein suggestions
//! and startup range checks.
//!
//! Two-pass approach: first parse raw TOML into `toml::Value`, walk the key
//! tree, compare against known dotted paths, and warn with "did you mean?"
//! suggestions. Then range-check the deserialized config; failures here are
//! fatal and reported before any I/O is attempted.

use std::collections::HashSet;

use super::settings::AppConfig;

/// Fatal configuration errors. Startup aborts with exit code 1.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    Io(String, String),
    #[error("failed to parse {0}: {1}")]
    Parse(String, String),
    #[error("configuration invalid: {field} {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    fn invalid(field: &str, reason: &str) -> Self {
        ConfigError::Invalid {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Complete set of valid dotted key paths.
///
/// Maintained manually to match the struct hierarchy in settings.rs. Any new
/// field added there must be added here too.
fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [hub]
        "hub",
        "hub.url",
        "hub.fallback_urls",
        "hub.token",
        "hub.rest_url",
        "hub.event_types",
        "hub.reconnect_delay_secs",
        "hub.watchdog_secs",
        "hub.heartbeat_secs",
        // [weather]
        "weather",
        "weather.base_url",
        "weather.api_key",
        "weather.latitude",
        "weather.longitude",
        "weather.units",
        "weather.cache_ttl_secs",
        "weather.location",
        // [influxdb]
        "influxdb",
        "influxdb.url",
        "influxdb.token",
        "influxdb.org",
        "influxdb.bucket",
        "influxdb.batch_size",
        "influxdb.flush_interval_ms",
        "influxdb.write_timeout_secs",
        "influxdb.query_timeout_secs",
        "influxdb.spill_path",
        // [llm]
        "llm",
        "llm.base_url",
        "llm.api_key",
        "llm.model",
        "llm.max_tokens",
        "llm.temperature",
        "llm.request_timeout_secs",
        // [server]
        "server",
        "server.addr",
        // [pipeline]
        "pipeline",
        "pipeline.channel_capacity",
        "pipeline.last_state_capacity",
        // [detectors]
        "detectors",
        "detectors.min_confidence",
        "detectors.min_occurrences",
        "detectors.co_occurrence_window_secs",
        "detectors.co_occurrence_min_support",
        "detectors.co_occurrence_sample_threshold",
        "detectors.sequence_window_secs",
        "detectors.sequence_min_length",
        "detectors.sequence_min_occurrences",
        "detectors.contextual_min_occurrences",
        "detectors.anomaly_z_threshold",
        "detectors.lookback_hours",
        // [safety]
        "safety",
        "safety.level",
        "safety.bulk_entity_width",
        // [harness]
        "harness",
        "harness.test_duration_secs",
        "harness.delete_retries",
        "harness.delete_retry_delay_secs",
        "harness.janitor_interval_secs",
        // [scheduler]
        "scheduler",
        "scheduler.detection_interval_secs",
        "scheduler.rollup_interval_secs",
        "scheduler.capability_refresh_secs",
        "scheduler.weather_scan_secs",
        "scheduler.calendar_refresh_secs",
        // [storage]
        "storage",
        "storage.data_dir",
    ];
    keys.iter().copied().collect()
}

/// Walk the raw TOML and warn on unknown keys. Warnings never break startup.
pub fn check_unknown_keys(raw_toml: &str) {
    let Ok(value) = raw_toml.parse::<toml::Value>() else {
        return; // Parse errors are reported by the typed deserialize.
    };
    let known = known_config_keys();
    let mut found = Vec::new();
    walk_keys(&value, String::new(), &mut found);

    for path in found {
        if !known.contains(path.as_str()) {
            let suggestion = closest_key(&path, &known);
            match suggestion {
                Some(s) => tracing::warn!(
                    "unknown config key '{path}' — did you mean '{s}'?"
                ),
                None => tracing::warn!("unknown config key '{path}'"),
            }
        }
    }
}

fn walk_keys(value: &toml::Value, prefix: String, out: &mut Vec<String>) {
    if let toml::Value::Table(table) = value {
        for (key, child) in table {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };
            out.push(path.clone());
            walk_keys(child, path, out);
        }
    }
}

fn closest_key(unknown: &str, known: &HashSet<&'static str>) -> Option<&'static str> {
    let mut best: Option<(&'static str, usize)> = None;
    for k in known {
        let dist = levenshtein(unknown, k);
        if dist <= 3 && best.map_or(true, |(_, d)| dist < d) {
            best = Some((k, dist));
        }
    }
    best.map(|(k, _)| k)
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

/// Edit distance between two strings (two-row dynamic programming). Also
/// backs the harness's token-sort fuzzy matcher.
pub(crate) fn levenshtein(a: &str, b: &str) -> usize {
    let b_len = b.chars().count();
    if a.is_empty() {
        return b_len;
    }
    if b_len == 0 {
        return a.chars().count();
    }

    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0; b_len + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.chars().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_len]
}

// ============================================================================
// Range Checks
// ============================================================================

/// Reject unusable configuration before startup.
pub fn check_ranges(config: &AppConfig) -> Result<(), ConfigError> {
    // Hub endpoint must speak the bidirectional channel protocol.
    if config.hub.url.is_empty() {
        return Err(ConfigError::invalid("hub.url", "must be set"));
    }
    if !is_ws_url(&config.hub.url) {
        return Err(ConfigError::invalid(
            "hub.url",
            "must use the ws:// or wss:// scheme",
        ));
    }
    for (i, url) in config.hub.fallback_urls.iter().enumerate() {
        if !is_ws_url(url) {
            return Err(ConfigError::Invalid {
                field: format!("hub.fallback_urls[{i}]"),
                reason: "must use the ws:// or wss:// scheme".to_string(),
            });
        }
    }
    if config.hub.token.trim().is_empty() {
        return Err(ConfigError::invalid("hub.token", "must be non-empty"));
    }

    // Coordinates must be physically meaningful.
    if !(-90.0..=90.0).contains(&config.weather.latitude) {
        return Err(ConfigError::invalid(
            "weather.latitude",
            "must be between -90 and 90",
        ));
    }
    if !(-180.0..=180.0).contains(&config.weather.longitude) {
        return Err(ConfigError::invalid(
            "weather.longitude",
            "must be between -180 and 180",
        ));
    }

    if config.influxdb.token.trim().is_empty() {
        return Err(ConfigError::invalid("influxdb.token", "must be non-empty"));
    }
    if config.influxdb.batch_size == 0 {
        return Err(ConfigError::invalid("influxdb.batch_size", "must be > 0"));
    }
    if config.pipeline.channel_capacity == 0 {
        return Err(ConfigError::invalid(
            "pipeline.channel_capacity",
            "must be > 0",
        ));
    }
    if !(0.0..=1.0).contains(&config.detectors.min_confidence) {
        return Err(ConfigError::invalid(
            "detectors.min_confidence",
            "must be between 0 and 1",
        ));
    }

    Ok(())
}

fn is_ws_url(url: &str) -> bool {
    url.starts_with("ws://") || url.starts_with("wss://")
}
