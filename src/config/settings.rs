//! Per-component configuration structs
//!
//! One TOML table per external collaborator (`[hub]`, `[weather]`,
//! `[influxdb]`, `[llm]`, ...) plus tuning tables for the pipeline,
//! detectors, safety validator, harness, and scheduler. Environment
//! variables override the file (`HESTIA_HUB_URL`, `HESTIA_HUB_TOKEN`,
//! `HESTIA_WEATHER_API_KEY`, `HESTIA_INFLUX_TOKEN`, `HESTIA_LLM_API_KEY`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::validation::{self as validate, ConfigError};

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub hub: HubConfig,
    pub weather: WeatherConfig,
    pub influxdb: InfluxConfig,
    pub llm: LlmConfig,
    pub server: ServerConfig,
    pub pipeline: PipelineConfig,
    pub detectors: DetectorConfig,
    pub safety: SafetyConfig,
    pub harness: HarnessConfig,
    pub scheduler: SchedulerConfig,
    pub storage: StorageConfig,
}

/// Hub WebSocket session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Primary endpoint; must be a ws:// or wss:// URL.
    pub url: String,
    /// Ordered fallback endpoints tried when the primary is unreachable.
    pub fallback_urls: Vec<String>,
    pub token: String,
    /// REST base (http(s)://) derived from `url` when empty.
    pub rest_url: String,
    /// Event types to subscribe to.
    pub event_types: Vec<String>,
    pub reconnect_delay_secs: u64,
    /// Receive watchdog: no frame for this long forces a reconnect.
    pub watchdog_secs: u64,
    /// Client-initiated ping interval.
    pub heartbeat_secs: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            fallback_urls: Vec::new(),
            token: String::new(),
            rest_url: String::new(),
            event_types: vec!["state_changed".to_string(), "call_service".to_string()],
            reconnect_delay_secs: 5,
            watchdog_secs: 60,
            heartbeat_secs: 30,
        }
    }
}

impl HubConfig {
    /// REST base URL: explicit config wins, otherwise derived from the
    /// WebSocket URL (`wss://host/api/websocket` → `https://host`).
    pub fn effective_rest_url(&self) -> String {
        if !self.rest_url.is_empty() {
            return self.rest_url.trim_end_matches('/').to_string();
        }
        let mut base = self.url.clone();
        if let Some(stripped) = base.strip_prefix("wss://") {
            base = format!("https://{stripped}");
        } else if let Some(stripped) = base.strip_prefix("ws://") {
            base = format!("http://{stripped}");
        }
        base.trim_end_matches("/api/websocket")
            .trim_end_matches('/')
            .to_string()
    }
}

/// External weather provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    pub base_url: String,
    pub api_key: String,
    pub latitude: f64,
    pub longitude: f64,
    pub units: String,
    pub cache_ttl_secs: u64,
    pub location: String,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openweathermap.org".to_string(),
            api_key: String::new(),
            latitude: 0.0,
            longitude: 0.0,
            units: "metric".to_string(),
            cache_ttl_secs: 300,
            location: "home".to_string(),
        }
    }
}

/// Time-series store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InfluxConfig {
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    pub write_timeout_secs: u64,
    pub query_timeout_secs: u64,
    /// Append-only spill file absorbing writes during outages.
    pub spill_path: PathBuf,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8086".to_string(),
            token: String::new(),
            org: "hestia".to_string(),
            bucket: "home_events".to_string(),
            batch_size: 500,
            flush_interval_ms: 1000,
            write_timeout_secs: 5,
            query_timeout_secs: 30,
            spill_path: PathBuf::from("./data/spill.lp"),
        }
    }
}

/// LLM oracle settings (network service; `complete()` contract only).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            api_key: String::new(),
            model: "default".to_string(),
            max_tokens: 1024,
            temperature: 0.2,
            request_timeout_secs: 60,
        }
    }
}

/// Observability HTTP surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8096".to_string(),
        }
    }
}

/// Enrichment pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Bounded channel between session manager and pipeline.
    pub channel_capacity: usize,
    /// Last-state map entries before LRU eviction.
    pub last_state_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 10_000,
            last_state_capacity: 50_000,
        }
    }
}

/// Pattern detector tuning shared across the suite.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub min_confidence: f64,
    pub min_occurrences: u64,
    pub co_occurrence_window_secs: i64,
    pub co_occurrence_min_support: u64,
    /// Events above this count trigger the sampling path.
    pub co_occurrence_sample_threshold: usize,
    pub sequence_window_secs: i64,
    pub sequence_min_length: usize,
    pub sequence_min_occurrences: u64,
    pub contextual_min_occurrences: u64,
    pub anomaly_z_threshold: f64,
    /// Detection look-back window.
    pub lookback_hours: i64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            min_occurrences: 5,
            co_occurrence_window_secs: 300,
            co_occurrence_min_support: 3,
            co_occurrence_sample_threshold: 50_000,
            sequence_window_secs: 1800,
            sequence_min_length: 2,
            sequence_min_occurrences: 3,
            contextual_min_occurrences: 5,
            anomaly_z_threshold: 3.0,
            lookback_hours: 24 * 7,
        }
    }
}

/// Safety validator tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// strict | moderate | permissive
    pub level: String,
    /// Entity lists wider than this count as bulk operations.
    pub bulk_entity_width: usize,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            level: "moderate".to_string(),
            bulk_entity_width: 3,
        }
    }
}

/// Automation test harness tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Dwell after triggering the test automation.
    pub test_duration_secs: u64,
    pub delete_retries: u32,
    pub delete_retry_delay_secs: u64,
    /// Janitor sweep interval for automations whose delete failed.
    pub janitor_interval_secs: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            test_duration_secs: 30,
            delete_retries: 3,
            delete_retry_delay_secs: 2,
            janitor_interval_secs: 300,
        }
    }
}

/// Periodic job intervals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub detection_interval_secs: u64,
    pub rollup_interval_secs: u64,
    pub capability_refresh_secs: u64,
    pub weather_scan_secs: u64,
    pub calendar_refresh_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            detection_interval_secs: 6 * 3600,
            rollup_interval_secs: 3600,
            capability_refresh_secs: 24 * 3600,
            weather_scan_secs: 6 * 3600,
            calendar_refresh_secs: 300,
        }
    }
}

/// Local persistent stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl AppConfig {
    /// Load from `<config_dir>/hestia.toml`, apply env overrides, validate.
    pub fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        let path = config_dir.join("hestia.toml");
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::Io(path.display().to_string(), e.to_string()))?;
            validate::check_unknown_keys(&text);
            toml::from_str::<AppConfig>(&text)
                .map_err(|e| ConfigError::Parse(path.display().to_string(), e.to_string()))?
        } else {
            tracing::info!(path = %path.display(), "no config file found, using defaults");
            AppConfig::default()
        };

        config.apply_env_overrides();
        validate::check_ranges(&config)?;
        Ok(config)
    }

    /// Secrets and endpoints can come from the environment instead of disk.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("HESTIA_HUB_URL") {
            self.hub.url = v;
        }
        if let Ok(v) = std::env::var("HESTIA_HUB_TOKEN") {
            self.hub.token = v;
        }
        if let Ok(v) = std::env::var("HESTIA_WEATHER_API_KEY") {
            self.weather.api_key = v;
        }
        if let Ok(v) = std::env::var("HESTIA_INFLUX_URL") {
            self.influxdb.url = v;
        }
        if let Ok(v) = std::env::var("HESTIA_INFLUX_TOKEN") {
            self.influxdb.token = v;
        }
        if let Ok(v) = std::env::var("HESTIA_LLM_API_KEY") {
            self.llm.api_key = v;
        }
    }
}
