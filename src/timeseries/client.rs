//! Time-series store client
//!
//! Thin HTTP boundary around the external store: line-protocol writes with
//! millisecond precision and a Flux-style query surface whose annotated-CSV
//! responses are parsed into flat event records for the detectors.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::config::InfluxConfig;
use crate::patterns::table::EventRecord;

/// Write failures split by retry policy.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    /// Network trouble or 5xx: worth retrying with backoff.
    #[error("retryable write failure: {0}")]
    Retryable(String),
    /// 4xx: the batch itself is bad and retrying cannot help.
    #[error("fatal write failure: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("store returned status {0}: {1}")]
    Status(reqwest::StatusCode, String),
}

/// HTTP client for the store. One shared instance per process.
#[derive(Clone)]
pub struct TimeseriesClient {
    http: reqwest::Client,
    url: String,
    token: String,
    org: String,
    bucket: String,
    query_timeout: Duration,
}

impl TimeseriesClient {
    pub fn new(config: &InfluxConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.write_timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            http,
            url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            org: config.org.clone(),
            bucket: config.bucket.clone(),
            query_timeout: Duration::from_secs(config.query_timeout_secs),
        }
    }

    /// Write a batch of line-protocol lines (millisecond precision).
    pub async fn write_lines(&self, lines: &[String]) -> Result<(), WriteError> {
        if lines.is_empty() {
            return Ok(());
        }
        let body = lines.join("\n");
        let resp = self
            .http
            .post(format!("{}/api/v2/write", self.url))
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "ms"),
            ])
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await
            .map_err(|e| WriteError::Retryable(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            debug!(lines = lines.len(), "batch written");
            return Ok(());
        }
        let detail = resp.text().await.unwrap_or_default();
        if status.is_client_error() {
            Err(WriteError::Fatal(format!("{status}: {detail}")))
        } else {
            Err(WriteError::Retryable(format!("{status}: {detail}")))
        }
    }

    /// Run a raw Flux query, returning annotated CSV.
    pub async fn query_raw(&self, flux: &str) -> Result<String, QueryError> {
        let resp = self
            .http
            .post(format!("{}/api/v2/query", self.url))
            .query(&[("org", self.org.as_str())])
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "application/vnd.flux")
            .header("Accept", "application/csv")
            .timeout(self.query_timeout)
            .body(flux.to_string())
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(QueryError::Status(status, body));
        }
        Ok(body)
    }

    /// Events in `[start, end)` as flat records, pivoted so each row carries
    /// its tags and the fields the detectors need. Rows arriving with
    /// `time_fired` inside the window after the query ran are intentionally
    /// not visible: detection jobs see a consistent snapshot.
    pub async fn query_event_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<EventRecord>, QueryError> {
        let flux = format!(
            r#"from(bucket: "{bucket}")
  |> range(start: {start}, stop: {end})
  |> filter(fn: (r) => r._measurement == "{measurement}")
  |> pivot(rowKey: ["_time"], columnKey: ["_field"], valueColumn: "_value")
  |> keep(columns: ["_time", "entity_id", "domain", "device_class", "area_id", "event_type", "weather_condition", "state", "duration_in_state_seconds", "weather_temp", "occupancy_home", "occupancy_away", "occupancy_wfh"])
  |> sort(columns: ["_time"])"#,
            bucket = self.bucket,
            measurement = super::point::MEASUREMENT_EVENTS,
            start = start.to_rfc3339(),
            end = end.to_rfc3339(),
        );
        let csv = self.query_raw(&flux).await?;
        Ok(parse_event_csv(&csv))
    }
}

/// Parse annotated CSV from the query surface into event records. Unknown
/// columns are ignored; rows missing `_time` or `entity_id` are skipped.
pub fn parse_event_csv(csv: &str) -> Vec<EventRecord> {
    let mut records = Vec::new();
    let mut columns: HashMap<String, usize> = HashMap::new();

    for line in csv.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let cells: Vec<&str> = line.split(',').collect();

        // Header rows name the columns for the table that follows.
        if cells.contains(&"_time") {
            columns = cells
                .iter()
                .enumerate()
                .map(|(i, name)| ((*name).to_string(), i))
                .collect();
            continue;
        }
        if columns.is_empty() {
            continue;
        }

        let get = |name: &str| -> Option<&str> {
            columns
                .get(name)
                .and_then(|&i| cells.get(i))
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
        };

        let (Some(time_str), Some(entity_id)) = (get("_time"), get("entity_id")) else {
            continue;
        };
        let Ok(time_fired) = DateTime::parse_from_rfc3339(time_str) else {
            continue;
        };

        records.push(EventRecord {
            entity_id: entity_id.to_string(),
            domain: get("domain").map(str::to_string).unwrap_or_else(|| {
                entity_id.split('.').next().unwrap_or("unknown").to_string()
            }),
            device_class: get("device_class").map(str::to_string),
            area_id: get("area_id").map(str::to_string),
            event_type: get("event_type").unwrap_or("state_changed").to_string(),
            state: get("state").unwrap_or_default().to_string(),
            time_fired: time_fired.with_timezone(&Utc),
            duration_in_state_seconds: get("duration_in_state_seconds")
                .and_then(|s| s.parse().ok()),
            weather_condition: get("weather_condition").map(str::to_string),
            weather_temp: get("weather_temp").and_then(|s| s.parse().ok()),
            occupancy_home: get("occupancy_home").and_then(|s| s.parse().ok()),
            occupancy_away: get("occupancy_away").and_then(|s| s.parse().ok()),
        });
    }

    records
}
