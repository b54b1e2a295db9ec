//! Weather context provider
//!
//! TTL-cached lookups against the configured external provider. Failures
//! never block the pipeline: a miss plus a provider error simply yields
//! `None` and the event is written without weather fields.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, warn};

use crate::types::WeatherSnapshot;

use super::clock::SharedClock;

/// The slice of configuration the provider needs.
#[derive(Debug, Clone)]
pub struct WeatherConfigView {
    pub base_url: String,
    pub api_key: String,
    pub latitude: f64,
    pub longitude: f64,
    /// `metric` or `imperial`, passed through to the provider.
    pub units: String,
    pub cache_ttl: Duration,
    /// Human-readable location tag stamped on snapshots and points.
    pub location: String,
}

#[derive(Debug, thiserror::Error)]
pub enum WeatherError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("malformed provider payload: {0}")]
    Payload(String),
}

/// OpenWeatherMap-style current-conditions payload.
#[derive(Debug, Deserialize)]
struct ProviderResponse {
    main: ProviderMain,
    #[serde(default)]
    wind: Option<ProviderWind>,
    #[serde(default)]
    weather: Vec<ProviderCondition>,
}

#[derive(Debug, Deserialize)]
struct ProviderMain {
    temp: f64,
    #[serde(default)]
    humidity: Option<i64>,
    #[serde(default)]
    pressure: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ProviderWind {
    #[serde(default)]
    speed: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ProviderCondition {
    #[serde(default)]
    main: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

struct CacheEntry {
    snapshot: WeatherSnapshot,
    fetched_at: DateTime<Utc>,
}

/// Cached weather client. One instance per process, shared by the pipeline
/// and the scheduler's weather-opportunity scan.
pub struct WeatherProvider {
    http: reqwest::Client,
    config: WeatherConfigView,
    clock: SharedClock,
    cache: RwLock<Option<CacheEntry>>,
}

impl WeatherProvider {
    pub fn new(config: WeatherConfigView, clock: SharedClock) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            http,
            config,
            clock,
            cache: RwLock::new(None),
        }
    }

    /// Cached value if fresh, without touching the network. The pipeline
    /// uses this on the hot path.
    pub fn cached(&self) -> Option<WeatherSnapshot> {
        let guard = self.cache.read().ok()?;
        let entry = guard.as_ref()?;
        let age = self.clock.now() - entry.fetched_at;
        if age.to_std().unwrap_or(Duration::MAX) <= self.config.cache_ttl {
            Some(entry.snapshot.clone())
        } else {
            None
        }
    }

    /// Whether the cache needs a background refresh.
    pub fn is_stale(&self) -> bool {
        self.cached().is_none()
    }

    /// Current conditions: cache first, provider on miss. Any failure maps
    /// to `None` — weather is best-effort context, never a blocker.
    pub async fn get_current(&self) -> Option<WeatherSnapshot> {
        if let Some(hit) = self.cached() {
            return Some(hit);
        }
        match self.fetch().await {
            Ok(snapshot) => {
                if let Ok(mut guard) = self.cache.write() {
                    *guard = Some(CacheEntry {
                        snapshot: snapshot.clone(),
                        fetched_at: self.clock.now(),
                    });
                }
                Some(snapshot)
            }
            Err(e) => {
                warn!(error = %e, "weather lookup failed; continuing without weather");
                None
            }
        }
    }

    /// Refresh the cache regardless of TTL; used by the background refresher.
    pub async fn refresh(&self) {
        match self.fetch().await {
            Ok(snapshot) => {
                debug!(location = %self.config.location, "weather cache refreshed");
                if let Ok(mut guard) = self.cache.write() {
                    *guard = Some(CacheEntry {
                        snapshot,
                        fetched_at: self.clock.now(),
                    });
                }
            }
            Err(e) => warn!(error = %e, "weather refresh failed; keeping stale cache"),
        }
    }

    async fn fetch(&self) -> Result<WeatherSnapshot, WeatherError> {
        let url = format!("{}/data/2.5/weather", self.config.base_url.trim_end_matches('/'));
        let resp = self
            .http
            .get(url)
            .query(&[
                ("lat", self.config.latitude.to_string()),
                ("lon", self.config.longitude.to_string()),
                ("units", self.config.units.clone()),
                ("appid", self.config.api_key.clone()),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(WeatherError::Status(resp.status()));
        }

        let payload: ProviderResponse = resp
            .json()
            .await
            .map_err(|e| WeatherError::Payload(e.to_string()))?;

        let condition = payload.weather.first().and_then(|c| c.main.clone());
        let description = payload.weather.first().and_then(|c| c.description.clone());

        Ok(WeatherSnapshot {
            temperature: payload.main.temp,
            humidity: payload.main.humidity,
            pressure: payload.main.pressure,
            wind_speed: payload.wind.and_then(|w| w.speed),
            condition,
            description,
            location: self.config.location.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::clock::FixedClock;
    use chrono::TimeZone;

    fn provider(clock: SharedClock) -> WeatherProvider {
        WeatherProvider::new(
            WeatherConfigView {
                base_url: "http://127.0.0.1:9".to_string(),
                api_key: "k".to_string(),
                latitude: 51.5,
                longitude: -0.1,
                units: "metric".to_string(),
                cache_ttl: Duration::from_secs(300),
                location: "london".to_string(),
            },
            clock,
        )
    }

    fn snapshot() -> WeatherSnapshot {
        WeatherSnapshot {
            temperature: 18.5,
            humidity: Some(60),
            pressure: Some(1012.0),
            wind_speed: Some(3.4),
            condition: Some("Clouds".into()),
            description: Some("broken clouds".into()),
            location: "london".into(),
        }
    }

    #[test]
    fn cache_respects_ttl() {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let clock = FixedClock::at(t0);
        let p = provider(clock.clone());

        *p.cache.write().unwrap() = Some(CacheEntry {
            snapshot: snapshot(),
            fetched_at: t0,
        });

        assert!(p.cached().is_some());

        clock.advance(chrono::Duration::seconds(299));
        assert!(p.cached().is_some());

        clock.advance(chrono::Duration::seconds(2));
        assert!(p.cached().is_none());
        assert!(p.is_stale());
    }

    #[tokio::test]
    async fn provider_failure_yields_none() {
        let clock = FixedClock::at(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap());
        // base_url points at a closed port; the fetch fails fast.
        let p = provider(clock);
        assert!(p.get_current().await.is_none());
    }
}
