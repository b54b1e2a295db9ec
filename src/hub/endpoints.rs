//! Hub endpoint selection with flap damping
//!
//! Endpoints are tried in priority order (primary, then fallbacks). An
//! endpoint that fails twice within 60 seconds is demoted for 5 minutes so
//! a flapping primary cannot starve the healthy fallbacks.

use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use tracing::{info, warn};

/// Two failures within this window trigger demotion.
const FLAP_WINDOW_SECS: i64 = 60;
const FLAP_FAILURES: usize = 2;
/// Demotion duration.
const DEMOTION_SECS: i64 = 300;

#[derive(Debug)]
struct Endpoint {
    url: String,
    recent_failures: VecDeque<DateTime<Utc>>,
    demoted_until: Option<DateTime<Utc>>,
}

impl Endpoint {
    fn new(url: String) -> Self {
        Self {
            url,
            recent_failures: VecDeque::new(),
            demoted_until: None,
        }
    }

    fn is_available(&self, now: DateTime<Utc>) -> bool {
        self.demoted_until.map_or(true, |until| now >= until)
    }
}

/// Priority-ordered endpoint list.
#[derive(Debug)]
pub struct EndpointSet {
    endpoints: Vec<Endpoint>,
}

impl EndpointSet {
    pub fn new(primary: String, fallbacks: &[String]) -> Self {
        let mut endpoints = vec![Endpoint::new(primary)];
        endpoints.extend(fallbacks.iter().cloned().map(Endpoint::new));
        Self { endpoints }
    }

    /// Highest-priority endpoint not currently demoted.
    pub fn next_available(&self, now: DateTime<Utc>) -> Option<(usize, String)> {
        self.endpoints
            .iter()
            .enumerate()
            .find(|(_, e)| e.is_available(now))
            .map(|(i, e)| (i, e.url.clone()))
    }

    /// All endpoints demoted: the "could not connect to hub" condition.
    pub fn all_demoted(&self, now: DateTime<Utc>) -> bool {
        self.endpoints.iter().all(|e| !e.is_available(now))
    }

    /// Record a connection/auth failure; demote on flapping.
    pub fn record_failure(&mut self, index: usize, now: DateTime<Utc>) {
        let Some(endpoint) = self.endpoints.get_mut(index) else {
            return;
        };
        endpoint.recent_failures.push_back(now);
        let window_start = now - Duration::seconds(FLAP_WINDOW_SECS);
        while endpoint
            .recent_failures
            .front()
            .is_some_and(|t| *t < window_start)
        {
            endpoint.recent_failures.pop_front();
        }

        if endpoint.recent_failures.len() >= FLAP_FAILURES {
            endpoint.demoted_until = Some(now + Duration::seconds(DEMOTION_SECS));
            endpoint.recent_failures.clear();
            warn!(
                url = %endpoint.url,
                demoted_secs = DEMOTION_SECS,
                "endpoint demoted after repeated failures"
            );
        }
    }

    /// Immediate demotion, used on `auth_invalid` (no retry on same token).
    pub fn demote(&mut self, index: usize, now: DateTime<Utc>) {
        if let Some(endpoint) = self.endpoints.get_mut(index) {
            endpoint.demoted_until = Some(now + Duration::seconds(DEMOTION_SECS));
            endpoint.recent_failures.clear();
            warn!(url = %endpoint.url, "endpoint marked unavailable");
        }
    }

    /// Clear failure history after a healthy session.
    pub fn record_success(&mut self, index: usize) {
        if let Some(endpoint) = self.endpoints.get_mut(index) {
            endpoint.recent_failures.clear();
            endpoint.demoted_until = None;
            info!(url = %endpoint.url, "endpoint healthy");
        }
    }
}
