//! Sequence pattern detector
//!
//! Slides half-overlapping windows over the event stream, extracts ordered
//! device chains inside each window, and counts identical chains across
//! windows. Confidence is the chain count over the number of windows that
//! contained the chain's prefix. Longer chains win ties at equal confidence.

use chrono::Duration;
use serde_json::json;
use std::collections::HashMap;

use crate::types::{Pattern, PatternSubject, PatternType};

use super::table::EventsTable;
use super::{DetectorTuning, PatternDetector};

/// Chains longer than this are not enumerated.
const MAX_SEQUENCE_LEN: usize = 4;

pub struct SequenceDetector {
    pub window_secs: i64,
    pub min_length: usize,
    pub min_occurrences: u64,
    pub min_confidence: f64,
}

impl SequenceDetector {
    pub fn new(tuning: &DetectorTuning) -> Self {
        Self {
            window_secs: tuning.sequence_window_secs,
            min_length: tuning.sequence_min_length.max(2),
            min_occurrences: tuning.sequence_min_occurrences,
            min_confidence: tuning.min_confidence,
        }
    }

    /// Ordered device chain for one window: consecutive duplicates collapse.
    fn window_chain(events: &[&super::table::EventRecord]) -> Vec<String> {
        let mut chain: Vec<String> = Vec::new();
        for event in events {
            if chain.last().map(String::as_str) != Some(event.entity_id.as_str()) {
                chain.push(event.entity_id.clone());
            }
        }
        chain
    }
}

impl PatternDetector for SequenceDetector {
    fn name(&self) -> &'static str {
        "sequence"
    }

    fn detect(&self, table: &EventsTable) -> Vec<Pattern> {
        let records = table.records();
        let Some((span_start, span_end)) = table.span() else {
            return Vec::new();
        };

        // Half-overlapping windows across the span.
        let window = Duration::seconds(self.window_secs);
        let step = Duration::seconds((self.window_secs / 2).max(1));
        let mut sequence_counts: HashMap<Vec<String>, (u64, chrono::DateTime<chrono::Utc>, chrono::DateTime<chrono::Utc>)> =
            HashMap::new();
        let mut prefix_windows: HashMap<Vec<String>, u64> = HashMap::new();

        let mut window_start = span_start;
        while window_start <= span_end {
            let window_end = window_start + window;
            let in_window: Vec<_> = records
                .iter()
                .filter(|r| r.time_fired >= window_start && r.time_fired < window_end)
                .collect();

            if in_window.len() >= self.min_length {
                let chain = Self::window_chain(&in_window);
                let mut seen_in_window: Vec<Vec<String>> = Vec::new();

                for start in 0..chain.len() {
                    for len in self.min_length..=MAX_SEQUENCE_LEN.min(chain.len() - start) {
                        let sub: Vec<String> = chain[start..start + len].to_vec();
                        if seen_in_window.contains(&sub) {
                            continue; // Count each chain once per window.
                        }
                        seen_in_window.push(sub.clone());

                        let first = in_window.first().map(|r| r.time_fired).unwrap_or(window_start);
                        let last = in_window.last().map(|r| r.time_fired).unwrap_or(window_end);
                        let entry = sequence_counts.entry(sub).or_insert((0, first, last));
                        entry.0 += 1;
                        entry.1 = entry.1.min(first);
                        entry.2 = entry.2.max(last);
                    }
                }

                // Prefix occurrences (including length-1 prefixes).
                let mut seen_prefixes: Vec<Vec<String>> = Vec::new();
                for start in 0..chain.len() {
                    for len in 1..=MAX_SEQUENCE_LEN.min(chain.len() - start) {
                        let sub: Vec<String> = chain[start..start + len].to_vec();
                        if !seen_prefixes.contains(&sub) {
                            seen_prefixes.push(sub.clone());
                            *prefix_windows.entry(sub).or_insert(0) += 1;
                        }
                    }
                }
            }

            window_start += step;
        }

        let mut patterns: Vec<Pattern> = Vec::new();
        for (chain, (count, first_seen, last_seen)) in sequence_counts {
            if count < self.min_occurrences {
                continue;
            }
            let prefix: Vec<String> = chain[..chain.len() - 1].to_vec();
            let prefix_count = *prefix_windows.get(&prefix).unwrap_or(&count).max(&1);
            let confidence = (count as f64 / prefix_count as f64).min(1.0);
            if confidence < self.min_confidence {
                continue;
            }

            patterns.push(Pattern::new(
                PatternType::Sequence,
                PatternSubject::Sequence(chain.clone()),
                None,
                confidence,
                count,
                json!({
                    "length": chain.len(),
                    "window_seconds": self.window_secs,
                }),
                first_seen,
                last_seen,
            ));
        }

        // Longer sequence wins among equal confidence.
        patterns.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let len = |p: &Pattern| match &p.subject {
                        PatternSubject::Sequence(s) => s.len(),
                        _ => 0,
                    };
                    len(b).cmp(&len(a))
                })
        });
        patterns
    }
}
