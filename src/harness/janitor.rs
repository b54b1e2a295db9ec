//! Cleanup janitor
//!
//! Test automations whose delete failed land in this queue; the janitor
//! sweeps every few minutes until the hub confirms deletion. Entries that
//! survive repeated sweeps are escalated for administrator review.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::hub::HubRestClient;

/// Sweeps before an entry is escalated instead of silently retried forever.
const ESCALATION_SWEEPS: u32 = 12;

/// Pending-deletion queue shared between the harness and the janitor task.
#[derive(Default)]
pub struct CleanupQueue {
    /// automation id → failed sweep count.
    pending: Mutex<HashMap<String, u32>>,
}

impl CleanupQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, automation_id: &str) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.entry(automation_id.to_string()).or_insert(0);
            warn!(automation_id, "delete failed; queued for janitor cleanup");
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    fn snapshot(&self) -> Vec<String> {
        self.pending
            .lock()
            .map(|p| p.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn resolve(&self, automation_id: &str) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(automation_id);
        }
    }

    fn record_failure(&self, automation_id: &str) -> u32 {
        self.pending
            .lock()
            .map(|mut p| {
                let count = p.entry(automation_id.to_string()).or_insert(0);
                *count += 1;
                *count
            })
            .unwrap_or(0)
    }
}

/// Long-lived janitor task: sweep the queue on a fixed interval.
pub async fn run_janitor(
    queue: std::sync::Arc<CleanupQueue>,
    rest: HubRestClient,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await; // Skip the immediate first tick.

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                sweep(&queue, &rest).await;
            }
        }
    }
}

/// One sweep over the queue. Public so the harness can force a sweep in
/// `--once` runs and tests.
pub async fn sweep(queue: &CleanupQueue, rest: &HubRestClient) {
    for automation_id in queue.snapshot() {
        match rest.delete_automation(&automation_id).await {
            Ok(()) => {
                info!(automation_id = %automation_id, "janitor removed leftover test automation");
                queue.resolve(&automation_id);
            }
            Err(e) => {
                let failures = queue.record_failure(&automation_id);
                if failures >= ESCALATION_SWEEPS {
                    error!(
                        automation_id = %automation_id,
                        failures,
                        "test executed but cleanup failed; administrator review required"
                    );
                } else {
                    warn!(automation_id = %automation_id, error = %e, "janitor delete failed, will retry");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_and_count() {
        let queue = CleanupQueue::new();
        assert_eq!(queue.pending_count(), 0);
        queue.enqueue("test_automation_0a1b2c3d");
        queue.enqueue("test_automation_0a1b2c3d");
        assert_eq!(queue.pending_count(), 1);

        queue.resolve("test_automation_0a1b2c3d");
        assert_eq!(queue.pending_count(), 0);
    }

    #[test]
    fn failures_accumulate_per_entry() {
        let queue = CleanupQueue::new();
        queue.enqueue("test_automation_deadbeef");
        assert_eq!(queue.record_failure("test_automation_deadbeef"), 1);
        assert_eq!(queue.record_failure("test_automation_deadbeef"), 2);
    }

    #[tokio::test]
    async fn sweep_keeps_unreachable_entries() {
        let queue = CleanupQueue::new();
        queue.enqueue("test_automation_0a1b2c3d");
        // Closed port: delete fails, the entry stays queued.
        let rest = HubRestClient::new("http://127.0.0.1:9", "token");
        sweep(&queue, &rest).await;
        assert_eq!(queue.pending_count(), 1);
    }
}
