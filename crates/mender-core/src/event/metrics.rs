//! Per-kind event counters.
//!
//! `EventCounters` is fed by a bus subscriber and read by the stats endpoint
//! and the periodic monitoring log line.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use mender_types::event::WorkflowEvent;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::EventBus;

#[derive(Debug, Default)]
pub struct EventCounters {
    counts: DashMap<&'static str, AtomicU64>,
    lagged: AtomicU64,
}

impl EventCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: &WorkflowEvent) {
        self.counts
            .entry(event.kind())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self, kind: &str) -> u64 {
        self.counts
            .get(kind)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Events dropped because the subscriber fell behind.
    pub fn lagged(&self) -> u64 {
        self.lagged.load(Ordering::Relaxed)
    }

    /// Sorted copy of all counters.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counts
            .iter()
            .map(|entry| (entry.key().to_string(), entry.value().load(Ordering::Relaxed)))
            .collect()
    }

    /// Subscribe to `bus` and count every event until `shutdown` fires or the
    /// bus is dropped.
    pub fn spawn_collector(
        self: &Arc<Self>,
        bus: &EventBus,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let counters = Arc::clone(self);
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    received = rx.recv() => match received {
                        Ok(event) => counters.record(&event),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            counters.lagged.fetch_add(n, Ordering::Relaxed);
                            tracing::warn!(skipped = n, "event counter lagged behind the bus");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn record_counts_by_kind() {
        let counters = EventCounters::new();
        let id = Uuid::now_v7();
        counters.record(&WorkflowEvent::WorkflowCancelled { workflow_id: id });
        counters.record(&WorkflowEvent::WorkflowCancelled { workflow_id: id });
        counters.record(&WorkflowEvent::WorkflowCompleted {
            workflow_id: id,
            duration_ms: 5,
        });

        assert_eq!(counters.count("workflow.cancelled"), 2);
        assert_eq!(counters.count("workflow.completed"), 1);
        assert_eq!(counters.count("task.failed"), 0);

        let snap = counters.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap["workflow.cancelled"], 2);
    }

    #[tokio::test]
    async fn collector_counts_published_events() {
        let bus = EventBus::new(16);
        let counters = Arc::new(EventCounters::new());
        let shutdown = CancellationToken::new();
        let handle = counters.spawn_collector(&bus, shutdown.clone());

        bus.publish(WorkflowEvent::WorkflowCancelled {
            workflow_id: Uuid::now_v7(),
        });

        for _ in 0..100 {
            if counters.count("workflow.cancelled") == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(counters.count("workflow.cancelled"), 1);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
