//! Lifecycle event fan-out.
//!
//! The engine publishes every `WorkflowEvent` once; monitors take the whole
//! stream with [`EventBus::subscribe`], while a caller waiting on a single
//! workflow takes a [`WorkflowSubscription`] that yields only that
//! workflow's events and ends after its final one. Nobody listening is the
//! normal case for an embedded engine, so publishing never fails.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use mender_types::event::WorkflowEvent;
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
    published: Arc<AtomicU64>,
}

impl EventBus {
    /// `capacity` events are buffered per subscriber before the slowest one
    /// starts losing the oldest.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            published: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Every event published from now on, for all workflows.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }

    /// Events of `workflow_id` published from now on.
    pub fn subscribe_workflow(&self, workflow_id: Uuid) -> WorkflowSubscription {
        WorkflowSubscription {
            workflow_id,
            receiver: self.sender.subscribe(),
            finished: false,
            missed: 0,
        }
    }

    pub fn publish(&self, event: WorkflowEvent) {
        self.published.fetch_add(1, Ordering::Relaxed);
        if self.sender.send(event).is_err() {
            tracing::trace!("event dropped, no subscribers");
        }
    }

    /// Events published over the bus lifetime, listened to or not.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("published", &self.published())
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}

/// One workflow's slice of the bus.
#[derive(Debug)]
pub struct WorkflowSubscription {
    workflow_id: Uuid,
    receiver: broadcast::Receiver<WorkflowEvent>,
    finished: bool,
    missed: u64,
}

impl WorkflowSubscription {
    pub fn workflow_id(&self) -> Uuid {
        self.workflow_id
    }

    /// Events of any workflow skipped because this subscriber fell behind.
    /// Callers that need exact state should re-read the store when this grows.
    pub fn missed(&self) -> u64 {
        self.missed
    }

    /// Next event for the workflow. `None` once its completed, failed or
    /// cancelled event has been yielded, or when the bus is gone.
    pub async fn next(&mut self) -> Option<WorkflowEvent> {
        if self.finished {
            return None;
        }
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.workflow_id() == self.workflow_id => {
                    self.finished = event.ends_workflow();
                    return Some(event);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    self.missed += skipped;
                    tracing::debug!(workflow_id = %self.workflow_id, skipped, "workflow subscription lagged");
                }
                Err(RecvError::Closed) => {
                    self.finished = true;
                    return None;
                }
            }
        }
    }
}
