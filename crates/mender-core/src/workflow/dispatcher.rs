//! Workflow dispatcher: the queue between the registry and the orchestrator.
//!
//! Workflow ids arrive on an unbounded mpsc channel. A single run loop spawns
//! one drive per id into a `JoinSet`, and a semaphore bounds how many drives
//! are in flight. Each id owns one `CancellationToken` from enqueue until its
//! drive ends. That gives one driver per workflow, so every workflow has a
//! single writer and different workflows never wait on each other.
//!
//! A drive that stops because the store failed is driven again after
//! `redrive_delay`, under the same token, until it finishes or the
//! dispatcher shuts down.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use mender_types::config::EngineConfig;
use uuid::Uuid;

use crate::repository::workflow::WorkflowRepository;

use super::orchestrator::WorkflowOrchestrator;

/// Whether an enqueue call scheduled a new drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Scheduled,
    /// A drive for this workflow is already queued or running.
    AlreadyActive,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("dispatcher is shutting down")]
    ShuttingDown,
}

/// Default pause before a drive stopped by a storage error runs again.
pub const DEFAULT_REDRIVE_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub max_concurrent: usize,
    pub redrive_delay: Duration,
}

impl From<&EngineConfig> for DispatcherSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent_workflows,
            redrive_delay: Duration::from_millis(config.redrive_delay_ms),
        }
    }
}

type ActiveMap = Arc<DashMap<Uuid, CancellationToken>>;

pub struct WorkflowDispatcher {
    sender: mpsc::UnboundedSender<Uuid>,
    active: ActiveMap,
    shutdown: CancellationToken,
    run_loop: Mutex<Option<JoinHandle<()>>>,
}

impl WorkflowDispatcher {
    /// Spawn the run loop with the default redrive delay.
    pub fn start<R: WorkflowRepository + 'static>(
        orchestrator: Arc<WorkflowOrchestrator<R>>,
        max_concurrent: usize,
    ) -> Self {
        Self::start_with(
            orchestrator,
            DispatcherSettings {
                max_concurrent,
                redrive_delay: DEFAULT_REDRIVE_DELAY,
            },
        )
    }

    /// Spawn the run loop. `max_concurrent` is clamped to at least 1.
    pub fn start_with<R: WorkflowRepository + 'static>(
        orchestrator: Arc<WorkflowOrchestrator<R>>,
        settings: DispatcherSettings,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let active: ActiveMap = Arc::new(DashMap::new());
        let shutdown = CancellationToken::new();
        let semaphore = Arc::new(Semaphore::new(settings.max_concurrent.max(1)));

        let handle = tokio::spawn(run_loop(
            orchestrator,
            receiver,
            Arc::clone(&active),
            semaphore,
            settings.redrive_delay,
            shutdown.clone(),
        ));

        Self {
            sender,
            active,
            shutdown,
            run_loop: Mutex::new(Some(handle)),
        }
    }

    /// Schedule a drive for `workflow_id` unless one is already active.
    pub fn enqueue(&self, workflow_id: Uuid) -> Result<Enqueued, DispatchError> {
        if self.shutdown.is_cancelled() {
            return Err(DispatchError::ShuttingDown);
        }
        match self.active.entry(workflow_id) {
            Entry::Occupied(_) => return Ok(Enqueued::AlreadyActive),
            Entry::Vacant(slot) => {
                slot.insert(CancellationToken::new());
            }
        }
        if self.sender.send(workflow_id).is_err() {
            self.active.remove(&workflow_id);
            return Err(DispatchError::ShuttingDown);
        }
        tracing::debug!(workflow_id = %workflow_id, "workflow enqueued");
        Ok(Enqueued::Scheduled)
    }

    /// Request cancellation of an active drive. Returns `false` if the
    /// workflow is neither queued nor running here.
    pub fn cancel(&self, workflow_id: Uuid) -> bool {
        match self.active.get(&workflow_id) {
            Some(token) => {
                token.cancel();
                tracing::info!(workflow_id = %workflow_id, "workflow cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Reserve an idle workflow so no drive can be scheduled for it while the
    /// caller changes it directly in the store. Enqueue reports
    /// `AlreadyActive` until the claim is dropped. `None` if a drive is
    /// already queued or running.
    pub fn claim_idle(&self, workflow_id: Uuid) -> Option<IdleClaim> {
        match self.active.entry(workflow_id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let token = CancellationToken::new();
                token.cancel();
                slot.insert(token);
                Some(IdleClaim(ActiveGuard {
                    active: Arc::clone(&self.active),
                    workflow_id,
                }))
            }
        }
    }

    pub fn is_active(&self, workflow_id: Uuid) -> bool {
        self.active.contains_key(&workflow_id)
    }

    /// Number of workflows queued or running.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Stop accepting work and wait for in-flight drives to finish.
    ///
    /// Queued ids that have not started are dropped and leave the active set;
    /// they stay QUEUED in the store and are picked up by recovery on the
    /// next start.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.run_loop.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "dispatcher run loop panicked");
            }
        }
    }
}

impl std::fmt::Debug for WorkflowDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowDispatcher")
            .field("active", &self.active.len())
            .field("shutting_down", &self.shutdown.is_cancelled())
            .finish()
    }
}

/// Removes the workflow from the active map when its drive ends, including on
/// panic.
struct ActiveGuard {
    active: ActiveMap,
    workflow_id: Uuid,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.remove(&self.workflow_id);
    }
}

/// Returned by [`WorkflowDispatcher::claim_idle`]; releases the workflow on
/// drop.
#[must_use = "the claim is released as soon as it is dropped"]
pub struct IdleClaim(ActiveGuard);

impl std::fmt::Debug for IdleClaim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("IdleClaim").field(&self.0.workflow_id).finish()
    }
}

async fn run_loop<R: WorkflowRepository + 'static>(
    orchestrator: Arc<WorkflowOrchestrator<R>>,
    mut receiver: mpsc::UnboundedReceiver<Uuid>,
    active: ActiveMap,
    semaphore: Arc<Semaphore>,
    redrive_delay: Duration,
    shutdown: CancellationToken,
) {
    let mut drives = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            received = receiver.recv() => {
                let Some(workflow_id) = received else { break };
                let Some(token) = active.get(&workflow_id).map(|t| t.value().clone()) else {
                    continue;
                };
                let guard = ActiveGuard {
                    active: Arc::clone(&active),
                    workflow_id,
                };
                let orchestrator = Arc::clone(&orchestrator);
                let semaphore = Arc::clone(&semaphore);
                let shutdown = shutdown.clone();
                drives.spawn(async move {
                    let _guard = guard;
                    loop {
                        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                            return;
                        };
                        let result = orchestrator.drive(workflow_id, token.clone()).await;
                        drop(permit);
                        match result {
                            Ok(status) => {
                                tracing::debug!(workflow_id = %workflow_id, status = %status, "drive finished");
                                return;
                            }
                            Err(e) if e.is_transient() => {
                                tracing::warn!(
                                    workflow_id = %workflow_id,
                                    error = %e,
                                    delay_ms = redrive_delay.as_millis() as u64,
                                    "drive stopped on a storage error; driving again"
                                );
                                tokio::select! {
                                    _ = shutdown.cancelled() => return,
                                    _ = tokio::time::sleep(redrive_delay) => {}
                                }
                            }
                            Err(e) => {
                                tracing::error!(
                                    workflow_id = %workflow_id,
                                    error = %e,
                                    "drive aborted; workflow resumes on next recovery pass"
                                );
                                return;
                            }
                        }
                    }
                });
            }
            Some(joined) = drives.join_next(), if !drives.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "workflow drive panicked");
                }
            }
        }
    }

    receiver.close();
    let mut dropped = 0usize;
    while let Ok(workflow_id) = receiver.try_recv() {
        active.remove(&workflow_id);
        dropped += 1;
    }
    if dropped > 0 {
        tracing::info!(dropped, "queued workflows left for recovery");
    }
    let in_flight = drives.len();
    if in_flight > 0 {
        tracing::info!(in_flight, "waiting for in-flight workflows");
    }
    while let Some(joined) = drives.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "workflow drive panicked");
        }
    }
}
