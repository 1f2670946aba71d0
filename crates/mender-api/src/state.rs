//! Application state wiring the engine together.
//!
//! AppState holds the concrete engine instances used by both CLI commands and
//! REST handlers. Core types are generic over `WorkflowRepository`; AppState
//! pins them to [`WorkflowStore`], which is either SQLite or in-memory
//! depending on how the binary was started.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mender_core::event::{EventBus, EventCounters};
use mender_core::repository::memory::InMemoryWorkflowRepository;
use mender_core::repository::workflow::WorkflowRepository;
use mender_core::workflow::dispatcher::{DispatcherSettings, WorkflowDispatcher};
use mender_core::workflow::executor::ExecutorSet;
use mender_core::workflow::orchestrator::{OrchestratorSettings, WorkflowOrchestrator};
use mender_core::workflow::registry::{RegistryLimits, WorkflowRegistry};
use mender_infra::config::{load_global_config, resolve_data_dir, resolve_io_root};
use mender_infra::executor::build_executor_set;
use mender_infra::sqlite::pool::DatabasePool;
use mender_infra::sqlite::workflow::SqliteWorkflowRepository;
use mender_types::config::GlobalConfig;
use mender_types::error::RepositoryError;
use mender_types::workflow::{Task, Workflow, WorkflowStatus};
use uuid::Uuid;

/// Storage backend chosen at startup.
pub enum WorkflowStore {
    Sqlite(SqliteWorkflowRepository),
    /// Nothing survives a restart; used by `--memory` and tests.
    Memory(InMemoryWorkflowRepository),
}

impl WorkflowRepository for WorkflowStore {
    async fn insert_workflow(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        match self {
            Self::Sqlite(repo) => repo.insert_workflow(workflow).await,
            Self::Memory(repo) => repo.insert_workflow(workflow).await,
        }
    }

    async fn get_workflow(&self, id: &Uuid) -> Result<Option<Workflow>, RepositoryError> {
        match self {
            Self::Sqlite(repo) => repo.get_workflow(id).await,
            Self::Memory(repo) => repo.get_workflow(id).await,
        }
    }

    async fn list_workflows(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Workflow>, RepositoryError> {
        match self {
            Self::Sqlite(repo) => repo.list_workflows(limit, offset).await,
            Self::Memory(repo) => repo.list_workflows(limit, offset).await,
        }
    }

    async fn record_transition(
        &self,
        task: &Task,
        workflow_status: WorkflowStatus,
        workflow_error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        match self {
            Self::Sqlite(repo) => {
                repo.record_transition(task, workflow_status, workflow_error)
                    .await
            }
            Self::Memory(repo) => {
                repo.record_transition(task, workflow_status, workflow_error)
                    .await
            }
        }
    }

    async fn list_unfinished_workflows(&self) -> Result<Vec<Workflow>, RepositoryError> {
        match self {
            Self::Sqlite(repo) => repo.list_unfinished_workflows().await,
            Self::Memory(repo) => repo.list_unfinished_workflows().await,
        }
    }
}

/// Registry pinned to the runtime store.
pub type ConcreteRegistry = WorkflowRegistry<WorkflowStore>;

/// How the engine should be assembled.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineOptions {
    /// Keep workflows in memory instead of SQLite.
    pub memory: bool,
    /// Route every task type to the simulation-only executor.
    pub simulate: bool,
}

/// Shared application state.
///
/// Used by both CLI commands and REST API handlers. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConcreteRegistry>,
    pub dispatcher: Arc<WorkflowDispatcher>,
    pub store: Arc<WorkflowStore>,
    pub event_bus: EventBus,
    pub counters: Arc<EventCounters>,
    pub config: Arc<GlobalConfig>,
    pub data_dir: PathBuf,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Resolve the data directory, load configuration, open storage and
    /// start the dispatcher.
    pub async fn init(options: EngineOptions) -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        tokio::fs::create_dir_all(&data_dir).await?;
        let config = load_global_config(&data_dir).await;

        let store = if options.memory {
            tracing::info!("using in-memory workflow store");
            WorkflowStore::Memory(InMemoryWorkflowRepository::new())
        } else {
            let pool = DatabasePool::open_in(&data_dir).await?;
            WorkflowStore::Sqlite(SqliteWorkflowRepository::new(pool))
        };

        let executors = if options.simulate {
            ExecutorSet::simulated(Duration::from_millis(config.engine.simulated_work_ms))
        } else {
            let io_root = resolve_io_root(&config, &data_dir);
            tokio::fs::create_dir_all(&io_root).await?;
            build_executor_set(&config, io_root)?
        };

        Ok(Self::assemble(config, store, executors, data_dir))
    }

    /// Wire the engine from already-built parts.
    pub fn assemble(
        config: GlobalConfig,
        store: WorkflowStore,
        executors: ExecutorSet,
        data_dir: PathBuf,
    ) -> Self {
        let store = Arc::new(store);
        let event_bus = EventBus::new(config.engine.event_bus_capacity);

        let orchestrator = Arc::new(WorkflowOrchestrator::new(
            Arc::clone(&store),
            executors,
            event_bus.clone(),
            OrchestratorSettings::from(&config.engine),
        ));
        let dispatcher = Arc::new(WorkflowDispatcher::start_with(
            orchestrator,
            DispatcherSettings::from(&config.engine),
        ));
        let registry = Arc::new(WorkflowRegistry::new(
            Arc::clone(&store),
            Arc::clone(&dispatcher),
            event_bus.clone(),
            RegistryLimits::from(&config.engine),
        ));

        Self {
            registry,
            dispatcher,
            store,
            event_bus,
            counters: Arc::new(EventCounters::new()),
            config: Arc::new(config),
            data_dir,
            started_at: Utc::now(),
        }
    }

    /// In-memory engine with simulated executors and no backoff, for tests.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        let mut config = GlobalConfig::default();
        config.engine.backoff = mender_types::config::BackoffConfig::None;
        config.engine.simulated_work_ms = 0;
        Self::assemble(
            config,
            WorkflowStore::Memory(InMemoryWorkflowRepository::new()),
            ExecutorSet::simulated(Duration::ZERO),
            std::env::temp_dir(),
        )
    }
}
