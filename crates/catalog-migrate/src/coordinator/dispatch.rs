//! Asynchronous run dispatch.
//!
//! [`RunDispatcher::dispatch`] spawns a run and returns immediately with a
//! [`RunHandle`] that can be polled or awaited.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{RunCoordinator, RunRequest, RunResult};
use crate::error::{MigrateError, Result};

/// Lifecycle of a dispatched run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Waiting for the run lock.
    Queued,
    /// Holding the run lock.
    Running,
    /// The run produced a result (whatever its status).
    Completed,
    /// The run returned an error, e.g. `LockConflict`.
    Failed,
}

/// Spawns runs on the tokio runtime.
#[derive(Clone)]
pub struct RunDispatcher {
    coordinator: Arc<RunCoordinator>,
    shutdown: CancellationToken,
}

impl RunDispatcher {
    pub fn new(coordinator: Arc<RunCoordinator>) -> Self {
        Self {
            coordinator,
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancel every dispatched run when `shutdown` fires.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Start a run in the background.
    pub fn dispatch(&self, request: RunRequest) -> RunHandle {
        let run_id = uuid::Uuid::new_v4().to_string();
        let cancel = self.shutdown.child_token();
        let (phase_tx, phase_rx) = watch::channel(RunPhase::Queued);

        info!("Dispatching run {} for plan {}", run_id, request.plan_id);

        let coordinator = self.coordinator.clone();
        let task_run_id = run_id.clone();
        let task_cancel = cancel.clone();
        let join = tokio::spawn(async move {
            let result = coordinator
                .run_with_id(task_run_id, request, task_cancel, || {
                    phase_tx.send_replace(RunPhase::Running);
                })
                .await;
            phase_tx.send_replace(if result.is_ok() {
                RunPhase::Completed
            } else {
                RunPhase::Failed
            });
            result
        });

        RunHandle {
            run_id,
            phase: phase_rx,
            cancel,
            join,
        }
    }
}

/// Handle to a dispatched run.
pub struct RunHandle {
    run_id: String,
    phase: watch::Receiver<RunPhase>,
    cancel: CancellationToken,
    join: JoinHandle<Result<RunResult>>,
}

impl RunHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Current phase, without waiting.
    pub fn status(&self) -> RunPhase {
        *self.phase.borrow()
    }

    /// Ask the run to stop between records.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the run to finish.
    pub async fn wait(self) -> Result<RunResult> {
        self.join
            .await
            .map_err(|e| MigrateError::Task(format!("run {}: {}", self.run_id, e)))?
    }
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("run_id", &self.run_id)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LockPolicy, MigrationConfig};
    use crate::plan::{MemoryPlanStore, MigrationPlan, PlanEntry};
    use crate::registry::MigratorRegistry;
    use crate::stores::Stores;
    use std::time::Duration;

    fn coordinator(config: MigrationConfig) -> Arc<RunCoordinator> {
        let plans = MemoryPlanStore::with_plans([MigrationPlan::new(
            "p1",
            vec![PlanEntry::new("iso")],
        )]);
        let stores = Stores::in_memory().with_plans(Arc::new(plans));
        Arc::new(RunCoordinator::new(
            Arc::new(MigratorRegistry::with_builtins()),
            stores,
            config,
        ))
    }

    fn dispatcher() -> RunDispatcher {
        RunDispatcher::new(coordinator(MigrationConfig::default()))
    }

    #[tokio::test]
    async fn test_dispatch_stays_queued_while_lock_is_held() {
        let mut config = MigrationConfig::default();
        config.lock.policy = LockPolicy::Wait;
        config.lock.timeout_secs = 30;
        config.lock.poll_interval_ms = 10;
        let resource = config.lock.resource.clone();
        let coordinator = coordinator(config);

        let held = coordinator
            .stores()
            .lock
            .try_acquire(&resource)
            .await
            .unwrap()
            .unwrap();

        let handle = RunDispatcher::new(coordinator).dispatch(RunRequest::new("p1"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handle.status(), RunPhase::Queued);

        held.release().await.unwrap();
        let mut phase = handle.phase.clone();
        let result = handle.wait().await.unwrap();
        assert_eq!(result.plan_id, "p1");
        assert_eq!(*phase.borrow_and_update(), RunPhase::Completed);
    }

    #[tokio::test]
    async fn test_dispatch_returns_handle_and_completes() {
        let handle = dispatcher().dispatch(RunRequest::new("p1"));
        assert!(!handle.run_id().is_empty());
        assert_ne!(handle.status(), RunPhase::Failed);

        let run_id = handle.run_id().to_string();
        let result = handle.wait().await.unwrap();
        assert_eq!(result.run_id, run_id);
        assert_eq!(result.plan_id, "p1");
    }

    #[tokio::test]
    async fn test_dispatch_missing_plan_fails() {
        let handle = dispatcher().dispatch(RunRequest::new("absent"));
        let mut phase = handle.phase.clone();
        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, MigrateError::PlanNotFound(_)));
        assert_eq!(*phase.borrow_and_update(), RunPhase::Failed);
    }
}
