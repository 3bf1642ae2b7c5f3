use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::models::{PendingTask, TaskJob, TaskKind};
use super::store::TaskRegistry;

/// Upper bound of tasks claimed per worker tick.
const CLAIM_BATCH: i64 = 64;

/// Result of scheduling: the live handle plus the one it displaced, if any.
#[derive(Debug, Clone, Serialize)]
pub struct Scheduled {
    pub handle: PendingTask,
    pub superseded: Option<PendingTask>,
}

/// key: billing-deferred-tasks -> at most one pending task per (tenant, kind)
#[derive(Clone)]
pub struct DeferredTasks {
    registry: Arc<dyn TaskRegistry>,
    wake: Arc<Notify>,
}

impl DeferredTasks {
    pub fn new(registry: Arc<dyn TaskRegistry>) -> Self {
        Self {
            registry,
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn registry(&self) -> Arc<dyn TaskRegistry> {
        self.registry.clone()
    }

    /// Replaces whatever is pending for `(tenant_id, job.kind())` with `job`, due after `delay`.
    pub async fn schedule(&self, tenant_id: Uuid, delay: Duration, job: TaskJob) -> Result<Scheduled> {
        let now = Utc::now();
        self.schedule_at(tenant_id, now + delay, job, now).await
    }

    pub async fn schedule_at(
        &self,
        tenant_id: Uuid,
        run_at: DateTime<Utc>,
        job: TaskJob,
        now: DateTime<Utc>,
    ) -> Result<Scheduled> {
        let handle = PendingTask::new(tenant_id, run_at, job, now);
        let superseded = self.registry.replace(&handle).await?;

        if let Some(previous) = &superseded {
            debug!(
                %tenant_id,
                kind = %handle.kind,
                previous = %previous.id,
                "canceled superseded task"
            );
        }
        info!(
            %tenant_id,
            kind = %handle.kind,
            task = %handle.id,
            run_at = %handle.run_at,
            "scheduled deferred task"
        );

        if run_at <= now {
            self.wake.notify_one();
        }

        Ok(Scheduled { handle, superseded })
    }

    /// Cancels and clears the pending task for `(tenant_id, kind)`; no-op when nothing is pending.
    pub async fn cancel(&self, tenant_id: Uuid, kind: TaskKind) -> Result<Option<PendingTask>> {
        let removed = self.registry.remove(tenant_id, kind).await?;
        if let Some(task) = &removed {
            info!(%tenant_id, %kind, task = %task.id, "canceled deferred task");
        }
        Ok(removed)
    }

    pub async fn pending(&self, tenant_id: Uuid, kind: TaskKind) -> Result<Option<PendingTask>> {
        self.registry.find(tenant_id, kind).await
    }
}

/// Outcome of running one claimed task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskRun {
    Completed,
    Skipped(&'static str),
    Failed(String),
}

/// key: billing-task-handler -> executes claimed tasks
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, task: &PendingTask) -> TaskRun;
}

/// key: billing-task-worker -> tick handler
pub async fn process_due(
    registry: &dyn TaskRegistry,
    handler: &dyn TaskHandler,
    now: DateTime<Utc>,
) -> Result<usize> {
    let mut processed = 0;
    loop {
        let due = registry.claim_due(now, CLAIM_BATCH).await?;
        if due.is_empty() {
            break;
        }
        let batch_len = due.len();
        for task in due {
            match handler.run(&task).await {
                TaskRun::Completed => info!(
                    tenant_id = %task.tenant_id,
                    kind = %task.kind,
                    task = %task.id,
                    "deferred task completed"
                ),
                TaskRun::Skipped(reason) => info!(
                    tenant_id = %task.tenant_id,
                    kind = %task.kind,
                    task = %task.id,
                    reason,
                    "deferred task skipped"
                ),
                TaskRun::Failed(error) => warn!(
                    tenant_id = %task.tenant_id,
                    kind = %task.kind,
                    task = %task.id,
                    %error,
                    "deferred task failed"
                ),
            }
            processed += 1;
        }
        if (batch_len as i64) < CLAIM_BATCH {
            break;
        }
    }
    Ok(processed)
}

/// key: billing-task-worker -> polls the registry, woken early by zero-delay schedules
pub fn spawn_task_worker(
    tasks: DeferredTasks,
    handler: Arc<dyn TaskHandler>,
    interval: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = tasks.wake.notified() => {}
            }
            if let Err(err) = process_due(tasks.registry.as_ref(), handler.as_ref(), Utc::now()).await {
                warn!(?err, "deferred task tick failed");
            }
        }
    })
}
