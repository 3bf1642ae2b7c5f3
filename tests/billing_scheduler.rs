use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use course_billing::billing::{
    process_due, spawn_task_worker, DeferredTasks, PendingTask, TaskHandler, TaskJob, TaskKind,
    TaskRegistry, TaskRun,
};
use course_billing::memory::InMemoryTaskRegistry;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

#[derive(Default)]
struct CollectingHandler {
    seen: Mutex<Vec<PendingTask>>,
}

#[async_trait]
impl TaskHandler for CollectingHandler {
    async fn run(&self, task: &PendingTask) -> TaskRun {
        self.seen.lock().await.push(task.clone());
        TaskRun::Completed
    }
}

struct ChannelHandler {
    fired: mpsc::UnboundedSender<Uuid>,
}

#[async_trait]
impl TaskHandler for ChannelHandler {
    async fn run(&self, task: &PendingTask) -> TaskRun {
        let _ = self.fired.send(task.id);
        TaskRun::Completed
    }
}

// key: billing-scheduler-tests -> at most one pending task per (tenant, kind)
#[tokio::test]
async fn rescheduling_supersedes_the_previous_handle() {
    let registry = Arc::new(InMemoryTaskRegistry::new());
    let tasks = DeferredTasks::new(registry.clone());
    let tenant_id = Uuid::new_v4();

    let first = tasks
        .schedule(tenant_id, Duration::days(30), TaskJob::Cleanup)
        .await
        .unwrap();
    assert!(first.superseded.is_none());

    let second = tasks
        .schedule(tenant_id, Duration::days(30), TaskJob::Cleanup)
        .await
        .unwrap();
    assert_eq!(
        second.superseded.as_ref().map(|task| task.id),
        Some(first.handle.id)
    );
    assert_eq!(registry.len(), 1);

    let handler = CollectingHandler::default();
    let fired = process_due(
        registry.as_ref(),
        &handler,
        Utc::now() + Duration::days(31),
    )
    .await
    .unwrap();
    assert_eq!(fired, 1);
    let seen = handler.seen.lock().await;
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].id, second.handle.id);
}

#[tokio::test]
async fn kinds_are_tracked_independently() {
    let registry = Arc::new(InMemoryTaskRegistry::new());
    let tasks = DeferredTasks::new(registry.clone());
    let tenant_id = Uuid::new_v4();

    tasks
        .schedule(tenant_id, Duration::days(30), TaskJob::Cleanup)
        .await
        .unwrap();
    tasks
        .schedule(
            tenant_id,
            Duration::zero(),
            TaskJob::SyncAmount { amount_cents: 50_100 },
        )
        .await
        .unwrap();
    assert_eq!(registry.len(), 2);

    let canceled = tasks.cancel(tenant_id, TaskKind::Cleanup).await.unwrap();
    assert!(canceled.is_some());
    assert!(tasks.cancel(tenant_id, TaskKind::Cleanup).await.unwrap().is_none());
    assert!(tasks
        .pending(tenant_id, TaskKind::BillingSync)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn only_due_tasks_are_claimed_and_each_fires_once() {
    let registry = Arc::new(InMemoryTaskRegistry::new());
    let tasks = DeferredTasks::new(registry.clone());
    let soon = Uuid::new_v4();
    let later = Uuid::new_v4();

    tasks
        .schedule(soon, Duration::zero(), TaskJob::SyncAmount { amount_cents: 1 })
        .await
        .unwrap();
    tasks
        .schedule(later, Duration::days(30), TaskJob::Cleanup)
        .await
        .unwrap();

    let handler = CollectingHandler::default();
    let now = Utc::now();
    assert_eq!(process_due(registry.as_ref(), &handler, now).await.unwrap(), 1);
    assert_eq!(process_due(registry.as_ref(), &handler, now).await.unwrap(), 0);
    assert_eq!(handler.seen.lock().await[0].tenant_id, soon);
    assert!(registry
        .find(later, TaskKind::Cleanup)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn zero_delay_schedule_wakes_the_worker() {
    let registry = Arc::new(InMemoryTaskRegistry::new());
    let tasks = DeferredTasks::new(registry.clone());
    let (fired_tx, mut fired_rx) = mpsc::unbounded_channel();

    // Long interval so only the wake-up can run the task in time.
    let worker = spawn_task_worker(
        tasks.clone(),
        Arc::new(ChannelHandler { fired: fired_tx }),
        StdDuration::from_secs(3_600),
    );
    tokio::time::sleep(StdDuration::from_millis(50)).await;

    let scheduled = tasks
        .schedule(
            Uuid::new_v4(),
            Duration::zero(),
            TaskJob::SyncAmount { amount_cents: 50_000 },
        )
        .await
        .unwrap();

    let fired = tokio::time::timeout(StdDuration::from_secs(5), fired_rx.recv())
        .await
        .expect("worker woke up")
        .expect("task id");
    assert_eq!(fired, scheduled.handle.id);
    assert!(registry.is_empty());
    worker.abort();
}
