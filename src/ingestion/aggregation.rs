//! # Aggregation Scheduler
//!
//! Debounced, retrying in-process task queue that recomputes derived
//! statistics for projects and subprojects after ingestion activity.
//! Scheduling never blocks the caller; a burst of schedule calls for the
//! same target within the debounce window coalesces into one queued task.
//! Failed recomputations retry with exponential backoff; finished tasks are
//! retained briefly (longer for failures) for observability.
//!
//! The scheduler has an explicit lifecycle: construct it, `spawn` the worker
//! at process start, `shutdown` to stop it.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::GirderConfig;
use crate::models::AggregateStats;
use crate::store::{DocumentStore, StoreError};

/// Which parent entity a task recomputes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationKind {
    Project,
    Subproject,
}

impl fmt::Display for AggregationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Project => write!(f, "project"),
            Self::Subproject => write!(f, "subproject"),
        }
    }
}

/// Task lifecycle within the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationTaskState {
    Queued,
    Running,
    Completed,
    Failed,
}

/// One queued recomputation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationTask {
    pub task_id: Uuid,
    pub kind: AggregationKind,
    pub target_id: Uuid,
    pub state: AggregationTaskState,
    /// Number of executions so far
    pub attempts: u32,
    pub scheduled_for: DateTime<Utc>,
    pub enqueued_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Seam for the actual recomputation, injectable for tests
#[async_trait]
pub trait AggregationExecutor: Send + Sync {
    async fn recompute_project(&self, project_id: Uuid) -> Result<AggregateStats, StoreError>;

    async fn recompute_subproject(
        &self,
        subproject_id: Uuid,
    ) -> Result<AggregateStats, StoreError>;
}

/// Default executor: recompute counts from the store and write them onto the
/// parent document. This is the one path allowed to write absolute stats —
/// an explicit reconciliation, not a counter mutation.
pub struct StoreAggregationExecutor {
    store: Arc<dyn DocumentStore>,
}

impl StoreAggregationExecutor {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AggregationExecutor for StoreAggregationExecutor {
    async fn recompute_project(&self, project_id: Uuid) -> Result<AggregateStats, StoreError> {
        let stats = self.store.project_aggregates(project_id).await?;
        self.store
            .set_project_stats(project_id, stats.clone())
            .await?;
        Ok(stats)
    }

    async fn recompute_subproject(
        &self,
        subproject_id: Uuid,
    ) -> Result<AggregateStats, StoreError> {
        let stats = self.store.subproject_aggregates(subproject_id).await?;
        self.store
            .set_subproject_stats(subproject_id, stats.clone())
            .await?;
        Ok(stats)
    }
}

struct SchedulerState {
    queued: Vec<AggregationTask>,
    running: Option<AggregationTask>,
    finished: VecDeque<AggregationTask>,
    shutdown: bool,
}

struct SchedulerShared {
    state: Mutex<SchedulerState>,
    notify: Notify,
    executor: Arc<dyn AggregationExecutor>,
    debounce: chrono::Duration,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
    completed_retention: chrono::Duration,
    completed_retention_count: usize,
    failed_retention: chrono::Duration,
}

/// Cheaply cloneable handle to the scheduler
#[derive(Clone)]
pub struct AggregationScheduler {
    shared: Arc<SchedulerShared>,
}

impl AggregationScheduler {
    pub fn new(executor: Arc<dyn AggregationExecutor>, config: &GirderConfig) -> Self {
        Self {
            shared: Arc::new(SchedulerShared {
                state: Mutex::new(SchedulerState {
                    queued: Vec::new(),
                    running: None,
                    finished: VecDeque::new(),
                    shutdown: false,
                }),
                notify: Notify::new(),
                executor,
                debounce: chrono::Duration::milliseconds(config.aggregation_debounce_ms as i64),
                max_attempts: config.aggregation_max_attempts.max(1),
                backoff_base: Duration::from_millis(config.aggregation_backoff_base_ms),
                backoff_max: Duration::from_millis(config.aggregation_backoff_max_ms),
                completed_retention: chrono::Duration::seconds(
                    config.completed_task_retention_secs,
                ),
                completed_retention_count: config.completed_task_retention_count,
                failed_retention: chrono::Duration::seconds(config.failed_task_retention_secs),
            }),
        }
    }

    /// Scheduler wired to the default store-backed executor
    pub fn for_store(store: Arc<dyn DocumentStore>, config: &GirderConfig) -> Self {
        Self::new(Arc::new(StoreAggregationExecutor::new(store)), config)
    }

    /// Spawn the worker loop
    pub fn spawn(&self) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(run_loop(shared))
    }

    /// Schedule a project-level recomputation (non-blocking, debounced)
    pub fn schedule_project(&self, project_id: Uuid) -> Uuid {
        self.schedule(AggregationKind::Project, project_id)
    }

    /// Schedule a subproject-level recomputation (non-blocking, debounced)
    pub fn schedule_subproject(&self, subproject_id: Uuid) -> Uuid {
        self.schedule(AggregationKind::Subproject, subproject_id)
    }

    fn schedule(&self, kind: AggregationKind, target_id: Uuid) -> Uuid {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            warn!(%kind, %target_id, "Aggregation scheduled after shutdown; task will not run");
        }

        // Coalesce into an existing queued task for the same target. A task
        // already running does not absorb the call: its recompute may have
        // read pre-burst state, so a fresh task is queued behind it.
        if let Some(existing) = state
            .queued
            .iter()
            .find(|t| t.kind == kind && t.target_id == target_id)
        {
            debug!(
                %kind,
                %target_id,
                task_id = %existing.task_id,
                "Coalesced aggregation request into queued task"
            );
            return existing.task_id;
        }

        let now = Utc::now();
        let task = AggregationTask {
            task_id: Uuid::new_v4(),
            kind,
            target_id,
            state: AggregationTaskState::Queued,
            attempts: 0,
            scheduled_for: now + self.shared.debounce,
            enqueued_at: now,
            finished_at: None,
            last_error: None,
        };
        let task_id = task.task_id;
        state.queued.push(task);
        drop(state);

        self.shared.notify.notify_one();
        debug!(%kind, %target_id, %task_id, "Scheduled aggregation task");
        task_id
    }

    /// Stop the worker loop after its current task
    pub fn shutdown(&self) {
        let remaining = {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            state.queued.len()
        };
        if remaining > 0 {
            warn!(remaining, "Aggregation scheduler shutting down with queued tasks");
        }
        self.shared.notify.notify_one();
    }

    /// True when nothing is queued or running
    pub fn is_idle(&self) -> bool {
        let state = self.shared.state.lock();
        state.queued.is_empty() && state.running.is_none()
    }

    /// Wait until the queue is drained (test helper; returns immediately
    /// after shutdown)
    pub async fn drain(&self) {
        loop {
            {
                let state = self.shared.state.lock();
                if state.shutdown || (state.queued.is_empty() && state.running.is_none()) {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Current queued, running, and retained finished tasks
    pub fn snapshot(&self) -> Vec<AggregationTask> {
        let state = self.shared.state.lock();
        state
            .queued
            .iter()
            .chain(state.running.as_ref())
            .chain(state.finished.iter())
            .cloned()
            .collect()
    }
}

enum NextAction {
    Run(AggregationTask),
    Sleep(Duration),
    Wait,
    Exit,
}

async fn run_loop(shared: Arc<SchedulerShared>) {
    loop {
        let action = {
            let mut state = shared.state.lock();
            if state.shutdown {
                NextAction::Exit
            } else {
                prune_finished(&mut state, &shared);
                let now = Utc::now();
                let due = state
                    .queued
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.scheduled_for <= now)
                    .min_by_key(|(_, t)| t.scheduled_for)
                    .map(|(index, _)| index);
                if let Some(index) = due {
                    let mut task = state.queued.remove(index);
                    task.state = AggregationTaskState::Running;
                    task.attempts += 1;
                    state.running = Some(task.clone());
                    NextAction::Run(task)
                } else if let Some(earliest) =
                    state.queued.iter().map(|t| t.scheduled_for).min()
                {
                    NextAction::Sleep((earliest - now).to_std().unwrap_or(Duration::ZERO))
                } else {
                    NextAction::Wait
                }
            }
        };

        match action {
            NextAction::Run(mut task) => {
                let result = match task.kind {
                    AggregationKind::Project => {
                        shared.executor.recompute_project(task.target_id).await
                    }
                    AggregationKind::Subproject => {
                        shared.executor.recompute_subproject(task.target_id).await
                    }
                };

                let mut state = shared.state.lock();
                state.running = None;
                match result {
                    Ok(stats) => {
                        task.state = AggregationTaskState::Completed;
                        task.finished_at = Some(Utc::now());
                        task.last_error = None;
                        info!(
                            kind = %task.kind,
                            target_id = %task.target_id,
                            attempts = task.attempts,
                            total_elements = stats.total_elements,
                            total_jobs = stats.total_jobs,
                            "Aggregation recomputed"
                        );
                        state.finished.push_back(task);
                    }
                    Err(err) => {
                        task.last_error = Some(err.to_string());
                        if task.attempts >= shared.max_attempts {
                            task.state = AggregationTaskState::Failed;
                            task.finished_at = Some(Utc::now());
                            error!(
                                kind = %task.kind,
                                target_id = %task.target_id,
                                attempts = task.attempts,
                                error = %err,
                                "Aggregation failed permanently"
                            );
                            state.finished.push_back(task);
                        } else {
                            let delay = backoff_delay(&shared, task.attempts);
                            task.state = AggregationTaskState::Queued;
                            task.scheduled_for =
                                Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64);
                            warn!(
                                kind = %task.kind,
                                target_id = %task.target_id,
                                attempts = task.attempts,
                                retry_in_ms = delay.as_millis() as u64,
                                error = %err,
                                "Aggregation failed; retrying with backoff"
                            );
                            state.queued.push(task);
                        }
                    }
                }
            }
            NextAction::Sleep(duration) => {
                tokio::select! {
                    _ = tokio::time::sleep(duration) => {}
                    _ = shared.notify.notified() => {}
                }
            }
            NextAction::Wait => shared.notify.notified().await,
            NextAction::Exit => break,
        }
    }
    debug!("Aggregation scheduler loop exited");
}

/// Exponential backoff: base × 2^(attempts-1), capped
fn backoff_delay(shared: &SchedulerShared, attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(16);
    let delay = shared.backoff_base.mul_f64(2f64.powi(exponent as i32));
    delay.min(shared.backoff_max)
}

fn prune_finished(state: &mut SchedulerState, shared: &SchedulerShared) {
    let now = Utc::now();
    state.finished.retain(|task| {
        let age = now - task.finished_at.unwrap_or(now);
        match task.state {
            AggregationTaskState::Completed => age <= shared.completed_retention,
            AggregationTaskState::Failed => age <= shared.failed_retention,
            _ => true,
        }
    });

    let completed = state
        .finished
        .iter()
        .filter(|t| t.state == AggregationTaskState::Completed)
        .count();
    let mut excess = completed.saturating_sub(shared.completed_retention_count);
    if excess > 0 {
        // The deque is ordered by finish time, so retain drops the oldest
        state.finished.retain(|task| {
            if task.state == AggregationTaskState::Completed && excess > 0 {
                excess -= 1;
                false
            } else {
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingExecutor {
        calls: AtomicUsize,
        failures_before_success: usize,
    }

    impl CountingExecutor {
        fn succeeding() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                failures_before_success: 0,
            })
        }

        fn always_failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                failures_before_success: usize::MAX,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn answer(&self) -> Result<AggregateStats, StoreError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                Err(StoreError::Backend("injected failure".to_string()))
            } else {
                Ok(AggregateStats::default())
            }
        }
    }

    #[async_trait]
    impl AggregationExecutor for CountingExecutor {
        async fn recompute_project(&self, _: Uuid) -> Result<AggregateStats, StoreError> {
            self.answer()
        }

        async fn recompute_subproject(&self, _: Uuid) -> Result<AggregateStats, StoreError> {
            self.answer()
        }
    }

    fn fast_config() -> GirderConfig {
        GirderConfig {
            aggregation_debounce_ms: 50,
            aggregation_backoff_base_ms: 10,
            aggregation_backoff_max_ms: 100,
            ..GirderConfig::default()
        }
    }

    #[tokio::test]
    async fn test_burst_coalesces_into_one_recomputation() {
        let executor = CountingExecutor::succeeding();
        let scheduler = AggregationScheduler::new(
            Arc::clone(&executor) as Arc<dyn AggregationExecutor>,
            &fast_config(),
        );
        let worker = scheduler.spawn();

        let target = Uuid::new_v4();
        let first = scheduler.schedule_subproject(target);
        for _ in 0..4 {
            assert_eq!(scheduler.schedule_subproject(target), first);
        }

        scheduler.drain().await;
        assert_eq!(executor.calls(), 1);

        // A schedule after the window completes runs again
        scheduler.schedule_subproject(target);
        scheduler.drain().await;
        assert_eq!(executor.calls(), 2);

        scheduler.shutdown();
        let _ = worker.await;
    }

    #[tokio::test]
    async fn test_distinct_targets_do_not_coalesce() {
        let executor = CountingExecutor::succeeding();
        let scheduler = AggregationScheduler::new(
            Arc::clone(&executor) as Arc<dyn AggregationExecutor>,
            &fast_config(),
        );
        let worker = scheduler.spawn();

        scheduler.schedule_project(Uuid::new_v4());
        scheduler.schedule_project(Uuid::new_v4());
        scheduler.drain().await;
        assert_eq!(executor.calls(), 2);

        scheduler.shutdown();
        let _ = worker.await;
    }

    #[tokio::test]
    async fn test_failures_retry_with_bounded_attempts() {
        let executor = CountingExecutor::always_failing();
        let scheduler = AggregationScheduler::new(
            Arc::clone(&executor) as Arc<dyn AggregationExecutor>,
            &fast_config(),
        );
        let worker = scheduler.spawn();

        scheduler.schedule_project(Uuid::new_v4());
        scheduler.drain().await;

        assert_eq!(executor.calls(), 3);
        let snapshot = scheduler.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].state, AggregationTaskState::Failed);
        assert_eq!(snapshot[0].attempts, 3);
        assert!(snapshot[0].last_error.as_deref().unwrap().contains("injected"));

        scheduler.shutdown();
        let _ = worker.await;
    }

    #[tokio::test]
    async fn test_failed_tasks_are_retained_for_diagnosis() {
        let executor = CountingExecutor::always_failing();
        let mut config = fast_config();
        config.completed_task_retention_secs = 0;
        let scheduler = AggregationScheduler::new(
            Arc::clone(&executor) as Arc<dyn AggregationExecutor>,
            &config,
        );
        let worker = scheduler.spawn();

        scheduler.schedule_project(Uuid::new_v4());
        scheduler.drain().await;

        // Completed retention is zero but the failed task survives
        let snapshot = scheduler.snapshot();
        assert!(snapshot
            .iter()
            .any(|t| t.state == AggregationTaskState::Failed));

        scheduler.shutdown();
        let _ = worker.await;
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let scheduler = AggregationScheduler::new(
            CountingExecutor::succeeding() as Arc<dyn AggregationExecutor>,
            &GirderConfig {
                aggregation_backoff_base_ms: 1000,
                aggregation_backoff_max_ms: 3000,
                ..GirderConfig::default()
            },
        );
        let shared = &scheduler.shared;
        assert_eq!(backoff_delay(shared, 1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(shared, 2), Duration::from_millis(2000));
        assert_eq!(backoff_delay(shared, 3), Duration::from_millis(3000));
        assert_eq!(backoff_delay(shared, 10), Duration::from_millis(3000));
    }
}
