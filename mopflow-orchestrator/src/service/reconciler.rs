//! Reconciler
//!
//! Drives a desired task set to completion. Each pass classifies every task
//! from the store alone: completed tasks are skipped, running tasks are left
//! alone, pending and failed tasks are submitted through a bounded pool.
//! Re-running the same set after a crash or a partial failure therefore only
//! touches unfinished work.

use chrono::Utc;
use mopflow_core::domain::summary::{Summary, SummaryCondition};
use mopflow_core::domain::task::{FailureReason, Task, TaskId, TaskStatus};
use mopflow_core::dto::task::TaskSpec;
use mopflow_core::error::{OrchestratorError, SchedulerError, StoreError, SubmitError};
use mopflow_core::scheduler::{JobScriptProvider, SchedulerClient};
use mopflow_core::store::TaskStore;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::OrchestratorConfig;
use crate::service::submitter::{SubmitOutcome, Submitter};

/// Per-run knobs, defaulting to the controller's configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub concurrency: usize,
    pub wait: bool,
    pub deadline: Option<Duration>,
    pub poll_interval: Duration,
}

impl From<&OrchestratorConfig> for RunOptions {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            wait: config.wait,
            deadline: config.deadline,
            poll_interval: config.poll_interval,
        }
    }
}

/// Result of classifying the desired set
#[derive(Debug, Default)]
struct Plan {
    selected: Vec<Task>,
    skipped: Vec<TaskId>,
    in_flight: Vec<TaskId>,
}

pub struct Controller {
    config: OrchestratorConfig,
    store: Arc<dyn TaskStore>,
    scheduler: Arc<dyn SchedulerClient>,
    submitter: Submitter,
}

impl Controller {
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn TaskStore>,
        provider: Arc<dyn JobScriptProvider>,
        scheduler: Arc<dyn SchedulerClient>,
    ) -> Self {
        let submitter = Submitter::new(store.clone(), provider, scheduler.clone());
        Self {
            config,
            store,
            scheduler,
            submitter,
        }
    }

    /// Runs the desired set with the configured options
    pub async fn run(&self, specs: &[TaskSpec]) -> Result<Summary, OrchestratorError> {
        self.run_with(specs, RunOptions::from(&self.config)).await
    }

    /// Reconciles the desired set, submits what needs work, and optionally
    /// waits until every task is terminal or the deadline passes
    ///
    /// Per-task failures end up in the store and in `Summary::failed`; only
    /// store failures are returned as errors.
    pub async fn run_with(
        &self,
        specs: &[TaskSpec],
        options: RunOptions,
    ) -> Result<Summary, OrchestratorError> {
        if options.concurrency == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "concurrency must be greater than 0".to_string(),
            ));
        }
        if options.wait && options.poll_interval.is_zero() {
            return Err(OrchestratorError::InvalidConfig(
                "poll_interval must be greater than 0".to_string(),
            ));
        }

        let started = Instant::now();
        let specs = dedup(specs);
        let ids: Vec<TaskId> = specs.iter().map(|s| s.task_id.clone()).collect();

        info!(
            "Reconciling {} task(s) (concurrency: {}, wait: {})",
            ids.len(),
            options.concurrency,
            options.wait
        );

        let plan = self.reconcile(&specs).await?;
        info!(
            "{} to submit, {} already completed, {} still running",
            plan.selected.len(),
            plan.skipped.len(),
            plan.in_flight.len()
        );

        let submitted = self.submit_all(plan.selected, options.concurrency).await?;

        let (snapshot, condition) = if options.wait {
            self.wait_for_terminal(&ids, started, options).await?
        } else {
            (self.snapshot(&ids).await?, SummaryCondition::Submitted)
        };

        let summary = Summary::from_snapshot(snapshot.values(), submitted, plan.skipped, condition);
        info!(
            "Run finished ({:?}): {} completed, {} failed, {} running, {} pending",
            summary.condition,
            summary.completed.len(),
            summary.failed.len(),
            summary.running.len(),
            summary.pending.len()
        );

        Ok(summary)
    }

    /// Fetches (creating when absent) and classifies every desired task
    async fn reconcile(&self, specs: &[TaskSpec]) -> Result<Plan, StoreError> {
        let mut plan = Plan::default();

        for spec in specs {
            let task = self.fetch_or_create(spec).await?;

            match task.status {
                TaskStatus::Completed => {
                    debug!("Task {} already completed, skipping", task.task_id);
                    plan.skipped.push(task.task_id);
                }
                TaskStatus::Running => {
                    debug!(
                        "Task {} already running as {:?}",
                        task.task_id, task.scheduler_handle
                    );
                    plan.in_flight.push(task.task_id);
                }
                TaskStatus::Pending | TaskStatus::Failed => {
                    // Pick up metadata fixes made since the last attempt
                    let mut task = task;
                    task.metadata = spec.metadata.clone();
                    plan.selected.push(task);
                }
            }
        }

        Ok(plan)
    }

    async fn fetch_or_create(&self, spec: &TaskSpec) -> Result<Task, StoreError> {
        if let Some(task) = self.store.get(&spec.task_id).await? {
            return Ok(task);
        }

        let fresh = Task::pending(spec.task_id.clone(), spec.metadata.clone(), Utc::now());
        match self.store.upsert_if_unchanged(fresh).await? {
            Some(task) => {
                debug!("Task {} created", task.task_id);
                Ok(task)
            }
            // Someone else created it first
            None => self
                .store
                .get(&spec.task_id)
                .await?
                .ok_or_else(|| StoreError::NotFound(spec.task_id.to_string())),
        }
    }

    /// Submits the selected tasks with at most `concurrency` in flight
    ///
    /// Returns the ids that reached the scheduler. A store failure stops
    /// further submissions and is returned once in-flight ones have settled.
    async fn submit_all(
        &self,
        selected: Vec<Task>,
        concurrency: usize,
    ) -> Result<Vec<TaskId>, StoreError> {
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let store_down = Arc::new(AtomicBool::new(false));
        let mut set = JoinSet::new();

        for task in selected {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            if store_down.load(Ordering::SeqCst) {
                break;
            }

            let submitter = self.submitter.clone();
            let store_down = store_down.clone();
            set.spawn(async move {
                let _permit = permit;
                let task_id = task.task_id.clone();
                let result = submitter.submit(task).await;
                if matches!(result, Err(SubmitError::Store(_))) {
                    store_down.store(true, Ordering::SeqCst);
                }
                (task_id, result)
            });
        }

        let mut submitted = Vec::new();
        let mut fatal = None;

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((task_id, Ok(SubmitOutcome::Recorded(_)))) => submitted.push(task_id),
                Ok((task_id, Ok(SubmitOutcome::Superseded { handle, status }))) => {
                    warn!(
                        "Task {} is {} and does not track job {}; not counted as submitted",
                        task_id, status, handle
                    );
                }
                Ok((task_id, Err(SubmitError::Store(e)))) => {
                    error!("Task store failed while submitting {}: {}", task_id, e);
                    fatal.get_or_insert(e);
                }
                Ok((task_id, Err(e))) => warn!("Task {} not submitted: {}", task_id, e),
                Err(e) => error!("Submission task panicked: {}", e),
            }
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(submitted),
        }
    }

    /// Latest stored state of each desired task
    async fn snapshot(&self, ids: &[TaskId]) -> Result<BTreeMap<TaskId, Task>, StoreError> {
        let mut snapshot = BTreeMap::new();
        for id in ids {
            let task = self
                .store
                .get(id)
                .await?
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            snapshot.insert(id.clone(), task);
        }
        Ok(snapshot)
    }

    async fn wait_for_terminal(
        &self,
        ids: &[TaskId],
        started: Instant,
        options: RunOptions,
    ) -> Result<(BTreeMap<TaskId, Task>, SummaryCondition), StoreError> {
        loop {
            let mut snapshot = self.snapshot(ids).await?;

            if all_terminal(&snapshot) {
                return Ok((snapshot, SummaryCondition::AllTerminal));
            }

            let remaining = match options.deadline {
                Some(deadline) => {
                    let elapsed = started.elapsed();
                    if elapsed >= deadline {
                        warn!(
                            "Deadline of {:?} reached with {} task(s) unfinished",
                            deadline,
                            snapshot.values().filter(|t| !t.status.is_terminal()).count()
                        );
                        return Ok((snapshot, SummaryCondition::DeadlineExceeded));
                    }
                    Some(deadline - elapsed)
                }
                None => None,
            };

            if self.config.detect_lost_jobs {
                self.sweep_lost_jobs(&mut snapshot).await?;
                if all_terminal(&snapshot) {
                    return Ok((snapshot, SummaryCondition::AllTerminal));
                }
            }

            let pause = remaining.map_or(options.poll_interval, |r| r.min(options.poll_interval));
            debug!("Waiting {:?} before the next poll", pause);
            tokio::time::sleep(pause).await;
        }
    }

    /// Marks running tasks whose job the scheduler no longer knows as failed
    ///
    /// The outcome of such a job is unknown (crash, eviction, or success
    /// without a report), so it is recorded as `FailureReason::Lost` rather
    /// than a worker failure. Tasks whose status cannot be queried stay
    /// running.
    async fn sweep_lost_jobs(
        &self,
        snapshot: &mut BTreeMap<TaskId, Task>,
    ) -> Result<(), StoreError> {
        let mut checked = HashSet::new();

        for task in snapshot.values_mut() {
            if task.status != TaskStatus::Running {
                continue;
            }
            let Some(handle) = task.scheduler_handle.clone() else {
                continue;
            };
            if !checked.insert(handle.clone()) {
                continue;
            }

            match self.scheduler.is_active(&handle).await {
                Ok(true) => {}
                Ok(false) => {
                    if let Some(updated) = self.mark_lost(&task.task_id, &handle).await? {
                        *task = updated;
                    }
                }
                Err(SchedulerError::Query(msg) | SchedulerError::Submission(msg)) => {
                    warn!(
                        "Cannot tell whether job {} for task {} is active: {}",
                        handle, task.task_id, msg
                    );
                }
            }
        }

        Ok(())
    }

    /// Re-reads the task and fails it only if it is still running the same job
    async fn mark_lost(&self, task_id: &TaskId, handle: &str) -> Result<Option<Task>, StoreError> {
        let Some(mut task) = self.store.get(task_id).await? else {
            return Ok(None);
        };

        // The worker may have reported just before leaving the queue
        if task.status != TaskStatus::Running || task.scheduler_handle.as_deref() != Some(handle) {
            return Ok(Some(task));
        }

        let message = format!(
            "scheduler no longer reports job {handle} and no terminal status was recorded"
        );
        if task
            .mark_failed(FailureReason::Lost, message, Utc::now())
            .is_err()
        {
            return Ok(Some(task));
        }

        match self.store.upsert_if_unchanged(task).await? {
            Some(stored) => {
                warn!("Task {} lost: job {} left the queue without a report", task_id, handle);
                Ok(Some(stored))
            }
            None => self.store.get(task_id).await,
        }
    }
}

fn all_terminal(snapshot: &BTreeMap<TaskId, Task>) -> bool {
    snapshot.values().all(|t| t.status.is_terminal())
}

/// Drops repeated task ids, keeping the first occurrence
fn dedup(specs: &[TaskSpec]) -> Vec<TaskSpec> {
    let mut seen = HashSet::new();
    specs
        .iter()
        .filter(|spec| {
            let fresh = seen.insert(spec.task_id.clone());
            if !fresh {
                warn!("Task {} listed more than once, ignoring repeat", spec.task_id);
            }
            fresh
        })
        .cloned()
        .collect()
}
