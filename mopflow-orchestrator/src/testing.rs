//! In-crate fakes for the external collaborators

use async_trait::async_trait;
use chrono::Utc;
use mopflow_core::domain::task::{Metadata, Task, TaskId};
use mopflow_core::error::{RenderError, SchedulerError};
use mopflow_core::scheduler::{JobScriptProvider, SchedulerClient};
use mopflow_core::store::TaskStore;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn task_id(id: &str) -> TaskId {
    TaskId::new(id).unwrap()
}

pub fn pending(id: &str) -> Task {
    Task::pending(task_id(id), Metadata::new(), Utc::now())
}

/// Renders `job <task_id>`; tasks with a `broken` metadata key fail to render
pub struct EchoProvider;

#[async_trait]
impl JobScriptProvider for EchoProvider {
    async fn render(&self, task: &Task) -> Result<String, RenderError> {
        if task.metadata.contains_key("broken") {
            return Err(RenderError(format!(
                "task {} metadata is incomplete",
                task.task_id
            )));
        }
        Ok(format!("job {}", task.task_id))
    }
}

fn task_of(content: &str) -> String {
    content.trim_start_matches("job ").to_string()
}

/// Scheduler that records submissions and tracks concurrency
#[derive(Default)]
pub struct FakeScheduler {
    counter: AtomicUsize,
    submissions: Mutex<Vec<String>>,
    active: Mutex<HashSet<String>>,
    rejected: Mutex<HashSet<String>>,
    delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    queries_fail: AtomicBool,
    /// Store writes made before `submit` returns
    on_submit: Mutex<Option<(Arc<dyn TaskStore>, SubmitHook)>>,
}

#[derive(Clone, Copy)]
enum SubmitHook {
    /// The job starts and completes, reporting its handle
    Complete,
    /// Something else rewrites the record unchanged
    Touch,
}

impl FakeScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        let scheduler = Self::default();
        *scheduler.delay.lock().unwrap() = delay;
        Arc::new(scheduler)
    }

    pub fn reject(&self, task_id: &str) {
        self.rejected.lock().unwrap().insert(task_id.to_string());
    }

    /// Forgets a job as if it had left the queue
    pub fn finish(&self, handle: &str) {
        self.active.lock().unwrap().remove(handle);
    }

    pub fn fail_queries(&self, fail: bool) {
        self.queries_fail.store(fail, Ordering::SeqCst);
    }

    pub fn complete_instantly(&self, store: Arc<dyn TaskStore>) {
        *self.on_submit.lock().unwrap() = Some((store, SubmitHook::Complete));
    }

    /// Bumps the record's revision while the job is being submitted
    pub fn touch_on_submit(&self, store: Arc<dyn TaskStore>) {
        *self.on_submit.lock().unwrap() = Some((store, SubmitHook::Touch));
    }

    /// Task ids submitted so far, in submission order
    pub fn submissions(&self) -> Vec<String> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SchedulerClient for FakeScheduler {
    async fn submit(&self, content: &str) -> Result<String, SchedulerError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let id = task_of(content);
        if self.rejected.lock().unwrap().contains(&id) {
            return Err(SchedulerError::Submission(format!(
                "qsub: job {id} rejected by server"
            )));
        }

        let handle = format!(
            "{}.gadi-pbs",
            1_000_000 + self.counter.fetch_add(1, Ordering::SeqCst)
        );
        self.submissions.lock().unwrap().push(id.clone());
        self.active.lock().unwrap().insert(handle.clone());

        let hook = self.on_submit.lock().unwrap().clone();
        if let Some((store, hook)) = hook {
            let mut task = store.get(&task_id(&id)).await.unwrap().unwrap();
            if let SubmitHook::Complete = hook {
                task.mark_started(handle.clone(), Utc::now()).unwrap();
                task.mark_completed(Utc::now()).unwrap();
                self.active.lock().unwrap().remove(&handle);
            }
            store.upsert(task).await.unwrap();
        }

        Ok(handle)
    }

    async fn is_active(&self, handle: &str) -> Result<bool, SchedulerError> {
        if self.queries_fail.load(Ordering::SeqCst) {
            return Err(SchedulerError::Query("qstat: cannot connect to server".into()));
        }
        Ok(self.active.lock().unwrap().contains(handle))
    }
}
