//! Error types shared across Mopflow components
//!
//! Per-task errors (`RenderError`, `SchedulerError`, `SubmitError`) are
//! absorbed by the controller and turned into task state. Store errors are
//! fatal to the operation that hit them and always reach the caller.

use thiserror::Error;

use crate::domain::task::TaskStatus;

/// Errors raised by a task store
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing storage could not be reached or did not answer in time
    #[error("Task store unavailable: {0}")]
    Unavailable(String),

    /// No record exists for the task
    #[error("Task not found: {0}")]
    NotFound(String),

    /// A record violates the task invariants and was not written
    #[error("Invalid task record: {0}")]
    InvalidRecord(String),
}

impl StoreError {
    /// Check if this error means the store itself is unusable
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// A task id that cannot be used as a store key
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid task id '{id}': {reason}")]
pub struct TaskIdError {
    pub id: String,
    pub reason: &'static str,
}

/// Rejected state machine transition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid transition for task {task_id}: {from} -> {to}")]
pub struct TransitionError {
    pub task_id: String,
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// Job content could not be produced for a task
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Failed to render job script: {0}")]
pub struct RenderError(pub String);

/// Errors raised by a scheduler client
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// The scheduler rejected or could not accept the job
    #[error("Job submission rejected: {0}")]
    Submission(String),

    /// The scheduler could not be asked about a job
    #[error("Scheduler query failed: {0}")]
    Query(String),
}

/// Errors returned by a single submission attempt
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SubmitError {
    /// Store failures cannot be recorded as task state and must stop the pass
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

/// Errors returned when a worker reports its own progress
#[derive(Debug, Error)]
pub enum SignalError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// The record kept changing under the signal
    #[error("Task {0} kept changing while the signal was applied")]
    Contended(String),
}

/// Errors surfaced by an orchestration run
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    InvalidTaskId(#[from] TaskIdError),
}
