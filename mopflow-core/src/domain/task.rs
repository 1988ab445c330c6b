//! Task domain types
//!
//! A task is one independently schedulable unit of work, tracked from the
//! moment the controller first sees its id until an operator resets it.
//! Records are never deleted automatically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{TaskIdError, TransitionError};

/// Free-form attributes describing a task (experiment id, source id, ...)
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Separator between the experiment scope and the compound name
pub const SCOPE_SEPARATOR: char = ':';

/// Stable task identifier
///
/// Derived from the task's logical parameters so that re-running the same
/// workload produces the same ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskId(String);

impl TaskId {
    /// Creates a task id after validating it
    pub fn new(id: impl Into<String>) -> Result<Self, TaskIdError> {
        let id = id.into();
        validate_id(&id)?;
        Ok(Self(id))
    }

    /// Derives the id of a compound name (e.g. `Amon.tas`) within an experiment
    ///
    /// `scoped(Some("historical"), "Amon.tas")` gives `historical:Amon.tas`.
    pub fn scoped(experiment_id: Option<&str>, compound_name: &str) -> Result<Self, TaskIdError> {
        match experiment_id {
            Some(exp) if !exp.is_empty() => {
                if exp.contains(SCOPE_SEPARATOR) {
                    return Err(TaskIdError {
                        id: exp.to_string(),
                        reason: "experiment id must not contain ':'",
                    });
                }
                Self::new(format!("{exp}{SCOPE_SEPARATOR}{compound_name}"))
            }
            _ => Self::new(compound_name),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn validate_id(id: &str) -> Result<(), TaskIdError> {
    let reason = if id.is_empty() {
        "must not be empty"
    } else if id.len() > 255 {
        "must be at most 255 characters"
    } else if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        "must not contain whitespace"
    } else if id.contains('/') {
        "must not contain '/'"
    } else {
        return Ok(());
    };

    Err(TaskIdError {
        id: id.to_string(),
        reason,
    })
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TaskId {
    type Err = TaskIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for TaskId {
    type Error = TaskIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TaskId> for String {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    /// Completed and failed tasks see no further automatic transition
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Statuses the controller (re)submits
    pub fn needs_submission(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(format!("unknown task status '{other}'")),
        }
    }
}

/// Why a task ended up failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Job content could not be produced
    Render,
    /// The scheduler rejected the job
    Submission,
    /// The worker reported its own failure
    Worker,
    /// The scheduler no longer knows the job and no terminal status was
    /// ever recorded; the real outcome is unknown
    Lost,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::Render => "render",
            FailureReason::Submission => "submission",
            FailureReason::Worker => "worker",
            FailureReason::Lost => "lost",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "render" => Ok(FailureReason::Render),
            "submission" => Ok(FailureReason::Submission),
            "worker" => Ok(FailureReason::Worker),
            "lost" => Ok(FailureReason::Lost),
            other => Err(format!("unknown failure reason '{other}'")),
        }
    }
}

/// Task status record
///
/// The store owns the authoritative copy. Any other copy is a snapshot that
/// may be stale as soon as it is read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub scheduler_handle: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub failure_reason: Option<FailureReason>,
    pub metadata: Metadata,
    /// Submission attempts made by the controller
    pub attempts: u32,
    /// Write counter maintained by the store, 0 until first written
    pub revision: u64,
}

impl Task {
    /// Creates a fresh pending record
    pub fn pending(task_id: TaskId, metadata: Metadata, now: DateTime<Utc>) -> Self {
        Self {
            task_id,
            status: TaskStatus::Pending,
            scheduler_handle: None,
            created_at: now,
            started_at: None,
            ended_at: None,
            error_message: None,
            failure_reason: None,
            metadata,
            attempts: 0,
            revision: 0,
        }
    }

    /// Records a successful hand-off to the scheduler
    pub fn mark_submitted(
        &mut self,
        handle: String,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.require(TaskStatus::Running, self.status.needs_submission())?;

        self.status = TaskStatus::Running;
        self.scheduler_handle = Some(handle);
        self.started_at = Some(now);
        self.ended_at = None;
        self.error_message = None;
        self.failure_reason = None;
        self.attempts += 1;
        Ok(())
    }

    /// Records a submission attempt that never reached the scheduler
    pub fn mark_submit_failed(
        &mut self,
        reason: FailureReason,
        message: String,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.require(TaskStatus::Failed, self.status.needs_submission())?;

        self.status = TaskStatus::Failed;
        self.scheduler_handle = None;
        self.started_at = Some(now);
        self.ended_at = Some(now);
        self.error_message = Some(message);
        self.failure_reason = Some(reason);
        self.attempts += 1;
        Ok(())
    }

    /// Worker start signal
    ///
    /// Accepted from pending or failed as well as running: the scheduler may
    /// start the job before the controller has recorded the hand-off.
    pub fn mark_started(
        &mut self,
        handle: String,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.require(TaskStatus::Running, self.status != TaskStatus::Completed)?;

        if self.status != TaskStatus::Running {
            self.started_at = Some(now);
        }
        self.status = TaskStatus::Running;
        self.scheduler_handle = Some(handle);
        self.ended_at = None;
        self.error_message = None;
        self.failure_reason = None;
        Ok(())
    }

    /// Worker completion signal
    pub fn mark_completed(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.require(TaskStatus::Completed, self.status != TaskStatus::Completed)?;

        self.status = TaskStatus::Completed;
        self.started_at.get_or_insert(now);
        self.ended_at = Some(now);
        self.error_message = None;
        self.failure_reason = None;
        Ok(())
    }

    /// Worker failure signal, or a lost job detected by the controller
    pub fn mark_failed(
        &mut self,
        reason: FailureReason,
        message: String,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        let allowed = match reason {
            FailureReason::Lost => self.status == TaskStatus::Running,
            _ => self.status != TaskStatus::Completed,
        };
        self.require(TaskStatus::Failed, allowed)?;

        self.status = TaskStatus::Failed;
        self.started_at.get_or_insert(now);
        self.ended_at = Some(now);
        self.error_message = Some(message);
        self.failure_reason = Some(reason);
        Ok(())
    }

    /// Operator reset back to pending
    ///
    /// Metadata, attempts and creation time survive a reset.
    pub fn reset(&mut self) {
        self.status = TaskStatus::Pending;
        self.scheduler_handle = None;
        self.started_at = None;
        self.ended_at = None;
        self.error_message = None;
        self.failure_reason = None;
    }

    /// Time spent since the task started, up to its end when terminal
    pub fn elapsed(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        let started = self.started_at?;
        Some(self.ended_at.unwrap_or(now) - started)
    }

    /// Checks the record invariants
    pub fn validate(&self) -> Result<(), String> {
        let started = self.started_at.is_some();
        let ended = self.ended_at.is_some();
        let failed = self.status == TaskStatus::Failed;

        match self.status {
            TaskStatus::Pending if started || ended => {
                return Err(format!("pending task {} has timestamps", self.task_id));
            }
            TaskStatus::Running if self.scheduler_handle.is_none() => {
                return Err(format!("running task {} has no scheduler handle", self.task_id));
            }
            TaskStatus::Running if !started || ended => {
                return Err(format!(
                    "running task {} must have started_at and no ended_at",
                    self.task_id
                ));
            }
            TaskStatus::Completed | TaskStatus::Failed if !started || !ended => {
                return Err(format!(
                    "{} task {} must have started_at and ended_at",
                    self.status, self.task_id
                ));
            }
            _ => {}
        }

        if self.error_message.is_some() != failed || self.failure_reason.is_some() != failed {
            return Err(format!(
                "task {} must carry an error and failure reason only when failed",
                self.task_id
            ));
        }

        Ok(())
    }

    fn require(&self, to: TaskStatus, allowed: bool) -> Result<(), TransitionError> {
        if allowed {
            Ok(())
        } else {
            Err(TransitionError {
                task_id: self.task_id.to_string(),
                from: self.status,
                to,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str) -> Task {
        Task::pending(TaskId::new(id).unwrap(), Metadata::new(), Utc::now())
    }

    #[test]
    fn test_scoped_task_id() {
        let id = TaskId::scoped(Some("historical"), "Amon.tas").unwrap();
        assert_eq!(id.as_str(), "historical:Amon.tas");

        let id = TaskId::scoped(None, "Omon.tos").unwrap();
        assert_eq!(id.as_str(), "Omon.tos");

        assert!(TaskId::scoped(Some("a:b"), "Amon.tas").is_err());
        assert!(TaskId::new("").is_err());
        assert!(TaskId::new("Amon tas").is_err());
    }

    #[test]
    fn test_task_id_serde_validates() {
        let id: TaskId = serde_json::from_str("\"Amon.pr\"").unwrap();
        assert_eq!(id.as_str(), "Amon.pr");
        assert!(serde_json::from_str::<TaskId>("\"\"").is_err());
    }

    #[test]
    fn test_status_parsing() {
        for status in TaskStatus::ALL {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("queued".parse::<TaskStatus>().is_err());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn test_submission_lifecycle() {
        let mut t = task("Amon.tas");
        assert!(t.validate().is_ok());

        t.mark_submitted("1234567.gadi-pbs".into(), Utc::now()).unwrap();
        assert_eq!(t.status, TaskStatus::Running);
        assert_eq!(t.attempts, 1);
        assert!(t.validate().is_ok());

        t.mark_completed(Utc::now()).unwrap();
        assert_eq!(t.status, TaskStatus::Completed);
        assert!(t.started_at.is_some());
        assert!(t.validate().is_ok());

        // Completed only leaves through reset
        assert!(t.mark_submitted("other".into(), Utc::now()).is_err());
        assert!(t.mark_completed(Utc::now()).is_err());
        assert!(
            t.mark_failed(FailureReason::Worker, "boom".into(), Utc::now())
                .is_err()
        );
    }

    #[test]
    fn test_running_is_not_resubmitted() {
        let mut t = task("Amon.tas");
        t.mark_submitted("1".into(), Utc::now()).unwrap();
        let err = t.mark_submitted("2".into(), Utc::now()).unwrap_err();
        assert_eq!(err.from, TaskStatus::Running);
        assert_eq!(t.scheduler_handle.as_deref(), Some("1"));
    }

    #[test]
    fn test_submit_failure_records_error() {
        let mut t = task("Amon.tas");
        t.mark_submit_failed(FailureReason::Submission, "rejected".into(), Utc::now()).unwrap();
        assert_eq!(t.status, TaskStatus::Failed);
        assert_eq!(t.failure_reason, Some(FailureReason::Submission));
        assert!(t.validate().is_ok());

        // Failed tasks may be submitted again
        t.mark_submitted("99".into(), Utc::now()).unwrap();
        assert_eq!(t.attempts, 2);
        assert!(t.error_message.is_none());
        assert!(t.validate().is_ok());
    }

    #[test]
    fn test_worker_completion_before_submission_recorded() {
        let mut t = task("Amon.tas");
        t.mark_completed(Utc::now()).unwrap();
        assert!(t.started_at.is_some());
        assert!(t.validate().is_ok());
    }

    #[test]
    fn test_lost_only_from_running() {
        let mut t = task("Amon.tas");
        assert!(
            t.mark_failed(FailureReason::Lost, "gone".into(), Utc::now())
                .is_err()
        );
        t.mark_submitted("1".into(), Utc::now()).unwrap();
        t.mark_failed(FailureReason::Lost, "gone".into(), Utc::now()).unwrap();
        assert_eq!(t.failure_reason, Some(FailureReason::Lost));
        assert_eq!(t.scheduler_handle.as_deref(), Some("1"));
    }

    #[test]
    fn test_reset_clears_run_state() {
        let mut t = task("Amon.tas");
        t.metadata.insert("source_id".into(), "ACCESS-ESM1-5".into());
        t.mark_submitted("1".into(), Utc::now()).unwrap();
        t.mark_failed(FailureReason::Worker, "oops".into(), Utc::now()).unwrap();

        t.reset();
        assert_eq!(t.status, TaskStatus::Pending);
        assert!(t.scheduler_handle.is_none());
        assert!(t.started_at.is_none());
        assert!(t.ended_at.is_none());
        assert!(t.error_message.is_none());
        assert!(t.failure_reason.is_none());
        assert_eq!(t.metadata.len(), 1);
        assert!(t.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_broken_records() {
        let mut t = task("Amon.tas");
        t.status = TaskStatus::Running;
        t.started_at = Some(Utc::now());
        assert!(t.validate().is_err());

        let mut t = task("Amon.tas");
        t.status = TaskStatus::Completed;
        t.ended_at = Some(Utc::now());
        assert!(t.validate().is_err());

        let mut t = task("Amon.tas");
        t.error_message = Some("stale".into());
        assert!(t.validate().is_err());
    }
}
