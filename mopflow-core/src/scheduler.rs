//! External collaborator traits
//!
//! The orchestrator never builds job content or talks to the batch scheduler
//! itself; it goes through these two seams.

use async_trait::async_trait;

use crate::domain::task::Task;
use crate::error::{RenderError, SchedulerError};

/// Produces the executable job description for a task
#[async_trait]
pub trait JobScriptProvider: Send + Sync {
    /// Renders the job content, failing when the task metadata is incomplete
    async fn render(&self, task: &Task) -> Result<String, RenderError>;
}

/// Client for the external batch scheduler
#[async_trait]
pub trait SchedulerClient: Send + Sync {
    /// Submits job content and returns the scheduler's opaque handle
    ///
    /// Fails with `SchedulerError::Submission` when the job is rejected.
    async fn submit(&self, content: &str) -> Result<String, SchedulerError>;

    /// Reports whether the job is still known and active
    ///
    /// Fails with `SchedulerError::Query` when the scheduler cannot be
    /// reached, which callers must not read as "finished".
    async fn is_active(&self, handle: &str) -> Result<bool, SchedulerError>;
}
