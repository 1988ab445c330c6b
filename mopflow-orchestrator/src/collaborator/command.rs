//! Command-line scheduler client
//!
//! Submits job content on the submit command's stdin (`qsub` and `sbatch`
//! both read a script from stdin) and takes the first token of its stdout as
//! the job handle, e.g. `1234567.gadi-pbs`.
//!
//! Liveness is asked with the status command followed by the handle. Exit
//! status 0 means the scheduler still knows the job. Exit codes listed in
//! `finished_exit_codes` mean it does not (PBS uses 35 for finished jobs and
//! 153 for unknown ids). Anything else is a query failure.

use async_trait::async_trait;
use mopflow_core::error::SchedulerError;
use mopflow_core::scheduler::SchedulerClient;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct CommandSchedulerConfig {
    pub submit_command: Vec<String>,
    pub status_command: Vec<String>,
    pub finished_exit_codes: Vec<i32>,
    /// Bound on any single scheduler command
    pub timeout: Duration,
}

impl Default for CommandSchedulerConfig {
    fn default() -> Self {
        Self {
            submit_command: vec!["qsub".to_string()],
            status_command: vec!["qstat".to_string()],
            finished_exit_codes: vec![35, 153],
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandScheduler {
    config: CommandSchedulerConfig,
}

impl CommandScheduler {
    pub fn new(config: CommandSchedulerConfig) -> Result<Self, SchedulerError> {
        if config.submit_command.is_empty() || config.status_command.is_empty() {
            return Err(SchedulerError::Query(
                "scheduler commands cannot be empty".to_string(),
            ));
        }
        Ok(Self { config })
    }

    async fn execute(
        &self,
        argv: &[String],
        extra_arg: Option<&str>,
        stdin: Option<&str>,
    ) -> Result<Output, String> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| "empty command".to_string())?;

        let mut command = Command::new(program);
        command
            .args(args)
            .args(extra_arg)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| format!("failed to execute '{program}': {e}"))?;

        if let (Some(content), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(content.as_bytes())
                .await
                .map_err(|e| format!("failed to write job to '{program}': {e}"))?;
        }

        match tokio::time::timeout(self.config.timeout, child.wait_with_output()).await {
            Ok(output) => output.map_err(|e| format!("'{program}' failed: {e}")),
            Err(_) => Err(format!(
                "'{program}' did not finish within {:?}",
                self.config.timeout
            )),
        }
    }
}

#[async_trait]
impl SchedulerClient for CommandScheduler {
    async fn submit(&self, content: &str) -> Result<String, SchedulerError> {
        let output = self
            .execute(&self.config.submit_command, None, Some(content))
            .await
            .map_err(SchedulerError::Submission)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SchedulerError::Submission(format!(
                "{} exited with {}: {}",
                self.config.submit_command[0],
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let handle = stdout
            .split_whitespace()
            .next()
            .ok_or_else(|| SchedulerError::Submission("scheduler returned no job id".to_string()))?;

        debug!("Scheduler accepted job {}", handle);
        Ok(handle.to_string())
    }

    async fn is_active(&self, handle: &str) -> Result<bool, SchedulerError> {
        let output = self
            .execute(&self.config.status_command, Some(handle), None)
            .await
            .map_err(SchedulerError::Query)?;

        if output.status.success() {
            return Ok(true);
        }

        match output.status.code() {
            Some(code) if self.config.finished_exit_codes.contains(&code) => Ok(false),
            _ => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!("Status query for job {} failed: {}", handle, stderr.trim());
                Err(SchedulerError::Query(format!(
                    "{} exited with {}: {}",
                    self.config.status_command[0],
                    output.status,
                    stderr.trim()
                )))
            }
        }
    }
}
