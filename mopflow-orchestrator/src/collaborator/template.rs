//! Template job scripts
//!
//! Substitutes `{{ name }}` placeholders in a job script template:
//! - `task_id`: the task identifier
//! - `job_name`: the task id reduced to `[A-Za-z0-9_]`, prefixed with `cmor_`
//! - `db_path`: the task database, so the job can report back
//! - `metadata.<key>`: any task metadata value
//!
//! A placeholder that cannot be resolved is a render error, so an incomplete
//! task never reaches the scheduler.

use async_trait::async_trait;
use mopflow_core::domain::task::{Task, TaskId};
use mopflow_core::error::RenderError;
use mopflow_core::scheduler::JobScriptProvider;
use std::path::{Path, PathBuf};

/// PBS job that reports its own progress through the `mopflow` CLI
///
/// Expects the metadata a batch file produces: PBS resources, the
/// variable (`compound_name`), `experiment_id`, `file_pattern` and the
/// `command`, which receives the variable as its argument.
pub const DEFAULT_TEMPLATE: &str = r#"#!/bin/bash
#PBS -N {{job_name}}
#PBS -q {{metadata.queue}}
#PBS -l ncpus={{metadata.cpus_per_node}}
#PBS -l mem={{metadata.mem}}
#PBS -l walltime={{metadata.walltime}}
{{metadata.pbs_directives}}
set -uo pipefail

{{metadata.worker_init}}

export VARIABLE="{{metadata.compound_name}}"
export EXPERIMENT_ID="{{metadata.experiment_id}}"
export FILE_PATTERN="{{metadata.file_pattern}}"
report() { mopflow --db "{{db_path}}" task "$@"; }

report start "{{task_id}}" --handle "${PBS_JOBID:-unknown}"

if {{metadata.command}} "${VARIABLE}"; then
    report complete "{{task_id}}"
else
    status=$?
    report fail "{{task_id}}" --message "job command exited with status ${status}"
    exit "${status}"
fi
"#;

#[derive(Debug, Clone)]
pub struct TemplateScriptProvider {
    template: String,
    db_path: PathBuf,
}

impl TemplateScriptProvider {
    pub fn new(template: impl Into<String>, db_path: impl Into<PathBuf>) -> Self {
        Self {
            template: template.into(),
            db_path: db_path.into(),
        }
    }

    /// Uses `DEFAULT_TEMPLATE`
    pub fn with_default_template(db_path: impl Into<PathBuf>) -> Self {
        Self::new(DEFAULT_TEMPLATE, db_path)
    }

    pub fn from_file(path: &Path, db_path: impl Into<PathBuf>) -> std::io::Result<Self> {
        Ok(Self::new(std::fs::read_to_string(path)?, db_path))
    }

    fn resolve(&self, task: &Task, key: &str) -> Result<String, RenderError> {
        match key {
            "task_id" => Ok(task.task_id.to_string()),
            "job_name" => Ok(job_name(&task.task_id)),
            "db_path" => Ok(self.db_path.display().to_string()),
            _ => {
                let Some(field) = key.strip_prefix("metadata.") else {
                    return Err(RenderError(format!("unknown placeholder '{key}'")));
                };
                match task.metadata.get(field) {
                    Some(serde_json::Value::String(s)) => Ok(s.clone()),
                    Some(serde_json::Value::Null) | None => Err(RenderError(format!(
                        "task {} metadata is missing '{field}'",
                        task.task_id
                    ))),
                    Some(other) => Ok(other.to_string()),
                }
            }
        }
    }
}

#[async_trait]
impl JobScriptProvider for TemplateScriptProvider {
    async fn render(&self, task: &Task) -> Result<String, RenderError> {
        let mut out = String::with_capacity(self.template.len());
        let mut rest = self.template.as_str();

        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after
                .find("}}")
                .ok_or_else(|| RenderError("unterminated '{{' in template".to_string()))?;
            out.push_str(&self.resolve(task, after[..end].trim())?);
            rest = &after[end + 2..];
        }
        out.push_str(rest);

        Ok(out)
    }
}

/// Scheduler-friendly job name for a task
pub fn job_name(task_id: &TaskId) -> String {
    let sanitized: String = task_id
        .as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("cmor_{sanitized}")
}
