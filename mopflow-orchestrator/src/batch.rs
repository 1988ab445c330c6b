//! Batch file
//!
//! A batch file describes one workload: the experiment, the variables to
//! produce, the metadata each job needs, and how to reach the scheduler.
//!
//! ```toml
//! experiment_id = "historical"
//! source_id = "ACCESS-ESM1-5"
//! variant_label = "r1i1p1f1"
//! grid_label = "gn"
//! input_folder = "/g/data/p73/archive/CMIP6/ACCESS-ESM1-5/HI-05"
//! output_folder = "/scratch/cmor"
//! command = "mopper-cmorise-one"
//! variables = ["Amon.tas", "Amon.pr"]
//! queue = "normal"
//! walltime = "02:00:00"
//! scheduler_options = "#PBS -P p73"
//! storage = "gdata/p73+scratch/p73"
//!
//! [file_patterns]
//! "Amon.tas" = "/history/atm/netCDF/*mon.nc"
//!
//! [scheduler]
//! template = "cmor_job.sh.tmpl"
//! submit_command = ["qsub"]
//! concurrency = 8
//! wait = true
//! deadline_secs = 86400
//! ```

use mopflow_core::domain::task::{Metadata, TaskId};
use mopflow_core::dto::task::TaskSpec;
use mopflow_core::error::OrchestratorError;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::collaborator::command::CommandSchedulerConfig;
use crate::config::OrchestratorConfig;

pub const DEFAULT_QUEUE: &str = "normal";
pub const DEFAULT_CPUS_PER_NODE: u32 = 4;
pub const DEFAULT_MEM: &str = "16GB";
pub const DEFAULT_WALLTIME: &str = "01:00:00";
pub const DEFAULT_SCHEDULER_OPTIONS: &str = "#PBS -P your_project";
pub const DEFAULT_WORKER_INIT: &str = "module load netcdf-python";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchConfig {
    pub experiment_id: Option<String>,
    pub source_id: Option<String>,
    pub variant_label: Option<String>,
    pub grid_label: Option<String>,
    pub activity_id: Option<String>,
    pub input_folder: Option<String>,
    pub output_folder: Option<String>,
    pub drs_root: Option<String>,
    /// Command a job runs for its variable; exposed to templates as
    /// `{{metadata.command}}`
    pub command: Option<String>,
    pub variables: Vec<String>,
    /// PBS resources; unset fields fall back to the `DEFAULT_*` values
    pub queue: Option<String>,
    pub cpus_per_node: Option<u32>,
    pub mem: Option<String>,
    pub walltime: Option<String>,
    /// Value of `-l storage=`, omitted when unset
    pub storage: Option<String>,
    /// Extra directive lines placed after the resource requests
    pub scheduler_options: Option<String>,
    /// Shell lines run before the job command, e.g. module loads
    pub worker_init: Option<String>,
    #[serde(default)]
    pub file_patterns: BTreeMap<String, String>,
    /// Extra attributes copied into every task's metadata
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub scheduler: SchedulerSection,
}

/// `[scheduler]` table
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerSection {
    pub template: Option<PathBuf>,
    pub submit_command: Option<Vec<String>>,
    pub status_command: Option<Vec<String>>,
    pub finished_exit_codes: Option<Vec<i32>>,
    pub command_timeout_secs: Option<u64>,
    pub database: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub wait: Option<bool>,
    pub poll_interval_secs: Option<u64>,
    pub deadline_secs: Option<u64>,
}

impl BatchConfig {
    pub fn load(path: &Path) -> Result<Self, OrchestratorError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = Self::parse(&text)?;
        tracing::debug!(
            "Loaded batch file {} with {} variable(s)",
            path.display(),
            config.variables.len()
        );
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, OrchestratorError> {
        let config: Self = toml::from_str(text)
            .map_err(|e| OrchestratorError::InvalidConfig(format!("invalid batch file: {e}")))?;

        if config.variables.is_empty() {
            return Err(OrchestratorError::InvalidConfig(
                "batch file lists no variables".to_string(),
            ));
        }

        Ok(config)
    }

    /// One task per variable, scoped by the experiment id
    ///
    /// Every spec carries `compound_name`, `experiment_id` and `file_pattern`
    /// (empty when unset) so a job script can tell which variable it runs.
    pub fn task_specs(&self) -> Result<Vec<TaskSpec>, OrchestratorError> {
        let shared = self.shared_metadata();

        self.variables
            .iter()
            .map(|variable| -> Result<TaskSpec, OrchestratorError> {
                let task_id = TaskId::scoped(self.experiment_id.as_deref(), variable)?;
                let mut metadata = shared.clone();
                metadata.insert("compound_name".into(), variable.clone().into());
                let pattern = self.file_patterns.get(variable).cloned().unwrap_or_default();
                metadata.insert("file_pattern".into(), pattern.into());
                Ok(TaskSpec { task_id, metadata })
            })
            .collect()
    }

    fn shared_metadata(&self) -> Metadata {
        let mut metadata = self.metadata.clone();

        let fields = [
            ("experiment_id", &self.experiment_id),
            ("source_id", &self.source_id),
            ("variant_label", &self.variant_label),
            ("grid_label", &self.grid_label),
            ("activity_id", &self.activity_id),
            ("input_folder", &self.input_folder),
            ("output_folder", &self.output_folder),
            ("drs_root", &self.drs_root),
            ("command", &self.command),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                metadata.insert(key.to_string(), value.clone().into());
            }
        }
        metadata
            .entry("experiment_id".to_string())
            .or_insert_with(|| "".into());

        let queue = self.queue.as_deref().unwrap_or(DEFAULT_QUEUE);
        let cpus = self.cpus_per_node.unwrap_or(DEFAULT_CPUS_PER_NODE);
        let mem = self.mem.as_deref().unwrap_or(DEFAULT_MEM);
        let walltime = self.walltime.as_deref().unwrap_or(DEFAULT_WALLTIME);
        let worker_init = self.worker_init.as_deref().unwrap_or(DEFAULT_WORKER_INIT);

        let resources: [(&str, Value); 6] = [
            ("queue", queue.into()),
            ("cpus_per_node", cpus.into()),
            ("mem", mem.into()),
            ("walltime", walltime.into()),
            ("pbs_directives", self.pbs_directives().into()),
            ("worker_init", worker_init.into()),
        ];
        for (key, value) in resources {
            metadata.insert(key.to_string(), value);
        }

        metadata
    }

    /// Directive lines beyond queue, cpus, memory and walltime
    fn pbs_directives(&self) -> String {
        let mut lines = vec![
            self.scheduler_options
                .as_deref()
                .unwrap_or(DEFAULT_SCHEDULER_OPTIONS)
                .trim()
                .to_string(),
        ];
        if let Some(storage) = &self.storage {
            lines.push(format!("#PBS -l storage={storage}"));
        }
        lines.retain(|line| !line.is_empty());
        lines.join("\n")
    }

    /// Applies the `[scheduler]` settings over an orchestrator configuration
    pub fn apply_to(&self, config: &mut OrchestratorConfig) {
        let section = &self.scheduler;

        if let Some(path) = &section.database {
            config.database_path = path.clone();
        }
        if let Some(concurrency) = section.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(wait) = section.wait {
            config.wait = wait;
        }
        if let Some(secs) = section.poll_interval_secs {
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = section.deadline_secs {
            config.deadline = Some(Duration::from_secs(secs));
        }
    }

    /// Scheduler command settings, falling back to PBS defaults
    pub fn scheduler_config(&self) -> CommandSchedulerConfig {
        let section = &self.scheduler;
        let mut config = CommandSchedulerConfig::default();

        if let Some(cmd) = &section.submit_command {
            config.submit_command = cmd.clone();
        }
        if let Some(cmd) = &section.status_command {
            config.status_command = cmd.clone();
        }
        if let Some(codes) = &section.finished_exit_codes {
            config.finished_exit_codes = codes.clone();
        }
        if let Some(secs) = section.command_timeout_secs {
            config.timeout = Duration::from_secs(secs);
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::TemplateScriptProvider;
    use chrono::Utc;
    use mopflow_core::domain::task::Task;
    use mopflow_core::scheduler::JobScriptProvider;

    const BATCH: &str = r#"
        experiment_id = "historical"
        source_id = "ACCESS-ESM1-5"
        variant_label = "r1i1p1f1"
        grid_label = "gn"
        command = "mopper-cmorise-one"
        variables = ["Amon.tas", "Amon.pr", "Omon.tos"]

        [file_patterns]
        "Amon.pr" = "/history/atm/netCDF/*mon.nc"

        [metadata]
        calendar = "proleptic_gregorian"

        [scheduler]
        submit_command = ["sbatch", "--parsable"]
        concurrency = 2
        wait = true
        deadline_secs = 600
    "#;

    #[test]
    fn test_task_specs_are_scoped_and_carry_metadata() {
        let batch = BatchConfig::parse(BATCH).unwrap();
        let specs = batch.task_specs().unwrap();

        let ids: Vec<&str> = specs.iter().map(|s| s.task_id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["historical:Amon.tas", "historical:Amon.pr", "historical:Omon.tos"]
        );

        let pr = &specs[1];
        assert_eq!(pr.metadata["compound_name"], "Amon.pr");
        assert_eq!(pr.metadata["file_pattern"], "/history/atm/netCDF/*mon.nc");
        assert_eq!(pr.metadata["source_id"], "ACCESS-ESM1-5");
        assert_eq!(pr.metadata["calendar"], "proleptic_gregorian");
        assert_eq!(specs[0].metadata["file_pattern"], "");
    }

    #[test]
    fn test_pbs_resources_default_and_override() {
        let specs = BatchConfig::parse(BATCH).unwrap().task_specs().unwrap();
        let metadata = &specs[0].metadata;
        assert_eq!(metadata["queue"], "normal");
        assert_eq!(metadata["cpus_per_node"], 4);
        assert_eq!(metadata["mem"], "16GB");
        assert_eq!(metadata["walltime"], "01:00:00");
        assert_eq!(metadata["pbs_directives"], "#PBS -P your_project");
        assert_eq!(metadata["worker_init"], "module load netcdf-python");

        let batch = BatchConfig::parse(
            r##"
            variables = ["Amon.tas"]
            queue = "express"
            cpus_per_node = 8
            mem = "32GB"
            walltime = "04:00:00"
            storage = "gdata/p73+scratch/p73"
            scheduler_options = "#PBS -P p73"
            worker_init = "module load conda/analysis3"
            "##,
        )
        .unwrap();
        let specs = batch.task_specs().unwrap();
        let metadata = &specs[0].metadata;
        assert_eq!(metadata["queue"], "express");
        assert_eq!(metadata["cpus_per_node"], 8);
        assert_eq!(
            metadata["pbs_directives"],
            "#PBS -P p73\n#PBS -l storage=gdata/p73+scratch/p73"
        );
        assert_eq!(metadata["worker_init"], "module load conda/analysis3");
        assert_eq!(metadata["experiment_id"], "");
    }

    #[tokio::test]
    async fn test_each_variable_renders_its_own_job() {
        let batch = BatchConfig::parse(BATCH).unwrap();
        let provider = TemplateScriptProvider::with_default_template("/scratch/tasks.db");

        let mut scripts = Vec::new();
        for spec in batch.task_specs().unwrap() {
            let task = Task::pending(spec.task_id, spec.metadata, Utc::now());
            scripts.push(provider.render(&task).await.unwrap());
        }

        assert_ne!(scripts[0], scripts[1]);
        assert!(scripts[0].contains("export VARIABLE=\"Amon.tas\""));
        assert!(scripts[1].contains("export VARIABLE=\"Amon.pr\""));
        assert!(scripts[1].contains("export FILE_PATTERN=\"/history/atm/netCDF/*mon.nc\""));
        assert!(scripts[0].contains("export EXPERIMENT_ID=\"historical\""));
        assert!(scripts[0].contains("if mopper-cmorise-one \"${VARIABLE}\"; then"));
        assert!(scripts[0].contains("#PBS -q normal"));
        assert!(scripts[0].contains("#PBS -l ncpus=4"));
        assert!(scripts[0].contains("#PBS -l mem=16GB"));
        assert!(scripts[0].contains("#PBS -l walltime=01:00:00"));
        assert!(scripts[0].contains("#PBS -P your_project"));
        assert!(scripts[0].contains("module load netcdf-python"));
    }

    #[test]
    fn test_task_ids_are_reproducible() {
        let first = BatchConfig::parse(BATCH).unwrap().task_specs().unwrap();
        let second = BatchConfig::parse(BATCH).unwrap().task_specs().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_scheduler_section_overrides() {
        let batch = BatchConfig::parse(BATCH).unwrap();
        let mut config = OrchestratorConfig::default();
        batch.apply_to(&mut config);

        assert_eq!(config.concurrency, 2);
        assert!(config.wait);
        assert_eq!(config.deadline, Some(Duration::from_secs(600)));

        let scheduler = batch.scheduler_config();
        assert_eq!(scheduler.submit_command, vec!["sbatch", "--parsable"]);
        assert_eq!(scheduler.status_command, vec!["qstat"]);
    }

    #[test]
    fn test_rejects_empty_or_unknown() {
        assert!(BatchConfig::parse("variables = []").is_err());
        assert!(BatchConfig::parse("variables = [\"Amon.tas\"]\nbogus = 1").is_err());
        assert!(
            BatchConfig::parse("variables = [\"Amon tas\"]").unwrap()
                .task_specs()
                .is_err()
        );
    }
}
