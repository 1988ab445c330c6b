//! Bundled collaborators
//!
//! Default implementations of the two external seams: a placeholder
//! template for job content, and a scheduler client that shells out to the
//! site's batch commands (PBS `qsub`/`qstat` unless configured otherwise).

pub mod command;
pub mod template;

pub use command::{CommandScheduler, CommandSchedulerConfig};
pub use template::TemplateScriptProvider;
