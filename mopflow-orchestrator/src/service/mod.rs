//! Service Module
//!
//! Orchestration logic on top of the task store.
//! `reconciler` drives a desired task set, `submitter` hands single tasks to
//! the scheduler, `signal` applies worker reports and `status` serves reads.

pub mod reconciler;
pub mod signal;
pub mod status;
pub mod submitter;

pub use reconciler::{Controller, RunOptions};
pub use signal::WorkerSignals;
pub use status::StatusReader;
pub use submitter::{SubmitOutcome, Submitter};
