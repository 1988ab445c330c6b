//! Mopflow orchestrator
//!
//! Store implementations, collaborators and the reconciliation services,
//! shared by the `mopflow-orchestrator` daemon and the `mopflow` CLI.

pub mod api;
pub mod batch;
pub mod collaborator;
pub mod config;
pub mod db;
pub mod repository;
pub mod service;

#[cfg(test)]
mod testing;
