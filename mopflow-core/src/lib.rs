//! Mopflow Core
//!
//! Core types and abstractions for the Mopflow batch orchestrator.
//!
//! This crate contains:
//! - Domain types: Task records, status state machine, run summaries
//! - DTOs: Inputs and query filters shared between the controller, the CLI
//!   and the status API
//! - Error taxonomy shared by every component
//! - The storage and collaborator traits the orchestrator is built against

pub mod domain;
pub mod dto;
pub mod error;
pub mod scheduler;
pub mod store;
