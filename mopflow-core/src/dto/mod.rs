//! Data Transfer Objects
//!
//! Inputs and query shapes exchanged between the controller, the CLI and
//! the status API.

pub mod task;
