//! Core domain types
//!
//! This module contains the task record and its lifecycle, shared between the
//! controller (which submits), the workers (which report their own outcome)
//! and read-only consumers such as dashboards.

pub mod summary;
pub mod task;
