//! Repository Module
//!
//! Task store implementations.
//! `task` persists to SQLite and is what every process shares; `memory` keeps
//! records in process for embedding and tests.

pub mod memory;
pub mod task;

pub use memory::InMemoryTaskStore;
pub use task::SqliteTaskStore;
