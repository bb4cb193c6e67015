//! Execution record stores
//!
//! The coordinator receives a store explicitly; nothing here is global.
//! Records are keyed by execution id and only ever move forward through
//! their state machine.

pub mod file;
pub mod memory;

use crate::config::types::{ExecutionRecord, Result, SandboxError};

pub use file::FileStore;
pub use memory::MemoryStore;

/// Durable read/write contract for execution records
pub trait ExecutionStore: Send + Sync {
    /// Insert a new record; fails if the id already exists
    fn create(&self, record: &ExecutionRecord) -> Result<()>;

    /// Replace an existing record, rejecting backward transitions and any
    /// change to a terminal record
    fn update(&self, record: &ExecutionRecord) -> Result<()>;

    fn get(&self, id: &str) -> Result<Option<ExecutionRecord>>;
}

/// Shared transition check for `update` implementations
pub(crate) fn check_update(current: &ExecutionRecord, next: &ExecutionRecord) -> Result<()> {
    if current.status.is_terminal() {
        return Err(SandboxError::Store(format!(
            "record {} is already {}",
            current.id, current.status
        )));
    }
    if current.status != next.status && !current.status.can_transition_to(next.status) {
        return Err(SandboxError::Store(format!(
            "record {}: illegal transition {} -> {}",
            current.id, current.status, next.status
        )));
    }
    Ok(())
}
