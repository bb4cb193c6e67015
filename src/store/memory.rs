/// In-process record store
use crate::config::types::{ExecutionRecord, Result, SandboxError};
use crate::store::{check_update, ExecutionStore};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, ExecutionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every record, in no particular order
    pub fn records(&self) -> Vec<ExecutionRecord> {
        self.records
            .read()
            .map(|r| r.values().cloned().collect())
            .unwrap_or_default()
    }
}

fn poisoned<T>(_: T) -> SandboxError {
    SandboxError::Store("record map lock poisoned".to_string())
}

impl ExecutionStore for MemoryStore {
    fn create(&self, record: &ExecutionRecord) -> Result<()> {
        let mut records = self.records.write().map_err(poisoned)?;
        if records.contains_key(&record.id) {
            return Err(SandboxError::Store(format!(
                "record {} already exists",
                record.id
            )));
        }
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn update(&self, record: &ExecutionRecord) -> Result<()> {
        let mut records = self.records.write().map_err(poisoned)?;
        let current = records
            .get_mut(&record.id)
            .ok_or_else(|| SandboxError::Store(format!("unknown record {}", record.id)))?;
        check_update(current, record)?;
        *current = record.clone();
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<ExecutionRecord>> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{ExecutionRequest, ExecutionStatus};

    fn record(id: &str) -> ExecutionRecord {
        ExecutionRecord::pending(id.to_string(), &ExecutionRequest::default())
    }

    #[test]
    fn test_create_get_update() {
        let store = MemoryStore::new();
        let mut rec = record("a");
        store.create(&rec).unwrap();
        assert!(store.create(&rec).is_err());

        rec.status = ExecutionStatus::Running;
        store.update(&rec).unwrap();
        assert_eq!(store.get("a").unwrap().unwrap().status, ExecutionStatus::Running);
        assert!(store.get("missing").unwrap().is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_rejects_backward_and_terminal_changes() {
        let store = MemoryStore::new();
        let mut rec = record("b");
        store.create(&rec).unwrap();

        rec.status = ExecutionStatus::Completed;
        assert!(store.update(&rec).is_err(), "pending -> completed skips running");

        rec.status = ExecutionStatus::Failed;
        rec.failure_reason = Some("validation".to_string());
        store.update(&rec).unwrap();

        rec.status = ExecutionStatus::Running;
        assert!(store.update(&rec).is_err());
        rec.status = ExecutionStatus::Failed;
        rec.failure_reason = Some("rewritten".to_string());
        assert!(store.update(&rec).is_err());
        assert_eq!(
            store.get("b").unwrap().unwrap().failure_reason.as_deref(),
            Some("validation")
        );
    }

    #[test]
    fn test_update_unknown_id() {
        let store = MemoryStore::new();
        assert!(store.update(&record("ghost")).is_err());
    }
}
