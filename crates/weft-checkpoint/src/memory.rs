use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use weft_core::error::{CheckpointError, Result};

use crate::store::CheckpointStore;
use crate::types::{Checkpoint, Snapshot};

/// In-memory checkpoint store for testing and short-lived workflows.
///
/// Thread-safe via `RwLock`. All data is lost when the store is dropped.
pub struct MemoryCheckpointStore {
    /// Map: thread_id → Vec<Checkpoint> (index == step)
    data: RwLock<HashMap<String, Vec<Checkpoint>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Vec<Checkpoint>>>> {
        self.data
            .read()
            .map_err(|_| CheckpointError::StoreUnavailable("lock poisoned".into()).into())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Vec<Checkpoint>>>> {
        self.data
            .write()
            .map_err(|_| CheckpointError::StoreUnavailable("lock poisoned".into()).into())
    }
}

impl Default for MemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn append(&self, thread_id: &str, snapshot: Snapshot) -> Result<usize> {
        let mut data = self.write()?;
        let thread = data.entry(thread_id.to_owned()).or_default();
        let step = thread.len();
        thread.push(Checkpoint::from_snapshot(thread_id, step, snapshot));
        Ok(step)
    }

    async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let data = self.read()?;
        Ok(data.get(thread_id).and_then(|thread| thread.last().cloned()))
    }

    async fn get(&self, thread_id: &str, step: usize) -> Result<Option<Checkpoint>> {
        let data = self.read()?;
        Ok(data
            .get(thread_id)
            .and_then(|thread| thread.get(step).cloned()))
    }

    async fn list(&self, thread_id: &str) -> Result<Vec<Checkpoint>> {
        let data = self.read()?;
        Ok(data.get(thread_id).cloned().unwrap_or_default())
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        let mut data = self.write()?;
        data.remove(thread_id);
        Ok(())
    }
}
