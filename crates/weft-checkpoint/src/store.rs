use async_trait::async_trait;

use weft_core::error::Result;

use crate::types::{Checkpoint, Snapshot};

/// Async, append-only storage for graph checkpoints.
///
/// Each thread owns a sequence of checkpoints with steps `0, 1, 2, ...`.
/// The store assigns the step on append, so concurrent appends to one thread
/// can never produce gaps or duplicates. Appends for different threads may
/// run concurrently.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Append a snapshot to `thread_id` and return the step it was stored at.
    async fn append(&self, thread_id: &str, snapshot: Snapshot) -> Result<usize>;

    /// Retrieve the checkpoint with the highest step for a thread.
    async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint>>;

    /// Retrieve the checkpoint stored at `step`.
    async fn get(&self, thread_id: &str, step: usize) -> Result<Option<Checkpoint>>;

    /// List all checkpoints for a thread, ordered by step (ascending).
    async fn list(&self, thread_id: &str) -> Result<Vec<Checkpoint>>;

    /// Delete all checkpoints for a given thread.
    async fn delete_thread(&self, thread_id: &str) -> Result<()>;
}
