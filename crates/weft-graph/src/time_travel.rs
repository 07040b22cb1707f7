use weft_checkpoint::prelude::{
    Checkpoint, CheckpointMetadata, CheckpointSource, CheckpointStore, Snapshot,
};
use weft_core::error::{GraphError, Result, WeftError};

/// Get the full state history (all checkpoints) for a thread, ordered by step.
pub async fn get_state_history(
    store: &dyn CheckpointStore,
    thread_id: &str,
) -> Result<Vec<Checkpoint>> {
    store.list(thread_id).await
}

/// Retrieve the checkpoint at a specific step in a thread.
///
/// Returns `None` if no checkpoint exists at that step.
pub async fn replay_to_step(
    store: &dyn CheckpointStore,
    thread_id: &str,
    step: usize,
) -> Result<Option<Checkpoint>> {
    store.get(thread_id, step).await
}

/// Copy the snapshot at `step` of `source_thread_id` as step 0 of
/// `new_thread_id`, so it can be resumed independently.
///
/// The new thread must not have any checkpoints yet. Resuming the fork
/// continues from the copied next-node pointer without pausing at it.
pub async fn fork_thread(
    store: &dyn CheckpointStore,
    source_thread_id: &str,
    step: usize,
    new_thread_id: &str,
) -> Result<Checkpoint> {
    let source = store
        .get(source_thread_id, step)
        .await?
        .ok_or_else(|| GraphError::ThreadNotFound(format!("{source_thread_id} (step {step})")))?;

    if store.latest(new_thread_id).await?.is_some() {
        return Err(WeftError::InvalidInput(format!(
            "cannot fork into '{new_thread_id}': thread already has checkpoints"
        )));
    }

    let snapshot = Snapshot {
        state: source.state,
        next_node: source.next_node,
        metadata: CheckpointMetadata::new(CheckpointSource::Fork, source.metadata.node_name),
    };
    let new_step = store.append(new_thread_id, snapshot).await?;
    store
        .get(new_thread_id, new_step)
        .await?
        .ok_or_else(|| GraphError::ThreadNotFound(new_thread_id.to_string()).into())
}
