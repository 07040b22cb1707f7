use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Why a checkpoint was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointSource {
    /// A plain node completed.
    Loop,
    /// All branches of a fan-out completed.
    FanIn,
    /// The run paused before an interrupt point.
    Interrupt,
    /// Copied from another thread's history.
    Fork,
}

/// Metadata describing how a checkpoint was created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub source: CheckpointSource,
    /// The node that just completed, or the interrupt point.
    pub node_name: Option<String>,
    /// Raw partial update(s) that produced this state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writes: Option<Value>,
}

impl CheckpointMetadata {
    pub fn new(source: CheckpointSource, node_name: Option<String>) -> Self {
        Self {
            source,
            node_name,
            writes: None,
        }
    }

    pub fn with_writes(mut self, writes: Value) -> Self {
        self.writes = Some(writes);
        self
    }
}

/// What the executor hands to the store; the store adds identity and step.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub state: Value,
    /// Node to dispatch next, `None` once the graph has terminated.
    pub next_node: Option<String>,
    pub metadata: CheckpointMetadata,
}

/// A durable snapshot of graph state at one step of a thread.
///
/// Checkpoints are never mutated after being stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Unique identifier for this checkpoint.
    pub id: String,
    pub thread_id: String,
    /// Position in the thread's sequence, starting at 0.
    pub step: usize,
    /// Full merged state after the step.
    pub state: Value,
    pub next_node: Option<String>,
    pub metadata: CheckpointMetadata,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Materialize a snapshot at `step` of `thread_id`.
    pub fn from_snapshot(thread_id: impl Into<String>, step: usize, snapshot: Snapshot) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            thread_id: thread_id.into(),
            step,
            state: snapshot.state,
            next_node: snapshot.next_node,
            metadata: snapshot.metadata,
            created_at: Utc::now(),
        }
    }

    /// Whether the thread terminated at this checkpoint.
    pub fn is_terminal(&self) -> bool {
        self.next_node.is_none()
    }
}

/// The outcome of a persisted graph execution.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphOutput {
    /// Graph reached its terminal marker with this final state.
    Complete(Value),
    /// Graph paused before `node`; resume the thread to continue.
    Interrupted {
        node: String,
        /// Step of the interrupt checkpoint.
        step: usize,
        state: Value,
    },
}

impl GraphOutput {
    /// Returns `true` if the graph completed normally.
    pub fn is_complete(&self) -> bool {
        matches!(self, GraphOutput::Complete(_))
    }

    /// Returns `true` if the graph was interrupted.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, GraphOutput::Interrupted { .. })
    }

    /// The state carried by either variant.
    pub fn into_value(self) -> Value {
        match self {
            GraphOutput::Complete(v) => v,
            GraphOutput::Interrupted { state, .. } => state,
        }
    }
}
