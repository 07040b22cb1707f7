use thiserror::Error;

/// Top-level error type for the Weft engine.
#[derive(Debug, Error)]
pub enum WeftError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Other(String),
}

impl WeftError {
    /// Returns `true` if this error (or the node failure it wraps) is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            WeftError::Graph(GraphError::Cancelled) => true,
            WeftError::Graph(GraphError::NodeExecution { source, .. }) => source.is_cancelled(),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum GraphError {
    /// Raised by `compile` only; never produced while a graph runs.
    #[error("Invalid graph: {0}")]
    Validation(String),

    #[error("Router on '{node}' returned label '{label}' which has no target")]
    RouterResolution { node: String, label: String },

    #[error("Fan-out from '{node}' produced duplicate branch key '{key}'")]
    DuplicateBranchKey { node: String, key: String },

    #[error("Recursion limit ({limit}) exceeded")]
    RecursionLimit { limit: usize },

    #[error("Node error in '{node}': {source}")]
    NodeExecution {
        node: String,
        source: Box<WeftError>,
    },

    #[error("State merge failed: {0}")]
    State(String),

    #[error("Thread '{0}' already has an active run")]
    ThreadBusy(String),

    #[error("Thread not found: {0}")]
    ThreadNotFound(String),

    #[error("Run cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Search failed: {0}")]
    Search(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Corrupt checkpoint: {0}")]
    Corrupt(String),

    #[error("Thread '{thread_id}' expected step {expected} but store assigned {assigned}")]
    OutOfOrder {
        thread_id: String,
        expected: usize,
        assigned: usize,
    },
}

pub type Result<T> = std::result::Result<T, WeftError>;
