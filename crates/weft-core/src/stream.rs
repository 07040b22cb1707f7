use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events emitted while a graph runs.
///
/// Progress events (`NodeEnd`) follow node completion order within a run;
/// branches of a fan-out may interleave in any order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphEvent {
    /// A node finished and its update has been merged.
    NodeEnd {
        node: String,
        /// Path of enclosing sub-graph nodes (empty for the top-level graph).
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        namespace: Vec<String>,
        /// Grouping label taken from the update (e.g. the topic it concerns).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        /// Fan-out branch key when this completion is one branch of a fan-out.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        branch: Option<String>,
        /// Checkpoint step written for this completion, if persisted.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step: Option<usize>,
        update: Value,
    },
    /// A chunk of output produced by a node while it runs.
    Token {
        node: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        namespace: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        branch: Option<String>,
        chunk: String,
    },
    /// The run stopped before `node` and can be resumed.
    Interrupted {
        node: String,
        step: usize,
        state: Value,
    },
    /// The graph reached its terminal marker.
    Complete {
        /// The last node that ran, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node: Option<String>,
        /// That node's partial update.
        output: Value,
        /// Final merged state.
        state: Value,
    },
    /// The run failed.
    Error { message: String },
}

impl GraphEvent {
    /// Terminal events end a stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Interrupted { .. } | Self::Complete { .. } | Self::Error { .. }
        )
    }
}
