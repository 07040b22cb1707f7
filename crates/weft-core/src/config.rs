use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{GraphError, Result};
use crate::stream::GraphEvent;

/// Sender half of a run's event channel.
pub type EventSender = mpsc::Sender<GraphEvent>;

/// Configuration passed to every node of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnableConfig {
    /// Tags for filtering and categorization.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Arbitrary metadata key-value pairs.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,

    /// Maximum number of node dispatches in a single graph run.
    pub recursion_limit: usize,

    /// Unique identifier for this run.
    pub run_id: Uuid,

    /// Arbitrary configurable values accessible by nodes.
    #[serde(default)]
    pub configurable: HashMap<String, serde_json::Value>,

    /// Path of enclosing nodes, outermost first.
    #[serde(default)]
    pub namespace: Vec<String>,

    /// Node currently being dispatched.
    #[serde(default)]
    pub current_node: Option<String>,

    /// Branch key when the current node runs as one branch of a fan-out.
    #[serde(default)]
    pub branch: Option<String>,

    /// Where progress and token events go. `None` discards them.
    #[serde(skip)]
    pub events: Option<EventSender>,

    /// Cancelled when the run is abandoned.
    #[serde(skip)]
    pub cancel: CancellationToken,
}

impl Default for RunnableConfig {
    fn default() -> Self {
        Self {
            tags: Vec::new(),
            metadata: HashMap::new(),
            recursion_limit: 25,
            run_id: Uuid::new_v4(),
            configurable: HashMap::new(),
            namespace: Vec::new(),
            current_node: None,
            branch: None,
            events: None,
            cancel: CancellationToken::new(),
        }
    }
}

impl RunnableConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Config handed to a node: same sink and token, `node` recorded as current.
    pub fn for_node(&self, node: impl Into<String>) -> Self {
        Self {
            current_node: Some(node.into()),
            branch: None,
            ..self.clone()
        }
    }

    /// Config handed to one branch of a fan-out on `node`.
    pub fn for_branch(&self, node: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            current_node: Some(node.into()),
            branch: Some(key.into()),
            ..self.clone()
        }
    }

    /// Namespace segment for graphs nested inside the current node:
    /// `node` or `node:branch`.
    pub fn scope_segment(&self) -> String {
        let node = self.current_node.as_deref().unwrap_or_default();
        match &self.branch {
            Some(key) => format!("{node}:{key}"),
            None => node.to_string(),
        }
    }

    /// Config for a graph nested inside the current node.
    ///
    /// `segment` is appended to the namespace so events from the inner graph
    /// can be told apart from the outer one.
    pub fn nested(&self, segment: impl Into<String>) -> Self {
        let mut namespace = self.namespace.clone();
        namespace.push(segment.into());
        Self {
            namespace,
            current_node: None,
            branch: None,
            ..self.clone()
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fail with `Cancelled` if the run has been abandoned.
    pub fn ensure_live(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(GraphError::Cancelled.into());
        }
        Ok(())
    }

    /// Send an event to the run's consumer.
    ///
    /// A closed channel means the consumer went away: the run is cancelled and
    /// `Cancelled` is returned.
    pub async fn emit(&self, event: GraphEvent) -> Result<()> {
        let Some(events) = &self.events else {
            return Ok(());
        };
        if events.send(event).await.is_err() {
            self.cancel.cancel();
            return Err(GraphError::Cancelled.into());
        }
        Ok(())
    }

    /// Emit a chunk of output for the current node.
    pub async fn emit_token(&self, chunk: impl Into<String>) -> Result<()> {
        let node = self.current_node.clone().unwrap_or_default();
        self.emit(GraphEvent::Token {
            node,
            namespace: self.namespace.clone(),
            branch: self.branch.clone(),
            chunk: chunk.into(),
        })
        .await
    }
}
