use std::sync::Arc;

use serde_json::Value;

use weft_checkpoint::prelude::{Checkpoint, GraphOutput};
use weft_core::config::RunnableConfig;
use weft_core::error::Result;

use crate::compiled::{CompiledStateGraph, Start};
use crate::node::NodeName;
use crate::stream::EventStream;

/// Default capacity of a streamed run's event channel.
pub const DEFAULT_EVENT_BUFFER: usize = 64;

/// Runs one thread of a compiled graph.
///
/// At most one run, resume or stream is active per thread of a compiled
/// graph; a second one fails with `GraphError::ThreadBusy` until the first
/// finishes or its stream is dropped.
pub struct Executor<N: NodeName> {
    graph: Arc<CompiledStateGraph<N>>,
    thread_id: String,
    event_buffer: usize,
}

impl<N: NodeName> Executor<N> {
    pub(crate) fn new(graph: Arc<CompiledStateGraph<N>>, thread_id: String) -> Self {
        Self {
            graph,
            thread_id,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Start a new run from the entry point with `input` as initial state.
    pub async fn run(&self, input: Value, config: &RunnableConfig) -> Result<GraphOutput> {
        let _lease = self.graph.acquire(&self.thread_id)?;
        self.graph
            .execute(&self.thread_id, Start::Fresh(input), config)
            .await
    }

    /// Continue the thread from its latest checkpoint.
    ///
    /// An interrupt point that paused the thread does not fire again.
    pub async fn resume(&self, config: &RunnableConfig) -> Result<GraphOutput> {
        let _lease = self.graph.acquire(&self.thread_id)?;
        self.graph.execute(&self.thread_id, Start::Resume, config).await
    }

    /// Like [`run`](Self::run), delivering events as they happen.
    ///
    /// Dropping the returned stream cancels the run.
    pub fn stream(&self, input: Value, config: RunnableConfig) -> Result<EventStream> {
        let lease = self.graph.acquire(&self.thread_id)?;
        Ok(EventStream::spawn(
            Arc::clone(&self.graph),
            self.thread_id.clone(),
            Start::Fresh(input),
            config,
            lease,
            self.event_buffer,
        ))
    }

    /// Like [`resume`](Self::resume), delivering events as they happen.
    pub fn resume_stream(&self, config: RunnableConfig) -> Result<EventStream> {
        let lease = self.graph.acquire(&self.thread_id)?;
        Ok(EventStream::spawn(
            Arc::clone(&self.graph),
            self.thread_id.clone(),
            Start::Resume,
            config,
            lease,
            self.event_buffer,
        ))
    }

    /// Latest checkpoint of this thread, if the graph persists runs.
    pub async fn latest(&self) -> Result<Option<Checkpoint>> {
        match self.graph.checkpointer() {
            Some(store) => store.latest(&self.thread_id).await,
            None => Ok(None),
        }
    }
}
