use std::collections::VecDeque;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use weft_checkpoint::prelude::GraphOutput;
use weft_core::config::RunnableConfig;
use weft_core::error::{GraphError, Result, WeftError};
use weft_core::stream::GraphEvent;

use crate::compiled::{CompiledStateGraph, Start, ThreadLease};
use crate::node::NodeName;

/// Events of one streamed run, in order.
///
/// Token events are held back until the node that produced them completes
/// (its `NodeEnd`); a run that fails yields an `Error` event and its held
/// tokens are discarded. Dropping the stream cancels the run.
pub struct EventStream {
    rx: mpsc::Receiver<GraphEvent>,
    staged: Vec<GraphEvent>,
    ready: VecDeque<GraphEvent>,
    handle: Option<JoinHandle<Result<GraphOutput>>>,
    terminated: bool,
    closed: bool,
}

impl EventStream {
    pub(crate) fn spawn<N: NodeName>(
        graph: Arc<CompiledStateGraph<N>>,
        thread_id: String,
        start: Start,
        config: RunnableConfig,
        lease: ThreadLease,
        buffer: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(buffer);
        let watch = tx.clone();
        let config = config.with_events(tx);

        let handle = tokio::spawn(async move {
            let _lease = lease;
            tokio::select! {
                result = graph.execute(&thread_id, start, &config) => result,
                _ = watch.closed() => {
                    config.cancel.cancel();
                    warn!(thread_id = %thread_id, "event stream dropped, run cancelled");
                    Err(GraphError::Cancelled.into())
                }
            }
        });

        Self {
            rx,
            staged: Vec::new(),
            ready: VecDeque::new(),
            handle: Some(handle),
            terminated: false,
            closed: false,
        }
    }

    /// Next event, or `None` once the run has ended.
    pub async fn next(&mut self) -> Option<GraphEvent> {
        loop {
            if let Some(event) = self.ready.pop_front() {
                return Some(event);
            }
            if self.closed {
                return None;
            }
            match self.rx.recv().await {
                Some(event) => self.accept(event),
                None => {
                    self.closed = true;
                    self.staged.clear();
                    if !self.terminated {
                        self.terminated = true;
                        self.ready.push_back(GraphEvent::Error {
                            message: "run ended without a terminal event".into(),
                        });
                    }
                }
            }
        }
    }

    fn accept(&mut self, event: GraphEvent) {
        match event {
            GraphEvent::Token { .. } => self.staged.push(event),
            GraphEvent::NodeEnd {
                ref node,
                ref namespace,
                ref branch,
                ..
            } => {
                let (released, kept): (Vec<_>, Vec<_>) =
                    self.staged.drain(..).partition(|token| match token {
                        GraphEvent::Token {
                            node: n,
                            namespace: ns,
                            branch: b,
                            ..
                        } => n == node && ns == namespace && b == branch,
                        _ => false,
                    });
                self.staged = kept;
                self.ready.extend(released);
                self.ready.push_back(event);
            }
            GraphEvent::Interrupted { .. } | GraphEvent::Complete { .. } | GraphEvent::Error { .. } => {
                self.terminated = true;
                self.staged.clear();
                self.ready.push_back(event);
            }
        }
    }

    /// Drain the remaining events and return the run's result.
    pub async fn finish(mut self) -> Result<GraphOutput> {
        while self.next().await.is_some() {}
        match self.handle.take() {
            Some(handle) => handle
                .await
                .map_err(|e| WeftError::Other(format!("run task failed: {e}")))?,
            None => Err(WeftError::Other("run already finished".into())),
        }
    }

    /// Adapt into a `futures` stream of events.
    pub fn into_stream(self) -> BoxStream<'static, GraphEvent> {
        futures::stream::unfold(self, |mut events| async move {
            events.next().await.map(|event| (event, events))
        })
        .boxed()
    }

    /// Collect every remaining event.
    pub async fn collect(mut self) -> Vec<GraphEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }
}

