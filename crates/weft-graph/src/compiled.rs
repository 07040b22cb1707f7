use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::{Map, Value};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use weft_checkpoint::prelude::{
    Checkpoint, CheckpointMetadata, CheckpointSource, CheckpointStore, GraphOutput, Snapshot,
};
use weft_core::config::RunnableConfig;
use weft_core::error::{CheckpointError, GraphError, Result, WeftError};
use weft_core::runnable::Runnable;
use weft_core::stream::GraphEvent;

use crate::edge::{ConditionalEdge, FanOutEdge, Target};
use crate::executor::Executor;
use crate::node::{DynNode, NodeName};
use crate::state::StateSchema;

/// Outgoing route of a node, resolved once the node has completed.
pub(crate) enum Route<N> {
    Edge(Target<N>),
    Conditional(ConditionalEdge<N>),
}

/// How a drive begins.
pub(crate) enum Start {
    /// New run from the entry point with this initial partial state.
    Fresh(Value),
    /// Continue from the thread's latest checkpoint.
    Resume,
}

struct Cursor<N> {
    state: Map<String, Value>,
    next: Target<N>,
    /// Interrupt point that already paused this thread and must not fire again.
    skip_interrupt: Option<N>,
}

/// Checkpoint sink for one persisted drive.
struct Persist<'a> {
    store: &'a dyn CheckpointStore,
    thread_id: &'a str,
    next_step: usize,
}

impl Persist<'_> {
    async fn append(&mut self, snapshot: Snapshot) -> Result<usize> {
        let assigned = self.store.append(self.thread_id, snapshot).await?;
        if assigned != self.next_step {
            return Err(CheckpointError::OutOfOrder {
                thread_id: self.thread_id.to_string(),
                expected: self.next_step,
                assigned,
            }
            .into());
        }
        self.next_step += 1;
        Ok(assigned)
    }
}

enum Outcome<N> {
    Complete {
        state: Value,
        last: Option<(N, Value)>,
    },
    Interrupted {
        node: N,
        step: usize,
        state: Value,
    },
}

/// Releases a thread's lease when dropped.
pub(crate) struct ThreadLease {
    leases: Arc<DashMap<String, ()>>,
    thread_id: String,
}

impl Drop for ThreadLease {
    fn drop(&mut self) {
        self.leases.remove(&self.thread_id);
    }
}

/// A compiled state graph ready for execution.
///
/// Created by `StateGraph::compile()`. Immutable and shared through `Arc`:
/// [`executor`](Self::executor) gives a thread-scoped handle for persisted
/// runs, while the `Runnable` impl runs the graph once without checkpoints,
/// which is how a graph is embedded as a node of another graph.
pub struct CompiledStateGraph<N: NodeName> {
    pub(crate) nodes: HashMap<N, Arc<DynNode>>,
    pub(crate) routes: HashMap<N, Route<N>>,
    pub(crate) fan_outs: HashMap<N, FanOutEdge<N>>,
    pub(crate) entry_point: N,
    pub(crate) schema: StateSchema,
    pub(crate) label_key: Option<String>,
    pub(crate) checkpointer: Option<Arc<dyn CheckpointStore>>,
    pub(crate) interrupt_before: HashSet<N>,
    pub(crate) leases: Arc<DashMap<String, ()>>,
}

impl<N: NodeName> CompiledStateGraph<N> {
    /// Get the names of all nodes in the graph.
    pub fn node_names(&self) -> Vec<N> {
        self.nodes.keys().copied().collect()
    }

    pub fn entry_point(&self) -> N {
        self.entry_point
    }

    pub fn is_fan_out_target(&self, node: N) -> bool {
        self.fan_outs.contains_key(&node)
    }

    pub fn interrupt_points(&self) -> &HashSet<N> {
        &self.interrupt_before
    }

    pub fn checkpointer(&self) -> Option<&Arc<dyn CheckpointStore>> {
        self.checkpointer.as_ref()
    }

    /// Handle for running, resuming and streaming one thread of this graph.
    pub fn executor(self: &Arc<Self>, thread_id: impl Into<String>) -> Executor<N> {
        Executor::new(Arc::clone(self), thread_id.into())
    }

    /// Claim `thread_id` for one active run.
    pub(crate) fn acquire(&self, thread_id: &str) -> Result<ThreadLease> {
        match self.leases.entry(thread_id.to_string()) {
            Entry::Occupied(_) => Err(GraphError::ThreadBusy(thread_id.to_string()).into()),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(ThreadLease {
                    leases: Arc::clone(&self.leases),
                    thread_id: thread_id.to_string(),
                })
            }
        }
    }

    /// Merge the caller's input into an empty state.
    fn initial_state(&self, input: &Value) -> Result<Map<String, Value>> {
        let mut state = Map::new();
        self.schema.merge(&mut state, input)?;
        Ok(state)
    }

    /// Determine where control goes after `node` completed.
    pub(crate) fn resolve_next(&self, node: N, state: &Value) -> Result<Target<N>> {
        match self.routes.get(&node) {
            Some(Route::Edge(target)) => Ok(*target),
            Some(Route::Conditional(ce)) => ce.resolve(state),
            None => Err(GraphError::RouterResolution {
                node: node.as_str().to_string(),
                label: "<no route>".into(),
            }
            .into()),
        }
    }

    fn label_for(&self, update: &Value, state: &Map<String, Value>) -> Option<String> {
        let key = self.label_key.as_deref()?;
        update
            .get(key)
            .and_then(Value::as_str)
            .or_else(|| state.get(key).and_then(Value::as_str))
            .map(str::to_string)
    }

    fn node(&self, name: N) -> Result<&Arc<DynNode>> {
        self.nodes.get(&name).ok_or_else(|| {
            GraphError::Validation(format!("Node '{}' not registered", name.as_str())).into()
        })
    }

    /// Run a persisted execution of `thread_id` and report its terminal event.
    pub(crate) async fn execute(
        &self,
        thread_id: &str,
        start: Start,
        config: &RunnableConfig,
    ) -> Result<GraphOutput> {
        let result = self.execute_inner(thread_id, start, config).await;
        match &result {
            Ok(GraphOutput::Complete(_)) => info!(thread_id = %thread_id, "run complete"),
            Ok(GraphOutput::Interrupted { node, step, .. }) => {
                info!(thread_id = %thread_id, node = %node, step, "run interrupted")
            }
            Err(e) if e.is_cancelled() => warn!(thread_id = %thread_id, "run cancelled"),
            Err(e) => {
                warn!(thread_id = %thread_id, error = %e, "run failed");
                let _ = config
                    .emit(GraphEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
            }
        }
        result
    }

    async fn execute_inner(
        &self,
        thread_id: &str,
        start: Start,
        config: &RunnableConfig,
    ) -> Result<GraphOutput> {
        let store = self.checkpointer.as_deref();
        let latest = match store {
            Some(store) => store.latest(thread_id).await?,
            None => None,
        };
        let next_step = latest.as_ref().map_or(0, |cp| cp.step + 1);

        let cursor = match start {
            Start::Fresh(input) => {
                info!(thread_id = %thread_id, run_id = %config.run_id, "run started");
                Cursor {
                    state: self.initial_state(&input)?,
                    next: Target::Node(self.entry_point),
                    skip_interrupt: None,
                }
            }
            Start::Resume => {
                let latest =
                    latest.ok_or_else(|| GraphError::ThreadNotFound(thread_id.to_string()))?;
                info!(
                    thread_id = %thread_id,
                    step = latest.step,
                    next = latest.next_node.as_deref().unwrap_or("<end>"),
                    "resuming run"
                );
                self.cursor_from(latest)?
            }
        };

        let persist = store.map(|store| Persist {
            store,
            thread_id,
            next_step,
        });

        match self.drive(cursor, persist, config).await? {
            Outcome::Complete { state, last } => {
                let (node, output) = match last {
                    Some((node, output)) => (Some(node.as_str().to_string()), output),
                    None => (None, Value::Null),
                };
                config
                    .emit(GraphEvent::Complete {
                        node,
                        output,
                        state: state.clone(),
                    })
                    .await?;
                Ok(GraphOutput::Complete(state))
            }
            Outcome::Interrupted { node, step, state } => {
                config
                    .emit(GraphEvent::Interrupted {
                        node: node.as_str().to_string(),
                        step,
                        state: state.clone(),
                    })
                    .await?;
                Ok(GraphOutput::Interrupted {
                    node: node.as_str().to_string(),
                    step,
                    state,
                })
            }
        }
    }

    fn cursor_from(&self, checkpoint: Checkpoint) -> Result<Cursor<N>> {
        let state = match checkpoint.state {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => {
                return Err(CheckpointError::Corrupt(format!(
                    "state of step {} is not an object",
                    checkpoint.step
                ))
                .into());
            }
        };
        let next = match checkpoint.next_node.as_deref() {
            None => Target::End,
            Some(name) => Target::Node(N::from_name(name).ok_or_else(|| {
                CheckpointError::Corrupt(format!(
                    "step {} points at unknown node '{name}'",
                    checkpoint.step
                ))
            })?),
        };
        let skip_interrupt = match checkpoint.metadata.source {
            CheckpointSource::Interrupt | CheckpointSource::Fork => next.node(),
            CheckpointSource::Loop | CheckpointSource::FanIn => None,
        };
        Ok(Cursor {
            state,
            next,
            skip_interrupt,
        })
    }

    /// Walk the graph from `cursor` until the terminal marker or an interrupt.
    async fn drive(
        &self,
        mut cursor: Cursor<N>,
        mut persist: Option<Persist<'_>>,
        config: &RunnableConfig,
    ) -> Result<Outcome<N>> {
        let mut dispatched = 0usize;
        let mut last: Option<(N, Value)> = None;

        loop {
            let node = match cursor.next {
                Target::End => {
                    return Ok(Outcome::Complete {
                        state: Value::Object(cursor.state),
                        last,
                    });
                }
                Target::Node(node) => node,
            };
            config.ensure_live()?;

            if let Some(persist) = persist.as_mut() {
                if self.interrupt_before.contains(&node) && cursor.skip_interrupt != Some(node) {
                    let state = Value::Object(cursor.state);
                    let step = persist
                        .append(Snapshot {
                            state: state.clone(),
                            next_node: Some(node.as_str().to_string()),
                            metadata: CheckpointMetadata::new(
                                CheckpointSource::Interrupt,
                                Some(node.as_str().to_string()),
                            ),
                        })
                        .await?;
                    return Ok(Outcome::Interrupted { node, step, state });
                }
            }
            cursor.skip_interrupt = None;

            if dispatched >= config.recursion_limit {
                return Err(GraphError::RecursionLimit {
                    limit: config.recursion_limit,
                }
                .into());
            }
            dispatched += 1;

            let (output, source) = match self.fan_outs.get(&node) {
                Some(fan) => {
                    let updates = self.dispatch_fan_out(node, fan, &mut cursor.state, config).await?;
                    (Value::Array(updates), CheckpointSource::FanIn)
                }
                None => {
                    let update = self.dispatch_node(node, &mut cursor.state, config).await?;
                    (update, CheckpointSource::Loop)
                }
            };

            let state = Value::Object(cursor.state.clone());
            let next = self.resolve_next(node, &state)?;

            let step = match persist.as_mut() {
                Some(persist) => {
                    config.ensure_live()?;
                    let metadata = CheckpointMetadata::new(source, Some(node.as_str().to_string()))
                        .with_writes(output.clone());
                    Some(
                        persist
                            .append(Snapshot {
                                state,
                                next_node: next.name().map(str::to_string),
                                metadata,
                            })
                            .await?,
                    )
                }
                None => None,
            };

            if source == CheckpointSource::Loop {
                config
                    .emit(GraphEvent::NodeEnd {
                        node: node.as_str().to_string(),
                        namespace: config.namespace.clone(),
                        label: self.label_for(&output, &cursor.state),
                        branch: None,
                        step,
                        update: output.clone(),
                    })
                    .await?;
            }

            last = Some((node, output));
            cursor.next = next;
        }
    }

    /// Invoke a plain node and merge its update.
    async fn dispatch_node(
        &self,
        node: N,
        state: &mut Map<String, Value>,
        config: &RunnableConfig,
    ) -> Result<Value> {
        let runnable = self.node(node)?;
        let node_config = config.for_node(node.as_str());
        let input = Value::Object(state.clone());

        let update = tokio::select! {
            biased;
            _ = config.cancel.cancelled() => return Err(GraphError::Cancelled.into()),
            result = runnable.invoke(input, &node_config) => result.map_err(|e| node_error(node, e))?,
        };

        let delta = self.schema.merge(state, &update)?;
        debug!(
            node = node.as_str(),
            namespace = ?config.namespace,
            keys = ?delta.keys,
            "node completed"
        );
        Ok(update)
    }

    /// Run one invocation of `node` per fan-out branch and merge the updates
    /// in completion order.
    async fn dispatch_fan_out(
        &self,
        node: N,
        fan: &FanOutEdge<N>,
        state: &mut Map<String, Value>,
        config: &RunnableConfig,
    ) -> Result<Vec<Value>> {
        let branches = fan.branches(&Value::Object(state.clone()));
        let mut keys = HashSet::new();
        for branch in &branches {
            if !keys.insert(branch.key.clone()) {
                return Err(GraphError::DuplicateBranchKey {
                    node: node.as_str().to_string(),
                    key: branch.key.clone(),
                }
                .into());
            }
        }
        debug!(node = node.as_str(), branches = branches.len(), "fan-out");

        let shared: Map<String, Value> = fan
            .shared_keys()
            .iter()
            .filter_map(|key| state.get(key).map(|v| (key.clone(), v.clone())))
            .collect();
        let runnable = self.node(node)?;

        let mut set = JoinSet::new();
        for branch in branches {
            let mut input = shared.clone();
            match branch.seed {
                Value::Object(seed) => input.extend(seed),
                Value::Null => {}
                other => {
                    return Err(GraphError::State(format!(
                        "seed for branch '{}' of '{}' must be an object, got {other}",
                        branch.key,
                        node.as_str()
                    ))
                    .into());
                }
            }
            let runnable = Arc::clone(runnable);
            let branch_config = config.for_branch(node.as_str(), branch.key.clone());
            let key = branch.key;
            set.spawn(async move {
                let result = runnable.invoke(Value::Object(input), &branch_config).await;
                (key, result)
            });
        }

        let mut written: HashSet<(String, String)> = HashSet::new();
        let mut updates = Vec::new();
        loop {
            let joined = tokio::select! {
                biased;
                _ = config.cancel.cancelled() => return Err(GraphError::Cancelled.into()),
                joined = set.join_next() => joined,
            };
            let Some(joined) = joined else {
                break;
            };
            let (key, result) =
                joined.map_err(|e| WeftError::Other(format!("branch task failed: {e}")))?;
            let update = result.map_err(|e| node_error(node, e))?;

            for (map_key, sub_key) in self.schema.mapping_writes(&update) {
                let dotted = format!("{map_key}.{sub_key}");
                if !written.insert((map_key, sub_key)) {
                    return Err(GraphError::DuplicateBranchKey {
                        node: node.as_str().to_string(),
                        key: dotted,
                    }
                    .into());
                }
            }
            let delta = self.schema.merge(state, &update)?;
            debug!(node = node.as_str(), branch = %key, keys = ?delta.keys, "branch completed");

            config
                .emit(GraphEvent::NodeEnd {
                    node: node.as_str().to_string(),
                    namespace: config.namespace.clone(),
                    label: Some(key.clone()),
                    branch: Some(key),
                    step: None,
                    update: update.clone(),
                })
                .await?;
            updates.push(update);
        }
        Ok(updates)
    }
}

fn node_error(node: impl NodeName, source: WeftError) -> WeftError {
    GraphError::NodeExecution {
        node: node.as_str().to_string(),
        source: Box::new(source),
    }
    .into()
}

#[async_trait]
impl<N: NodeName> Runnable for CompiledStateGraph<N> {
    type Input = Value;
    type Output = Value;

    /// Run once from the entry point without checkpoints or interrupts and
    /// return the final state.
    async fn invoke(&self, input: Self::Input, config: &RunnableConfig) -> Result<Self::Output> {
        let cursor = Cursor {
            state: self.initial_state(&input)?,
            next: Target::Node(self.entry_point),
            skip_interrupt: None,
        };
        match self.drive(cursor, None, config).await? {
            Outcome::Complete { state, .. } => Ok(state),
            Outcome::Interrupted { state, .. } => Ok(state),
        }
    }
}
