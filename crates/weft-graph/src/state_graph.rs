use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use weft_checkpoint::store::CheckpointStore;
use weft_core::config::RunnableConfig;
use weft_core::error::{GraphError, Result};
use weft_core::runnable::Runnable;

use crate::compiled::{CompiledStateGraph, Route};
use crate::edge::{ConditionalEdge, Edge, FanOutEdge, Target};
use crate::node::{DynNode, NodeFn, NodeName};
use crate::state::{Reducer, StateSchema};

/// Options applied when compiling a graph.
pub struct CompileOptions<N> {
    pub checkpointer: Option<Arc<dyn CheckpointStore>>,
    /// Nodes before which a persisted run pauses.
    pub interrupt_before: HashSet<N>,
}

impl<N> Default for CompileOptions<N> {
    fn default() -> Self {
        Self {
            checkpointer: None,
            interrupt_before: HashSet::new(),
        }
    }
}

impl<N: NodeName> CompileOptions<N> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_checkpointer(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpointer = Some(store);
        self
    }

    pub fn interrupt_before(mut self, node: N) -> Self {
        self.interrupt_before.insert(node);
        self
    }
}

/// Builder for constructing a state graph.
///
/// Use `add_node`, `add_edge`, `add_conditional_edges`, `add_fan_out`, etc.
/// to define the graph topology, then call `compile()` to validate and
/// produce a `CompiledStateGraph`.
pub struct StateGraph<N: NodeName> {
    nodes: HashMap<N, Arc<DynNode>>,
    edges: Vec<Edge<N>>,
    conditional_edges: Vec<ConditionalEdge<N>>,
    fan_outs: Vec<FanOutEdge<N>>,
    entry_point: Option<N>,
    schema: StateSchema,
    label_key: Option<String>,
}

impl<N: NodeName> StateGraph<N> {
    /// Create a new, empty state graph.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            edges: Vec::new(),
            conditional_edges: Vec::new(),
            fan_outs: Vec::new(),
            entry_point: None,
            schema: StateSchema::new(),
            label_key: None,
        }
    }

    /// Declare the reducer for a state key.
    pub fn add_reducer(&mut self, key: impl Into<String>, reducer: Reducer) -> &mut Self {
        self.schema.declare(key, reducer);
        self
    }

    pub fn add_overwrite_key(&mut self, key: impl Into<String>) -> &mut Self {
        self.add_reducer(key, Reducer::Overwrite)
    }

    pub fn add_append_key(&mut self, key: impl Into<String>) -> &mut Self {
        self.add_reducer(key, Reducer::Append)
    }

    pub fn add_merge_key(&mut self, key: impl Into<String>) -> &mut Self {
        self.add_reducer(key, Reducer::MergeMapping)
    }

    /// State key whose string value labels progress events.
    pub fn set_label_key(&mut self, key: impl Into<String>) -> &mut Self {
        self.label_key = Some(key.into());
        self
    }

    /// Add a node to the graph.
    ///
    /// Returns an error if a node with the same name already exists.
    pub fn add_node<R>(&mut self, name: N, node: R) -> Result<&mut Self>
    where
        R: Runnable<Input = Value, Output = Value> + 'static,
    {
        if self.nodes.contains_key(&name) {
            return Err(GraphError::Validation(format!(
                "Duplicate node name: '{}'",
                name.as_str()
            ))
            .into());
        }
        self.nodes.insert(name, Arc::new(node));
        Ok(self)
    }

    /// Add a node backed by an async closure.
    pub fn add_fn<F, Fut>(&mut self, name: N, func: F) -> Result<&mut Self>
    where
        F: Fn(Value, RunnableConfig) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.add_node(name, NodeFn::new(func))
    }

    /// Add a static edge between two nodes (or to `Target::End`).
    pub fn add_edge(&mut self, from: N, to: impl Into<Target<N>>) -> &mut Self {
        self.edges.push(Edge::new(from, to));
        self
    }

    pub fn add_conditional_edges(&mut self, edge: ConditionalEdge<N>) -> &mut Self {
        self.conditional_edges.push(edge);
        self
    }

    pub fn add_fan_out(&mut self, edge: FanOutEdge<N>) -> &mut Self {
        self.fan_outs.push(edge);
        self
    }

    pub fn set_entry_point(&mut self, node: N) -> &mut Self {
        self.entry_point = Some(node);
        self
    }

    /// Route `node` to the terminal marker.
    pub fn set_finish_point(&mut self, node: N) -> &mut Self {
        self.add_edge(node, Target::End)
    }

    /// Validate the graph and produce a non-persisted `CompiledStateGraph`.
    pub fn compile(self) -> Result<CompiledStateGraph<N>> {
        self.compile_with(CompileOptions::default())
    }

    /// Validate the graph and produce a `CompiledStateGraph` with the given
    /// checkpoint store and interrupt points.
    pub fn compile_with(self, options: CompileOptions<N>) -> Result<CompiledStateGraph<N>> {
        let entry_point = self.validate(&options)?;

        let mut routes: HashMap<N, Route<N>> = HashMap::new();
        for edge in self.edges {
            routes.insert(edge.from, Route::Edge(edge.to));
        }
        for ce in self.conditional_edges {
            routes.insert(ce.from, Route::Conditional(ce));
        }
        let mut fan_outs = HashMap::new();
        for fan in self.fan_outs {
            routes.insert(fan.from, Route::Edge(Target::Node(fan.target)));
            routes.insert(fan.target, Route::Edge(Target::Node(fan.converge)));
            fan_outs.insert(fan.target, fan);
        }

        Ok(CompiledStateGraph {
            nodes: self.nodes,
            routes,
            fan_outs,
            entry_point,
            schema: self.schema,
            label_key: self.label_key,
            checkpointer: options.checkpointer,
            interrupt_before: options.interrupt_before,
            leases: Arc::new(DashMap::new()),
        })
    }

    /// Validate the graph structure, returning the entry point.
    fn validate(&self, options: &CompileOptions<N>) -> Result<N> {
        // 1. Entry point must be set and registered
        let entry = self
            .entry_point
            .ok_or_else(|| invalid("Entry point not set".to_string()))?;
        if !self.nodes.contains_key(&entry) {
            return Err(invalid(format!(
                "Entry point node '{}' does not exist",
                entry.as_str()
            )));
        }

        // 2. Every edge endpoint must be registered
        for edge in &self.edges {
            self.require_node(edge.from, "edge source")?;
            if let Target::Node(to) = edge.to {
                self.require_node(to, "edge target")?;
            }
        }

        // 3. Conditional edges: registered source and targets, full label map
        for ce in &self.conditional_edges {
            self.require_node(ce.from, "conditional edge source")?;
            for target in ce.targets() {
                if let Target::Node(to) = target {
                    self.require_node(*to, "conditional edge target")?;
                }
            }
            if !ce.unmapped_labels().is_empty() {
                return Err(invalid(format!(
                    "Router on '{}' has unmapped labels: {}",
                    ce.from.as_str(),
                    ce.unmapped_labels().join(", ")
                )));
            }
        }

        // 4. Fan-out endpoints registered; each target owned by one fan-out
        let mut fan_targets: HashSet<N> = HashSet::new();
        for fan in &self.fan_outs {
            self.require_node(fan.from, "fan-out source")?;
            self.require_node(fan.target, "fan-out target")?;
            self.require_node(fan.converge, "fan-out convergence node")?;
            if !fan_targets.insert(fan.target) {
                return Err(invalid(format!(
                    "Node '{}' is the target of more than one fan-out",
                    fan.target.as_str()
                )));
            }
        }

        // 5. Exactly one outgoing route per node
        let mut route_counts: HashMap<N, usize> = HashMap::new();
        let sources = self
            .edges
            .iter()
            .map(|e| e.from)
            .chain(self.conditional_edges.iter().map(|ce| ce.from))
            .chain(self.fan_outs.iter().map(|f| f.from));
        for source in sources {
            *route_counts.entry(source).or_default() += 1;
        }
        for target in &fan_targets {
            if route_counts.contains_key(target) {
                return Err(invalid(format!(
                    "Fan-out target '{}' cannot have its own outgoing edges",
                    target.as_str()
                )));
            }
        }
        for (node, count) in &route_counts {
            if *count > 1 {
                return Err(invalid(format!(
                    "Node '{}' has more than one outgoing route",
                    node.as_str()
                )));
            }
        }
        for node in self.nodes.keys() {
            if !route_counts.contains_key(node) && !fan_targets.contains(node) {
                return Err(invalid(format!(
                    "Node '{}' has no outgoing route",
                    node.as_str()
                )));
            }
        }

        // 6. BFS reachability check from entry point (cycles are allowed)
        self.validate_reachability(entry)?;

        // 7. Interrupt points
        for node in &options.interrupt_before {
            if !self.nodes.contains_key(node) {
                return Err(invalid(format!(
                    "Interrupt point '{}' is not a registered node",
                    node.as_str()
                )));
            }
        }
        if !options.interrupt_before.is_empty() && options.checkpointer.is_none() {
            return Err(invalid(
                "Interrupt points require a checkpoint store".to_string(),
            ));
        }

        Ok(entry)
    }

    fn require_node(&self, node: N, context: &str) -> Result<()> {
        if !self.nodes.contains_key(&node) {
            return Err(invalid(format!(
                "Unknown node '{}' referenced as {context}",
                node.as_str()
            )));
        }
        Ok(())
    }

    /// BFS from entry point to check that all registered nodes are reachable.
    fn validate_reachability(&self, entry: N) -> Result<()> {
        let mut adj: HashMap<N, Vec<N>> = HashMap::new();
        for edge in &self.edges {
            if let Target::Node(to) = edge.to {
                adj.entry(edge.from).or_default().push(to);
            }
        }
        for ce in &self.conditional_edges {
            for target in ce.targets() {
                if let Target::Node(to) = target {
                    adj.entry(ce.from).or_default().push(*to);
                }
            }
        }
        for fan in &self.fan_outs {
            adj.entry(fan.from).or_default().push(fan.target);
            adj.entry(fan.target).or_default().push(fan.converge);
        }

        let mut visited: HashSet<N> = HashSet::new();
        let mut queue: VecDeque<N> = VecDeque::new();
        queue.push_back(entry);
        visited.insert(entry);

        while let Some(current) = queue.pop_front() {
            if let Some(neighbors) = adj.get(&current) {
                for &next in neighbors {
                    if visited.insert(next) {
                        queue.push_back(next);
                    }
                }
            }
        }

        for name in self.nodes.keys() {
            if !visited.contains(name) {
                return Err(invalid(format!(
                    "Node '{}' is not reachable from entry point '{}'",
                    name.as_str(),
                    entry.as_str()
                )));
            }
        }

        Ok(())
    }
}

impl<N: NodeName> Default for StateGraph<N> {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid(message: String) -> weft_core::error::WeftError {
    GraphError::Validation(message).into()
}
