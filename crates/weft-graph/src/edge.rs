use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;

use weft_core::error::{GraphError, Result};

use crate::node::{NodeName, RouteLabel};

/// Where control goes next: a node, or the terminal marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target<N> {
    Node(N),
    End,
}

impl<N> From<N> for Target<N> {
    fn from(node: N) -> Self {
        Target::Node(node)
    }
}

impl<N: NodeName> Target<N> {
    pub fn node(&self) -> Option<N> {
        match self {
            Target::Node(n) => Some(*n),
            Target::End => None,
        }
    }

    pub fn name(&self) -> Option<&'static str> {
        self.node().map(|n| n.as_str())
    }
}

/// A static edge connecting two nodes.
#[derive(Debug, Clone, Copy)]
pub struct Edge<N> {
    pub from: N,
    pub to: Target<N>,
}

impl<N> Edge<N> {
    pub fn new(from: N, to: impl Into<Target<N>>) -> Self {
        Self {
            from,
            to: to.into(),
        }
    }
}

type RouteFn<N> = dyn Fn(&Value) -> Result<Target<N>> + Send + Sync;

/// A conditional edge that routes to one of several targets based on state.
///
/// The router returns a label of a closed type; the label map says where each
/// label leads. Every label the type can produce must be mapped, which
/// `compile` checks.
pub struct ConditionalEdge<N> {
    pub from: N,
    route_fn: Arc<RouteFn<N>>,
    targets: Vec<Target<N>>,
    unmapped: Vec<String>,
}

impl<N: NodeName> ConditionalEdge<N> {
    pub fn new<L, F>(
        from: N,
        router: F,
        label_map: impl IntoIterator<Item = (L, Target<N>)>,
    ) -> Self
    where
        L: RouteLabel,
        F: Fn(&Value) -> L + Send + Sync + 'static,
    {
        let map: HashMap<L, Target<N>> = label_map.into_iter().collect();
        let unmapped = L::all()
            .iter()
            .filter(|label| !map.contains_key(label))
            .map(|label| format!("{label:?}"))
            .collect();
        let mut seen = HashSet::new();
        let targets: Vec<Target<N>> = map
            .values()
            .copied()
            .filter(|target| seen.insert(*target))
            .collect();

        let route_fn = move |state: &Value| {
            let label = router(state);
            map.get(&label).copied().ok_or_else(|| {
                GraphError::RouterResolution {
                    node: from.as_str().to_string(),
                    label: format!("{label:?}"),
                }
                .into()
            })
        };

        Self {
            from,
            route_fn: Arc::new(route_fn),
            targets,
            unmapped,
        }
    }

    /// Every target some label leads to.
    pub fn targets(&self) -> &[Target<N>] {
        &self.targets
    }

    /// Labels of the router's type that the label map does not cover.
    pub fn unmapped_labels(&self) -> &[String] {
        &self.unmapped
    }

    /// Resolve the target for the given state.
    pub fn resolve(&self, state: &Value) -> Result<Target<N>> {
        (self.route_fn)(state)
    }
}

/// One branch of a fan-out: a distinct grouping key plus the input seed
/// overlaid on the shared part of the parent state.
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub key: String,
    pub seed: Value,
}

impl Branch {
    pub fn new(key: impl Into<String>, seed: Value) -> Self {
        Self {
            key: key.into(),
            seed,
        }
    }
}

type FanOutFn = dyn Fn(&Value) -> Vec<Branch> + Send + Sync;

/// Dynamic parallel dispatch of `target`, one invocation per branch the
/// router produces, converging on `converge` once every branch finished.
pub struct FanOutEdge<N> {
    pub from: N,
    pub target: N,
    pub converge: N,
    router: Arc<FanOutFn>,
    shared: Vec<String>,
}

impl<N: NodeName> FanOutEdge<N> {
    pub fn new<F>(from: N, target: N, converge: N, router: F) -> Self
    where
        F: Fn(&Value) -> Vec<Branch> + Send + Sync + 'static,
    {
        Self {
            from,
            target,
            converge,
            router: Arc::new(router),
            shared: Vec::new(),
        }
    }

    /// Parent state keys copied into every branch input.
    pub fn share<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shared.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn shared_keys(&self) -> &[String] {
        &self.shared
    }

    /// Branches for the given state.
    pub fn branches(&self, state: &Value) -> Vec<Branch> {
        (self.router)(state)
    }
}
