use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use weft_core::config::RunnableConfig;
use weft_core::error::Result;
use weft_core::runnable::Runnable;

use crate::compiled::CompiledStateGraph;
use crate::node::NodeName;

/// A compiled graph embedded as a node of a parent graph.
///
/// The inner graph runs without checkpoints; its progress events carry the
/// parent node (and fan-out branch) as an extra namespace segment.
pub struct SubgraphNode<N: NodeName> {
    inner: Arc<CompiledStateGraph<N>>,
    input_mapping: HashMap<String, String>,
    output_mapping: HashMap<String, String>,
}

/// Create a sub-graph node.
///
/// - `input_mapping`: parent state key → inner input key. Empty passes the
///   whole parent state.
/// - `output_mapping`: inner final-state key → parent update key. Empty
///   returns the whole inner final state as the update.
pub fn subgraph_node<N: NodeName>(
    inner: Arc<CompiledStateGraph<N>>,
    input_mapping: HashMap<String, String>,
    output_mapping: HashMap<String, String>,
) -> SubgraphNode<N> {
    SubgraphNode {
        inner,
        input_mapping,
        output_mapping,
    }
}

fn remap(value: &Value, mapping: &HashMap<String, String>) -> Value {
    if mapping.is_empty() {
        return value.clone();
    }
    let mut out = Map::new();
    if let Value::Object(source) = value {
        for (from, to) in mapping {
            if let Some(v) = source.get(from) {
                out.insert(to.clone(), v.clone());
            }
        }
    }
    Value::Object(out)
}

#[async_trait]
impl<N: NodeName> Runnable for SubgraphNode<N> {
    type Input = Value;
    type Output = Value;

    async fn invoke(&self, state: Value, config: &RunnableConfig) -> Result<Value> {
        let inner_config = config.nested(config.scope_segment());
        let input = remap(&state, &self.input_mapping);
        let output = self.inner.invoke(input, &inner_config).await?;
        Ok(remap(&output, &self.output_mapping))
    }
}
