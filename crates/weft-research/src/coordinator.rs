use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use weft_checkpoint::store::CheckpointStore;
use weft_core::capability::{Generator, Search};
use weft_core::error::Result;
use weft_core::message::Message;
use weft_graph::compiled::CompiledStateGraph;
use weft_graph::edge::{Branch, FanOutEdge};
use weft_graph::state_graph::{CompileOptions, StateGraph};
use weft_graph::subgraph::subgraph_node;

use crate::config::ResearchConfig;
use crate::prompts::POLISH_PROMPT;
use crate::topic_agent::create_topic_agent;

weft_graph::graph_enum! {
    /// Nodes of the company analysis workflow.
    pub enum CoordinatorNode {
        Router => "router",
        TopicAgent => "topic_agent",
        Aggregate => "aggregate",
        Polish => "polish",
    }
}

fn requested_topics(state: &Value) -> Vec<String> {
    state
        .get("topics")
        .and_then(Value::as_array)
        .map(|topics| {
            topics
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Build the analysis workflow without compiling it.
///
/// `router` fans out one `topic_agent` branch per requested topic; the
/// branches converge on `aggregate`, which joins the sections in request
/// order, and `polish` streams the edited report.
///
/// # State schema
/// - `company`, `topics`, `max_drafts`: input
/// - `reports`: merged mapping topic -> section text
/// - `task_status`: merged mapping topic -> `pending` / `complete`
/// - `final_report`: overwrite
pub fn build_coordinator(
    generator: Arc<dyn Generator>,
    search: Arc<dyn Search>,
    config: &ResearchConfig,
) -> Result<StateGraph<CoordinatorNode>> {
    let topic_agent = create_topic_agent(Arc::clone(&generator), search, config)?;

    let mut graph = StateGraph::new();
    graph.add_merge_key("reports").add_merge_key("task_status");

    graph.add_fn(CoordinatorNode::Router, |state: Value, _config| async move {
        let pending: Map<String, Value> = requested_topics(&state)
            .into_iter()
            .map(|topic| (topic, json!("pending")))
            .collect();
        debug!(topics = pending.len(), "dispatching topic agents");
        Ok(json!({ "task_status": pending }))
    })?;

    let output_mapping = HashMap::from([
        ("reports".to_string(), "reports".to_string()),
        ("task_status".to_string(), "task_status".to_string()),
    ]);
    graph.add_node(
        CoordinatorNode::TopicAgent,
        subgraph_node(topic_agent, HashMap::new(), output_mapping),
    )?;

    graph.add_fn(CoordinatorNode::Aggregate, |state: Value, _config| async move {
        let reports = state.get("reports").cloned().unwrap_or(Value::Null);
        let sections: Vec<&str> = requested_topics(&state)
            .iter()
            .filter_map(|topic| reports.get(topic.as_str()).and_then(Value::as_str))
            .collect();
        Ok(json!({ "final_report": sections.join("\n\n") }))
    })?;

    let gen_clone = Arc::clone(&generator);
    graph.add_fn(CoordinatorNode::Polish, move |state: Value, config| {
        let generator = Arc::clone(&gen_clone);
        async move {
            let report = state
                .get("final_report")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let mut chunks = generator
                .stream(POLISH_PROMPT, &[Message::user(report)])
                .await?;
            let mut polished = String::new();
            while let Some(chunk) = chunks.next().await {
                let chunk = chunk?;
                config.emit_token(chunk.as_str()).await?;
                polished.push_str(&chunk);
            }
            if polished.is_empty() {
                return Ok(Value::Null);
            }
            Ok(json!({ "final_report": polished }))
        }
    })?;

    graph.set_entry_point(CoordinatorNode::Router);
    graph.add_fan_out(
        FanOutEdge::new(
            CoordinatorNode::Router,
            CoordinatorNode::TopicAgent,
            CoordinatorNode::Aggregate,
            |state: &Value| {
                requested_topics(state)
                    .into_iter()
                    .map(|topic| {
                        let seed = json!({ "topic": topic });
                        Branch::new(topic, seed)
                    })
                    .collect()
            },
        )
        .share(["company", "max_drafts"]),
    );
    graph.add_edge(CoordinatorNode::Aggregate, CoordinatorNode::Polish);
    graph.set_finish_point(CoordinatorNode::Polish);

    Ok(graph)
}

/// Create the persisted workflow, pausing before `polish`.
pub fn create_coordinator(
    generator: Arc<dyn Generator>,
    search: Arc<dyn Search>,
    config: &ResearchConfig,
    checkpointer: Arc<dyn CheckpointStore>,
) -> Result<Arc<CompiledStateGraph<CoordinatorNode>>> {
    let options = CompileOptions::new()
        .with_checkpointer(checkpointer)
        .interrupt_before(CoordinatorNode::Polish);
    let graph = build_coordinator(generator, search, config)?.compile_with(options)?;
    info!(nodes = graph.node_names().len(), "research workflow compiled");
    Ok(Arc::new(graph))
}
