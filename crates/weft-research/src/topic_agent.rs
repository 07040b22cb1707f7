use std::sync::Arc;

use futures::future::try_join_all;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use weft_core::capability::{Generator, GeneratorExt, Search, SearchDomain};
use weft_core::error::Result;
use weft_core::message::Message;
use weft_graph::compiled::CompiledStateGraph;
use weft_graph::edge::{ConditionalEdge, Target};
use weft_graph::state_graph::StateGraph;

use crate::config::ResearchConfig;
use crate::prompts::{REFINE_PROMPT, critique_prompt, research_prompt, writer_prompt};
use crate::topics::Topic;

weft_graph::graph_enum! {
    /// Nodes of the per-section draft/critique loop.
    pub enum TopicNode {
        Research => "research",
        Generate => "generate",
        Critique => "critique",
        Refine => "refine",
        ToParent => "to_parent",
    }
}

/// State of one section while it is being written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicState {
    pub company: String,
    pub topic: Topic,
    #[serde(default)]
    pub max_drafts: usize,
    #[serde(default)]
    pub docs: Vec<String>,
    #[serde(default)]
    pub draft: Option<String>,
    #[serde(default)]
    pub draft_number: usize,
    #[serde(default)]
    pub critique: Option<String>,
}

impl TopicState {
    pub fn from_value(state: Value) -> Result<Self> {
        Ok(serde_json::from_value(state)?)
    }

    /// Completed revisions have reached the allowance.
    pub fn is_ready(&self) -> bool {
        self.draft_number.saturating_sub(1) >= self.max_drafts
    }
}

/// Loop exit check on raw state; absent counters read as 0.
fn is_ready(state: &Value) -> bool {
    let count = |key: &str| {
        state
            .get(key)
            .and_then(Value::as_u64)
            .map_or(0, |n| usize::try_from(n).unwrap_or(usize::MAX))
    };
    count("draft_number").saturating_sub(1) >= count("max_drafts")
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SearchQueries {
    queries: Vec<String>,
}

async fn search_all(
    search: &dyn Search,
    queries: &[String],
    max_results: usize,
    domain: SearchDomain,
) -> Result<Vec<String>> {
    let batches = try_join_all(
        queries
            .iter()
            .map(|query| search.search(query, max_results, domain)),
    )
    .await?;
    Ok(batches.into_iter().flatten().collect())
}

/// Build the section loop without compiling it.
///
/// The graph follows `research -> generate -> (ready ? to_parent : critique ->
/// refine -> generate)`.
///
/// # State schema
/// - `company`, `topic`, `max_drafts`: input
/// - `docs`: append, evidence gathered by research and refine
/// - `draft`, `draft_number`, `critique`: overwrite
/// - `reports`, `task_status`: merged mappings keyed by topic, filled by
///   `to_parent`
pub fn build_topic_agent(
    generator: Arc<dyn Generator>,
    search: Arc<dyn Search>,
    config: &ResearchConfig,
) -> Result<StateGraph<TopicNode>> {
    let research_results = config.research_results;
    let refine_results = config.refine_results;

    let mut graph = StateGraph::new();
    graph
        .add_append_key("docs")
        .add_merge_key("reports")
        .add_merge_key("task_status")
        .set_label_key("topic");

    let (gen_clone, search_clone) = (Arc::clone(&generator), Arc::clone(&search));
    graph.add_fn(TopicNode::Research, move |state: Value, _config| {
        let generator = Arc::clone(&gen_clone);
        let search = Arc::clone(&search_clone);
        async move {
            let state = TopicState::from_value(state)?;
            let plan: SearchQueries = generator
                .generate_typed(
                    &research_prompt(state.topic),
                    &[Message::user(state.company.as_str())],
                )
                .await?;
            let docs = search_all(
                search.as_ref(),
                &plan.queries,
                research_results,
                state.topic.search_domain(),
            )
            .await?;
            debug!(topic = %state.topic, queries = plan.queries.len(), docs = docs.len(), "research done");
            Ok(json!({ "docs": docs }))
        }
    })?;

    let gen_clone = Arc::clone(&generator);
    graph.add_fn(TopicNode::Generate, move |state: Value, _config| {
        let generator = Arc::clone(&gen_clone);
        async move {
            let state = TopicState::from_value(state)?;
            let prompt = writer_prompt(state.topic, &state.docs.join("\n\n"));
            let draft = generator
                .generate(&prompt, &[Message::user(state.company.as_str())])
                .await?;
            let draft_number = state.draft_number + 1;
            debug!(topic = %state.topic, draft_number, "draft written");
            Ok(json!({ "draft": draft, "draft_number": draft_number }))
        }
    })?;

    let gen_clone = Arc::clone(&generator);
    graph.add_fn(TopicNode::Critique, move |state: Value, _config| {
        let generator = Arc::clone(&gen_clone);
        async move {
            let state = TopicState::from_value(state)?;
            let draft = state.draft.unwrap_or_default();
            let critique = generator
                .generate(&critique_prompt(state.topic), &[Message::user(draft)])
                .await?;
            Ok(json!({ "critique": critique }))
        }
    })?;

    let (gen_clone, search_clone) = (Arc::clone(&generator), Arc::clone(&search));
    graph.add_fn(TopicNode::Refine, move |state: Value, _config| {
        let generator = Arc::clone(&gen_clone);
        let search = Arc::clone(&search_clone);
        async move {
            let state = TopicState::from_value(state)?;
            let notes = state.critique.unwrap_or_default();
            let plan: SearchQueries = generator
                .generate_typed(REFINE_PROMPT, &[Message::user(notes)])
                .await?;
            let docs = search_all(
                search.as_ref(),
                &plan.queries,
                refine_results,
                SearchDomain::General,
            )
            .await?;
            debug!(topic = %state.topic, docs = docs.len(), "refine done");
            Ok(json!({ "docs": docs }))
        }
    })?;

    graph.add_fn(TopicNode::ToParent, |state: Value, _config| async move {
        let state = TopicState::from_value(state)?;
        let key = state.topic.key();
        Ok(json!({
            "reports": { key: state.draft.unwrap_or_default() },
            "task_status": { key: "complete" },
        }))
    })?;

    graph.set_entry_point(TopicNode::Research);
    graph.add_edge(TopicNode::Research, TopicNode::Generate);
    graph.add_conditional_edges(ConditionalEdge::new(
        TopicNode::Generate,
        is_ready,
        [
            (true, Target::Node(TopicNode::ToParent)),
            (false, Target::Node(TopicNode::Critique)),
        ],
    ));
    graph.add_edge(TopicNode::Critique, TopicNode::Refine);
    graph.add_edge(TopicNode::Refine, TopicNode::Generate);
    graph.set_finish_point(TopicNode::ToParent);

    Ok(graph)
}

/// Create the compiled, non-persisted section loop.
pub fn create_topic_agent(
    generator: Arc<dyn Generator>,
    search: Arc<dyn Search>,
    config: &ResearchConfig,
) -> Result<Arc<CompiledStateGraph<TopicNode>>> {
    Ok(Arc::new(build_topic_agent(generator, search, config)?.compile()?))
}
