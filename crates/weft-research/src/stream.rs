use std::sync::Arc;

use async_stream::stream;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use weft_checkpoint::store::CheckpointStore;
use weft_core::capability::{Generator, Search};
use weft_core::config::RunnableConfig;
use weft_core::error::{Result, WeftError};
use weft_core::stream::GraphEvent;
use weft_graph::compiled::CompiledStateGraph;

use crate::config::ResearchConfig;
use crate::coordinator::{CoordinatorNode, create_coordinator};
use crate::status::status_text;
use crate::topics::Topic;

/// Marks the end of status lines and the start of report chunks.
pub const REPORT_SENTINEL: &str = "<REPORT_STREAM>";

/// A company analysis request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchRequest {
    pub company: String,
    pub topics: Vec<Topic>,
    /// Revisions per section; the configured default when absent.
    #[serde(default)]
    pub max_revisions: Option<usize>,
    /// Thread to run under; a fresh one when absent.
    #[serde(default)]
    pub thread_id: Option<String>,
}

impl ResearchRequest {
    pub fn new(company: impl Into<String>, topics: Vec<Topic>) -> Self {
        Self {
            company: company.into(),
            topics,
            max_revisions: None,
            thread_id: None,
        }
    }

    pub fn with_max_revisions(mut self, max_revisions: usize) -> Self {
        self.max_revisions = Some(max_revisions);
        self
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.company.trim().is_empty() {
            return Err(WeftError::InvalidInput("Company name is empty".into()));
        }
        if self.topics.is_empty() {
            return Err(WeftError::InvalidInput("No topics requested".into()));
        }
        Ok(())
    }
}

/// One item of the caller-facing stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResearchEvent {
    /// Progress line for a completed step.
    Status(String),
    /// Status lines are over; report chunks follow.
    Sentinel,
    /// A piece of the final report.
    Chunk(String),
    /// The run failed; nothing follows.
    Error(String),
}

impl ResearchEvent {
    /// Text form as sent over a plain text channel.
    pub fn as_text(&self) -> String {
        match self {
            ResearchEvent::Status(text) | ResearchEvent::Chunk(text) => text.clone(),
            ResearchEvent::Sentinel => REPORT_SENTINEL.to_string(),
            ResearchEvent::Error(message) => format!("Error: {message}"),
        }
    }
}

fn final_report(state: &Value) -> String {
    state
        .get("final_report")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// The research workflow behind a two-phase event stream.
pub struct ResearchApp {
    graph: Arc<CompiledStateGraph<CoordinatorNode>>,
    config: ResearchConfig,
}

impl ResearchApp {
    pub fn new(
        generator: Arc<dyn Generator>,
        search: Arc<dyn Search>,
        checkpointer: Arc<dyn CheckpointStore>,
        config: ResearchConfig,
    ) -> Result<Self> {
        let graph = create_coordinator(generator, search, &config, checkpointer)?;
        Ok(Self { graph, config })
    }

    /// The compiled workflow, for inspecting or resuming threads directly.
    pub fn graph(&self) -> &Arc<CompiledStateGraph<CoordinatorNode>> {
        &self.graph
    }

    pub fn config(&self) -> &ResearchConfig {
        &self.config
    }

    /// Run `request` and stream its progress.
    ///
    /// Phase 1 yields one [`ResearchEvent::Status`] per completed step until
    /// the workflow pauses before polishing, then [`ResearchEvent::Sentinel`].
    /// Phase 2 resumes the thread and yields the polished report as
    /// [`ResearchEvent::Chunk`]s, at least `chunk_pacing` apart. The engine
    /// releases the edit's tokens only once the edit has finished, so chunks
    /// are a paced replay of the finished output, not live tokens. A failure
    /// at any point yields one [`ResearchEvent::Error`] and ends the stream.
    pub fn stream(&self, request: ResearchRequest) -> BoxStream<'static, ResearchEvent> {
        let graph = Arc::clone(&self.graph);
        let config = self.config.clone();

        Box::pin(stream! {
            if let Err(e) = request.validate() {
                yield ResearchEvent::Error(e.to_string());
                return;
            }
            let thread_id = request
                .thread_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            let executor = graph
                .executor(thread_id.clone())
                .with_event_buffer(config.event_buffer);
            let max_drafts = request.max_revisions.unwrap_or(config.max_revisions);
            let run_config =
                RunnableConfig::new().with_recursion_limit(config.recursion_limit_for(max_drafts));
            let topics: Vec<&str> = request.topics.iter().map(|t| t.key()).collect();
            let input = json!({
                "company": request.company,
                "topics": topics,
                "max_drafts": max_drafts,
            });
            info!(thread_id = %thread_id, company = %request.company, topics = topics.len(), "research started");

            let mut events = match executor.stream(input, run_config.clone()) {
                Ok(events) => events,
                Err(e) => {
                    warn!(thread_id = %thread_id, error = %e, "research could not start");
                    yield ResearchEvent::Error(e.to_string());
                    return;
                }
            };

            let mut paused = false;
            let mut completed_report = None;
            while let Some(event) = events.next().await {
                match event {
                    GraphEvent::NodeEnd { node, label, .. } => {
                        if let Some(text) = status_text(&node, label.as_deref()) {
                            yield ResearchEvent::Status(text);
                        }
                    }
                    GraphEvent::Interrupted { .. } => paused = true,
                    GraphEvent::Complete { state, .. } => {
                        completed_report = Some(final_report(&state));
                    }
                    GraphEvent::Error { message } => {
                        warn!(thread_id = %thread_id, error = %message, "research failed");
                        yield ResearchEvent::Error(message);
                        return;
                    }
                    GraphEvent::Token { .. } => {}
                }
            }
            // The run task holds the thread until it returns.
            if let Err(e) = events.finish().await {
                yield ResearchEvent::Error(e.to_string());
                return;
            }

            yield ResearchEvent::Sentinel;

            if !paused {
                yield ResearchEvent::Chunk(completed_report.unwrap_or_default());
                return;
            }

            info!(thread_id = %thread_id, "resuming for the final report");
            let mut events = match executor.resume_stream(run_config) {
                Ok(events) => events,
                Err(e) => {
                    yield ResearchEvent::Error(e.to_string());
                    return;
                }
            };
            let mut streamed = false;
            while let Some(event) = events.next().await {
                match event {
                    GraphEvent::Token { chunk, .. } => {
                        if streamed {
                            tokio::time::sleep(config.chunk_pacing()).await;
                        }
                        streamed = true;
                        yield ResearchEvent::Chunk(chunk);
                    }
                    GraphEvent::Complete { state, .. } => {
                        if !streamed {
                            yield ResearchEvent::Chunk(final_report(&state));
                        }
                    }
                    GraphEvent::Error { message } => {
                        warn!(thread_id = %thread_id, error = %message, "final report failed");
                        yield ResearchEvent::Error(message);
                        return;
                    }
                    GraphEvent::NodeEnd { .. } | GraphEvent::Interrupted { .. } => {}
                }
            }
            info!(thread_id = %thread_id, "research complete");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_validation() {
        let ok = ResearchRequest::new("Acme", vec![Topic::Background]);
        assert!(ok.validate().is_ok());
        assert!(ResearchRequest::new("  ", vec![Topic::Background]).validate().is_err());
        assert!(ResearchRequest::new("Acme", vec![]).validate().is_err());
    }

    #[test]
    fn request_deserializes_with_defaults() {
        let request: ResearchRequest =
            serde_json::from_value(json!({"company": "Acme", "topics": ["recent_news"]})).unwrap();
        assert_eq!(request.topics, vec![Topic::RecentNews]);
        assert_eq!(request.max_revisions, None);
    }

    #[test]
    fn text_forms() {
        assert_eq!(ResearchEvent::Sentinel.as_text(), "<REPORT_STREAM>");
        assert_eq!(ResearchEvent::Status("s".into()).as_text(), "s");
        assert_eq!(ResearchEvent::Error("boom".into()).as_text(), "Error: boom");
    }
}
