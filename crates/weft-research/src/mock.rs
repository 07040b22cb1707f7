//! Deterministic capabilities for tests and offline runs.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use schemars::schema::RootSchema;
use serde_json::{Value, json};

use weft_core::capability::{ChunkStream, Generator, Search, SearchDomain};
use weft_core::error::{CapabilityError, Result};
use weft_core::message::Message;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Generate,
    Structured,
    Stream,
}

/// One request seen by [`ScriptedGenerator`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub kind: CallKind,
    pub prompt: String,
    /// Content of the last message.
    pub input: String,
}

type Responder = dyn Fn(&str, &str) -> String + Send + Sync;

/// A generator whose replies are computed from the prompt and input.
///
/// By default free text replies are `"<first prompt line> | <input>"` and
/// structured replies are `{"queries": ["<input> #1", "<input> #2"]}`.
pub struct ScriptedGenerator {
    responder: Arc<Responder>,
    queries_per_call: usize,
    chunk_size: usize,
    fail_on: Option<String>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl Default for ScriptedGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self {
            responder: Arc::new(|prompt: &str, input: &str| {
                let heading = prompt.lines().next().unwrap_or_default();
                format!("{heading} | {input}")
            }),
            queries_per_call: 2,
            chunk_size: 8,
            fail_on: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Compute free text replies with `responder(prompt, input)`.
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&str, &str) -> String + Send + Sync + 'static,
    {
        self.responder = Arc::new(responder);
        self
    }

    pub fn with_queries_per_call(mut self, count: usize) -> Self {
        self.queries_per_call = count;
        self
    }

    /// Size in characters of streamed chunks; `0` streams nothing.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Fail every call whose prompt contains `pattern`.
    pub fn failing_on(mut self, pattern: impl Into<String>) -> Self {
        self.fail_on = Some(pattern.into());
        self
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    /// Number of calls of `kind` whose prompt starts with `prefix`.
    pub fn count(&self, kind: CallKind, prefix: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| call.kind == kind && call.prompt.starts_with(prefix))
            .count()
    }

    fn record(&self, kind: CallKind, prompt: &str, messages: &[Message]) -> Result<String> {
        let input = messages
            .last()
            .map(|m| m.content().to_string())
            .unwrap_or_default();
        lock(&self.calls).push(RecordedCall {
            kind,
            prompt: prompt.to_string(),
            input: input.clone(),
        });
        if let Some(pattern) = &self.fail_on {
            if prompt.contains(pattern.as_str()) {
                return Err(CapabilityError::Generation(format!(
                    "scripted failure for prompt matching '{pattern}'"
                ))
                .into());
            }
        }
        Ok(input)
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, prompt: &str, messages: &[Message]) -> Result<String> {
        let input = self.record(CallKind::Generate, prompt, messages)?;
        Ok((self.responder)(prompt, &input))
    }

    async fn generate_structured(
        &self,
        prompt: &str,
        messages: &[Message],
        _shape: &RootSchema,
    ) -> Result<Value> {
        let input = self.record(CallKind::Structured, prompt, messages)?;
        let queries: Vec<String> = (1..=self.queries_per_call)
            .map(|i| format!("{input} #{i}"))
            .collect();
        Ok(json!({ "queries": queries }))
    }

    async fn stream(&self, prompt: &str, messages: &[Message]) -> Result<ChunkStream> {
        let input = self.record(CallKind::Stream, prompt, messages)?;
        let text = (self.responder)(prompt, &input);
        let chunks: Vec<Result<String>> = if self.chunk_size == 0 {
            Vec::new()
        } else {
            text.chars()
                .collect::<Vec<_>>()
                .chunks(self.chunk_size)
                .map(|c| Ok(c.iter().collect()))
                .collect()
        };
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

/// One request seen by [`StaticSearch`].
#[derive(Debug, Clone, PartialEq)]
pub struct SearchCall {
    pub query: String,
    pub max_results: usize,
    pub domain: SearchDomain,
}

/// A search capability returning `max_results` synthetic documents per query.
#[derive(Default)]
pub struct StaticSearch {
    fail: bool,
    calls: Mutex<Vec<SearchCall>>,
}

impl StaticSearch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every search.
    pub fn failing() -> Self {
        Self {
            fail: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<SearchCall> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl Search for StaticSearch {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        domain: SearchDomain,
    ) -> Result<Vec<String>> {
        lock(&self.calls).push(SearchCall {
            query: query.to_string(),
            max_results,
            domain,
        });
        if self.fail {
            return Err(CapabilityError::Search(format!("search for '{query}' failed")).into());
        }
        Ok((1..=max_results)
            .map(|i| format!("[{domain}] {query} result {i}"))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use weft_core::capability::GeneratorExt;

    #[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
    struct Queries {
        queries: Vec<String>,
    }

    #[tokio::test]
    async fn default_replies_echo_heading_and_input() {
        let generator = ScriptedGenerator::new();
        let text = generator
            .generate("Heading line\nmore", &[Message::user("Acme")])
            .await
            .unwrap();
        assert_eq!(text, "Heading line | Acme");
        assert_eq!(generator.count(CallKind::Generate, "Heading"), 1);
    }

    #[tokio::test]
    async fn structured_replies_deserialize_as_queries() {
        let generator = ScriptedGenerator::new().with_queries_per_call(3);
        let queries: Queries = generator
            .generate_typed("q", &[Message::user("Acme")])
            .await
            .unwrap();
        assert_eq!(queries.queries, vec!["Acme #1", "Acme #2", "Acme #3"]);
    }

    #[tokio::test]
    async fn stream_splits_into_chunks() {
        let generator = ScriptedGenerator::new()
            .with_responder(|_, _| "abcdefghij".into())
            .with_chunk_size(4);
        let chunks: Vec<String> = generator
            .stream("p", &[])
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks, vec!["abcd", "efgh", "ij"]);
    }

    #[tokio::test]
    async fn failure_injection_matches_prompt() {
        let generator = ScriptedGenerator::new().failing_on("review");
        assert!(generator.generate("please review", &[]).await.is_err());
        assert!(generator.generate("please write", &[]).await.is_ok());
        assert_eq!(generator.calls().len(), 2);
    }

    #[tokio::test]
    async fn search_returns_requested_count() {
        let search = StaticSearch::new();
        let docs = search.search("acme revenue", 3, SearchDomain::News).await.unwrap();
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[0], "[news] acme revenue result 1");
        assert_eq!(search.calls()[0].max_results, 3);
        assert!(StaticSearch::failing().search("x", 1, SearchDomain::General).await.is_err());
    }
}
