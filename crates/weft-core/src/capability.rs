use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use schemars::JsonSchema;
use schemars::schema::RootSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CapabilityError, Result};
use crate::message::Message;

/// Stream of text chunks produced by a generator.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Text generation provider.
///
/// Implementations handle provider communication; the engine never retries
/// a failed call.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate free text from a system prompt and conversation.
    async fn generate(&self, prompt: &str, messages: &[Message]) -> Result<String>;

    /// Generate a JSON value conforming to `shape`.
    async fn generate_structured(
        &self,
        prompt: &str,
        messages: &[Message],
        shape: &RootSchema,
    ) -> Result<Value>;

    /// Stream generated text chunk by chunk.
    ///
    /// Default implementation yields the whole `generate` result as one chunk.
    async fn stream(&self, prompt: &str, messages: &[Message]) -> Result<ChunkStream> {
        let text = self.generate(prompt, messages).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(text) })))
    }
}

/// Typed structured generation on top of [`Generator`].
#[async_trait]
pub trait GeneratorExt: Generator {
    /// Derive the response shape from `T`, generate, and deserialize.
    async fn generate_typed<T>(&self, prompt: &str, messages: &[Message]) -> Result<T>
    where
        T: JsonSchema + DeserializeOwned + Send,
    {
        let shape = schemars::schema_for!(T);
        let value = self.generate_structured(prompt, messages, &shape).await?;
        serde_json::from_value(value)
            .map_err(|e| CapabilityError::InvalidResponse(e.to_string()).into())
    }
}

impl<G: Generator + ?Sized> GeneratorExt for G {}

/// Result domain a search is restricted to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchDomain {
    #[default]
    General,
    News,
}

impl fmt::Display for SearchDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchDomain::General => f.write_str("general"),
            SearchDomain::News => f.write_str("news"),
        }
    }
}

/// Web search provider returning plain-text result contents.
#[async_trait]
pub trait Search: Send + Sync {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        domain: SearchDomain,
    ) -> Result<Vec<String>>;
}
