use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use weft_core::error::{Result, WeftError};

/// Tunables of the research workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    /// Revisions per section when the request does not say.
    pub max_revisions: usize,
    /// Results fetched per query during initial research.
    pub research_results: usize,
    /// Results fetched per query when addressing reviewer notes.
    pub refine_results: usize,
    /// Minimum delay between streamed report chunks.
    pub chunk_pacing_ms: u64,
    pub recursion_limit: usize,
    /// Capacity of the engine's event channel.
    pub event_buffer: usize,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_revisions: 2,
            research_results: 3,
            refine_results: 2,
            chunk_pacing_ms: 20,
            recursion_limit: 25,
            event_buffer: 64,
        }
    }
}

impl ResearchConfig {
    pub fn chunk_pacing(&self) -> Duration {
        Duration::from_millis(self.chunk_pacing_ms)
    }

    pub fn with_max_revisions(mut self, max_revisions: usize) -> Self {
        self.max_revisions = max_revisions;
        self
    }

    pub fn with_chunk_pacing(mut self, pacing: Duration) -> Self {
        self.chunk_pacing_ms = u64::try_from(pacing.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Dispatch limit for a run allowing `max_revisions` revisions per
    /// section.
    ///
    /// A section loop dispatches `3 + 3k` nodes and the coordinator around it
    /// four, so the configured limit is raised when the budget needs it.
    pub fn recursion_limit_for(&self, max_revisions: usize) -> usize {
        self.recursion_limit
            .max(max_revisions.saturating_mul(3).saturating_add(4))
    }

    /// Read overrides from `WEFT_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from defaults overridden by `lookup`, which maps variable names
    /// such as `WEFT_MAX_REVISIONS` to values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        override_with(&lookup, "WEFT_MAX_REVISIONS", &mut config.max_revisions)?;
        override_with(&lookup, "WEFT_RESEARCH_RESULTS", &mut config.research_results)?;
        override_with(&lookup, "WEFT_REFINE_RESULTS", &mut config.refine_results)?;
        override_with(&lookup, "WEFT_CHUNK_PACING_MS", &mut config.chunk_pacing_ms)?;
        override_with(&lookup, "WEFT_RECURSION_LIMIT", &mut config.recursion_limit)?;
        override_with(&lookup, "WEFT_EVENT_BUFFER", &mut config.event_buffer)?;
        Ok(config)
    }
}

fn override_with<F, T>(lookup: &F, key: &str, slot: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e| WeftError::InvalidInput(format!("{key}={raw:?}: {e}")))?;
    }
    Ok(())
}
