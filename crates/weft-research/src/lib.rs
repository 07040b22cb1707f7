//! Multi-section company analysis on the Weft graph engine.
//!
//! A coordinator graph fans out one draft/critique loop per requested topic,
//! joins the sections, pauses before the final edit and streams the edited
//! report in a second phase.

pub mod config;
pub mod coordinator;
pub mod mock;
pub mod prompts;
pub mod status;
pub mod stream;
pub mod topic_agent;
pub mod topics;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::ResearchConfig;
    pub use crate::coordinator::{CoordinatorNode, build_coordinator, create_coordinator};
    pub use crate::status::status_text;
    pub use crate::stream::{REPORT_SENTINEL, ResearchApp, ResearchEvent, ResearchRequest};
    pub use crate::topic_agent::{TopicNode, TopicState, build_topic_agent, create_topic_agent};
    pub use crate::topics::{Topic, parse_topics};
}
