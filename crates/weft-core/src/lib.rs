pub mod capability;
pub mod config;
pub mod error;
pub mod message;
pub mod runnable;
pub mod stream;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::capability::{ChunkStream, Generator, GeneratorExt, Search, SearchDomain};
    pub use crate::config::RunnableConfig;
    pub use crate::error::{Result, WeftError};
    pub use crate::message::Message;
    pub use crate::runnable::Runnable;
    pub use crate::stream::GraphEvent;
}
