use std::sync::Arc;

use futures::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use weft_checkpoint::prelude::{CheckpointStore, MemoryCheckpointStore, SqliteCheckpointStore};
use weft_core::error::{Result, WeftError};
use weft_research::mock::{ScriptedGenerator, StaticSearch};
use weft_research::prelude::*;

/// Offline run of the research workflow with scripted capabilities.
///
/// Usage: `weft-research <company> [topics]`, topics as `background;recent_news`.
/// Set `WEFT_CHECKPOINT_DB` to persist threads in SQLite.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "weft_research=info,weft_graph=info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let company = args
        .next()
        .ok_or_else(|| WeftError::InvalidInput("usage: weft-research <company> [topics]".into()))?;
    let topics = match args.next() {
        Some(criteria) => parse_topics(&criteria)?,
        None => Topic::ALL.to_vec(),
    };

    let config = ResearchConfig::from_env()?;
    let store: Arc<dyn CheckpointStore> = match std::env::var("WEFT_CHECKPOINT_DB") {
        Ok(path) => Arc::new(SqliteCheckpointStore::new(path)?),
        Err(_) => Arc::new(MemoryCheckpointStore::new()),
    };
    let app = ResearchApp::new(
        Arc::new(ScriptedGenerator::new()),
        Arc::new(StaticSearch::new()),
        store,
        config,
    )?;

    let mut events = app.stream(ResearchRequest::new(company, topics));
    while let Some(event) = events.next().await {
        match event {
            ResearchEvent::Chunk(chunk) => print!("{chunk}"),
            other => println!("{}", other.as_text()),
        }
    }
    println!();
    Ok(())
}
