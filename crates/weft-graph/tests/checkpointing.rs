//! Persisted runs: gap-free checkpoint steps, interrupt and resume, store
//! failures and time travel.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use weft_checkpoint::prelude::*;
use weft_core::config::RunnableConfig;
use weft_core::error::{CheckpointError, GraphError, Result, WeftError};
use weft_graph::prelude::*;

graph_enum! {
    enum Stage {
        Draft => "draft",
        Review => "review",
        Publish => "publish",
    }
}

fn pipeline(
    store: Arc<dyn CheckpointStore>,
    pause_before: Option<Stage>,
) -> Arc<CompiledStateGraph<Stage>> {
    let mut g = StateGraph::new();
    g.add_append_key("history");
    g.add_fn(Stage::Draft, |state: Value, _cfg| async move {
        let n = state["n"].as_i64().unwrap_or(0);
        Ok(json!({"n": n + 1, "history": "draft"}))
    })
    .unwrap();
    g.add_fn(Stage::Review, |state: Value, _cfg| async move {
        let n = state["n"].as_i64().unwrap_or(0);
        Ok(json!({"n": n * 10, "history": "review"}))
    })
    .unwrap();
    g.add_fn(Stage::Publish, |state: Value, _cfg| async move {
        let n = state["n"].as_i64().unwrap_or(0);
        Ok(json!({"published": n, "history": "publish"}))
    })
    .unwrap();
    g.set_entry_point(Stage::Draft);
    g.add_edge(Stage::Draft, Stage::Review);
    g.add_edge(Stage::Review, Stage::Publish);
    g.set_finish_point(Stage::Publish);

    let mut options = CompileOptions::new().with_checkpointer(store);
    if let Some(node) = pause_before {
        options = options.interrupt_before(node);
    }
    Arc::new(g.compile_with(options).unwrap())
}

fn memory() -> Arc<dyn CheckpointStore> {
    Arc::new(MemoryCheckpointStore::new())
}

#[tokio::test]
async fn every_node_writes_one_checkpoint_without_gaps() {
    let store = memory();
    let graph = pipeline(Arc::clone(&store), None);
    let output = graph
        .executor("t1")
        .run(json!({"n": 1}), &RunnableConfig::default())
        .await
        .unwrap();
    assert!(output.is_complete());

    let history = get_state_history(store.as_ref(), "t1").await.unwrap();
    let steps: Vec<usize> = history.iter().map(|cp| cp.step).collect();
    assert_eq!(steps, vec![0, 1, 2]);

    let nodes: Vec<Option<&str>> = history
        .iter()
        .map(|cp| cp.metadata.node_name.as_deref())
        .collect();
    assert_eq!(nodes, vec![Some("draft"), Some("review"), Some("publish")]);
    assert!(history.iter().all(|cp| cp.metadata.source == CheckpointSource::Loop));

    assert_eq!(history[0].next_node.as_deref(), Some("review"));
    assert_eq!(history[0].state["n"], json!(2));
    assert_eq!(
        history[1].metadata.writes,
        Some(json!({"n": 20, "history": "review"}))
    );
    assert!(history[2].is_terminal());
}

#[tokio::test]
async fn new_run_on_existing_thread_continues_the_sequence() {
    let store = memory();
    let graph = pipeline(Arc::clone(&store), None);
    let executor = graph.executor("again");
    executor.run(json!({"n": 1}), &RunnableConfig::default()).await.unwrap();
    executor.run(json!({"n": 5}), &RunnableConfig::default()).await.unwrap();

    let steps: Vec<usize> = store
        .list("again")
        .await
        .unwrap()
        .iter()
        .map(|cp| cp.step)
        .collect();
    assert_eq!(steps, (0..6).collect::<Vec<_>>());
    let latest = executor.latest().await.unwrap().unwrap();
    assert_eq!(latest.state["published"], json!(60));
}

#[tokio::test]
async fn interrupt_then_resume_matches_uninterrupted_run() {
    let store = memory();
    let paused = pipeline(Arc::clone(&store), Some(Stage::Publish));
    let straight = pipeline(Arc::clone(&store), None);

    let reference = straight
        .executor("straight")
        .run(json!({"n": 3}), &RunnableConfig::default())
        .await
        .unwrap()
        .into_value();

    let executor = paused.executor("paused");
    let first = executor
        .run(json!({"n": 3}), &RunnableConfig::default())
        .await
        .unwrap();
    match &first {
        GraphOutput::Interrupted { node, step, state } => {
            assert_eq!(node, "publish");
            assert_eq!(*step, 2);
            assert_eq!(state["n"], json!(40));
            assert!(state.get("published").is_none());
        }
        other => panic!("expected interrupt, got {other:?}"),
    }

    let latest = executor.latest().await.unwrap().unwrap();
    assert_eq!(latest.metadata.source, CheckpointSource::Interrupt);
    assert_eq!(latest.next_node.as_deref(), Some("publish"));

    let resumed = executor.resume(&RunnableConfig::default()).await.unwrap();
    assert!(resumed.is_complete());
    assert_eq!(resumed.into_value(), reference);

    let steps: Vec<usize> = store
        .list("paused")
        .await
        .unwrap()
        .iter()
        .map(|cp| cp.step)
        .collect();
    assert_eq!(steps, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn resuming_a_finished_thread_is_a_no_op() {
    let store = memory();
    let graph = pipeline(Arc::clone(&store), None);
    let executor = graph.executor("done");
    let first = executor
        .run(json!({"n": 2}), &RunnableConfig::default())
        .await
        .unwrap()
        .into_value();

    let again = executor.resume(&RunnableConfig::default()).await.unwrap();
    assert_eq!(again.into_value(), first);
    assert_eq!(store.list("done").await.unwrap().len(), 3);
}

#[tokio::test]
async fn resuming_an_unknown_thread_fails() {
    let graph = pipeline(memory(), None);
    let err = graph
        .executor("ghost")
        .resume(&RunnableConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, WeftError::Graph(GraphError::ThreadNotFound(id)) if id == "ghost"));
}

#[tokio::test]
async fn resuming_without_a_store_fails() {
    let mut g = StateGraph::new();
    g.add_fn(Stage::Draft, |_state: Value, _cfg| async move { Ok(json!({})) })
        .unwrap();
    g.set_entry_point(Stage::Draft);
    g.set_finish_point(Stage::Draft);
    let graph = Arc::new(g.compile().unwrap());

    let executor = graph.executor("t");
    assert!(executor.run(json!({}), &RunnableConfig::default()).await.is_ok());
    assert!(executor.latest().await.unwrap().is_none());
    let err = executor.resume(&RunnableConfig::default()).await.unwrap_err();
    assert!(matches!(err, WeftError::Graph(GraphError::ThreadNotFound(_))));
}

#[tokio::test]
async fn paused_run_survives_a_store_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("checkpoints.db");

    {
        let store: Arc<dyn CheckpointStore> = Arc::new(SqliteCheckpointStore::new(&path).unwrap());
        let graph = pipeline(store, Some(Stage::Review));
        let output = graph
            .executor("durable")
            .run(json!({"n": 7}), &RunnableConfig::default())
            .await
            .unwrap();
        assert!(output.is_interrupted());
    }

    let store: Arc<dyn CheckpointStore> = Arc::new(SqliteCheckpointStore::new(&path).unwrap());
    let graph = pipeline(store, Some(Stage::Review));
    let output = graph
        .executor("durable")
        .resume(&RunnableConfig::default())
        .await
        .unwrap();
    let state = output.into_value();
    assert_eq!(state["published"], json!(80));
    assert_eq!(state["history"], json!(["draft", "review", "publish"]));
}

#[tokio::test]
async fn fork_resumes_independently_of_its_source() {
    let store = memory();
    let graph = pipeline(Arc::clone(&store), Some(Stage::Publish));
    let source = graph.executor("source");
    source.run(json!({"n": 1}), &RunnableConfig::default()).await.unwrap();

    // Step 0 is "draft done, review next".
    let at_zero = replay_to_step(store.as_ref(), "source", 0).await.unwrap().unwrap();
    assert_eq!(at_zero.next_node.as_deref(), Some("review"));

    let forked = fork_thread(store.as_ref(), "source", 2, "branch").await.unwrap();
    assert_eq!(forked.step, 0);
    assert_eq!(forked.metadata.source, CheckpointSource::Fork);

    let output = graph
        .executor("branch")
        .resume(&RunnableConfig::default())
        .await
        .unwrap();
    assert_eq!(output.into_value()["published"], json!(20));

    // The source thread is still paused where it was.
    let latest = source.latest().await.unwrap().unwrap();
    assert_eq!(latest.step, 2);
    assert_eq!(latest.metadata.source, CheckpointSource::Interrupt);
}

#[tokio::test]
async fn fork_into_used_thread_is_rejected() {
    let store = memory();
    let graph = pipeline(Arc::clone(&store), None);
    graph.executor("a").run(json!({"n": 1}), &RunnableConfig::default()).await.unwrap();
    graph.executor("b").run(json!({"n": 1}), &RunnableConfig::default()).await.unwrap();

    let err = fork_thread(store.as_ref(), "a", 0, "b").await.unwrap_err();
    assert!(matches!(err, WeftError::InvalidInput(_)));
}

graph_enum! {
    enum Split {
        Start => "start",
        Each => "each",
        End => "end",
    }
}

#[tokio::test]
async fn fan_out_writes_a_single_fan_in_checkpoint() {
    let store = memory();
    let mut g = StateGraph::new();
    g.add_merge_key("parts");
    g.add_fn(Split::Start, |_state: Value, _cfg| async move {
        Ok(json!({"keys": ["p", "q", "r"]}))
    })
    .unwrap();
    g.add_fn(Split::Each, |input: Value, _cfg| async move {
        let key = input["key"].as_str().unwrap_or_default().to_string();
        Ok(json!({"parts": {key: true}}))
    })
    .unwrap();
    g.add_fn(Split::End, |_state: Value, _cfg| async move { Ok(json!({})) })
        .unwrap();
    g.set_entry_point(Split::Start);
    g.add_fan_out(FanOutEdge::new(Split::Start, Split::Each, Split::End, |state: &Value| {
        state["keys"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .map(|k| Branch::new(k, json!({"key": k})))
            .collect()
    }));
    g.set_finish_point(Split::End);
    let graph = Arc::new(
        g.compile_with(CompileOptions::new().with_checkpointer(Arc::clone(&store)))
            .unwrap(),
    );

    graph.executor("fan").run(json!({}), &RunnableConfig::default()).await.unwrap();

    let history = store.list("fan").await.unwrap();
    assert_eq!(history.len(), 3);
    let fan_in = &history[1];
    assert_eq!(fan_in.metadata.source, CheckpointSource::FanIn);
    assert_eq!(fan_in.metadata.node_name.as_deref(), Some("each"));
    assert_eq!(fan_in.next_node.as_deref(), Some("end"));
    assert_eq!(fan_in.state["parts"], json!({"p": true, "q": true, "r": true}));
    let writes = fan_in.metadata.writes.as_ref().and_then(Value::as_array).unwrap();
    assert_eq!(writes.len(), 3);
}

/// A store that refuses every write.
struct FailingStore;

#[async_trait]
impl CheckpointStore for FailingStore {
    async fn append(&self, _thread_id: &str, _snapshot: Snapshot) -> Result<usize> {
        Err(CheckpointError::StoreUnavailable("disk full".into()).into())
    }
    async fn latest(&self, _thread_id: &str) -> Result<Option<Checkpoint>> {
        Ok(None)
    }
    async fn get(&self, _thread_id: &str, _step: usize) -> Result<Option<Checkpoint>> {
        Ok(None)
    }
    async fn list(&self, _thread_id: &str) -> Result<Vec<Checkpoint>> {
        Ok(Vec::new())
    }
    async fn delete_thread(&self, _thread_id: &str) -> Result<()> {
        Ok(())
    }
}

/// A store that always claims to have written step 7.
struct SkippingStore(MemoryCheckpointStore);

#[async_trait]
impl CheckpointStore for SkippingStore {
    async fn append(&self, thread_id: &str, snapshot: Snapshot) -> Result<usize> {
        self.0.append(thread_id, snapshot).await?;
        Ok(7)
    }
    async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        self.0.latest(thread_id).await
    }
    async fn get(&self, thread_id: &str, step: usize) -> Result<Option<Checkpoint>> {
        self.0.get(thread_id, step).await
    }
    async fn list(&self, thread_id: &str) -> Result<Vec<Checkpoint>> {
        self.0.list(thread_id).await
    }
    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        self.0.delete_thread(thread_id).await
    }
}

#[tokio::test]
async fn store_failure_fails_the_run() {
    let graph = pipeline(Arc::new(FailingStore), None);
    let err = graph
        .executor("t")
        .run(json!({"n": 1}), &RunnableConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WeftError::Checkpoint(CheckpointError::StoreUnavailable(_))
    ));
}

#[tokio::test]
async fn unexpected_step_from_store_is_detected() {
    let graph = pipeline(Arc::new(SkippingStore(MemoryCheckpointStore::new())), None);
    let err = graph
        .executor("t")
        .run(json!({"n": 1}), &RunnableConfig::default())
        .await
        .unwrap_err();
    match err {
        WeftError::Checkpoint(CheckpointError::OutOfOrder {
            thread_id,
            expected,
            assigned,
        }) => {
            assert_eq!(thread_id, "t");
            assert_eq!(expected, 0);
            assert_eq!(assigned, 7);
        }
        other => panic!("unexpected error: {other}"),
    }
}
