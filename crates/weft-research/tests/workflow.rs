//! The coordinator graph and the two-phase report stream.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::{Value, json};

use weft_checkpoint::prelude::*;
use weft_core::prelude::*;
use weft_graph::prelude::*;
use weft_research::mock::{CallKind, ScriptedGenerator, StaticSearch};
use weft_research::prelude::*;

/// Sections read `<Display Name>`; the editor wraps its input.
fn editor_responder(prompt: &str, input: &str) -> String {
    if let Some(rest) = prompt.strip_prefix("You write the ") {
        let section = rest.split(" section").next().unwrap_or_default();
        format!("<{section}>")
    } else if prompt.starts_with("You are the final editor") {
        format!("<polished>{input}</polished>")
    } else {
        "more detail please".to_string()
    }
}

fn generator() -> ScriptedGenerator {
    ScriptedGenerator::new().with_responder(editor_responder)
}

fn memory() -> Arc<dyn CheckpointStore> {
    Arc::new(MemoryCheckpointStore::new())
}

fn fast() -> ResearchConfig {
    ResearchConfig::default().with_chunk_pacing(Duration::ZERO)
}

fn research_app(
    generator: ScriptedGenerator,
    search: StaticSearch,
    store: Arc<dyn CheckpointStore>,
) -> ResearchApp {
    ResearchApp::new(Arc::new(generator), Arc::new(search), store, fast()).unwrap()
}

fn after_sentinel(events: &[ResearchEvent]) -> Vec<ResearchEvent> {
    events
        .iter()
        .skip_while(|e| **e != ResearchEvent::Sentinel)
        .skip(1)
        .cloned()
        .collect()
}

fn chunks(events: &[ResearchEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            ResearchEvent::Chunk(text) => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn coordinator_pauses_before_polish_with_sections_in_request_order() {
    let store = memory();
    let graph = create_coordinator(
        Arc::new(generator()),
        Arc::new(StaticSearch::new()),
        &ResearchConfig::default(),
        Arc::clone(&store),
    )
    .unwrap();
    let executor = graph.executor("acme");

    let input = json!({
        "company": "Acme",
        "topics": ["recent_news", "background"],
        "max_drafts": 0,
    });
    let output = executor.run(input, &RunnableConfig::default()).await.unwrap();
    let state = match output {
        GraphOutput::Interrupted { node, state, .. } => {
            assert_eq!(node, "polish");
            state
        }
        other => panic!("expected interrupt, got {other:?}"),
    };
    assert_eq!(
        state["final_report"],
        json!("<Recent News>\n\n<Background Information>")
    );
    assert_eq!(
        state["task_status"],
        json!({"recent_news": "complete", "background": "complete"})
    );

    let latest = executor.latest().await.unwrap().unwrap();
    assert_eq!(latest.metadata.source, CheckpointSource::Interrupt);
    assert_eq!(latest.next_node.as_deref(), Some("polish"));

    let done = executor.resume(&RunnableConfig::default()).await.unwrap();
    assert_eq!(
        done.into_value()["final_report"],
        json!("<polished><Recent News>\n\n<Background Information></polished>")
    );
}

#[tokio::test]
async fn fan_out_writes_one_report_per_topic() {
    let graph = build_coordinator(
        Arc::new(generator()),
        Arc::new(StaticSearch::new()),
        &ResearchConfig::default(),
    )
    .unwrap()
    .compile()
    .unwrap();

    let all: Vec<&str> = Topic::ALL.iter().map(|t| t.key()).collect();
    let state = graph
        .invoke(
            json!({"company": "Acme", "topics": all, "max_drafts": 1}),
            &RunnableConfig::default(),
        )
        .await
        .unwrap();

    let reports = state["reports"].as_object().unwrap();
    assert_eq!(reports.len(), 4);
    for topic in Topic::ALL {
        assert_eq!(
            reports[topic.key()],
            json!(format!("<{}>", topic.display_name()))
        );
    }
}

#[tokio::test]
async fn stream_reports_progress_then_report_chunks() {
    let app = research_app(generator(), StaticSearch::new(), memory());
    let request = ResearchRequest::new("Acme", vec![Topic::Background]).with_max_revisions(1);

    let events: Vec<ResearchEvent> = app.stream(request).collect().await;

    let statuses: Vec<&str> = events
        .iter()
        .take_while(|e| **e != ResearchEvent::Sentinel)
        .map(|e| match e {
            ResearchEvent::Status(text) => text.as_str(),
            other => panic!("unexpected event before sentinel: {other:?}"),
        })
        .collect();
    assert_eq!(
        statuses,
        vec![
            "Initializing search...",
            "Drafting the Background Information section...",
            "Finished drafting the Background Information section...",
            "Revising the Background Information section...",
            "Redrafting Background Information section...",
            "Finished drafting the Background Information section...",
            "Finished the Background Information section...",
            "Finished the Background Information section...",
            "Final touches...",
        ]
    );

    let report = after_sentinel(&events);
    assert!(report.len() > 1, "report should arrive in several chunks");
    assert!(report.iter().all(|e| matches!(e, ResearchEvent::Chunk(_))));
    assert_eq!(
        chunks(&report),
        "<polished><Background Information></polished>"
    );
}

#[tokio::test]
async fn large_revision_budget_runs_to_completion() {
    for k in [8, 10] {
        let generator = Arc::new(generator());
        let app = ResearchApp::new(
            Arc::clone(&generator) as Arc<dyn Generator>,
            Arc::new(StaticSearch::new()),
            memory(),
            fast(),
        )
        .unwrap();
        let request = ResearchRequest::new("Acme", vec![Topic::Background]).with_max_revisions(k);

        let events: Vec<ResearchEvent> = app.stream(request).collect().await;

        assert!(
            !events.iter().any(|e| matches!(e, ResearchEvent::Error(_))),
            "k={k}: {events:?}"
        );
        assert_eq!(
            chunks(&after_sentinel(&events)),
            "<polished><Background Information></polished>"
        );
        assert_eq!(generator.count(CallKind::Generate, "You write"), k + 1, "k={k}");
    }
}

#[tokio::test]
async fn empty_polish_stream_falls_back_to_aggregated_report() {
    let app = research_app(generator().with_chunk_size(0), StaticSearch::new(), memory());
    let request = ResearchRequest::new("Acme", vec![Topic::MarketPosition, Topic::RecentNews])
        .with_max_revisions(0);

    let events: Vec<ResearchEvent> = app.stream(request).collect().await;

    assert_eq!(
        after_sentinel(&events),
        vec![ResearchEvent::Chunk(
            "<Market Position>\n\n<Recent News>".to_string()
        )]
    );
}

#[tokio::test(start_paused = true)]
async fn report_chunks_are_paced() {
    let config = ResearchConfig::default().with_chunk_pacing(Duration::from_millis(50));
    let app = ResearchApp::new(
        Arc::new(generator().with_chunk_size(4)),
        Arc::new(StaticSearch::new()),
        memory(),
        config,
    )
    .unwrap();
    let mut stream = app.stream(ResearchRequest::new("Acme", vec![Topic::Background]).with_max_revisions(0));

    while let Some(event) = stream.next().await {
        if event == ResearchEvent::Sentinel {
            break;
        }
    }
    let started = tokio::time::Instant::now();
    let mut count = 0u32;
    let mut text = String::new();
    while let Some(event) = stream.next().await {
        if let ResearchEvent::Chunk(chunk) = event {
            count += 1;
            text.push_str(&chunk);
        }
    }
    assert_eq!(text, "<polished><Background Information></polished>");
    assert!(count > 1);
    assert!(started.elapsed() >= Duration::from_millis(50) * (count - 1));
}

#[tokio::test]
async fn failing_reviewer_ends_stream_with_error() {
    let app = research_app(
        generator().failing_on("You review"),
        StaticSearch::new(),
        memory(),
    );
    let request = ResearchRequest::new("Acme", vec![Topic::Background]).with_max_revisions(1);

    let events: Vec<ResearchEvent> = app.stream(request).collect().await;

    assert!(matches!(events.last(), Some(ResearchEvent::Error(_))));
    assert!(!events.contains(&ResearchEvent::Sentinel));
    assert_eq!(
        events.iter().filter(|e| matches!(e, ResearchEvent::Error(_))).count(),
        1
    );
}

#[tokio::test]
async fn failing_search_ends_stream_with_error() {
    let app = research_app(generator(), StaticSearch::failing(), memory());
    let request = ResearchRequest::new("Acme", vec![Topic::RecentNews]);

    let events: Vec<ResearchEvent> = app.stream(request).collect().await;

    assert_eq!(events.first(), Some(&ResearchEvent::Status("Initializing search...".into())));
    assert!(matches!(events.last(), Some(ResearchEvent::Error(_))));
    assert!(!events.iter().any(|e| matches!(e, ResearchEvent::Chunk(_))));
}

#[tokio::test]
async fn repeated_topic_is_rejected() {
    let app = research_app(generator(), StaticSearch::new(), memory());
    let request = ResearchRequest::new("Acme", vec![Topic::Background, Topic::Background]);

    let events: Vec<ResearchEvent> = app.stream(request).collect().await;

    match events.last() {
        Some(ResearchEvent::Error(message)) => assert!(message.contains("background")),
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn invalid_request_yields_single_error() {
    let app = research_app(generator(), StaticSearch::new(), memory());

    let events: Vec<ResearchEvent> = app.stream(ResearchRequest::new("Acme", vec![])).collect().await;

    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], ResearchEvent::Error(m) if m.contains("No topics requested")));
}

#[tokio::test]
async fn interrupted_run_matches_uninterrupted_run() {
    let store = memory();
    let app = research_app(generator(), StaticSearch::new(), Arc::clone(&store));
    let request = ResearchRequest::new("Acme", vec![Topic::FinancialHealth, Topic::Background])
        .with_max_revisions(1)
        .with_thread_id("acme-1");

    let events: Vec<ResearchEvent> = app.stream(request).collect().await;
    assert!(!events.iter().any(|e| matches!(e, ResearchEvent::Error(_))));

    let reference = build_coordinator(
        Arc::new(generator()),
        Arc::new(StaticSearch::new()),
        &ResearchConfig::default(),
    )
    .unwrap()
    .compile()
    .unwrap();
    let expected: Value = reference
        .invoke(
            json!({
                "company": "Acme",
                "topics": ["financial_health", "background"],
                "max_drafts": 1,
            }),
            &RunnableConfig::default(),
        )
        .await
        .unwrap();

    let latest = store.latest("acme-1").await.unwrap().unwrap();
    assert!(latest.is_terminal());
    assert_eq!(latest.state, expected);
    assert_eq!(chunks(&after_sentinel(&events)), expected["final_report"].as_str().unwrap());

    // resuming a finished thread changes nothing
    let again = app
        .graph()
        .executor("acme-1")
        .resume(&RunnableConfig::default())
        .await
        .unwrap();
    assert_eq!(again, GraphOutput::Complete(expected));
    let history = get_state_history(store.as_ref(), "acme-1").await.unwrap();
    assert_eq!(history.last().map(|cp| cp.step), Some(latest.step));
}
