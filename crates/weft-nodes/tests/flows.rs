use std::sync::Arc;

use weft_core::console::MemoryConsole;
use weft_core::state::State;
use weft_engine::{archive, Flowchart, NodeRecord, RunStatus};
use weft_memory::EmbeddingIndex;
use weft_nodes::{builtin_registry, Services};
use weft_test_utils::{MockEmbedder, MockLlm};

fn chart_with(services: Services) -> (Flowchart, Arc<Services>) {
    let services = Arc::new(services);
    let registry = Arc::new(builtin_registry(services.clone()));
    (Flowchart::new(registry).unwrap(), services)
}

#[tokio::test]
async fn test_hello_world_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let out_path = dir.path().join("hello.txt");
    let (mut chart, _) = chart_with(Services::default());

    let start = chart.start_node().unwrap().id.clone();
    let prompt = chart.create_node("PromptNode", "Prompt", 100.0, 210.0).unwrap();
    chart.edit_text("Prompt", "Hello {state}").unwrap();
    let output = chart
        .registry()
        .deserialize(
            &NodeRecord::new("FileOutput", "Output", 200.0, 210.0)
                .with_field("filename", out_path.to_string_lossy().to_string()),
        )
        .unwrap();
    let output = chart.add_node(output).unwrap();
    chart.connect(&start, &prompt).unwrap();
    chart.connect(&prompt, &output).unwrap();

    let console = MemoryConsole::new();
    let report = chart.run(State::with_result("world"), &console).await.unwrap();

    assert!(report.is_completed());
    assert_eq!(report.state.get("Prompt"), "Hello world");
    assert_eq!(report.state.result, "Hello world");
    assert_eq!(report.executed, vec![start, prompt, output]);
    assert_eq!(std::fs::read_to_string(&out_path).unwrap(), "Hello world");
    assert!(console.contains("Prompt: Hello world"));
    assert!(console.contains("[System: Done]"));
}

#[tokio::test]
async fn test_llm_reply_routes_by_condition() {
    let mock = Arc::new(MockLlm::new().with_response("yes"));
    let (mut chart, _) = chart_with(Services::default().with_llm(mock.clone()));

    let start = chart.start_node().unwrap().id.clone();
    let ask = chart.create_node("OpenAINode", "Ask", 0.0, 0.0).unwrap();
    let agreed = chart.create_node("DummyNode", "Agreed", 0.0, 0.0).unwrap();
    let refused = chart.create_node("LoggingNode", "Refused", 0.0, 0.0).unwrap();
    chart.connect(&start, &ask).unwrap();
    chart.connect_if(&ask, &refused, "No", "result == \"no\"").unwrap();
    chart.connect_if(&ask, &agreed, "Yes", "lower(result) == \"yes\"").unwrap();

    let report = chart.run(State::with_result("Agree?"), &MemoryConsole::new()).await.unwrap();

    assert!(report.is_completed());
    assert_eq!(report.executed, vec![start, ask, agreed]);
    assert_eq!(report.state.get("Ask"), "yes");
    assert_eq!(report.state.result, "dummy response");
    assert_eq!(mock.requests()[0].1.last().unwrap().content, "Agree?");
}

#[tokio::test]
async fn test_assertion_failure_ends_run_errored() {
    let (mut chart, _) = chart_with(Services::default());
    let start = chart.start_node().unwrap().id.clone();
    let check = chart.create_node("AssertNode", "Check", 0.0, 0.0).unwrap();
    chart.edit_text("Check", "len(result) > 10").unwrap();
    let after = chart.create_node("DummyNode", "After", 0.0, 0.0).unwrap();
    chart.connect(&start, &check).unwrap();
    chart.connect(&check, &after).unwrap();

    let console = MemoryConsole::new();
    let report = chart.run(State::with_result("short"), &console).await.unwrap();

    match &report.status {
        RunStatus::Errored { node, .. } => assert_eq!(node, "Check"),
        other => panic!("expected Errored, got {other:?}"),
    }
    assert_eq!(report.executed, vec![start]);
    assert!(console.lines().iter().any(|l| l.starts_with("[ERROR]Check: ")));
    assert!(!console.contains("[System: Done]"));
}

#[tokio::test]
async fn test_cost_prices_llm_without_calling_it() {
    let mock = Arc::new(MockLlm::new());
    let (mut chart, _) = chart_with(Services::default().with_llm(mock.clone()));
    let start = chart.start_node().unwrap().id.clone();
    let prompt = chart.create_node("PromptNode", "Prompt", 0.0, 0.0).unwrap();
    chart.edit_text("Prompt", "Summarise {state}").unwrap();
    let llm = chart
        .registry()
        .deserialize(
            &NodeRecord::new("OpenAINode", "LLM", 0.0, 0.0)
                .with_field("model", "gpt-4")
                .with_field("max_tokens", 100),
        )
        .unwrap();
    let llm = chart.add_node(llm).unwrap();
    chart.connect(&start, &prompt).unwrap();
    chart.connect(&prompt, &llm).unwrap();

    let mut state = State::new();
    let cost = chart.cost(&mut state).unwrap();

    // 100 output tokens at 0.06 per 1K plus a handful of prompt tokens
    assert!(cost > 0.006 && cost < 0.0065, "cost was {cost}");
    assert!(mock.requests().is_empty());
}

#[tokio::test]
async fn test_archive_carries_embedding_assets() {
    let src = tempfile::tempdir().unwrap();
    let (vectors, labels) = (src.path().join("index.json"), src.path().join("labels.txt"));
    let index = EmbeddingIndex::new();
    for text in ["rust borrow checker", "python garbage collector"] {
        index.insert(text, MockEmbedder::vector(text));
    }
    index.save(&vectors, &labels).unwrap();

    let (mut chart, _) = chart_with(Services::default());
    let start = chart.start_node().unwrap().id.clone();
    let ingest = chart
        .registry()
        .deserialize(
            &NodeRecord::new("EmbeddingsIngestNode", "Ingest", 0.0, 0.0)
                .with_field("filename", vectors.to_string_lossy().to_string())
                .with_field("label_file", labels.to_string_lossy().to_string()),
        )
        .unwrap();
    let ingest = chart.add_node(ingest).unwrap();
    let query = chart.create_node("EmbeddingQueryNode", "Query", 0.0, 0.0).unwrap();
    chart.connect(&start, &ingest).unwrap();
    chart.connect(&ingest, &query).unwrap();

    let path = src.path().join("flow.weft");
    archive::save(&mut chart, &path).unwrap();
    assert!(!chart.is_dirty());

    // Load into a fresh process-like setup with its own index
    let work = tempfile::tempdir().unwrap();
    let services = Arc::new(Services::default().with_embedder(Arc::new(MockEmbedder)));
    let registry = Arc::new(builtin_registry(services.clone()));
    let mut loaded = archive::load(registry, &path, work.path()).unwrap();
    assert!(!loaded.is_dirty());

    let record = loaded.node_by_label("Ingest").unwrap().to_record();
    let extracted = work.path().join("index.json");
    assert_eq!(record.str_field("filename"), extracted.to_str());
    assert!(extracted.exists());

    let report = loaded
        .run(State::with_result("borrow checker rust"), &MemoryConsole::new())
        .await
        .unwrap();
    assert!(report.is_completed());
    assert_eq!(services.embeddings.len(), 2);
    assert_eq!(report.state.result, "rust borrow checker");
}

#[tokio::test]
async fn test_sqlite_nodes_share_pool_across_runs() {
    let (mut chart, services) = chart_with(Services::default());
    let start = chart.start_node().unwrap().id.clone();
    let sql = chart.create_node("SQLiteQueryNode", "SQL", 0.0, 0.0).unwrap();
    chart.connect(&start, &sql).unwrap();

    let console = MemoryConsole::new();
    for statement in ["CREATE TABLE kv (k TEXT)", "INSERT INTO kv VALUES ('a')"] {
        let report = chart.run(State::with_result(statement), &console).await.unwrap();
        assert!(report.is_completed());
    }
    let report = chart.run(State::with_result("SELECT k FROM kv"), &console).await.unwrap();
    assert_eq!(report.state.result, r#"[{"k":"a"}]"#);
    assert!(services.db.is_open());
}
