use std::sync::Arc;

use weft_core::config::AppConfig;
use weft_core::console::MemoryConsole;
use weft_core::state::State;
use weft_engine::{archive, Flowchart, RunStatus};
use weft_nodes::{builtin_registry, Services};

fn services_in(dir: &std::path::Path) -> Arc<Services> {
    let mut config = AppConfig::default();
    config.engine.working_dir = dir.to_string_lossy().to_string();
    config.database.path = dir.join("weft.db").to_string_lossy().to_string();
    Arc::new(Services::new(config))
}

/// A saved flow branches on a computed value after reload.
#[tokio::test]
async fn test_saved_branching_flow_runs_after_reload() {
    let dir = tempfile::tempdir().unwrap();
    let services = services_in(dir.path());
    let registry = Arc::new(builtin_registry(services.clone()));

    let mut chart = Flowchart::new(registry.clone()).unwrap();
    let start = chart.start_node().unwrap().id.clone();
    let step = chart.create_node("FuncNode", "Step", 0.0, 0.0).unwrap();
    chart.edit_text("Step", "int(result) + 1").unwrap();
    let big = chart.create_node("PromptNode", "Big", 0.0, 0.0).unwrap();
    chart.edit_text("Big", "big: {state[Step]}").unwrap();
    let small = chart.create_node("PromptNode", "Small", 0.0, 0.0).unwrap();
    chart.edit_text("Small", "small: {state[Step]}").unwrap();
    chart.connect(&start, &step).unwrap();
    chart.connect_if(&step, &small, "Is small", "int(result) <= 5").unwrap();
    chart.connect_if(&step, &big, "Is big", "int(result) > 5").unwrap();

    let path = dir.path().join("branch.weft");
    archive::save(&mut chart, &path).unwrap();

    let work = dir.path().join("work");
    std::fs::create_dir_all(&work).unwrap();
    let mut loaded = archive::load(registry, &path, &work).unwrap().with_max_steps(50);
    assert_eq!(loaded.text_data("Step").unwrap().text(), "int(result) + 1");
    assert_eq!(loaded.text_data("Is big").unwrap().text(), "int(result) > 5");

    let console = MemoryConsole::new();
    let report = loaded.run(State::with_result("41"), &console).await.unwrap();
    assert!(report.is_completed(), "status was {:?}", report.status);
    assert_eq!(report.state.result, "big: 42");
    assert_eq!(report.executed, vec![start.clone(), step.clone(), big]);

    let report = loaded.run(State::with_result("2"), &console).await.unwrap();
    assert_eq!(report.state.result, "small: 3");
    assert_eq!(report.executed, vec![start, step, small]);
    assert!(console.contains("Step: 3"));
}

#[tokio::test]
async fn test_step_bound_ends_long_chain() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(builtin_registry(services_in(dir.path())));

    let mut chart = Flowchart::new(registry).unwrap().with_max_steps(2);
    let mut prev = chart.start_node().unwrap().id.clone();
    for label in ["A", "B", "C"] {
        let next = chart.create_node("DummyNode", label, 0.0, 0.0).unwrap();
        chart.connect(&prev, &next).unwrap();
        prev = next;
    }

    let report = chart.run(State::new(), &MemoryConsole::new()).await.unwrap();
    assert!(matches!(report.status, RunStatus::Errored { .. }));
    assert_eq!(report.executed.len(), 2);
}

#[tokio::test]
async fn test_state_round_trips_through_json() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(builtin_registry(services_in(dir.path())));

    let mut chart = Flowchart::new(registry).unwrap();
    let start = chart.start_node().unwrap().id.clone();
    let history = chart.create_node("HistoryNode", "Remember", 0.0, 0.0).unwrap();
    chart.connect(&start, &history).unwrap();

    let first = chart.run(State::with_result("hi"), &MemoryConsole::new()).await.unwrap();
    let saved = serde_json::to_string(&first.state).unwrap();

    let mut resumed: State = serde_json::from_str(&saved).unwrap();
    resumed.result = "again".to_string();
    let second = chart.run(resumed, &MemoryConsole::new()).await.unwrap();

    assert_eq!(second.state.history.len(), 2);
    assert_eq!(second.state.history[0]["content"], "hi");
    assert_eq!(second.state.history[1]["content"], "again");
}
