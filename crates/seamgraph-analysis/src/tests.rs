use crate::engine::AnalysisEngine;
use seamgraph_cdc::{CdcEventType, CdcManager, MemoryCdcBackend};
use seamgraph_core::{NodeType, SeamGraphConfig, SeamGraphError};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn project_with(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (name, content) in files {
        fs::write(dir.path().join(name), content).unwrap();
    }
    dir
}

fn engine_for(root: &Path) -> Arc<AnalysisEngine> {
    AnalysisEngine::new(SeamGraphConfig::for_project(root))
}

#[tokio::test]
async fn project_stats_trigger_lazy_analysis() {
    let project = project_with(&[
        ("main.py", "def main(): helper()\ndef helper(): pass\n"),
        ("util.py", "def shared(): pass\n"),
    ]);
    let engine = engine_for(project.path());

    let stats = engine.get_project_stats().await.unwrap();
    assert_eq!(stats["total_files"], 2);
    assert_eq!(stats["node_types"]["function"], 3);
    assert_eq!(stats["node_types"]["module"], 2);
    assert!(stats["last_analysis"].is_string());
}

#[tokio::test]
async fn caller_and_callee_lookups_cross_the_call_edge() {
    let project = project_with(&[("main.py", "def main(): helper()\ndef helper(): pass\n")]);
    let engine = engine_for(project.path());

    let callers = engine.find_function_callers("helper").await.unwrap();
    assert_eq!(callers.len(), 1);
    assert_eq!(callers[0].name, "main");
    assert_eq!(callers[0].start_line, Some(1));

    let callees = engine.find_function_callees("main").await.unwrap();
    assert_eq!(callees.len(), 1);
    assert_eq!(callees[0].name, "helper");

    let definitions = engine.find_symbol_definition("helper").await.unwrap();
    assert!(definitions.iter().any(|d| d.node_type == "function"));
}

#[tokio::test]
async fn symbol_validation_rejects_bad_input() {
    let project = project_with(&[("main.py", "def main(): pass\n")]);
    let engine = engine_for(project.path());

    let too_long = "x".repeat(201);
    for bad in ["", "a b", "semi;colon", too_long.as_str()] {
        let result = engine.find_symbol_definition(bad).await;
        assert!(matches!(result, Err(SeamGraphError::InvalidInput(_))), "{:?}", bad);
    }
}

#[tokio::test]
async fn incremental_update_replaces_only_changed_files() {
    let project = project_with(&[
        ("one.py", "def first(): pass\n"),
        ("two.py", "def second(): pass\n"),
    ]);
    let engine = engine_for(project.path());
    engine.ensure_analyzed().await.unwrap();

    let one = project.path().join("one.py");
    let one_str = one.to_string_lossy().to_string();
    let two_str = project.path().join("two.py").to_string_lossy().to_string();
    let graph = engine.graph();
    let second_id_before = graph.find_nodes_by_name("second", true)[0].id.clone();

    // Grow one.py so its node set changes shape.
    fs::write(&one, "def first(): pass\n\ndef freshly_added(): pass\n").unwrap();
    engine.on_files_changed(vec![one_str.clone()]).await;

    assert_eq!(graph.find_nodes_by_name("freshly_added", true).len(), 1);
    assert_eq!(graph.find_nodes_by_name("first", true).len(), 1);
    // two.py was untouched, same node identity.
    assert_eq!(graph.find_nodes_by_name("second", true)[0].id, second_id_before);

    let processed = graph.processed_files();
    assert!(processed.contains(&one_str));
    assert!(processed.contains(&two_str));
    assert_eq!(processed.len(), 2);

    let stats = engine.get_file_watcher_stats();
    assert_eq!(stats.batches_received, 1);
}

#[tokio::test]
async fn deleted_files_leave_no_nodes_behind() {
    let project = project_with(&[
        ("keep.py", "def kept(): pass\n"),
        ("drop.py", "def dropped(): pass\n"),
    ]);
    let engine = engine_for(project.path());
    engine.ensure_analyzed().await.unwrap();

    let drop_path = project.path().join("drop.py");
    let drop_str = drop_path.to_string_lossy().to_string();
    fs::remove_file(&drop_path).unwrap();
    engine.on_files_changed(vec![drop_str.clone()]).await;

    let graph = engine.graph();
    assert!(graph.find_nodes_by_name("dropped", true).is_empty());
    assert_eq!(graph.find_nodes_by_name("kept", true).len(), 1);
    assert!(!graph.processed_files().contains(&drop_str));
}

#[tokio::test]
async fn zero_timeout_reports_project_too_large() {
    let project = project_with(&[("main.py", "def main(): pass\n")]);
    let mut config = SeamGraphConfig::for_project(project.path());
    config.analysis.timeout_s = 0;
    let engine = AnalysisEngine::with_services(config, None, CdcManager::disabled(), None);

    match engine.ensure_analyzed().await {
        Err(SeamGraphError::Timeout(message)) => {
            assert!(message.contains("too large"));
        }
        other => panic!("expected timeout, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn analysis_lifecycle_flows_through_the_cdc_stream() {
    let project = project_with(&[("main.py", "def main(): helper()\ndef helper(): pass\n")]);
    let backend = Arc::new(MemoryCdcBackend::new());
    let cdc = CdcManager::new(Some(backend.clone()));
    let engine = AnalysisEngine::with_services(
        SeamGraphConfig::for_project(project.path()),
        None,
        cdc,
        None,
    );

    engine.ensure_analyzed().await.unwrap();

    // The mutation pump drains asynchronously; wait until both the
    // completion marker and all mutation events have landed.
    let mut events = Vec::new();
    for _ in 0..100 {
        events = engine.cdc().read_stream("0", 1000).await;
        let completed = events
            .iter()
            .any(|e| e.event_type == CdcEventType::AnalysisCompleted);
        let node_added = events
            .iter()
            .filter(|e| e.event_type == CdcEventType::NodeAdded)
            .count();
        if completed && node_added >= 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(events[0].event_type, CdcEventType::AnalysisStarted);
    let node_added = events
        .iter()
        .filter(|e| e.event_type == CdcEventType::NodeAdded)
        .count();
    assert_eq!(node_added, 3); // file node + two functions
    assert!(events
        .iter()
        .any(|e| e.event_type == CdcEventType::RelationshipAdded));
    assert!(events
        .iter()
        .any(|e| e.event_type == CdcEventType::AnalysisCompleted));
}

#[tokio::test]
async fn force_reanalysis_resets_and_rebuilds() {
    let project = project_with(&[("main.py", "def main(): pass\n")]);
    let engine = engine_for(project.path());
    engine.ensure_analyzed().await.unwrap();

    let generation_before = engine.graph().generation();
    engine.force_reanalysis().await.unwrap();

    assert!(engine.graph().generation() > generation_before);
    assert_eq!(engine.graph().find_nodes_by_name("main", true).len(), 1);
}

#[tokio::test]
async fn complexity_report_bands_by_risk() {
    let project = project_with(&[(
        "logic.py",
        "def tangled():\n    if a:\n        if b:\n            for x in y:\n                while z:\n                    if c and d or e:\n                        pass\n\ndef simple(): pass\n",
    )]);
    let engine = engine_for(project.path());

    let report = engine.analyze_complexity(2).await.unwrap();
    assert_eq!(report.len(), 1);
    assert_eq!(report[0]["name"], "tangled");
    assert!(report[0]["complexity"].as_u64().unwrap() >= 5);

    let everything = engine.analyze_complexity(0).await.unwrap();
    assert_eq!(everything.len(), 2);
    // Sorted most complex first.
    assert_eq!(everything[0]["name"], "tangled");
    assert_eq!(everything[1]["risk"], "low");
}

#[tokio::test]
async fn dependency_graph_groups_imports_by_file() {
    let project = project_with(&[(
        "api.py",
        "import os\nimport json\n\ndef serve(): pass\n",
    )]);
    let engine = engine_for(project.path());

    let deps = engine.get_dependency_graph().await.unwrap();
    assert_eq!(deps["total_imports"], 2);
    let file_key = project.path().join("api.py").to_string_lossy().to_string();
    let imports = deps["files"][&file_key].as_array().unwrap();
    assert_eq!(imports.len(), 2);
}

#[tokio::test]
async fn entry_points_surface_through_insights() {
    let project = project_with(&[(
        "cli.py",
        "def main():\n    run()\n\nif __name__ == \"__main__\":\n    main()\n",
    )]);
    let engine = engine_for(project.path());

    let entry_points = engine.detect_entry_points().await.unwrap();
    assert!(entry_points.iter().any(|c| c.name == "main"));

    let insights = engine.get_code_insights().await.unwrap();
    assert!(insights["statistics"]["total_nodes"].as_u64().unwrap() > 0);
    assert_eq!(insights["cycle_count"], 0);
    assert!(!insights["entry_points"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn watcher_contract_exposes_debounce_and_state() {
    let project = project_with(&[("main.py", "def main(): pass\n")]);
    let engine = engine_for(project.path());

    let stats = engine.get_file_watcher_stats();
    assert!(!stats.enabled);
    assert_eq!(stats.debounce_s, 2.0);
    assert_eq!(engine.watcher_debounce(), Duration::from_secs(2));

    engine.register_watcher();
    assert!(engine.get_file_watcher_stats().running);

    engine.cleanup().await;
    assert!(!engine.get_file_watcher_stats().running);
}

#[tokio::test]
async fn cross_language_seams_trace_through_the_engine_graph() {
    let project = project_with(&[
        ("bridge.py", "def compute(): pass\n"),
        ("app.js", "function render() { }\n"),
    ]);
    let engine = engine_for(project.path());
    engine.ensure_analyzed().await.unwrap();

    let graph = engine.graph();
    let compute = graph.find_nodes_by_name("compute", true)[0].id.clone();
    let render = graph.find_nodes_by_name("render", true)[0].id.clone();
    graph.create_seam(&compute, &render).unwrap();

    let flow = graph.trace_cross_language_flow(&compute, 5);
    assert_eq!(flow.seam_bridges.len(), 1);
    assert_eq!(flow.seam_bridges[0].from_language, "Python");
    assert_eq!(flow.seam_bridges[0].to_language, "JavaScript");

    let insights = engine.get_code_insights().await.unwrap();
    assert_eq!(insights["seam_count"], 1);
}

#[tokio::test]
async fn traversal_response_carries_nodes_edges_and_stats() {
    let project = project_with(&[("main.py", "def main(): helper()\ndef helper(): pass\n")]);
    let engine = engine_for(project.path());
    engine.ensure_analyzed().await.unwrap();

    let file_id = format!("file:{}", project.path().join("main.py").to_string_lossy());
    let response = engine.traverse(&file_id, 5, true).await.unwrap();

    assert_eq!(response.start_node_id.as_deref(), Some(file_id.as_str()));
    assert_eq!(response.nodes.len(), 3);
    assert!(response.edges.len() >= 3); // two CONTAINS plus the CALLS edge
    assert_eq!(response.stats["seam_edges"], serde_json::json!(0));

    assert!(matches!(
        engine.traverse("missing", 5, true).await,
        Err(SeamGraphError::NotFound(_))
    ));
}

#[tokio::test]
async fn search_and_call_chain_use_canonical_records() {
    let project = project_with(&[("main.py", "def main(): helper()\ndef helper(): pass\n")]);
    let engine = engine_for(project.path());
    engine.ensure_analyzed().await.unwrap();

    let search = engine.search_nodes("helper", 10).await.unwrap();
    assert_eq!(search.total_count, 1);
    assert_eq!(search.results[0].node_type, "function");

    let graph = engine.graph();
    let main_id = graph.find_nodes_by_name("main", true)[0].id.clone();
    let helper_id = graph.find_nodes_by_name("helper", true)[0].id.clone();
    let chain = engine
        .find_call_chain(&main_id, Some(&helper_id), true, 10)
        .await
        .unwrap();
    assert_eq!(chain.total_hops, 1);
    assert!(!chain.has_seams);
    assert_eq!(chain.chain.last().unwrap().name, "helper");
}

#[tokio::test]
async fn graph_stats_and_seam_listing_round_out_the_wire_surface() {
    let project = project_with(&[
        ("bridge.py", "def compute(): pass\n"),
        ("app.js", "function render() { }\n"),
    ]);
    let engine = engine_for(project.path());
    engine.ensure_analyzed().await.unwrap();

    let graph = engine.graph();
    let compute = graph.find_nodes_by_name("compute", true)[0].id.clone();
    let render = graph.find_nodes_by_name("render", true)[0].id.clone();
    graph.create_seam(&compute, &render).unwrap();

    let stats = engine.get_graph_stats().await.unwrap();
    assert_eq!(stats.seam_count, 1);
    assert_eq!(stats.complexity_distribution["1-5"], 2);

    let seams = engine.get_seams().await.unwrap();
    assert_eq!(seams.len(), 1);
    assert_eq!(seams[0].source_language, "Python");
    assert_eq!(seams[0].target_language, "JavaScript");
}

#[tokio::test]
async fn unanalyzable_projects_surface_invalid_input() {
    let engine = engine_for(Path::new("/definitely/not/a/real/path"));
    assert!(matches!(
        engine.ensure_analyzed().await,
        Err(SeamGraphError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn functions_by_language_are_indexed() {
    let project = project_with(&[
        ("a.py", "def alpha(): pass\n"),
        ("b.rs", "fn beta() {}\n"),
    ]);
    let engine = engine_for(project.path());
    engine.ensure_analyzed().await.unwrap();

    let graph = engine.graph();
    let python_nodes = graph.get_nodes_by_language("Python");
    assert!(python_nodes.iter().any(|n| n.name == "alpha"));
    let rust_nodes = graph.get_nodes_by_language("Rust");
    assert!(rust_nodes.iter().any(|n| n.name == "beta"));
    assert_eq!(graph.get_nodes_by_type(NodeType::Function).len(), 2);
}
