use ccgraph::{build_async, AnalysisConfig, CcgError, SourceEntry, SourceTree};
use std::sync::Arc;

fn project() -> SourceTree {
    SourceTree::from_entries(vec![
        SourceEntry::new("lib.rs", "mod store;\n\npub fn open() -> store::Store {\n    store::Store::new()\n}\n"),
        SourceEntry::new(
            "store.rs",
            "pub struct Store;\n\nimpl Store {\n    pub fn new() -> Self {\n        Store\n    }\n}\n",
        ),
    ])
}

#[tokio::test]
async fn build_runs_off_the_async_executor() {
    let (graph, diagnostics) = build_async(project(), AnalysisConfig::default()).await.unwrap();
    assert!(graph.find("store.rs::Store").is_some());
    assert!(!graph.is_partial());
    assert_eq!(diagnostics.count(ccgraph::core::DiagnosticKind::ParseError), 0);
}

#[tokio::test]
async fn published_graph_is_shared_across_tasks() {
    let (graph, _) = build_async(project(), AnalysisConfig::default()).await.unwrap();
    let graph = Arc::new(graph);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let graph = Arc::clone(&graph);
            tokio::spawn(async move { graph.find("lib.rs::open").is_some() })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap());
    }
}

#[tokio::test]
async fn invalid_config_is_rejected_before_any_work() {
    let err = build_async(project(), AnalysisConfig::default().with_concurrency(0))
        .await
        .unwrap_err();
    assert!(matches!(err, CcgError::Config(_)));
}
