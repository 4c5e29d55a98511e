use ccgraph::core::query::statistics;
use ccgraph::{
    build, query, AnalysisConfig, CcgError, CodeGraph, EdgeKind, EntityKind, QueryKind,
    QueryParams, QueryResult, Relationship, SourceEntry, SourceTree,
};

const BASE: &str = r#"
class Shape:
    """Base shape.

    Subclasses override area.
    """

    def area(self):
        return 0

    def describe(self):
        return self.area()
"#;

const CIRCLE: &str = r#"
from .base import Shape

class Circle(Shape):
    def area(self):
        return helper(3)

def helper(r):
    if r > 0:
        return r * r
    return 0
"#;

const MAIN: &str = r#"
from shapes.circle import Circle

def main():
    c = Circle()
    return c.describe()
"#;

fn fixture() -> CodeGraph {
    fixture_with(AnalysisConfig::default().with_concurrency(2))
}

fn fixture_with(config: AnalysisConfig) -> CodeGraph {
    let tree = SourceTree::from_entries(vec![
        SourceEntry::new("shapes/base.py", BASE),
        SourceEntry::new("shapes/circle.py", CIRCLE),
        SourceEntry::new("main.py", MAIN),
    ]);
    let (graph, _) = build(&tree, &config).unwrap();
    graph
}

fn run(graph: &CodeGraph, kind: QueryKind, params: QueryParams) -> Vec<String> {
    query(graph, kind, &params)
        .unwrap()
        .iter()
        .map(|row| match row {
            QueryResult::Entity(entity) => entity.qualified_name.clone(),
            QueryResult::Relation {
                source,
                target,
                kind,
                ..
            } => format!("{source} -{kind}-> {target}"),
            QueryResult::Count { name, value } => format!("{name}={value}"),
            QueryResult::Measure { name, value } => format!("{name}={value:.2}"),
        })
        .collect()
}

fn target(name: &str) -> QueryParams {
    QueryParams::new().with_target(name)
}

#[test]
fn callers_and_callees() {
    let graph = fixture();
    assert_eq!(
        run(&graph, QueryKind::Callers, target("shapes/base.py::Shape::area")),
        vec!["shapes/base.py::Shape::describe"]
    );
    assert_eq!(
        run(&graph, QueryKind::Callees, target("main.py::main")),
        vec!["shapes/circle.py::Circle", "shapes/base.py::Shape::describe"]
    );
    assert_eq!(
        run(&graph, QueryKind::Callers, target("helper")),
        vec!["shapes/circle.py::Circle::area"]
    );
}

#[test]
fn call_graph_is_breadth_first_from_the_target() {
    let graph = fixture();
    assert_eq!(
        run(&graph, QueryKind::CallGraph, target("main.py::main")),
        vec![
            "main.py::main",
            "shapes/circle.py::Circle",
            "shapes/base.py::Shape::describe",
            "shapes/base.py::Shape::area",
        ]
    );
}

#[test]
fn inheritance_queries() {
    let graph = fixture();
    assert_eq!(
        run(&graph, QueryKind::InheritanceChain, target("Circle")),
        vec!["shapes/base.py::Shape"]
    );
    assert_eq!(
        run(&graph, QueryKind::Subclasses, target("Shape")),
        vec!["shapes/circle.py::Circle"]
    );
    assert!(run(&graph, QueryKind::InheritanceChain, target("Shape")).is_empty());
}

#[test]
fn containment_queries() {
    let graph = fixture();
    assert_eq!(
        run(&graph, QueryKind::Children, target("shapes/circle.py::Circle")),
        vec!["shapes/circle.py::Circle::area"]
    );
    assert_eq!(
        run(&graph, QueryKind::Descendants, target("shapes/circle.py")),
        vec![
            "shapes/circle.py::Circle",
            "shapes/circle.py::Circle::area",
            "shapes/circle.py::helper",
        ]
    );
}

#[test]
fn entities_by_kind_in_discovery_order() {
    let graph = fixture();
    let methods = QueryParams::new().with_kind(EntityKind::Method);
    assert_eq!(
        run(&graph, QueryKind::EntitiesByKind, methods.clone()),
        vec![
            "shapes/base.py::Shape::area",
            "shapes/base.py::Shape::describe",
            "shapes/circle.py::Circle::area",
        ]
    );
    assert_eq!(
        run(&graph, QueryKind::EntitiesByKind, methods.with_limit(1)),
        vec!["shapes/base.py::Shape::area"]
    );
    let everything = run(&graph, QueryKind::EntitiesByKind, QueryParams::new());
    assert_eq!(everything.len(), 10);
    assert!(!everything.iter().any(|name| name.starts_with('<')));
}

#[test]
fn imports_with_and_without_target() {
    let graph = fixture();
    assert_eq!(
        run(&graph, QueryKind::Imports, QueryParams::new()),
        vec![
            "main.py -imports-> shapes/circle.py::Circle",
            "shapes/circle.py -imports-> shapes/base.py::Shape",
        ]
    );
    assert_eq!(
        run(&graph, QueryKind::Imports, target("main.py")),
        vec!["shapes/circle.py::Circle"]
    );
}

#[test]
fn related_lists_calls_and_bases() {
    let graph = fixture();
    assert_eq!(
        run(&graph, QueryKind::Related, target("shapes/circle.py::Circle")),
        vec![
            "main.py::main -calls-> shapes/circle.py::Circle",
            "shapes/circle.py::Circle -inherits-> shapes/base.py::Shape",
        ]
    );

    let only = |relation| {
        run(
            &graph,
            QueryKind::Related,
            target("shapes/circle.py::Circle").with_relation(relation),
        )
    };
    assert_eq!(
        only(Relationship::Inherits),
        vec!["shapes/circle.py::Circle -inherits-> shapes/base.py::Shape"]
    );
    assert_eq!(
        only(Relationship::CalledBy),
        vec!["main.py::main -calls-> shapes/circle.py::Circle"]
    );
    assert!(only(Relationship::Calls).is_empty());
    assert_eq!(only(Relationship::All).len(), 2);
}

#[test]
fn lookup_prefers_exact_qualified_names() {
    let graph = fixture();
    assert_eq!(
        run(&graph, QueryKind::Lookup, target("area")),
        vec!["shapes/base.py::Shape::area", "shapes/circle.py::Circle::area"]
    );
    assert_eq!(
        run(&graph, QueryKind::Lookup, target("shapes/circle.py::Circle::area")),
        vec!["shapes/circle.py::Circle::area"]
    );
    assert!(run(&graph, QueryKind::Lookup, target("missing")).is_empty());

    let rows = query(&graph, QueryKind::Lookup, &target("Shape")).unwrap();
    match &rows[0] {
        QueryResult::Entity(entity) => {
            assert_eq!(entity.kind, EntityKind::Class);
            assert_eq!(entity.file.as_deref(), Some("shapes/base.py"));
            assert_eq!(entity.summary.as_deref(), Some("Base shape."));
        }
        other => panic!("expected an entity, got {other:?}"),
    }
}

#[test]
fn diagram_subgraph_includes_edges_between_selected_entities() {
    let graph = fixture();
    let rows = run(
        &graph,
        QueryKind::DiagramSubgraph,
        QueryParams::new().with_kind(EntityKind::Class).with_limit(2),
    );
    assert_eq!(
        rows,
        vec![
            "shapes/base.py::Shape",
            "shapes/circle.py::Circle",
            "shapes/circle.py::Circle -inherits-> shapes/base.py::Shape",
        ]
    );
}

#[test]
fn diagram_subgraph_defaults_to_the_configured_limit() {
    assert_eq!(fixture().diagram_limit(), 15);

    let graph = fixture_with(AnalysisConfig::default().with_diagram_limit(1));
    assert_eq!(graph.diagram_limit(), 1);
    let rows = run(
        &graph,
        QueryKind::DiagramSubgraph,
        QueryParams::new().with_kind(EntityKind::Class),
    );
    assert_eq!(rows, vec!["shapes/base.py::Shape"]);

    let rows = run(
        &graph,
        QueryKind::DiagramSubgraph,
        QueryParams::new().with_kind(EntityKind::Class).with_limit(2),
    );
    assert_eq!(rows.len(), 3);
}

#[test]
fn statistics_summarize_the_graph() {
    let graph = fixture();
    let stats = statistics(&graph);
    assert_eq!(stats.files_analyzed, 3);
    assert_eq!(stats.unparsed_files, 0);
    assert_eq!(stats.external_entities, 0);
    assert_eq!(stats.count_of(EntityKind::Module), 3);
    assert_eq!(stats.count_of(EntityKind::Class), 2);
    assert_eq!(stats.count_of(EntityKind::Function), 2);
    assert_eq!(stats.count_of(EntityKind::Method), 3);
    assert_eq!(stats.max_complexity, 2);
    assert_eq!(stats.total_entities, graph.entity_count());

    let rows = run(&graph, QueryKind::Statistics, QueryParams::new());
    assert!(rows.contains(&"files_analyzed=3".to_string()));
    assert!(rows.contains(&"method=3".to_string()));
    assert!(rows.contains(&"inherits_edges=1".to_string()));
}

#[test]
fn query_errors() {
    let graph = fixture();

    let err = query(&graph, QueryKind::Callers, &QueryParams::new()).unwrap_err();
    assert!(matches!(err, CcgError::MissingParameter("target")));

    let err = query(&graph, QueryKind::Children, &target("nowhere::thing")).unwrap_err();
    assert!(matches!(err, CcgError::UnknownEntity(name) if name == "nowhere::thing"));

    let err = "frobnicate".parse::<QueryKind>().unwrap_err();
    assert!(matches!(err, CcgError::UnsupportedQuery(_)));
    assert_eq!("call-graph".parse::<QueryKind>().unwrap(), QueryKind::CallGraph);
}

#[test]
fn query_results_serialize_with_a_type_tag() {
    let graph = fixture();
    let rows = query(&graph, QueryKind::Callers, &target("describe")).unwrap();
    let value = serde_json::to_value(&rows).unwrap();
    assert_eq!(value[0]["type"], "entity");
    assert_eq!(value[0]["qualified_name"], "main.py::main");
    assert_eq!(value[0]["kind"], "function");

    let graph_edges: usize = graph
        .edges()
        .filter(|(_, _, edge)| edge.kind == EdgeKind::Calls)
        .count();
    assert_eq!(graph_edges, 4);
}
