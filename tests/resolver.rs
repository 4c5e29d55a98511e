use ccgraph::core::{DiagnosticKind, Diagnostics, EntityOrigin};
use ccgraph::{build, AnalysisConfig, CodeGraph, EdgeKind, SourceEntry, SourceTree};

fn analyze(files: &[(&str, &str)]) -> (CodeGraph, Diagnostics) {
    let tree = SourceTree::from_entries(
        files
            .iter()
            .map(|(path, content)| SourceEntry::new(*path, *content))
            .collect(),
    );
    build(&tree, &AnalysisConfig::default().with_concurrency(2)).unwrap()
}

fn linked(graph: &CodeGraph, source: &str, target: &str, kind: EdgeKind) -> bool {
    let source = graph.find(source).unwrap_or_else(|| panic!("no entity {source}"));
    let target = graph.find(target).unwrap_or_else(|| panic!("no entity {target}"));
    graph.outgoing(source, kind).contains(&target)
}

#[test]
fn imported_base_and_inherited_method_resolve_across_files() {
    let (graph, diagnostics) = analyze(&[
        ("pkg/base.py", "class Base:\n    def save(self):\n        pass\n"),
        (
            "pkg/models.py",
            "from .base import Base\n\nclass Model(Base):\n    def run(self):\n        self.save()\n",
        ),
    ]);

    assert!(linked(&graph, "pkg/models.py", "pkg/base.py::Base", EdgeKind::Imports));
    assert!(linked(&graph, "pkg/models.py::Model", "pkg/base.py::Base", EdgeKind::Inherits));
    assert!(linked(
        &graph,
        "pkg/models.py::Model::run",
        "pkg/base.py::Base::save",
        EdgeKind::Calls
    ));
    assert!(diagnostics.is_empty(), "{:?}", diagnostics.entries());
}

#[test]
fn unknown_base_gets_a_placeholder_and_a_diagnostic() {
    let (graph, diagnostics) = analyze(&[(
        "widgets.py",
        "class Widget(Missing):\n    pass\n\nclass Button(Missing):\n    pass\n",
    )]);

    let placeholder = graph.find("<external:class>::Missing").unwrap();
    assert_eq!(graph.entity(placeholder).origin, EntityOrigin::External);
    assert!(graph.parent(placeholder).is_none());
    assert!(linked(&graph, "widgets.py::Widget", "<external:class>::Missing", EdgeKind::Inherits));
    assert!(linked(&graph, "widgets.py::Button", "<external:class>::Missing", EdgeKind::Inherits));
    assert_eq!(graph.incoming(placeholder, EdgeKind::Inherits).len(), 2);

    let unresolved: Vec<_> = diagnostics
        .of_kind(DiagnosticKind::UnresolvedReference)
        .collect();
    assert_eq!(unresolved.len(), 2);
    assert_eq!(unresolved[0].subject.as_deref(), Some("widgets.py::Widget"));
    assert_eq!(unresolved[0].line, Some(1));
}

#[test]
fn names_bound_to_external_imports_stay_silent() {
    let (graph, diagnostics) = analyze(&[(
        "app.py",
        "import requests\nfrom django.db import models\n\nclass Post(models.Model):\n    def fetch(self):\n        return requests.get(\"x\")\n",
    )]);

    assert!(linked(&graph, "app.py", "<external:module>::requests", EdgeKind::Imports));
    assert!(linked(&graph, "app.py", "<external:module>::django.db", EdgeKind::Imports));
    assert!(linked(
        &graph,
        "app.py::Post",
        "<external:class>::models.Model",
        EdgeKind::Inherits
    ));
    let fetch = graph.find("app.py::Post::fetch").unwrap();
    assert!(graph.outgoing(fetch, EdgeKind::Calls).is_empty());
    assert_eq!(diagnostics.count(DiagnosticKind::UnresolvedReference), 0);
}

#[test]
fn module_import_binds_its_alias_for_receiver_calls() {
    let (graph, _) = analyze(&[
        ("pkg/util.py", "def helper():\n    pass\n"),
        ("main.py", "import pkg.util\n\ndef main():\n    pkg.util.helper()\n"),
    ]);

    assert!(linked(&graph, "main.py", "pkg/util.py", EdgeKind::Imports));
    assert!(linked(&graph, "main.py::main", "pkg/util.py::helper", EdgeKind::Calls));
}

#[test]
fn same_directory_definition_wins_without_ambiguity() {
    let (graph, diagnostics) = analyze(&[
        ("pkg/a.py", "def run():\n    helper()\n"),
        ("pkg/b.py", "def helper():\n    pass\n"),
        ("other/c.py", "def helper():\n    pass\n"),
    ]);

    assert!(linked(&graph, "pkg/a.py::run", "pkg/b.py::helper", EdgeKind::Calls));
    assert!(!linked(&graph, "pkg/a.py::run", "other/c.py::helper", EdgeKind::Calls));
    assert_eq!(diagnostics.count(DiagnosticKind::ResolutionAmbiguity), 0);
}

#[test]
fn competing_candidates_pick_the_first_and_report_ambiguity() {
    let (graph, diagnostics) = analyze(&[
        ("main.py", "def main():\n    helper()\n"),
        ("a/util.py", "def helper():\n    pass\n"),
        ("b/util.py", "def helper():\n    pass\n"),
    ]);

    assert!(linked(&graph, "main.py::main", "a/util.py::helper", EdgeKind::Calls));
    assert!(!linked(&graph, "main.py::main", "b/util.py::helper", EdgeKind::Calls));

    let ambiguous: Vec<_> = diagnostics
        .of_kind(DiagnosticKind::ResolutionAmbiguity)
        .collect();
    assert_eq!(ambiguous.len(), 1);
    assert_eq!(ambiguous[0].file.as_deref(), Some("main.py"));
    assert_eq!(ambiguous[0].line, Some(2));
    assert!(ambiguous[0].message.contains("a/util.py::helper"));
}

#[test]
fn unmatched_calls_are_reported_without_edges() {
    let (graph, diagnostics) = analyze(&[(
        "svc.py",
        "def handle(conn):\n    conn.frobnicate()\n    nowhere()\n    print(\"done\")\n",
    )]);

    let handle = graph.find("svc.py::handle").unwrap();
    assert!(graph.outgoing(handle, EdgeKind::Calls).is_empty());

    let messages: Vec<&str> = diagnostics
        .of_kind(DiagnosticKind::UnresolvedReference)
        .map(|d| d.message.as_str())
        .collect();
    assert_eq!(messages.len(), 2, "builtins are not reported: {messages:?}");
    assert!(messages[0].contains("conn.frobnicate"));
    assert!(messages[1].contains("nowhere"));
}

#[test]
fn nested_function_is_found_through_lexical_scope() {
    let code = "def outer():\n    def step():\n        pass\n    step()\n\ndef step():\n    pass\n";
    let (graph, _) = analyze(&[("flow.py", code)]);

    assert!(linked(&graph, "flow.py::outer", "flow.py::outer::step", EdgeKind::Calls));
    assert!(!linked(&graph, "flow.py::outer", "flow.py::step", EdgeKind::Calls));
}

#[test]
fn super_calls_skip_the_overriding_method() {
    let code = r#"
class Base:
    def save(self):
        pass

class Child(Base):
    def save(self):
        super().save()
"#;
    let (graph, _) = analyze(&[("models.py", code)]);
    assert!(linked(
        &graph,
        "models.py::Child::save",
        "models.py::Base::save",
        EdgeKind::Calls
    ));
    assert!(!linked(
        &graph,
        "models.py::Child::save",
        "models.py::Child::save",
        EdgeKind::Calls
    ));
}

#[test]
fn inheritance_cycles_do_not_hang_member_lookup() {
    let code = r#"
class A(B):
    def go(self):
        self.missing()

class B(A):
    pass
"#;
    let (graph, diagnostics) = analyze(&[("cycle.py", code)]);
    assert!(linked(&graph, "cycle.py::A", "cycle.py::B", EdgeKind::Inherits));
    assert!(linked(&graph, "cycle.py::B", "cycle.py::A", EdgeKind::Inherits));
    assert_eq!(diagnostics.count(DiagnosticKind::UnresolvedReference), 1);
}

#[test]
fn javascript_imports_resolve_to_exported_classes() {
    let (graph, diagnostics) = analyze(&[
        (
            "src/shape.js",
            "export class Shape {\n  area() {\n    return 0;\n  }\n}\n",
        ),
        (
            "src/circle.js",
            "import { Shape } from './shape';\n\nexport class Circle extends Shape {\n  describe() {\n    return this.area();\n  }\n}\n",
        ),
    ]);

    assert!(linked(&graph, "src/circle.js", "src/shape.js::Shape", EdgeKind::Imports));
    assert!(linked(&graph, "src/circle.js::Circle", "src/shape.js::Shape", EdgeKind::Inherits));
    assert!(linked(
        &graph,
        "src/circle.js::Circle::describe",
        "src/shape.js::Shape::area",
        EdgeKind::Calls
    ));
    assert_eq!(diagnostics.count(DiagnosticKind::UnresolvedReference), 0);
}
