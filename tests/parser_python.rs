use ccgraph::core::EntityKind;
use ccgraph::parsers::python::PythonParser;
use ccgraph::parsers::{LanguageParser, ParseResult};

fn names(result: &ParseResult) -> Vec<&str> {
    result
        .entities
        .iter()
        .map(|e| e.entity.qualified_name.as_str())
        .collect()
}

#[test]
fn python_parser_extracts_every_definition() {
    let code = r#""""Shapes module."""
import os
from .base import Base as B, helper

class A(B):
    """Doc for A"""
    size = 3

    def m1(self, x: int = 2) -> int:
        return helper(x)

    async def m2(self):
        def inner():
            pass
        return inner()

@cached
def f(a, *args, **kwargs):
    if a and args:
        return os.path.join(a)
    return None
"#;
    let result = PythonParser::new().parse("pkg/shapes.py", code).unwrap();

    assert_eq!(
        names(&result),
        vec![
            "pkg/shapes.py",
            "pkg/shapes.py::A",
            "pkg/shapes.py::A::m1",
            "pkg/shapes.py::A::m2",
            "pkg/shapes.py::A::m2::inner",
            "pkg/shapes.py::f",
        ]
    );

    let module = &result.entities[0].entity;
    assert_eq!(module.kind, EntityKind::Module);
    assert_eq!(module.docstring.as_deref(), Some("Shapes module."));

    let class = &result.entities[1].entity;
    assert_eq!(class.kind, EntityKind::Class);
    assert_eq!(class.bases, vec!["B"]);
    assert_eq!(class.attributes, vec!["size"]);
    assert_eq!(class.summary().as_deref(), Some("Doc for A"));

    let m1 = &result.entities[2].entity;
    assert_eq!(m1.kind, EntityKind::Method);
    assert_eq!(m1.return_type.as_deref(), Some("int"));
    let params: Vec<_> = m1.parameters.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(params, vec!["self", "x"]);
    assert_eq!(m1.parameters[1].annotation.as_deref(), Some("int"));

    assert!(result.entities[3].entity.is_async);
    assert_eq!(result.entities[4].entity.kind, EntityKind::Function);
    assert_eq!(result.entities[4].parent, Some(3));

    let f = &result.entities[5].entity;
    assert_eq!(f.decorators, vec!["cached"]);
    assert_eq!(f.complexity, Some(3));
}

#[test]
fn python_parser_records_imports_and_calls() {
    let code = r#"
import os.path
from .base import Base as B, helper

def run():
    helper(1)
    os.path.join("a")
    self_check()
"#;
    let result = PythonParser::new().parse("pkg/run.py", code).unwrap();

    assert_eq!(result.imports.len(), 2);
    let plain = &result.imports[0];
    assert_eq!(plain.alias.as_deref(), Some("os.path"));
    assert!(plain.candidates.contains(&"pkg/os/path.py".to_string()));
    assert!(plain.candidates.contains(&"os/path.py".to_string()));

    let relative = &result.imports[1];
    assert_eq!(relative.candidates, vec!["pkg/base.py", "pkg/base.pyi", "pkg/base/__init__.py"]);
    let bindings: Vec<_> = relative.symbols.iter().map(|s| s.binding()).collect();
    assert_eq!(bindings, vec!["B", "helper"]);

    let calls: Vec<_> = result
        .call_sites
        .iter()
        .map(|c| (c.callee.as_str(), c.receiver.as_deref()))
        .collect();
    assert_eq!(
        calls,
        vec![
            ("helper", None),
            ("join", Some("os.path")),
            ("self_check", None)
        ]
    );
    assert!(result.call_sites.iter().all(|c| c.caller == 1));
}

#[test]
fn python_redefinitions_get_line_suffix() {
    let code = "def f():\n    pass\n\ndef f():\n    pass\n";
    let result = PythonParser::new().parse("dup.py", code).unwrap();
    assert_eq!(names(&result), vec!["dup.py", "dup.py::f", "dup.py::f@4"]);
}

#[test]
fn python_syntax_error_is_reported_with_line() {
    let code = "def ok():\n    pass\n\ndef broken(:\n    pass\n";
    let err = PythonParser::new().parse("bad.py", code).unwrap_err();
    assert_eq!(err.path, "bad.py");
    assert!(err.line.is_some());
}
