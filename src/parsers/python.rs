use tree_sitter::Node as TSNode;

use super::common::{
    ancestor_dirs, clean_docstring, cyclomatic_complexity, extract_text, field_text,
    join_relative, line_range, named_children, parent_dir, parse_tree, ExtractionBuilder,
};
use super::{ImportRef, ImportedSymbol, Language, LanguageParser, ParseError, ParseResult};
use crate::core::{EntityKind, Parameter};

const BRANCH_KINDS: &[&str] = &[
    "if_statement",
    "elif_clause",
    "for_statement",
    "while_statement",
    "except_clause",
    "conditional_expression",
    "case_clause",
    "for_in_clause",
    "if_clause",
];

const DEFINITION_KINDS: &[&str] = &["function_definition", "class_definition", "decorated_definition"];

/// Builtins whose calls are not worth resolving.
const BUILTINS: &[&str] = &[
    "print", "len", "range", "str", "int", "float", "bool", "list", "dict", "set", "tuple",
    "isinstance", "issubclass", "getattr", "setattr", "hasattr", "super", "open", "enumerate",
    "zip", "map", "filter", "sorted", "reversed", "min", "max", "sum", "any", "all", "abs",
    "repr", "type", "iter", "next", "format", "round", "id", "hash", "vars", "dir", "callable",
    "staticmethod", "classmethod", "property", "object", "Exception", "ValueError",
    "TypeError", "KeyError", "RuntimeError", "NotImplementedError",
];

pub struct PythonParser;

impl PythonParser {
    pub fn new() -> Self {
        Self
    }

    /// Walk a module or class body looking for definitions and imports.
    fn visit_scope(
        &self,
        node: &TSNode,
        source: &[u8],
        parent: usize,
        in_class: bool,
        out: &mut ExtractionBuilder,
    ) {
        for child in named_children(node) {
            match child.kind() {
                "function_definition" => {
                    self.process_function(&child, source, parent, in_class, Vec::new(), out);
                }
                "class_definition" => {
                    self.process_class(&child, source, parent, Vec::new(), out);
                }
                "decorated_definition" => {
                    self.process_decorated(&child, source, parent, in_class, out);
                }
                "import_statement" | "import_from_statement" => {
                    self.process_import(&child, source, out);
                }
                "expression_statement" if in_class => {
                    self.collect_class_attribute(&child, source, parent, out);
                }
                // Definitions guarded by `if`, `try`, `with` and friends.
                "if_statement" | "elif_clause" | "else_clause" | "try_statement"
                | "except_clause" | "finally_clause" | "with_statement" | "block" => {
                    self.visit_scope(&child, source, parent, in_class, out);
                }
                _ => {}
            }
        }
    }

    fn process_decorated(
        &self,
        node: &TSNode,
        source: &[u8],
        parent: usize,
        in_class: bool,
        out: &mut ExtractionBuilder,
    ) {
        let decorators: Vec<String> = named_children(node)
            .iter()
            .filter(|child| child.kind() == "decorator")
            .map(|d| extract_text(d, source).trim_start_matches('@').trim().to_string())
            .collect();
        let Some(definition) = node.child_by_field_name("definition") else {
            return;
        };
        match definition.kind() {
            "function_definition" => {
                self.process_function(&definition, source, parent, in_class, decorators, out);
            }
            "class_definition" => {
                self.process_class(&definition, source, parent, decorators, out);
            }
            _ => {}
        }
    }

    fn process_class(
        &self,
        class_node: &TSNode,
        source: &[u8],
        parent: usize,
        decorators: Vec<String>,
        out: &mut ExtractionBuilder,
    ) {
        let Some(name) = field_text(class_node, "name", source) else {
            return;
        };
        let class_idx = out.add(parent, name, EntityKind::Class, line_range(class_node));

        let mut bases = Vec::new();
        if let Some(arguments) = class_node.child_by_field_name("superclasses") {
            for argument in named_children(&arguments) {
                if matches!(argument.kind(), "identifier" | "attribute") {
                    bases.push(extract_text(&argument, source).to_string());
                }
            }
        }

        let body = class_node.child_by_field_name("body");
        let docstring = body.as_ref().and_then(|b| body_docstring(b, source));
        let entity = out.entity_mut(class_idx);
        entity.bases = bases;
        entity.decorators = decorators;
        if let Some(doc) = docstring {
            entity.docstring = Some(doc);
        }

        if let Some(body) = body {
            self.visit_scope(&body, source, class_idx, true, out);
        }
    }

    fn process_function(
        &self,
        func_node: &TSNode,
        source: &[u8],
        parent: usize,
        in_class: bool,
        decorators: Vec<String>,
        out: &mut ExtractionBuilder,
    ) {
        let Some(name) = field_text(func_node, "name", source) else {
            return;
        };
        let kind = if in_class {
            EntityKind::Method
        } else {
            EntityKind::Function
        };
        let func_idx = out.add(parent, name, kind, line_range(func_node));

        let params_text = field_text(func_node, "parameters", source).unwrap_or("()");
        let return_type = field_text(func_node, "return_type", source).map(str::to_string);
        let mut signature = format!("{name}{params_text}");
        if let Some(ret) = &return_type {
            signature.push_str(" -> ");
            signature.push_str(ret);
        }
        let parameters = func_node
            .child_by_field_name("parameters")
            .map(|p| extract_parameters(&p, source))
            .unwrap_or_default();
        let is_async = func_node
            .child(0)
            .map(|first| first.kind() == "async")
            .unwrap_or(false);
        let body = func_node.child_by_field_name("body");
        let docstring = body.as_ref().and_then(|b| body_docstring(b, source));
        let complexity = body.as_ref().map(|b| {
            cyclomatic_complexity(b, source, BRANCH_KINDS, DEFINITION_KINDS, is_boolean_operator)
        });

        let entity = out.entity_mut(func_idx);
        entity.parameters = parameters;
        entity.return_type = return_type;
        entity.signature = Some(signature);
        entity.decorators = decorators;
        entity.is_async = is_async;
        entity.complexity = complexity;
        if let Some(doc) = docstring {
            entity.docstring = Some(doc);
        }

        if let Some(body) = body {
            self.visit_body(&body, source, func_idx, out);
        }
    }

    /// Walk a function body: record calls, nested definitions and local imports.
    fn visit_body(&self, node: &TSNode, source: &[u8], func_idx: usize, out: &mut ExtractionBuilder) {
        for child in named_children(node) {
            match child.kind() {
                "function_definition" => {
                    self.process_function(&child, source, func_idx, false, Vec::new(), out);
                }
                "class_definition" => {
                    self.process_class(&child, source, func_idx, Vec::new(), out);
                }
                "decorated_definition" => {
                    self.process_decorated(&child, source, func_idx, false, out);
                }
                "import_statement" | "import_from_statement" => {
                    self.process_import(&child, source, out);
                }
                "call" => {
                    self.record_call(&child, source, func_idx, out);
                    self.visit_body(&child, source, func_idx, out);
                }
                _ => self.visit_body(&child, source, func_idx, out),
            }
        }
    }

    fn record_call(&self, call: &TSNode, source: &[u8], caller: usize, out: &mut ExtractionBuilder) {
        let Some(function) = call.child_by_field_name("function") else {
            return;
        };
        let line = call.start_position().row + 1;
        match function.kind() {
            "identifier" => {
                let callee = extract_text(&function, source);
                if !BUILTINS.contains(&callee) {
                    out.add_call(caller, callee, None, line);
                }
            }
            "attribute" => {
                let receiver = field_text(&function, "object", source);
                if let Some(callee) = field_text(&function, "attribute", source) {
                    out.add_call(caller, callee, receiver, line);
                }
            }
            _ => {}
        }
    }

    fn collect_class_attribute(
        &self,
        statement: &TSNode,
        source: &[u8],
        class_idx: usize,
        out: &mut ExtractionBuilder,
    ) {
        for assignment in named_children(statement) {
            if assignment.kind() != "assignment" {
                continue;
            }
            if let Some(left) = assignment.child_by_field_name("left") {
                if left.kind() == "identifier" {
                    let name = extract_text(&left, source).to_string();
                    let attributes = &mut out.entity_mut(class_idx).attributes;
                    if !attributes.contains(&name) {
                        attributes.push(name);
                    }
                }
            }
        }
    }

    fn process_import(&self, node: &TSNode, source: &[u8], out: &mut ExtractionBuilder) {
        let line = node.start_position().row + 1;
        let file_dir = parent_dir(out.path()).to_string();

        if node.kind() == "import_statement" {
            for item in named_children(node) {
                let (dotted, alias) = match item.kind() {
                    "dotted_name" => (extract_text(&item, source), None),
                    "aliased_import" => (
                        field_text(&item, "name", source).unwrap_or(""),
                        field_text(&item, "alias", source).map(str::to_string),
                    ),
                    _ => continue,
                };
                if dotted.is_empty() {
                    continue;
                }
                out.add_import(ImportRef {
                    importer: ExtractionBuilder::MODULE,
                    target: dotted.to_string(),
                    candidates: absolute_candidates(&file_dir, dotted),
                    symbols: Vec::new(),
                    alias: Some(alias.unwrap_or_else(|| dotted.to_string())),
                    line,
                });
            }
            return;
        }

        let Some(module_node) = node.child_by_field_name("module_name") else {
            return;
        };
        let module_text = extract_text(&module_node, source);
        let (target, candidates, symbol_base) = if module_node.kind() == "relative_import" {
            let dots = module_text.chars().take_while(|c| *c == '.').count();
            let rest = &module_text[dots..];
            let mut base = file_dir.clone();
            for _ in 1..dots {
                base = parent_dir(&base).to_string();
            }
            let module_dir = if rest.is_empty() {
                Some(base.clone())
            } else {
                join_relative(&base, &rest.replace('.', "/"))
            };
            let candidates = match &module_dir {
                Some(dir) if rest.is_empty() => vec![package_init(dir, "py")],
                Some(dir) => module_files(dir),
                None => Vec::new(),
            };
            (module_text.to_string(), candidates, module_dir.map(|d| vec![d]))
        } else {
            let slashed = module_text.replace('.', "/");
            let bases = ancestor_dirs(&file_dir)
                .into_iter()
                .filter_map(|dir| join_relative(&dir, &slashed))
                .collect::<Vec<_>>();
            (
                module_text.to_string(),
                absolute_candidates(&file_dir, module_text),
                Some(bases),
            )
        };

        let mut cursor = node.walk();
        let mut symbols = Vec::new();
        for item in node.children_by_field_name("name", &mut cursor) {
            let (name, alias) = match item.kind() {
                "dotted_name" => (extract_text(&item, source).to_string(), None),
                "aliased_import" => (
                    field_text(&item, "name", source).unwrap_or("").to_string(),
                    field_text(&item, "alias", source).map(str::to_string),
                ),
                _ => continue,
            };
            if name.is_empty() {
                continue;
            }
            let candidates = symbol_base
                .iter()
                .flatten()
                .flat_map(|dir| {
                    join_relative(dir, &name.replace('.', "/"))
                        .map(|sub| module_files(&sub))
                        .unwrap_or_default()
                })
                .collect();
            symbols.push(ImportedSymbol {
                name,
                alias,
                candidates,
            });
        }

        out.add_import(ImportRef {
            importer: ExtractionBuilder::MODULE,
            target,
            candidates,
            symbols,
            alias: None,
            line,
        });
    }
}

impl Default for PythonParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageParser for PythonParser {
    fn language(&self) -> Language {
        Language::Python
    }

    fn parse(&self, path: &str, source: &str) -> Result<ParseResult, ParseError> {
        let tree = parse_tree(tree_sitter_python::language(), path, source)?;
        let root = tree.root_node();
        let bytes = source.as_bytes();

        let mut out = ExtractionBuilder::new(path, Language::Python, source.lines().count());
        if let Some(doc) = body_docstring(&root, bytes) {
            out.entity_mut(ExtractionBuilder::MODULE).docstring = Some(doc);
        }
        self.visit_scope(&root, bytes, ExtractionBuilder::MODULE, false, &mut out);
        Ok(out.finish())
    }
}

fn is_boolean_operator(node: &TSNode, _source: &[u8]) -> bool {
    node.kind() == "boolean_operator"
}

/// Docstring of a module or block: a leading string expression statement.
fn body_docstring(body: &TSNode, source: &[u8]) -> Option<String> {
    let first = named_children(body)
        .into_iter()
        .find(|child| child.kind() != "comment")?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let string = first.named_child(0)?;
    if string.kind() != "string" {
        return None;
    }
    let doc = clean_docstring(extract_text(&string, source));
    (!doc.is_empty()).then_some(doc)
}

fn extract_parameters(params: &TSNode, source: &[u8]) -> Vec<Parameter> {
    named_children(params)
        .into_iter()
        .filter_map(|param| {
            let annotation = field_text(&param, "type", source).map(str::to_string);
            let name = match param.kind() {
                "identifier" => extract_text(&param, source).to_string(),
                "default_parameter" | "typed_default_parameter" => {
                    field_text(&param, "name", source)?.to_string()
                }
                "typed_parameter" => {
                    let inner = param.named_child(0)?;
                    extract_text(&inner, source).to_string()
                }
                "list_splat_pattern" | "dictionary_splat_pattern" => {
                    extract_text(&param, source).to_string()
                }
                _ => return None,
            };
            Some(Parameter::new(name, annotation))
        })
        .collect()
}

fn module_files(module_path: &str) -> Vec<String> {
    if module_path.is_empty() {
        return vec![package_init("", "py")];
    }
    vec![
        format!("{module_path}.py"),
        format!("{module_path}.pyi"),
        package_init(module_path, "py"),
    ]
}

fn package_init(dir: &str, extension: &str) -> String {
    if dir.is_empty() {
        format!("__init__.{extension}")
    } else {
        format!("{dir}/__init__.{extension}")
    }
}

/// Candidates for `import a.b`: the file's own directory first, then each
/// ancestor up to the repository root.
fn absolute_candidates(file_dir: &str, dotted: &str) -> Vec<String> {
    let slashed = dotted.replace('.', "/");
    ancestor_dirs(file_dir)
        .into_iter()
        .filter_map(|dir| join_relative(&dir, &slashed))
        .flat_map(|module| module_files(&module))
        .collect()
}
