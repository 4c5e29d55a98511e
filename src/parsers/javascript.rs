use tree_sitter::Node as TSNode;

use super::common::{
    clean_comment, cyclomatic_complexity, extract_text, field_text, join_relative, line_range,
    named_children, parent_dir, parse_tree, ExtractionBuilder,
};
use super::{ImportRef, ImportedSymbol, Language, LanguageParser, ParseError, ParseResult};
use crate::core::{EntityKind, Parameter};

const BRANCH_KINDS: &[&str] = &[
    "if_statement",
    "for_statement",
    "for_in_statement",
    "while_statement",
    "do_statement",
    "catch_clause",
    "ternary_expression",
    "switch_case",
];

const DEFINITION_KINDS: &[&str] = &[
    "function_declaration",
    "generator_function_declaration",
    "class_declaration",
    "abstract_class_declaration",
];

const RESOLVABLE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs"];

const GLOBAL_RECEIVERS: &[&str] = &[
    "console", "Math", "JSON", "Object", "Array", "Promise", "Number", "String", "Date",
    "Reflect", "process", "window", "document",
];

const BUILTINS: &[&str] = &[
    "require", "parseInt", "parseFloat", "setTimeout", "setInterval", "clearTimeout",
    "clearInterval", "isNaN", "Number", "String", "Boolean", "Symbol", "Error", "fetch",
];

/// Parser for JavaScript and TypeScript, which share most of their grammar.
pub struct JavaScriptParser {
    language: Language,
}

impl JavaScriptParser {
    pub fn javascript() -> Self {
        Self {
            language: Language::JavaScript,
        }
    }

    pub fn typescript() -> Self {
        Self {
            language: Language::TypeScript,
        }
    }

    fn grammar(&self, path: &str) -> tree_sitter::Language {
        match self.language {
            Language::TypeScript if path.ends_with(".tsx") => {
                tree_sitter_typescript::language_tsx()
            }
            Language::TypeScript => tree_sitter_typescript::language_typescript(),
            _ => tree_sitter_javascript::language(),
        }
    }

    fn visit_scope(&self, node: &TSNode, source: &[u8], parent: usize, out: &mut ExtractionBuilder) {
        for child in named_children(node) {
            self.visit_statement(&child, source, parent, out);
        }
    }

    fn visit_statement(
        &self,
        child: &TSNode,
        source: &[u8],
        parent: usize,
        out: &mut ExtractionBuilder,
    ) {
        match child.kind() {
            "function_declaration" | "generator_function_declaration" => {
                if let Some(name) = field_text(child, "name", source) {
                    self.process_function(child, child, name, source, parent, EntityKind::Function, out);
                }
            }
            "class_declaration" | "abstract_class_declaration" | "class" => {
                self.process_class(child, source, parent, out);
            }
            "export_statement" => {
                if let Some(declaration) = child.child_by_field_name("declaration") {
                    self.visit_statement(&declaration, source, parent, out);
                }
            }
            "lexical_declaration" | "variable_declaration" => {
                self.process_declarators(child, source, parent, out);
            }
            "import_statement" => self.process_import(child, source, out),
            _ => {}
        }
    }

    /// `const f = () => ...`, `const f = function () ...` and `require` calls.
    fn process_declarators(
        &self,
        declaration: &TSNode,
        source: &[u8],
        parent: usize,
        out: &mut ExtractionBuilder,
    ) {
        for declarator in named_children(declaration) {
            if declarator.kind() != "variable_declarator" {
                continue;
            }
            let (Some(name_node), Some(value)) = (
                declarator.child_by_field_name("name"),
                declarator.child_by_field_name("value"),
            ) else {
                continue;
            };
            let name = extract_text(&name_node, source);
            match value.kind() {
                "arrow_function" | "function" | "function_expression" => {
                    self.process_function(
                        &value,
                        declaration,
                        name,
                        source,
                        parent,
                        EntityKind::Function,
                        out,
                    );
                }
                "call_expression" => {
                    self.process_require(&value, name_node.kind() == "identifier", name, source, out);
                }
                _ => {}
            }
        }
    }

    fn process_class(&self, class_node: &TSNode, source: &[u8], parent: usize, out: &mut ExtractionBuilder) {
        let Some(name) = field_text(class_node, "name", source) else {
            return;
        };
        let class_idx = out.add(parent, name, EntityKind::Class, line_range(class_node));

        let mut bases = Vec::new();
        for child in named_children(class_node) {
            if child.kind() == "class_heritage" {
                collect_heritage(&child, source, &mut bases);
            }
        }
        let decorators = named_children(class_node)
            .iter()
            .filter(|c| c.kind() == "decorator")
            .map(|d| extract_text(d, source).trim_start_matches('@').to_string())
            .collect();
        let docstring = leading_doc_comment(class_node, source);

        let entity = out.entity_mut(class_idx);
        entity.bases = bases;
        entity.decorators = decorators;
        entity.docstring = docstring;

        let Some(body) = class_node.child_by_field_name("body") else {
            return;
        };
        for member in named_children(&body) {
            match member.kind() {
                "method_definition" => {
                    if let Some(method_name) = field_text(&member, "name", source) {
                        self.process_function(
                            &member,
                            &member,
                            method_name,
                            source,
                            class_idx,
                            EntityKind::Method,
                            out,
                        );
                    }
                }
                "field_definition" | "public_field_definition" => {
                    let field = field_text(&member, "property", source)
                        .or_else(|| field_text(&member, "name", source));
                    if let Some(field) = field {
                        out.entity_mut(class_idx).attributes.push(field.to_string());
                    }
                }
                _ => {}
            }
        }
    }

    /// `func_node` carries parameters and body; `doc_anchor` is where a
    /// leading doc comment would sit.
    #[allow(clippy::too_many_arguments)]
    fn process_function(
        &self,
        func_node: &TSNode,
        doc_anchor: &TSNode,
        name: &str,
        source: &[u8],
        parent: usize,
        kind: EntityKind,
        out: &mut ExtractionBuilder,
    ) {
        let func_idx = out.add(parent, name, kind, line_range(doc_anchor));

        let params_node = func_node
            .child_by_field_name("parameters")
            .or_else(|| func_node.child_by_field_name("parameter"));
        let params_text = params_node
            .map(|p| extract_text(&p, source).to_string())
            .unwrap_or_else(|| "()".to_string());
        let params_text = if params_text.starts_with('(') {
            params_text
        } else {
            format!("({params_text})")
        };
        let return_type = field_text(func_node, "return_type", source)
            .map(|t| t.trim_start_matches(':').trim().to_string());
        let mut signature = format!("{name}{params_text}");
        if let Some(ret) = &return_type {
            signature.push_str(": ");
            signature.push_str(ret);
        }
        let parameters = params_node
            .map(|p| extract_parameters(&p, source))
            .unwrap_or_default();
        let is_async = has_async_keyword(func_node);
        let body = func_node.child_by_field_name("body");
        let complexity = body.as_ref().map(|b| {
            cyclomatic_complexity(b, source, BRANCH_KINDS, DEFINITION_KINDS, is_boolean_operator)
        });
        let docstring = leading_doc_comment(doc_anchor, source);

        let entity = out.entity_mut(func_idx);
        entity.parameters = parameters;
        entity.signature = Some(signature);
        entity.return_type = return_type;
        entity.is_async = is_async;
        entity.complexity = complexity;
        entity.docstring = docstring;

        match body {
            Some(body) if body.kind() == "statement_block" => {
                self.visit_body(&body, source, func_idx, out)
            }
            // Expression-bodied arrow: the body is itself the expression.
            Some(body) => self.visit_node(&body, source, func_idx, out),
            None => {}
        }
    }

    fn visit_body(&self, node: &TSNode, source: &[u8], func_idx: usize, out: &mut ExtractionBuilder) {
        for child in named_children(node) {
            self.visit_node(&child, source, func_idx, out);
        }
    }

    fn visit_node(&self, child: &TSNode, source: &[u8], func_idx: usize, out: &mut ExtractionBuilder) {
        let child = *child;
        match child.kind() {
            "function_declaration" | "generator_function_declaration" => {
                if let Some(name) = field_text(&child, "name", source) {
                    self.process_function(
                        &child,
                        &child,
                        name,
                        source,
                        func_idx,
                        EntityKind::Function,
                        out,
                    );
                }
            }
            "class_declaration" | "abstract_class_declaration" => {
                self.process_class(&child, source, func_idx, out);
            }
            "lexical_declaration" | "variable_declaration" => {
                self.visit_local_declaration(&child, source, func_idx, out);
            }
            "call_expression" => {
                self.record_call(&child, source, func_idx, out);
                self.visit_body(&child, source, func_idx, out);
            }
            "new_expression" => {
                if let Some(constructor) = field_text(&child, "constructor", source) {
                    if !BUILTINS.contains(&constructor) && !constructor.contains('.') {
                        out.add_call(func_idx, constructor, None, child.start_position().row + 1);
                    }
                }
                self.visit_body(&child, source, func_idx, out);
            }
            _ => self.visit_body(&child, source, func_idx, out),
        }
    }

    /// Named arrow and function expressions inside a body become nested
    /// functions; any other initializer is scanned for calls.
    fn visit_local_declaration(
        &self,
        declaration: &TSNode,
        source: &[u8],
        func_idx: usize,
        out: &mut ExtractionBuilder,
    ) {
        for declarator in named_children(declaration) {
            let named_function = declarator
                .child_by_field_name("name")
                .filter(|name| name.kind() == "identifier")
                .zip(declarator.child_by_field_name("value"))
                .filter(|(_, value)| {
                    matches!(value.kind(), "arrow_function" | "function" | "function_expression")
                });
            match named_function {
                Some((name, value)) => self.process_function(
                    &value,
                    declaration,
                    extract_text(&name, source),
                    source,
                    func_idx,
                    EntityKind::Function,
                    out,
                ),
                None => self.visit_node(&declarator, source, func_idx, out),
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
            "member_expression" => {
                let receiver = field_text(&function, "object", source);
                if receiver.map(|r| GLOBAL_RECEIVERS.contains(&r)).unwrap_or(false) {
                    return;
                }
                if let Some(callee) = field_text(&function, "property", source) {
                    out.add_call(caller, callee, receiver, line);
                }
            }
            _ => {}
        }
    }

    fn process_import(&self, node: &TSNode, source: &[u8], out: &mut ExtractionBuilder) {
        let Some(specifier) = field_text(node, "source", source) else {
            return;
        };
        let specifier = unquote(specifier);
        let mut symbols = Vec::new();
        let mut alias = None;

        if let Some(clause) = named_children(node)
            .into_iter()
            .find(|c| c.kind() == "import_clause")
        {
            for part in named_children(&clause) {
                match part.kind() {
                    // Default import: bound to the module itself.
                    "identifier" => alias = Some(extract_text(&part, source).to_string()),
                    "namespace_import" => {
                        if let Some(ident) = named_children(&part).first() {
                            alias = Some(extract_text(ident, source).to_string());
                        }
                    }
                    "named_imports" => {
                        for spec in named_children(&part) {
                            if spec.kind() != "import_specifier" {
                                continue;
                            }
                            if let Some(name) = field_text(&spec, "name", source) {
                                symbols.push(ImportedSymbol {
                                    name: name.to_string(),
                                    alias: field_text(&spec, "alias", source).map(str::to_string),
                                    candidates: Vec::new(),
                                });
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        out.add_import(ImportRef {
            importer: ExtractionBuilder::MODULE,
            target: specifier.to_string(),
            candidates: specifier_candidates(out.path(), specifier),
            symbols,
            alias,
            line: node.start_position().row + 1,
        });
    }

    fn process_require(
        &self,
        call: &TSNode,
        binds_name: bool,
        name: &str,
        source: &[u8],
        out: &mut ExtractionBuilder,
    ) {
        if field_text(call, "function", source) != Some("require") {
            return;
        }
        let Some(arguments) = call.child_by_field_name("arguments") else {
            return;
        };
        let Some(first) = named_children(&arguments).into_iter().next() else {
            return;
        };
        if first.kind() != "string" {
            return;
        }
        let specifier = unquote(extract_text(&first, source));
        out.add_import(ImportRef {
            importer: ExtractionBuilder::MODULE,
            target: specifier.to_string(),
            candidates: specifier_candidates(out.path(), specifier),
            symbols: Vec::new(),
            alias: binds_name.then(|| name.to_string()),
            line: call.start_position().row + 1,
        });
    }
}

impl LanguageParser for JavaScriptParser {
    fn language(&self) -> Language {
        self.language
    }

    fn parse(&self, path: &str, source: &str) -> Result<ParseResult, ParseError> {
        let tree = parse_tree(self.grammar(path), path, source)?;
        let root = tree.root_node();
        let bytes = source.as_bytes();

        let mut out = ExtractionBuilder::new(path, self.language, source.lines().count());
        if let Some(first) = named_children(&root).first() {
            if first.kind() == "comment" {
                let text = extract_text(first, bytes);
                if text.starts_with("/**") {
                    out.entity_mut(ExtractionBuilder::MODULE).docstring = Some(clean_comment(text));
                }
            }
        }
        self.visit_scope(&root, bytes, ExtractionBuilder::MODULE, &mut out);
        Ok(out.finish())
    }
}

fn is_boolean_operator(node: &TSNode, source: &[u8]) -> bool {
    node.kind() == "binary_expression"
        && matches!(field_text(node, "operator", source), Some("&&" | "||" | "??"))
}

fn has_async_keyword(node: &TSNode) -> bool {
    let mut cursor = node.walk();
    let found = node.children(&mut cursor).any(|child| child.kind() == "async");
    found
}

/// `extends Base` / `extends ns.Base` / `implements I, J`.
fn collect_heritage(heritage: &TSNode, source: &[u8], bases: &mut Vec<String>) {
    for child in named_children(heritage) {
        match child.kind() {
            "identifier" | "member_expression" | "type_identifier" | "nested_type_identifier" => {
                bases.push(extract_text(&child, source).to_string());
            }
            "generic_type" => {
                if let Some(name) = field_text(&child, "name", source) {
                    bases.push(name.to_string());
                }
            }
            "call_expression" => {
                // Mixins: `extends mix(A)`; keep the callee name.
                if let Some(function) = field_text(&child, "function", source) {
                    bases.push(function.to_string());
                }
            }
            "extends_clause" | "implements_clause" => collect_heritage(&child, source, bases),
            _ => {}
        }
    }
}

/// The `/** ... */` comment directly before a declaration, looking through
/// an enclosing `export` statement.
fn leading_doc_comment(node: &TSNode, source: &[u8]) -> Option<String> {
    let anchor = match node.parent() {
        Some(parent) if parent.kind() == "export_statement" => parent,
        _ => *node,
    };
    let previous = anchor.prev_named_sibling()?;
    if previous.kind() != "comment" {
        return None;
    }
    let text = extract_text(&previous, source);
    if !text.starts_with("/**") {
        return None;
    }
    let doc = clean_comment(text);
    (!doc.is_empty()).then_some(doc)
}

fn extract_parameters(params: &TSNode, source: &[u8]) -> Vec<Parameter> {
    if params.kind() == "identifier" {
        return vec![Parameter::new(extract_text(params, source), None)];
    }
    named_children(params)
        .into_iter()
        .filter_map(|param| match param.kind() {
            "identifier" | "rest_pattern" | "object_pattern" | "array_pattern" => {
                Some(Parameter::new(extract_text(&param, source), None))
            }
            "assignment_pattern" => {
                field_text(&param, "left", source).map(|left| Parameter::new(left, None))
            }
            "required_parameter" | "optional_parameter" => {
                let name = field_text(&param, "pattern", source)?;
                let annotation = field_text(&param, "type", source)
                    .map(|t| t.trim_start_matches(':').trim().to_string());
                Some(Parameter::new(name, annotation))
            }
            _ => None,
        })
        .collect()
}

fn unquote(text: &str) -> &str {
    text.trim_matches(|c| c == '"' || c == '\'' || c == '`')
}

/// Relative specifiers map onto files; bare package names have no candidates.
fn specifier_candidates(importer: &str, specifier: &str) -> Vec<String> {
    if !specifier.starts_with('.') {
        return Vec::new();
    }
    let Some(base) = join_relative(parent_dir(importer), specifier) else {
        return Vec::new();
    };
    let mut candidates = vec![base.clone()];
    candidates.extend(RESOLVABLE_EXTENSIONS.iter().map(|ext| format!("{base}.{ext}")));
    candidates.extend(RESOLVABLE_EXTENSIONS.iter().map(|ext| format!("{base}/index.{ext}")));
    candidates
}
