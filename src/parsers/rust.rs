use std::collections::HashMap;
use tree_sitter::Node as TSNode;

use super::common::{
    clean_comment, cyclomatic_complexity, extract_text, field_text, join_relative, line_range,
    named_children, parent_dir, parse_tree, ExtractionBuilder,
};
use super::{ImportRef, ImportedSymbol, Language, LanguageParser, ParseError, ParseResult};
use crate::core::{EntityKind, Parameter};

const BRANCH_KINDS: &[&str] = &[
    "if_expression",
    "while_expression",
    "for_expression",
    "loop_expression",
    "match_arm",
];

const DEFINITION_KINDS: &[&str] = &["function_item", "impl_item", "trait_item", "mod_item"];

const TYPE_KINDS: &[&str] = &["struct_item", "enum_item", "union_item", "trait_item"];

pub struct RustParser;

/// Named type entities declared or implemented in one scope.
type TypeScope = HashMap<String, usize>;

impl RustParser {
    pub fn new() -> Self {
        Self
    }

    fn visit_items(&self, node: &TSNode, source: &[u8], parent: usize, out: &mut ExtractionBuilder) {
        let mut types = TypeScope::new();
        for item in named_children(node) {
            match item.kind() {
                "function_item" => {
                    self.process_function(&item, source, parent, EntityKind::Function, out);
                }
                kind if TYPE_KINDS.contains(&kind) => {
                    self.process_type(&item, source, parent, &mut types, out);
                }
                "impl_item" => self.process_impl(&item, source, parent, &mut types, out),
                "mod_item" => self.process_mod(&item, source, parent, out),
                "use_declaration" => self.process_use(&item, source, out),
                _ => {}
            }
        }
    }

    fn type_entity(
        &self,
        name: &str,
        node: &TSNode,
        parent: usize,
        types: &mut TypeScope,
        out: &mut ExtractionBuilder,
    ) -> usize {
        if let Some(&idx) = types.get(name) {
            return idx;
        }
        let idx = out.add(parent, name, EntityKind::Class, line_range(node));
        types.insert(name.to_string(), idx);
        idx
    }

    fn process_type(
        &self,
        item: &TSNode,
        source: &[u8],
        parent: usize,
        types: &mut TypeScope,
        out: &mut ExtractionBuilder,
    ) {
        let Some(name) = field_text(item, "name", source) else {
            return;
        };
        let class_idx = self.type_entity(name, item, parent, types, out);
        let (doc, attributes) = leading_docs_and_attributes(item, source);
        let fields = item
            .child_by_field_name("body")
            .map(|body| field_names(&body, source))
            .unwrap_or_default();

        let entity = out.entity_mut(class_idx);
        // An earlier `impl` block may have created the entity; the declaration wins.
        if let Some(location) = entity.location.as_mut() {
            let (start, end) = line_range(item);
            location.start_line = start;
            location.end_line = end;
        }
        entity.docstring = doc.or(entity.docstring.take());
        entity.decorators.extend(attributes);
        entity.attributes.extend(fields);

        if item.kind() == "trait_item" {
            if let Some(bounds) = item.child_by_field_name("bounds") {
                for bound in named_children(&bounds) {
                    if matches!(bound.kind(), "type_identifier" | "scoped_type_identifier") {
                        out.entity_mut(class_idx)
                            .bases
                            .push(extract_text(&bound, source).to_string());
                    }
                }
            }
            if let Some(body) = item.child_by_field_name("body") {
                for member in named_children(&body) {
                    if matches!(member.kind(), "function_item" | "function_signature_item") {
                        self.process_function(&member, source, class_idx, EntityKind::Method, out);
                    }
                }
            }
        }
    }

    fn process_impl(
        &self,
        item: &TSNode,
        source: &[u8],
        parent: usize,
        types: &mut TypeScope,
        out: &mut ExtractionBuilder,
    ) {
        let Some(type_node) = item.child_by_field_name("type") else {
            return;
        };
        let type_name = base_type_name(&type_node, source);
        if type_name.is_empty() {
            return;
        }
        let class_idx = self.type_entity(&type_name, item, parent, types, out);

        if let Some(trait_node) = item.child_by_field_name("trait") {
            let trait_name = base_type_name(&trait_node, source);
            let bases = &mut out.entity_mut(class_idx).bases;
            if !trait_name.is_empty() && !bases.contains(&trait_name) {
                bases.push(trait_name);
            }
        }

        if let Some(body) = item.child_by_field_name("body") {
            for member in named_children(&body) {
                if member.kind() == "function_item" {
                    self.process_function(&member, source, class_idx, EntityKind::Method, out);
                }
            }
        }
    }

    fn process_mod(&self, item: &TSNode, source: &[u8], parent: usize, out: &mut ExtractionBuilder) {
        let Some(name) = field_text(item, "name", source) else {
            return;
        };
        match item.child_by_field_name("body") {
            Some(body) => {
                let mod_idx = out.add(parent, name, EntityKind::Module, line_range(item));
                let (doc, attributes) = leading_docs_and_attributes(item, source);
                let entity = out.entity_mut(mod_idx);
                entity.docstring = doc;
                entity.decorators = attributes;
                self.visit_items(&body, source, mod_idx, out);
            }
            None => {
                // `mod foo;` pulls in foo.rs or foo/mod.rs.
                let dir = module_dir(out.path());
                let candidates = join_relative(&dir, name)
                    .map(|base| vec![format!("{base}.rs"), format!("{base}/mod.rs")])
                    .unwrap_or_default();
                out.add_import(ImportRef {
                    importer: ExtractionBuilder::MODULE,
                    target: name.to_string(),
                    candidates,
                    symbols: Vec::new(),
                    alias: Some(name.to_string()),
                    line: item.start_position().row + 1,
                });
            }
        }
    }

    fn process_function(
        &self,
        func_node: &TSNode,
        source: &[u8],
        parent: usize,
        kind: EntityKind,
        out: &mut ExtractionBuilder,
    ) {
        let Some(name) = field_text(func_node, "name", source) else {
            return;
        };
        let func_idx = out.add(parent, name, kind, line_range(func_node));

        let params_text = field_text(func_node, "parameters", source).unwrap_or("()");
        let return_type = field_text(func_node, "return_type", source).map(str::to_string);
        let mut signature = format!("fn {name}{params_text}");
        if let Some(ret) = &return_type {
            signature.push_str(" -> ");
            signature.push_str(ret);
        }
        let parameters = func_node
            .child_by_field_name("parameters")
            .map(|p| extract_parameters(&p, source))
            .unwrap_or_default();
        let is_async = named_children(func_node).iter().any(|child| {
            child.kind() == "function_modifiers" && extract_text(child, source).contains("async")
        });
        let (doc, attributes) = leading_docs_and_attributes(func_node, source);
        let body = func_node.child_by_field_name("body");
        let complexity = body.as_ref().map(|b| {
            cyclomatic_complexity(b, source, BRANCH_KINDS, DEFINITION_KINDS, is_boolean_operator)
        });

        let entity = out.entity_mut(func_idx);
        entity.parameters = parameters;
        entity.signature = Some(signature);
        entity.return_type = return_type;
        entity.is_async = is_async;
        entity.docstring = doc;
        entity.decorators = attributes;
        entity.complexity = complexity;

        if let Some(body) = body {
            self.visit_body(&body, source, func_idx, out);
        }
    }

    fn visit_body(&self, node: &TSNode, source: &[u8], func_idx: usize, out: &mut ExtractionBuilder) {
        for child in named_children(node) {
            match child.kind() {
                "function_item" => {
                    self.process_function(&child, source, func_idx, EntityKind::Function, out);
                }
                "use_declaration" => self.process_use(&child, source, out),
                "call_expression" => {
                    self.record_call(&child, source, func_idx, out);
                    self.visit_body(&child, source, func_idx, out);
                }
                // Items nested in bodies other than plain functions are skipped.
                "impl_item" | "trait_item" | "mod_item" | "struct_item" | "enum_item" => {}
                _ => self.visit_body(&child, source, func_idx, out),
            }
        }
    }

    fn record_call(&self, call: &TSNode, source: &[u8], caller: usize, out: &mut ExtractionBuilder) {
        let Some(mut function) = call.child_by_field_name("function") else {
            return;
        };
        if function.kind() == "generic_function" {
            match function.child_by_field_name("function") {
                Some(inner) => function = inner,
                None => return,
            }
        }
        let line = call.start_position().row + 1;
        match function.kind() {
            "identifier" => out.add_call(caller, extract_text(&function, source), None, line),
            "field_expression" => {
                let receiver = field_text(&function, "value", source);
                if let Some(field) = field_text(&function, "field", source) {
                    out.add_call(caller, field, receiver, line);
                }
            }
            "scoped_identifier" => {
                let receiver = field_text(&function, "path", source);
                if let Some(name) = field_text(&function, "name", source) {
                    out.add_call(caller, name, receiver, line);
                }
            }
            _ => {}
        }
    }

    fn process_use(&self, item: &TSNode, source: &[u8], out: &mut ExtractionBuilder) {
        let Some(argument) = item.child_by_field_name("argument") else {
            return;
        };
        let mut paths = Vec::new();
        flatten_use_tree(&argument, source, Vec::new(), &mut paths);
        let line = item.start_position().row + 1;

        // Group imported names by the module path they come from.
        let mut grouped: Vec<(Vec<String>, Vec<ImportedSymbol>)> = Vec::new();
        for UsePath { segments, alias } in paths {
            let Some((symbol, module)) = segments.split_last() else {
                continue;
            };
            let symbol_candidates = resolve_module_files(out.path(), &segments);
            if module.is_empty() {
                // `use serde;` names a crate or module directly.
                out.add_import(ImportRef {
                    importer: ExtractionBuilder::MODULE,
                    target: symbol.clone(),
                    candidates: symbol_candidates,
                    symbols: Vec::new(),
                    alias: Some(alias.unwrap_or_else(|| symbol.clone())),
                    line,
                });
                continue;
            }
            let module = module.to_vec();
            let imported = ImportedSymbol {
                name: symbol.clone(),
                alias,
                candidates: symbol_candidates,
            };
            match grouped.iter_mut().find(|(m, _)| *m == module) {
                Some((_, symbols)) => symbols.push(imported),
                None => grouped.push((module, vec![imported])),
            }
        }

        for (module, symbols) in grouped {
            let candidates = resolve_module_files(out.path(), &module);
            out.add_import(ImportRef {
                importer: ExtractionBuilder::MODULE,
                target: module.join("::"),
                candidates,
                symbols,
                alias: None,
                line,
            });
        }
    }
}

impl Default for RustParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageParser for RustParser {
    fn language(&self) -> Language {
        Language::Rust
    }

    fn parse(&self, path: &str, source: &str) -> Result<ParseResult, ParseError> {
        let tree = parse_tree(tree_sitter_rust::language(), path, source)?;
        let root = tree.root_node();
        let bytes = source.as_bytes();

        let mut out = ExtractionBuilder::new(path, Language::Rust, source.lines().count());
        let inner_docs: Vec<&str> = named_children(&root)
            .iter()
            .take_while(|c| c.kind() == "line_comment" || c.kind() == "block_comment")
            .map(|c| extract_text(c, bytes))
            .filter(|text| text.starts_with("//!") || text.starts_with("/*!"))
            .collect();
        if !inner_docs.is_empty() {
            out.entity_mut(ExtractionBuilder::MODULE).docstring =
                Some(clean_comment(&inner_docs.join("\n")));
        }
        self.visit_items(&root, bytes, ExtractionBuilder::MODULE, &mut out);
        Ok(out.finish())
    }
}

fn is_boolean_operator(node: &TSNode, source: &[u8]) -> bool {
    node.kind() == "binary_expression"
        && matches!(field_text(node, "operator", source), Some("&&" | "||"))
}

/// `Vec<T>` -> `Vec`, `crate::a::B` -> `B`, `&mut T` -> `T`.
fn base_type_name(node: &TSNode, source: &[u8]) -> String {
    match node.kind() {
        "generic_type" => node
            .child_by_field_name("type")
            .map(|inner| base_type_name(&inner, source))
            .unwrap_or_default(),
        "scoped_type_identifier" => field_text(node, "name", source)
            .unwrap_or_default()
            .to_string(),
        "reference_type" => node
            .child_by_field_name("type")
            .map(|inner| base_type_name(&inner, source))
            .unwrap_or_default(),
        _ => extract_text(node, source).to_string(),
    }
}

/// `///` comments and `#[...]` attributes stacked above an item.
fn leading_docs_and_attributes(item: &TSNode, source: &[u8]) -> (Option<String>, Vec<String>) {
    let mut docs = Vec::new();
    let mut attributes = Vec::new();
    let mut previous = item.prev_sibling();
    while let Some(node) = previous {
        let text = extract_text(&node, source);
        match node.kind() {
            "line_comment" if text.starts_with("///") => docs.push(text),
            "block_comment" if text.starts_with("/**") => docs.push(text),
            "attribute_item" => attributes.push(
                text.trim_start_matches("#[")
                    .trim_end_matches(']')
                    .to_string(),
            ),
            _ => break,
        }
        previous = node.prev_sibling();
    }
    docs.reverse();
    attributes.reverse();
    let doc = (!docs.is_empty())
        .then(|| clean_comment(&docs.join("\n")))
        .filter(|d| !d.is_empty());
    (doc, attributes)
}

fn field_names(body: &TSNode, source: &[u8]) -> Vec<String> {
    named_children(body)
        .iter()
        .filter(|f| f.kind() == "field_declaration" || f.kind() == "enum_variant")
        .filter_map(|f| field_text(f, "name", source).map(str::to_string))
        .collect()
}

fn extract_parameters(params: &TSNode, source: &[u8]) -> Vec<Parameter> {
    named_children(params)
        .into_iter()
        .filter_map(|param| match param.kind() {
            "self_parameter" => Some(Parameter::new(extract_text(&param, source), None)),
            "parameter" => {
                let name = field_text(&param, "pattern", source)?;
                let annotation = field_text(&param, "type", source).map(str::to_string);
                Some(Parameter::new(name, annotation))
            }
            _ => None,
        })
        .collect()
}

struct UsePath {
    segments: Vec<String>,
    alias: Option<String>,
}

fn path_segments(node: &TSNode, source: &[u8]) -> Vec<String> {
    extract_text(node, source)
        .split("::")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn flatten_use_tree(node: &TSNode, source: &[u8], prefix: Vec<String>, out: &mut Vec<UsePath>) {
    match node.kind() {
        "scoped_use_list" => {
            let mut next = prefix;
            if let Some(path) = node.child_by_field_name("path") {
                next.extend(path_segments(&path, source));
            }
            if let Some(list) = node.child_by_field_name("list") {
                for child in named_children(&list) {
                    flatten_use_tree(&child, source, next.clone(), out);
                }
            }
        }
        "use_list" => {
            for child in named_children(node) {
                flatten_use_tree(&child, source, prefix.clone(), out);
            }
        }
        "use_as_clause" => {
            let mut segments = prefix;
            if let Some(path) = node.child_by_field_name("path") {
                segments.extend(path_segments(&path, source));
            }
            out.push(UsePath {
                segments,
                alias: field_text(node, "alias", source).map(str::to_string),
            });
        }
        "use_wildcard" => {
            let mut segments = prefix;
            segments.extend(path_segments(node, source).into_iter().filter(|s| s != "*"));
            segments.push("*".to_string());
            out.push(UsePath {
                segments,
                alias: None,
            });
        }
        _ => {
            let mut segments = prefix;
            segments.extend(path_segments(node, source));
            out.push(UsePath {
                segments,
                alias: None,
            });
        }
    }
}

/// Directory holding the submodules of the module defined in `path`.
///
/// `src/lib.rs` and `src/a/mod.rs` own their directory; `src/a/b.rs` owns `src/a/b`.
fn module_dir(path: &str) -> String {
    let dir = parent_dir(path);
    let file = path.rsplit('/').next().unwrap_or(path);
    match file {
        "lib.rs" | "main.rs" | "mod.rs" => dir.to_string(),
        _ => {
            let stem = file.trim_end_matches(".rs");
            if dir.is_empty() {
                stem.to_string()
            } else {
                format!("{dir}/{stem}")
            }
        }
    }
}

/// Crate root directory: the nearest `src` ancestor, else the file's directory.
fn crate_root(path: &str) -> String {
    let mut dir = parent_dir(path);
    loop {
        if dir == "src" || dir.ends_with("/src") {
            return dir.to_string();
        }
        if dir.is_empty() {
            return parent_dir(path).to_string();
        }
        dir = parent_dir(dir);
    }
}

/// Files that could define the module named by `segments`, or nothing for
/// paths into other crates.
fn resolve_module_files(importer: &str, segments: &[String]) -> Vec<String> {
    let Some(first) = segments.first() else {
        return Vec::new();
    };
    let (mut base, rest) = match first.as_str() {
        "crate" => (crate_root(importer), &segments[1..]),
        "self" => (module_dir(importer), &segments[1..]),
        "super" => {
            let mut base = module_dir(importer);
            let mut rest = segments;
            while rest.first().map(String::as_str) == Some("super") {
                base = parent_dir(&base).to_string();
                rest = &rest[1..];
            }
            (base, rest)
        }
        _ => return Vec::new(),
    };
    if rest.iter().any(|s| s == "*") {
        return Vec::new();
    }
    if rest.is_empty() {
        return ["lib.rs", "main.rs", "mod.rs"]
            .iter()
            .filter_map(|f| join_relative(&base, f))
            .collect();
    }
    for segment in rest {
        match join_relative(&base, segment) {
            Some(next) => base = next,
            None => return Vec::new(),
        }
    }
    vec![format!("{base}.rs"), format!("{base}/mod.rs")]
}
