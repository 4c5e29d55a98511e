use std::collections::HashSet;
use tree_sitter::{Node as TSNode, Parser, Tree};

use super::{CallSite, ExtractedEntity, ImportRef, Language, ParseError, ParseResult};
use crate::core::{module_name_from_path, Entity, EntityKind, EntityOrigin, SourceLocation};

pub struct TreeSitterParser {
    parser: Parser,
}

impl TreeSitterParser {
    pub fn new(language: tree_sitter::Language) -> Result<Self, tree_sitter::LanguageError> {
        let mut parser = Parser::new();
        parser.set_language(language)?;
        Ok(Self { parser })
    }

    /// Parse `source`, treating any recovered syntax error as a failure.
    pub fn parse(&mut self, path: &str, source: &str) -> Result<Tree, ParseError> {
        let tree = self
            .parser
            .parse(source, None)
            .ok_or_else(|| ParseError::new(path, "parser returned no tree"))?;
        let root = tree.root_node();
        if root.has_error() {
            let line = first_error_line(&root).unwrap_or(1);
            return Err(ParseError::new(path, "invalid syntax").at_line(line));
        }
        Ok(tree)
    }
}

/// Parse with a freshly configured tree-sitter parser.
///
/// `tree_sitter::Parser` is not `Sync`, so each call builds its own.
pub fn parse_tree(
    language: tree_sitter::Language,
    path: &str,
    source: &str,
) -> Result<Tree, ParseError> {
    let mut parser = TreeSitterParser::new(language)
        .map_err(|err| ParseError::new(path, format!("grammar unavailable: {err}")))?;
    parser.parse(path, source)
}

fn first_error_line(node: &TSNode) -> Option<usize> {
    if node.is_error() || node.is_missing() {
        return Some(node.start_position().row + 1);
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.has_error() {
            if let Some(line) = first_error_line(&child) {
                return Some(line);
            }
        }
    }
    None
}

pub fn extract_text<'a>(node: &TSNode, source: &'a [u8]) -> &'a str {
    std::str::from_utf8(&source[node.byte_range()]).unwrap_or("")
}

pub fn field_text<'a>(node: &TSNode, field: &str, source: &'a [u8]) -> Option<&'a str> {
    node.child_by_field_name(field)
        .map(|child| extract_text(&child, source))
}

pub fn find_child_by_kind<'a>(node: &TSNode<'a>, kind: &str) -> Option<TSNode<'a>> {
    let mut cursor = node.walk();
    let found = node.children(&mut cursor).find(|child| child.kind() == kind);
    found
}

pub fn find_children_by_kind<'a>(node: &TSNode<'a>, kind: &str) -> Vec<TSNode<'a>> {
    let mut cursor = node.walk();
    let found = node
        .children(&mut cursor)
        .filter(|child| child.kind() == kind)
        .collect();
    found
}

pub fn named_children<'a>(node: &TSNode<'a>) -> Vec<TSNode<'a>> {
    let mut cursor = node.walk();
    let children = node.named_children(&mut cursor).collect();
    children
}

/// 1-based start and end lines of a node.
pub fn line_range(node: &TSNode) -> (usize, usize) {
    (node.start_position().row + 1, node.end_position().row + 1)
}

/// Strip quotes and string prefixes, then dedent.
pub fn clean_docstring(raw: &str) -> String {
    let trimmed = raw.trim_start_matches(|c: char| matches!(c, 'r' | 'R' | 'u' | 'U' | 'b' | 'B'));
    let unquoted = ["\"\"\"", "'''", "\"", "'"]
        .iter()
        .find_map(|quote| {
            trimmed
                .strip_prefix(quote)
                .and_then(|s| s.strip_suffix(quote))
        })
        .unwrap_or(trimmed);
    dedent(unquoted)
}

/// Turn `/** ... */` or `///` comment text into plain lines.
pub fn clean_comment(raw: &str) -> String {
    let body = raw
        .trim()
        .trim_start_matches("/**")
        .trim_start_matches("/*!")
        .trim_end_matches("*/");
    let lines: Vec<&str> = body
        .lines()
        .map(|line| {
            let line = line.trim();
            let line = line
                .strip_prefix("///")
                .or_else(|| line.strip_prefix("//!"))
                .or_else(|| line.strip_prefix("//"))
                .unwrap_or(line);
            let line = line.strip_prefix('*').unwrap_or(line);
            line.strip_prefix(' ').unwrap_or(line)
        })
        .collect();
    lines.join("\n").trim().to_string()
}

fn dedent(text: &str) -> String {
    let indent = text
        .lines()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);
    let mut lines = text.lines();
    let mut out: Vec<String> = Vec::new();
    if let Some(first) = lines.next() {
        out.push(first.trim().to_string());
    }
    for line in lines {
        out.push(line.get(indent..).unwrap_or(line.trim_start()).trim_end().to_string());
    }
    out.join("\n").trim().to_string()
}

/// Directory part of a repository-relative path; empty at the root.
pub fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// Join `relative` onto `base`, folding `.` and `..`.
///
/// Returns `None` when the result would escape the repository root.
pub fn join_relative(base: &str, relative: &str) -> Option<String> {
    let mut parts: Vec<&str> = base.split('/').filter(|p| !p.is_empty()).collect();
    for segment in relative.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    Some(parts.join("/"))
}

/// `base` followed by each of its ancestors, nearest first, ending at the root.
pub fn ancestor_dirs(base: &str) -> Vec<String> {
    let mut dirs = Vec::new();
    let mut current = base.to_string();
    loop {
        dirs.push(current.clone());
        if current.is_empty() {
            break;
        }
        current = parent_dir(&current).to_string();
    }
    dirs
}

/// Counts decision points under a body, without entering nested definitions.
pub fn cyclomatic_complexity(
    body: &TSNode,
    source: &[u8],
    branch_kinds: &[&str],
    nested_definitions: &[&str],
    is_boolean_operator: fn(&TSNode, &[u8]) -> bool,
) -> u32 {
    let mut complexity = 1;
    let mut stack = vec![*body];
    while let Some(node) = stack.pop() {
        if branch_kinds.contains(&node.kind()) || is_boolean_operator(&node, source) {
            complexity += 1;
        }
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            if !nested_definitions.contains(&child.kind()) {
                stack.push(child);
            }
        }
    }
    complexity
}

/// Accumulates the entities of one file and hands out unique qualified names.
pub struct ExtractionBuilder {
    path: String,
    language: Language,
    entities: Vec<ExtractedEntity>,
    taken: HashSet<String>,
    imports: Vec<ImportRef>,
    call_sites: Vec<CallSite>,
}

impl ExtractionBuilder {
    /// Local index of the file module.
    pub const MODULE: usize = 0;

    pub fn new(path: &str, language: Language, line_count: usize) -> Self {
        let module = Entity::new(
            path.to_string(),
            module_name_from_path(path),
            EntityKind::Module,
            EntityOrigin::Source,
        )
        .with_language(language)
        .with_location(SourceLocation {
            file: path.to_string(),
            start_line: 1,
            end_line: line_count.max(1),
        });
        let mut taken = HashSet::new();
        taken.insert(path.to_string());
        Self {
            path: path.to_string(),
            language,
            entities: vec![ExtractedEntity {
                entity: module,
                parent: None,
            }],
            taken,
            imports: Vec::new(),
            call_sites: Vec::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Add an entity under `parent`; re-definitions get an `@line` suffix.
    pub fn add(
        &mut self,
        parent: usize,
        name: &str,
        kind: EntityKind,
        lines: (usize, usize),
    ) -> usize {
        let base = format!("{}::{}", self.entities[parent].entity.qualified_name, name);
        let qualified_name = if self.taken.contains(&base) {
            let with_line = format!("{base}@{}", lines.0);
            let mut candidate = with_line.clone();
            let mut n = 2;
            while self.taken.contains(&candidate) {
                candidate = format!("{with_line}#{n}");
                n += 1;
            }
            candidate
        } else {
            base
        };
        self.taken.insert(qualified_name.clone());

        let entity = Entity::new(qualified_name, name.to_string(), kind, EntityOrigin::Source)
            .with_language(self.language)
            .with_location(SourceLocation {
                file: self.path.clone(),
                start_line: lines.0,
                end_line: lines.1,
            });
        self.entities.push(ExtractedEntity {
            entity,
            parent: Some(parent),
        });
        self.entities.len() - 1
    }

    pub fn entity(&self, index: usize) -> &Entity {
        &self.entities[index].entity
    }

    pub fn entity_mut(&mut self, index: usize) -> &mut Entity {
        &mut self.entities[index].entity
    }

    pub fn kind(&self, index: usize) -> EntityKind {
        self.entities[index].entity.kind
    }

    /// Direct child of `parent` with the given name and kind.
    pub fn find_child(&self, parent: usize, name: &str, kind: EntityKind) -> Option<usize> {
        self.entities.iter().position(|e| {
            e.parent == Some(parent) && e.entity.name == name && e.entity.kind == kind
        })
    }

    pub fn add_import(&mut self, import: ImportRef) {
        self.imports.push(import);
    }

    pub fn add_call(&mut self, caller: usize, callee: &str, receiver: Option<&str>, line: usize) {
        if callee.is_empty() {
            return;
        }
        self.call_sites.push(CallSite {
            caller,
            callee: callee.to_string(),
            receiver: receiver.map(str::to_string),
            line,
        });
    }

    pub fn finish(self) -> ParseResult {
        ParseResult {
            path: self.path,
            language: self.language,
            entities: self.entities,
            imports: self.imports,
            call_sites: self.call_sites,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_relative_folds_parent_segments() {
        assert_eq!(join_relative("pkg/sub", "../x.py").as_deref(), Some("pkg/x.py"));
        assert_eq!(join_relative("", "./a/b").as_deref(), Some("a/b"));
        assert_eq!(join_relative("", "../a"), None);
    }

    #[test]
    fn ancestors_end_at_root() {
        assert_eq!(ancestor_dirs("a/b"), vec!["a/b", "a", ""]);
        assert_eq!(ancestor_dirs(""), vec![""]);
    }

    #[test]
    fn docstrings_are_unquoted_and_dedented() {
        let raw = "\"\"\"Summary line.\n\n    Details here.\n    \"\"\"";
        assert_eq!(clean_docstring(raw), "Summary line.\n\nDetails here.");
        assert_eq!(clean_comment("/**\n * Adds.\n * More.\n */"), "Adds.\nMore.");
    }

    #[test]
    fn redefinitions_get_line_suffix() {
        let mut builder = ExtractionBuilder::new("m.py", Language::Python, 10);
        let a = builder.add(ExtractionBuilder::MODULE, "f", EntityKind::Function, (1, 2));
        let b = builder.add(ExtractionBuilder::MODULE, "f", EntityKind::Function, (4, 5));
        assert_eq!(builder.entity(a).qualified_name, "m.py::f");
        assert_eq!(builder.entity(b).qualified_name, "m.py::f@4");
    }
}
