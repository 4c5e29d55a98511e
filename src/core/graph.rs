use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{EdgeIndex, NodeIndex};
use petgraph::visit::{EdgeFiltered, EdgeRef};
use petgraph::{Directed, Direction, Graph};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use super::query::DEFAULT_DIAGRAM_LIMIT;
use crate::error::CcgError;
use crate::parsers::Language;

/// Qualified name of the synthetic repository root.
pub const ROOT_QUALIFIED_NAME: &str = "<repository>";

const SUMMARY_MAX_CHARS: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Copy, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Module,
    Class,
    Function,
    Method,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Module,
        EntityKind::Class,
        EntityKind::Function,
        EntityKind::Method,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Module => "module",
            EntityKind::Class => "class",
            EntityKind::Function => "function",
            EntityKind::Method => "method",
        }
    }

    pub fn is_callable(self) -> bool {
        matches!(
            self,
            EntityKind::Function | EntityKind::Method | EntityKind::Class
        )
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = CcgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "module" => Ok(EntityKind::Module),
            "class" => Ok(EntityKind::Class),
            "function" => Ok(EntityKind::Function),
            "method" => Ok(EntityKind::Method),
            other => Err(CcgError::Config(format!("unknown entity kind '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Copy, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Contains,
    Calls,
    Inherits,
    Imports,
}

impl EdgeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EdgeKind::Contains => "contains",
            EdgeKind::Calls => "calls",
            EdgeKind::Inherits => "inherits",
            EdgeKind::Imports => "imports",
        }
    }

    /// Every kind except structural containment counts as a reference.
    pub fn is_reference(self) -> bool {
        !matches!(self, EdgeKind::Contains)
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an entity came from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Copy)]
#[serde(rename_all = "lowercase")]
pub enum EntityOrigin {
    /// The synthetic repository root.
    Repository,
    /// Extracted from a successfully parsed file.
    Source,
    /// Marker for a file that failed to parse.
    Unparsed,
    /// Placeholder for an unresolved base class or import.
    External,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub annotation: Option<String>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, annotation: Option<String>) -> Self {
        Self {
            name: name.into(),
            annotation,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub start_line: usize,
    pub end_line: usize,
}

/// A node of the code context graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    pub qualified_name: String,
    pub name: String,
    pub kind: EntityKind,
    pub origin: EntityOrigin,
    pub language: Option<Language>,
    pub location: Option<SourceLocation>,
    pub parameters: Vec<Parameter>,
    pub signature: Option<String>,
    pub return_type: Option<String>,
    pub docstring: Option<String>,
    /// Literal base class names as written in the source.
    pub bases: Vec<String>,
    pub decorators: Vec<String>,
    pub attributes: Vec<String>,
    pub is_async: bool,
    pub complexity: Option<u32>,
}

impl Entity {
    pub fn new(
        qualified_name: String,
        name: String,
        kind: EntityKind,
        origin: EntityOrigin,
    ) -> Self {
        Self {
            qualified_name,
            name,
            kind,
            origin,
            language: None,
            location: None,
            parameters: Vec::new(),
            signature: None,
            return_type: None,
            docstring: None,
            bases: Vec::new(),
            decorators: Vec::new(),
            attributes: Vec::new(),
            is_async: false,
            complexity: None,
        }
    }

    pub fn repository_root() -> Self {
        Self::new(
            ROOT_QUALIFIED_NAME.to_string(),
            ROOT_QUALIFIED_NAME.to_string(),
            EntityKind::Module,
            EntityOrigin::Repository,
        )
    }

    /// Placeholder for a reference that did not match anything in the tree.
    pub fn external(kind: EntityKind, name: &str) -> Self {
        Self::new(
            external_qualified_name(kind, name),
            name.to_string(),
            kind,
            EntityOrigin::External,
        )
    }

    /// Degraded marker for a file whose content could not be parsed.
    pub fn unparsed(path: &str, language: Language, line_count: usize) -> Self {
        Self::new(
            path.to_string(),
            module_name_from_path(path),
            EntityKind::Module,
            EntityOrigin::Unparsed,
        )
        .with_language(language)
        .with_location(SourceLocation {
            file: path.to_string(),
            start_line: 1,
            end_line: line_count.max(1),
        })
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = Some(language);
        self
    }

    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_signature(mut self, signature: String) -> Self {
        self.signature = Some(signature);
        self
    }

    pub fn with_docstring(mut self, docstring: String) -> Self {
        if !docstring.trim().is_empty() {
            self.docstring = Some(docstring);
        }
        self
    }

    pub fn is_source(&self) -> bool {
        self.origin == EntityOrigin::Source
    }

    pub fn file(&self) -> Option<&str> {
        self.location.as_ref().map(|l| l.file.as_str())
    }

    pub fn start_line(&self) -> usize {
        self.location.as_ref().map(|l| l.start_line).unwrap_or(0)
    }

    /// Length in lines, zero when there is no location.
    pub fn line_span(&self) -> usize {
        self.location
            .as_ref()
            .map(|l| l.end_line.saturating_sub(l.start_line))
            .unwrap_or(0)
    }

    /// First non-empty docstring line, capped at 100 characters.
    pub fn summary(&self) -> Option<String> {
        let doc = self.docstring.as_deref()?;
        let line = doc.lines().map(str::trim).find(|l| !l.is_empty())?;
        Some(line.chars().take(SUMMARY_MAX_CHARS).collect())
    }
}

pub fn external_qualified_name(kind: EntityKind, name: &str) -> String {
    format!("<external:{}>::{}", kind.as_str(), name)
}

/// `pkg/mod.py` -> `mod`
pub fn module_name_from_path(path: &str) -> String {
    let file = path.rsplit('/').next().unwrap_or(path);
    match file.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => file.to_string(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Edge {
    pub kind: EdgeKind,
    /// Line of the referencing site, when there is one.
    pub line: Option<usize>,
}

impl Edge {
    pub fn new(kind: EdgeKind) -> Self {
        Self { kind, line: None }
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }
}

pub type EntityGraph = Graph<Entity, Edge, Directed>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Complete,
    /// A file-count or time budget cut the run short.
    Partial,
}

/// Mutable graph used during the build phase only.
pub struct GraphBuilder {
    graph: EntityGraph,
    index: HashMap<String, NodeIndex>,
    edge_keys: HashSet<(NodeIndex, NodeIndex, EdgeKind)>,
    root: NodeIndex,
}

impl GraphBuilder {
    pub fn new() -> Self {
        let mut graph = Graph::new();
        let root = graph.add_node(Entity::repository_root());
        let mut index = HashMap::new();
        index.insert(ROOT_QUALIFIED_NAME.to_string(), root);
        Self {
            graph,
            index,
            edge_keys: HashSet::new(),
            root,
        }
    }

    pub fn root(&self) -> NodeIndex {
        self.root
    }

    /// Insert an entity, renaming it if its qualified name is already taken.
    pub fn add_entity(&mut self, mut entity: Entity) -> NodeIndex {
        if self.index.contains_key(&entity.qualified_name) {
            let original = entity.qualified_name.clone();
            entity.qualified_name = self.free_name(&original, entity.start_line());
            tracing::debug!(
                "Qualified name {} already taken, stored as {}",
                original,
                entity.qualified_name
            );
        }
        let qualified_name = entity.qualified_name.clone();
        let index = self.graph.add_node(entity);
        self.index.insert(qualified_name, index);
        index
    }

    fn free_name(&self, base: &str, line: usize) -> String {
        let with_line = format!("{base}@{line}");
        if !self.index.contains_key(&with_line) {
            return with_line;
        }
        (2..)
            .map(|n| format!("{with_line}#{n}"))
            .find(|candidate| !self.index.contains_key(candidate))
            .unwrap_or(with_line)
    }

    /// Return the placeholder for `name`, creating it on first use.
    pub fn intern_external(&mut self, kind: EntityKind, name: &str) -> NodeIndex {
        let qualified_name = external_qualified_name(kind, name);
        if let Some(&index) = self.index.get(&qualified_name) {
            return index;
        }
        self.add_entity(Entity::external(kind, name))
    }

    /// Add an edge unless an edge of the same kind already joins the pair.
    ///
    /// `Contains` edges are refused when they would give the target a second
    /// parent or close a cycle.
    pub fn add_edge(
        &mut self,
        source: NodeIndex,
        target: NodeIndex,
        edge: Edge,
    ) -> Option<EdgeIndex> {
        if self.graph.node_weight(source).is_none() || self.graph.node_weight(target).is_none() {
            return None;
        }
        if edge.kind == EdgeKind::Contains
            && (self.parent(target).is_some() || self.is_ancestor_or_self(target, source))
        {
            return None;
        }
        if !self.edge_keys.insert((source, target, edge.kind)) {
            return None;
        }
        Some(self.graph.add_edge(source, target, edge))
    }

    fn parent(&self, node: NodeIndex) -> Option<NodeIndex> {
        self.graph
            .edges_directed(node, Direction::Incoming)
            .find(|e| e.weight().kind == EdgeKind::Contains)
            .map(|e| e.source())
    }

    fn is_ancestor_or_self(&self, candidate: NodeIndex, mut node: NodeIndex) -> bool {
        loop {
            if node == candidate {
                return true;
            }
            match self.parent(node) {
                Some(parent) => node = parent,
                None => return false,
            }
        }
    }

    pub fn get(&self, qualified_name: &str) -> Option<NodeIndex> {
        self.index.get(qualified_name).copied()
    }

    pub fn entity(&self, index: NodeIndex) -> &Entity {
        &self.graph[index]
    }

    pub fn entity_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Children of `node` through `Contains`, in insertion order.
    pub fn children(&self, node: NodeIndex) -> Vec<NodeIndex> {
        sorted_neighbors(&self.graph, node, EdgeKind::Contains, Direction::Outgoing)
    }

    pub fn enclosing(&self, node: NodeIndex) -> Option<NodeIndex> {
        self.parent(node)
    }

    pub fn source_entity_count(&self) -> usize {
        self.graph
            .node_weights()
            .filter(|entity| entity.is_source())
            .count()
    }

    /// Hand the graph over to its read-only form.
    pub fn publish(self, status: AnalysisStatus) -> CodeGraph {
        CodeGraph {
            graph: self.graph,
            index: self.index,
            root: self.root,
            status,
            diagram_limit: DEFAULT_DIAGRAM_LIMIT,
        }
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted_neighbors(
    graph: &EntityGraph,
    node: NodeIndex,
    kind: EdgeKind,
    direction: Direction,
) -> Vec<NodeIndex> {
    let mut edges: Vec<(EdgeIndex, NodeIndex)> = graph
        .edges_directed(node, direction)
        .filter(|e| e.weight().kind == kind)
        .map(|e| {
            let other = match direction {
                Direction::Outgoing => e.target(),
                Direction::Incoming => e.source(),
            };
            (e.id(), other)
        })
        .collect();
    edges.sort_by_key(|(id, _)| id.index());
    edges.into_iter().map(|(_, other)| other).collect()
}

/// The published, immutable code context graph.
///
/// Every method takes `&self`; the store is safe to share across threads.
#[derive(Debug, Clone)]
pub struct CodeGraph {
    graph: EntityGraph,
    index: HashMap<String, NodeIndex>,
    root: NodeIndex,
    status: AnalysisStatus,
    diagram_limit: usize,
}

impl CodeGraph {
    pub fn root(&self) -> NodeIndex {
        self.root
    }

    /// Entity cap the diagram subgraph query uses when none is given.
    pub fn diagram_limit(&self) -> usize {
        self.diagram_limit
    }

    pub fn with_diagram_limit(mut self, limit: usize) -> Self {
        self.diagram_limit = limit;
        self
    }

    pub fn status(&self) -> AnalysisStatus {
        self.status
    }

    pub fn is_partial(&self) -> bool {
        self.status == AnalysisStatus::Partial
    }

    pub fn entity(&self, index: NodeIndex) -> &Entity {
        &self.graph[index]
    }

    pub fn find(&self, qualified_name: &str) -> Option<NodeIndex> {
        self.index.get(qualified_name).copied()
    }

    /// Entities whose short name is `name`, in discovery order.
    pub fn find_by_name(&self, name: &str) -> Vec<NodeIndex> {
        self.graph
            .node_indices()
            .filter(|&idx| self.graph[idx].name == name)
            .collect()
    }

    pub fn entity_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// All entities in insertion order.
    pub fn entities(&self) -> impl Iterator<Item = (NodeIndex, &Entity)> + '_ {
        self.graph
            .node_indices()
            .map(move |idx| (idx, &self.graph[idx]))
    }

    /// All edges in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = (NodeIndex, NodeIndex, &Edge)> + '_ {
        self.graph
            .edge_references()
            .map(|e| (e.source(), e.target(), e.weight()))
    }

    pub fn outgoing(&self, node: NodeIndex, kind: EdgeKind) -> Vec<NodeIndex> {
        sorted_neighbors(&self.graph, node, kind, Direction::Outgoing)
    }

    pub fn incoming(&self, node: NodeIndex, kind: EdgeKind) -> Vec<NodeIndex> {
        sorted_neighbors(&self.graph, node, kind, Direction::Incoming)
    }

    pub fn parent(&self, node: NodeIndex) -> Option<NodeIndex> {
        self.incoming(node, EdgeKind::Contains).into_iter().next()
    }

    /// Incoming `Calls`, `Inherits` and `Imports` edges.
    pub fn incoming_reference_count(&self, node: NodeIndex) -> usize {
        self.graph
            .edges_directed(node, Direction::Incoming)
            .filter(|e| e.weight().kind.is_reference())
            .count()
    }

    /// Check that `Contains` is a forest rooted at the repository root.
    ///
    /// No cycles, at most one parent per entity, and every non-placeholder
    /// entity other than the root has a parent.
    pub fn containment_is_forest(&self) -> bool {
        let contains =
            EdgeFiltered::from_fn(&self.graph, |e| e.weight().kind == EdgeKind::Contains);
        if is_cyclic_directed(&contains) {
            return false;
        }
        self.graph.node_indices().all(|idx| {
            let parents = self.incoming(idx, EdgeKind::Contains).len();
            match self.graph[idx].origin {
                EntityOrigin::Repository => parents == 0,
                EntityOrigin::External => parents == 0,
                EntityOrigin::Source | EntityOrigin::Unparsed => parents == 1,
            }
        })
    }

    /// Read-only access for petgraph algorithms.
    pub fn inner(&self) -> &EntityGraph {
        &self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(path: &str) -> Entity {
        Entity::new(
            path.to_string(),
            module_name_from_path(path),
            EntityKind::Module,
            EntityOrigin::Source,
        )
    }

    #[test]
    fn duplicate_names_are_suffixed_with_line() {
        let mut builder = GraphBuilder::new();
        let a = builder.add_entity(module("a.py"));
        let b = builder.add_entity(module("a.py"));
        let c = builder.add_entity(module("a.py"));
        assert_eq!(builder.entity(a).qualified_name, "a.py");
        assert_eq!(builder.entity(b).qualified_name, "a.py@0");
        assert_eq!(builder.entity(c).qualified_name, "a.py@0#2");
    }

    #[test]
    fn second_contains_parent_is_refused() {
        let mut builder = GraphBuilder::new();
        let root = builder.root();
        let a = builder.add_entity(module("a.py"));
        let b = builder.add_entity(module("b.py"));
        assert!(builder.add_edge(root, a, Edge::new(EdgeKind::Contains)).is_some());
        assert!(builder.add_edge(b, a, Edge::new(EdgeKind::Contains)).is_none());
        assert!(builder.add_edge(a, root, Edge::new(EdgeKind::Contains)).is_none());
    }

    #[test]
    fn summary_takes_first_line() {
        let entity = module("a.py").with_docstring("\n  Loads things.\n\nMore text.".into());
        assert_eq!(entity.summary().as_deref(), Some("Loads things."));
    }
}
