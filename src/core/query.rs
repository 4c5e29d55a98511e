use petgraph::graph::NodeIndex;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;

use super::graph::{CodeGraph, EdgeKind, Entity, EntityKind, EntityOrigin};
use crate::error::{CcgError, Result};

pub const DEFAULT_DIAGRAM_LIMIT: usize = 15;

/// The closed set of read-only queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    EntitiesByKind,
    Children,
    Descendants,
    Callers,
    Callees,
    CallGraph,
    InheritanceChain,
    Subclasses,
    Imports,
    Related,
    DiagramSubgraph,
    Statistics,
    Lookup,
}

impl QueryKind {
    pub const ALL: [QueryKind; 13] = [
        QueryKind::EntitiesByKind,
        QueryKind::Children,
        QueryKind::Descendants,
        QueryKind::Callers,
        QueryKind::Callees,
        QueryKind::CallGraph,
        QueryKind::InheritanceChain,
        QueryKind::Subclasses,
        QueryKind::Imports,
        QueryKind::Related,
        QueryKind::DiagramSubgraph,
        QueryKind::Statistics,
        QueryKind::Lookup,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            QueryKind::EntitiesByKind => "entities_by_kind",
            QueryKind::Children => "children",
            QueryKind::Descendants => "descendants",
            QueryKind::Callers => "callers",
            QueryKind::Callees => "callees",
            QueryKind::CallGraph => "call_graph",
            QueryKind::InheritanceChain => "inheritance_chain",
            QueryKind::Subclasses => "subclasses",
            QueryKind::Imports => "imports",
            QueryKind::Related => "related",
            QueryKind::DiagramSubgraph => "diagram_subgraph",
            QueryKind::Statistics => "statistics",
            QueryKind::Lookup => "lookup",
        }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryKind {
    type Err = CcgError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        QueryKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| CcgError::UnsupportedQuery(s.to_string()))
    }
}

/// Which relationships the `related` query reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relationship {
    Calls,
    CalledBy,
    Inherits,
    #[default]
    All,
}

impl Relationship {
    pub const ALL: [Relationship; 4] = [
        Relationship::Calls,
        Relationship::CalledBy,
        Relationship::Inherits,
        Relationship::All,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Relationship::Calls => "calls",
            Relationship::CalledBy => "called_by",
            Relationship::Inherits => "inherits",
            Relationship::All => "all",
        }
    }

    fn includes(self, other: Relationship) -> bool {
        self == Relationship::All || self == other
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Relationship {
    type Err = CcgError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Relationship::ALL
            .into_iter()
            .find(|relation| relation.as_str() == normalized)
            .ok_or_else(|| CcgError::UnsupportedQuery(format!("relationship {s}")))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    /// Qualified or short name of the entity the query starts from.
    pub target: Option<String>,
    pub kind: Option<EntityKind>,
    pub limit: Option<usize>,
    /// Restricts `related`; `None` means every relationship.
    pub relation: Option<Relationship>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_kind(mut self, kind: EntityKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_relation(mut self, relation: Relationship) -> Self {
        self.relation = Some(relation);
        self
    }
}

/// An entity as reported by queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityRef {
    pub qualified_name: String,
    pub name: String,
    pub kind: EntityKind,
    pub origin: EntityOrigin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines: Option<(usize, usize)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl EntityRef {
    pub fn from_entity(entity: &Entity) -> Self {
        Self {
            qualified_name: entity.qualified_name.clone(),
            name: entity.name.clone(),
            kind: entity.kind,
            origin: entity.origin,
            file: entity.file().map(str::to_string),
            lines: entity
                .location
                .as_ref()
                .map(|l| (l.start_line, l.end_line)),
            signature: entity.signature.clone(),
            summary: entity.summary(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryResult {
    Entity(EntityRef),
    Relation {
        source: String,
        target: String,
        kind: EdgeKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        line: Option<usize>,
    },
    Count {
        name: String,
        value: usize,
    },
    Measure {
        name: String,
        value: f64,
    },
}

impl QueryResult {
    fn entity(graph: &CodeGraph, node: NodeIndex) -> Self {
        QueryResult::Entity(EntityRef::from_entity(graph.entity(node)))
    }

    fn relation(graph: &CodeGraph, source: NodeIndex, target: NodeIndex, kind: EdgeKind) -> Self {
        let line = graph
            .inner()
            .edges_connecting(source, target)
            .find(|e| e.weight().kind == kind)
            .and_then(|e| e.weight().line);
        QueryResult::Relation {
            source: graph.entity(source).qualified_name.clone(),
            target: graph.entity(target).qualified_name.clone(),
            kind,
            line,
        }
    }

    fn count(name: &str, value: usize) -> Self {
        QueryResult::Count {
            name: name.to_string(),
            value,
        }
    }

    fn measure(name: &str, value: f64) -> Self {
        QueryResult::Measure {
            name: name.to_string(),
            value,
        }
    }

    pub fn qualified_name(&self) -> Option<&str> {
        match self {
            QueryResult::Entity(entity) => Some(&entity.qualified_name),
            _ => None,
        }
    }
}

/// Dispatch a query against a published graph.
pub fn query(graph: &CodeGraph, kind: QueryKind, params: &QueryParams) -> Result<Vec<QueryResult>> {
    let entities = |nodes: Vec<NodeIndex>| -> Vec<QueryResult> {
        nodes
            .into_iter()
            .map(|node| QueryResult::entity(graph, node))
            .collect()
    };

    let results = match kind {
        QueryKind::EntitiesByKind => entities(entities_by_kind(graph, params.kind)),
        QueryKind::Children => {
            let target = target_node(graph, params)?;
            entities(graph.outgoing(target, EdgeKind::Contains))
        }
        QueryKind::Descendants => {
            let target = target_node(graph, params)?;
            entities(descendants(graph, target))
        }
        QueryKind::Callers => {
            let target = target_node(graph, params)?;
            entities(graph.incoming(target, EdgeKind::Calls))
        }
        QueryKind::Callees => {
            let target = target_node(graph, params)?;
            entities(graph.outgoing(target, EdgeKind::Calls))
        }
        QueryKind::CallGraph => {
            let target = target_node(graph, params)?;
            entities(reachable(graph, target, EdgeKind::Calls, Direction::Outgoing))
        }
        QueryKind::InheritanceChain => {
            let target = target_node(graph, params)?;
            entities(inheritance_chain(graph, target))
        }
        QueryKind::Subclasses => {
            let target = target_node(graph, params)?;
            entities(graph.incoming(target, EdgeKind::Inherits))
        }
        QueryKind::Imports => match &params.target {
            Some(_) => {
                let target = target_node(graph, params)?;
                entities(graph.outgoing(target, EdgeKind::Imports))
            }
            None => graph
                .edges()
                .filter(|(_, _, edge)| edge.kind == EdgeKind::Imports)
                .map(|(source, target, _)| {
                    QueryResult::relation(graph, source, target, EdgeKind::Imports)
                })
                .collect(),
        },
        QueryKind::Related => {
            let target = target_node(graph, params)?;
            related(graph, target, params.relation.unwrap_or_default())
                .into_iter()
                .map(|(source, other, kind)| QueryResult::relation(graph, source, other, kind))
                .collect()
        }
        QueryKind::DiagramSubgraph => {
            let limit = params.limit.unwrap_or(graph.diagram_limit());
            let subgraph = diagram_subgraph(graph, limit, params.kind);
            let mut rows = entities(subgraph.entities);
            rows.extend(
                subgraph
                    .edges
                    .into_iter()
                    .map(|(source, target, kind)| QueryResult::relation(graph, source, target, kind)),
            );
            rows
        }
        QueryKind::Statistics => statistics(graph).into_rows(),
        QueryKind::Lookup => {
            let name = params
                .target
                .as_deref()
                .ok_or(CcgError::MissingParameter("target"))?;
            entities(lookup(graph, name))
        }
    };

    Ok(match params.limit {
        Some(limit) if kind != QueryKind::DiagramSubgraph => results.into_iter().take(limit).collect(),
        _ => results,
    })
}

fn target_node(graph: &CodeGraph, params: &QueryParams) -> Result<NodeIndex> {
    let target = params
        .target
        .as_deref()
        .ok_or(CcgError::MissingParameter("target"))?;
    lookup(graph, target)
        .into_iter()
        .next()
        .ok_or_else(|| CcgError::UnknownEntity(target.to_string()))
}

/// Exact qualified name, otherwise every entity with that short name.
pub fn lookup(graph: &CodeGraph, name: &str) -> Vec<NodeIndex> {
    match graph.find(name) {
        Some(node) => vec![node],
        None => graph.find_by_name(name),
    }
}

/// Extracted entities of `kind` (all kinds when `None`), in discovery order.
pub fn entities_by_kind(graph: &CodeGraph, kind: Option<EntityKind>) -> Vec<NodeIndex> {
    graph
        .entities()
        .filter(|(_, entity)| entity.is_source() && kind.map_or(true, |k| entity.kind == k))
        .map(|(node, _)| node)
        .collect()
}

/// Pre-order walk of the containment tree below `start`.
pub fn descendants(graph: &CodeGraph, start: NodeIndex) -> Vec<NodeIndex> {
    let mut order = Vec::new();
    let mut visited = HashSet::from([start]);
    let mut stack: Vec<NodeIndex> = graph.outgoing(start, EdgeKind::Contains);
    stack.reverse();
    while let Some(node) = stack.pop() {
        if !visited.insert(node) {
            continue;
        }
        order.push(node);
        let mut children = graph.outgoing(node, EdgeKind::Contains);
        children.reverse();
        stack.extend(children);
    }
    order
}

/// Breadth-first reachability over one edge kind, `start` first.
///
/// The visited set makes this safe on cyclic `Calls` and `Inherits`.
pub fn reachable(
    graph: &CodeGraph,
    start: NodeIndex,
    kind: EdgeKind,
    direction: Direction,
) -> Vec<NodeIndex> {
    let mut order = Vec::new();
    let mut visited = HashSet::from([start]);
    let mut queue = VecDeque::from([start]);
    while let Some(node) = queue.pop_front() {
        order.push(node);
        let next = match direction {
            Direction::Outgoing => graph.outgoing(node, kind),
            Direction::Incoming => graph.incoming(node, kind),
        };
        for neighbor in next {
            if visited.insert(neighbor) {
                queue.push_back(neighbor);
            }
        }
    }
    order
}

/// Transitive bases of a class, nearest first, excluding the class itself.
pub fn inheritance_chain(graph: &CodeGraph, class: NodeIndex) -> Vec<NodeIndex> {
    reachable(graph, class, EdgeKind::Inherits, Direction::Outgoing)
        .into_iter()
        .skip(1)
        .collect()
}

/// Callees, callers and bases of `node` as (source, target, kind) triples,
/// restricted to `relation`.
pub fn related(
    graph: &CodeGraph,
    node: NodeIndex,
    relation: Relationship,
) -> Vec<(NodeIndex, NodeIndex, EdgeKind)> {
    let mut seen = HashSet::new();
    let mut relations = Vec::new();
    let mut push = |triple: (NodeIndex, NodeIndex, EdgeKind)| {
        if seen.insert(triple) {
            relations.push(triple);
        }
    };
    if relation.includes(Relationship::Calls) {
        for callee in graph.outgoing(node, EdgeKind::Calls) {
            push((node, callee, EdgeKind::Calls));
        }
    }
    if relation.includes(Relationship::CalledBy) {
        for caller in graph.incoming(node, EdgeKind::Calls) {
            push((caller, node, EdgeKind::Calls));
        }
    }
    if relation.includes(Relationship::Inherits) {
        for base in graph.outgoing(node, EdgeKind::Inherits) {
            push((node, base, EdgeKind::Inherits));
        }
    }
    relations
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagramSubgraph {
    /// Selected entities, most referenced first.
    pub entities: Vec<NodeIndex>,
    /// Every edge whose endpoints were both selected.
    pub edges: Vec<(NodeIndex, NodeIndex, EdgeKind)>,
}

/// At most `limit` extracted entities ranked by incoming references,
/// ties broken by qualified name.
pub fn diagram_subgraph(
    graph: &CodeGraph,
    limit: usize,
    kind: Option<EntityKind>,
) -> DiagramSubgraph {
    let mut ranked: Vec<(usize, &str, NodeIndex)> = entities_by_kind(graph, kind)
        .into_iter()
        .map(|node| {
            (
                graph.incoming_reference_count(node),
                graph.entity(node).qualified_name.as_str(),
                node,
            )
        })
        .collect();
    ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
    ranked.truncate(limit);

    let entities: Vec<NodeIndex> = ranked.into_iter().map(|(_, _, node)| node).collect();
    let selected: HashSet<NodeIndex> = entities.iter().copied().collect();
    let edges = graph
        .edges()
        .filter(|(source, target, _)| selected.contains(source) && selected.contains(target))
        .map(|(source, target, edge)| (source, target, edge.kind))
        .collect();
    DiagramSubgraph { entities, edges }
}

/// Derived counts and measures over a published graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphStatistics {
    pub total_entities: usize,
    pub total_edges: usize,
    pub files_analyzed: usize,
    pub unparsed_files: usize,
    pub external_entities: usize,
    pub entities_by_kind: Vec<(EntityKind, usize)>,
    pub edges_by_kind: Vec<(EdgeKind, usize)>,
    pub avg_complexity: f64,
    pub max_complexity: u32,
    pub avg_function_length: f64,
    pub max_function_length: usize,
}

impl GraphStatistics {
    pub fn count_of(&self, kind: EntityKind) -> usize {
        self.entities_by_kind
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, count)| *count)
            .unwrap_or(0)
    }

    fn into_rows(self) -> Vec<QueryResult> {
        let mut rows = vec![
            QueryResult::count("total_entities", self.total_entities),
            QueryResult::count("total_edges", self.total_edges),
            QueryResult::count("files_analyzed", self.files_analyzed),
            QueryResult::count("unparsed_files", self.unparsed_files),
            QueryResult::count("external_entities", self.external_entities),
        ];
        rows.extend(
            self.entities_by_kind
                .iter()
                .map(|(kind, count)| QueryResult::count(kind.as_str(), *count)),
        );
        rows.extend(
            self.edges_by_kind
                .iter()
                .map(|(kind, count)| QueryResult::count(&format!("{kind}_edges"), *count)),
        );
        rows.push(QueryResult::measure("avg_complexity", self.avg_complexity));
        rows.push(QueryResult::count("max_complexity", self.max_complexity as usize));
        rows.push(QueryResult::measure("avg_function_length", self.avg_function_length));
        rows.push(QueryResult::count("max_function_length", self.max_function_length));
        rows
    }
}

pub fn statistics(graph: &CodeGraph) -> GraphStatistics {
    let mut by_kind: HashMap<EntityKind, usize> = HashMap::new();
    let mut by_edge: HashMap<EdgeKind, usize> = HashMap::new();
    let mut stats = GraphStatistics {
        total_entities: graph.entity_count(),
        total_edges: graph.edge_count(),
        ..GraphStatistics::default()
    };

    let mut complexities = Vec::new();
    let mut lengths = Vec::new();
    for child in graph.outgoing(graph.root(), EdgeKind::Contains) {
        match graph.entity(child).origin {
            EntityOrigin::Source => stats.files_analyzed += 1,
            EntityOrigin::Unparsed => stats.unparsed_files += 1,
            _ => {}
        }
    }
    for (_, entity) in graph.entities() {
        match entity.origin {
            EntityOrigin::External => stats.external_entities += 1,
            EntityOrigin::Source => {
                *by_kind.entry(entity.kind).or_default() += 1;
                if matches!(entity.kind, EntityKind::Function | EntityKind::Method) {
                    complexities.extend(entity.complexity);
                    lengths.push(entity.line_span() + 1);
                }
            }
            _ => {}
        }
    }
    for (_, _, edge) in graph.edges() {
        *by_edge.entry(edge.kind).or_default() += 1;
    }

    stats.entities_by_kind = EntityKind::ALL
        .into_iter()
        .map(|kind| (kind, by_kind.get(&kind).copied().unwrap_or(0)))
        .collect();
    stats.edges_by_kind = [
        EdgeKind::Contains,
        EdgeKind::Calls,
        EdgeKind::Inherits,
        EdgeKind::Imports,
    ]
    .into_iter()
    .map(|kind| (kind, by_edge.get(&kind).copied().unwrap_or(0)))
    .collect();
    stats.max_complexity = complexities.iter().copied().max().unwrap_or(0);
    stats.avg_complexity = mean(complexities.iter().map(|&c| c as f64));
    stats.max_function_length = lengths.iter().copied().max().unwrap_or(0);
    stats.avg_function_length = mean(lengths.iter().map(|&l| l as f64));
    stats
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_query_kind_is_unsupported() {
        assert!(matches!(
            "shortest_path".parse::<QueryKind>(),
            Err(CcgError::UnsupportedQuery(_))
        ));
        assert_eq!("call-graph".parse::<QueryKind>().unwrap(), QueryKind::CallGraph);
    }

    #[test]
    fn every_kind_round_trips_through_its_name() {
        for kind in QueryKind::ALL {
            assert_eq!(kind.as_str().parse::<QueryKind>().unwrap(), kind);
        }
    }

    #[test]
    fn relationship_names_accept_dashes() {
        assert_eq!("called-by".parse::<Relationship>().unwrap(), Relationship::CalledBy);
        assert_eq!(" Inherits ".parse::<Relationship>().unwrap(), Relationship::Inherits);
        assert!(matches!(
            "overrides".parse::<Relationship>(),
            Err(CcgError::UnsupportedQuery(_))
        ));
        assert_eq!(Relationship::default(), Relationship::All);
    }
}
