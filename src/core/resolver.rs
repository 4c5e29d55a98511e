use petgraph::graph::NodeIndex;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, info};

use super::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
use super::graph::{Edge, EdgeKind, EntityKind, GraphBuilder};
use crate::parsers::common::parent_dir;
use crate::parsers::{CallSite, ImportRef, ParseResult};

/// Receivers that stand for the enclosing class.
const SELF_RECEIVERS: &[&str] = &["self", "cls", "this", "Self"];
const SUPER_RECEIVERS: &[&str] = &["super()", "super"];

/// A parsed file together with the graph nodes its entities were stored as.
pub struct FileUnit<'a> {
    pub parsed: &'a ParseResult,
    /// Graph node for each local entity index.
    pub nodes: Vec<NodeIndex>,
}

impl FileUnit<'_> {
    fn path(&self) -> &str {
        &self.parsed.path
    }

    /// Nearest enclosing class of a local entity, excluding itself.
    fn enclosing_class(&self, local: usize) -> Option<usize> {
        let mut current = self.parsed.entities.get(local)?.parent;
        while let Some(index) = current {
            let extracted = &self.parsed.entities[index];
            if extracted.entity.kind == EntityKind::Class {
                return Some(index);
            }
            current = extracted.parent;
        }
        None
    }
}

#[derive(Debug, Default)]
pub struct ResolutionReport {
    pub calls: usize,
    pub inherits: usize,
    pub imports: usize,
    pub diagnostics: Diagnostics,
}

/// What a name brought in by an import refers to.
#[derive(Debug, Clone, Copy)]
enum Binding {
    Entity(NodeIndex),
    /// Bound to something outside the analysed files.
    External,
}

#[derive(Debug)]
enum Target {
    Entity(NodeIndex),
    External(EntityKind, String),
}

#[derive(Debug)]
struct PendingEdge {
    source: NodeIndex,
    target: Target,
    edge: Edge,
}

/// Edges and diagnostics produced by one file, merged after all shards finish.
#[derive(Debug, Default)]
struct Shard {
    edges: Vec<PendingEdge>,
    diagnostics: Vec<Diagnostic>,
}

impl Shard {
    fn link(&mut self, source: NodeIndex, target: NodeIndex, edge: Edge) {
        self.edges.push(PendingEdge {
            source,
            target: Target::Entity(target),
            edge,
        });
    }

    fn link_external(&mut self, source: NodeIndex, kind: EntityKind, name: &str, edge: Edge) {
        self.edges.push(PendingEdge {
            source,
            target: Target::External(kind, name.to_string()),
            edge,
        });
    }
}

/// Outcome of a tiered lookup: the winning tier's candidates, best first.
struct Pick {
    target: NodeIndex,
    alternatives: usize,
}

impl Pick {
    fn from_tier(tier: Vec<NodeIndex>) -> Option<Self> {
        let target = *tier.first()?;
        Some(Self {
            target,
            alternatives: tier.len() - 1,
        })
    }
}

/// Name-based, best-effort linking of calls, bases and imports.
///
/// Lookups run against read-only indexes over the complete entity table.
/// No types are inferred, so shadowed or overloaded names can resolve to the
/// wrong entity or not at all.
pub struct RelationshipResolver<'a> {
    graph: &'a GraphBuilder,
    modules: HashMap<&'a str, NodeIndex>,
    classes: HashMap<&'a str, Vec<NodeIndex>>,
    functions: HashMap<&'a str, Vec<NodeIndex>>,
    methods: HashMap<&'a str, Vec<NodeIndex>>,
}

impl<'a> RelationshipResolver<'a> {
    /// Index every file's entities, in discovery order.
    pub fn new(graph: &'a GraphBuilder, units: &'a [FileUnit<'a>]) -> Self {
        let mut modules = HashMap::with_capacity(units.len());
        let mut classes: HashMap<&str, Vec<NodeIndex>> = HashMap::new();
        let mut functions: HashMap<&str, Vec<NodeIndex>> = HashMap::new();
        let mut methods: HashMap<&str, Vec<NodeIndex>> = HashMap::new();

        for unit in units {
            if let Some(&module) = unit.nodes.first() {
                modules.insert(unit.path(), module);
            }
            for (local, extracted) in unit.parsed.entities.iter().enumerate() {
                let node = unit.nodes[local];
                let name = extracted.entity.name.as_str();
                let top_level = extracted
                    .parent
                    .map(|p| unit.parsed.entities[p].entity.kind == EntityKind::Module)
                    .unwrap_or(false);
                match extracted.entity.kind {
                    EntityKind::Class => classes.entry(name).or_default().push(node),
                    EntityKind::Function if top_level => {
                        functions.entry(name).or_default().push(node)
                    }
                    EntityKind::Method => methods.entry(name).or_default().push(node),
                    EntityKind::Function | EntityKind::Module => {}
                }
            }
        }

        debug!(
            "resolver index: {} modules, {} class names, {} function names, {} method names",
            modules.len(),
            classes.len(),
            functions.len(),
            methods.len()
        );
        Self {
            graph,
            modules,
            classes,
            functions,
            methods,
        }
    }

    fn resolve_file(&self, unit: &FileUnit<'_>) -> Shard {
        let mut shard = Shard::default();
        let bindings = self.resolve_imports(unit, &mut shard);
        self.resolve_bases(unit, &bindings, &mut shard);
        for call in &unit.parsed.call_sites {
            self.resolve_call(unit, call, &bindings, &mut shard);
        }
        shard
    }

    fn resolve_imports(&self, unit: &FileUnit<'_>, shard: &mut Shard) -> HashMap<String, Binding> {
        let mut bindings = HashMap::new();
        for import in &unit.parsed.imports {
            let importer = unit.nodes[import.importer];
            let edge = Edge::new(EdgeKind::Imports).at_line(import.line);
            let module = self.first_module(&import.candidates);

            if import.symbols.is_empty() {
                match module {
                    Some(module) => shard.link(importer, module, edge),
                    None => self.link_external_module(importer, import, edge, shard),
                }
                if let Some(alias) = &import.alias {
                    bindings.insert(alias.clone(), module.map_or(Binding::External, Binding::Entity));
                }
                continue;
            }

            let mut linked_external = false;
            for symbol in &import.symbols {
                let target = module
                    .and_then(|module| self.child_named(module, &symbol.name))
                    .or_else(|| self.first_module(&symbol.candidates))
                    .or(module);
                match target {
                    Some(target) => {
                        shard.link(importer, target, edge.clone());
                        bindings.insert(symbol.binding().to_string(), Binding::Entity(target));
                    }
                    None => {
                        if !linked_external {
                            self.link_external_module(importer, import, edge.clone(), shard);
                            linked_external = true;
                        }
                        bindings.insert(symbol.binding().to_string(), Binding::External);
                    }
                }
            }
            if let Some(alias) = &import.alias {
                bindings.insert(alias.clone(), module.map_or(Binding::External, Binding::Entity));
            }
        }
        bindings
    }

    fn link_external_module(
        &self,
        importer: NodeIndex,
        import: &ImportRef,
        edge: Edge,
        shard: &mut Shard,
    ) {
        debug!("import {} left unresolved", import.target);
        shard.link_external(importer, EntityKind::Module, &import.target, edge);
    }

    fn resolve_bases(
        &self,
        unit: &FileUnit<'_>,
        bindings: &HashMap<String, Binding>,
        shard: &mut Shard,
    ) {
        for (local, extracted) in unit.parsed.entities.iter().enumerate() {
            let entity = &extracted.entity;
            if entity.kind != EntityKind::Class {
                continue;
            }
            let class = unit.nodes[local];
            for base in &entity.bases {
                let edge = Edge::new(EdgeKind::Inherits).at_line(entity.start_line());
                let written = strip_generics(base);
                match self.resolve_base(unit.path(), class, written, bindings) {
                    BaseResolution::Found(pick) => {
                        if pick.alternatives > 0 {
                            shard.diagnostics.push(self.ambiguity(
                                unit.path(),
                                entity.start_line(),
                                &entity.qualified_name,
                                written,
                                &pick,
                            ));
                        }
                        shard.link(class, pick.target, edge);
                    }
                    BaseResolution::External => {
                        shard.link_external(class, EntityKind::Class, written, edge);
                    }
                    BaseResolution::Unknown => {
                        shard.diagnostics.push(
                            Diagnostic::new(
                                DiagnosticKind::UnresolvedReference,
                                format!("base class `{written}` not found, linked to a placeholder"),
                            )
                            .in_file(unit.path())
                            .at_line(entity.start_line())
                            .about(&entity.qualified_name),
                        );
                        shard.link_external(class, EntityKind::Class, written, edge);
                    }
                }
            }
        }
    }

    fn resolve_base(
        &self,
        file: &str,
        class: NodeIndex,
        written: &str,
        bindings: &HashMap<String, Binding>,
    ) -> BaseResolution {
        let (head, last) = split_path(written);
        let bound = bindings
            .get(written)
            .or_else(|| head.and_then(|head| bindings.get(first_segment(head))));
        match bound {
            Some(Binding::Entity(node)) if *node != class => {
                let entity = self.graph.entity(*node);
                if entity.kind == EntityKind::Class && entity.name == last {
                    return BaseResolution::Found(Pick {
                        target: *node,
                        alternatives: 0,
                    });
                }
                if entity.kind == EntityKind::Module {
                    if let Some(child) = self.child_named(*node, last) {
                        return BaseResolution::Found(Pick {
                            target: child,
                            alternatives: 0,
                        });
                    }
                }
            }
            Some(Binding::External) => return BaseResolution::External,
            _ => {}
        }

        let candidates: Vec<NodeIndex> = self
            .classes
            .get(last)
            .map(|nodes| nodes.iter().copied().filter(|&n| n != class).collect())
            .unwrap_or_default();
        match Pick::from_tier(self.tiered(&candidates, file)) {
            Some(pick) => BaseResolution::Found(pick),
            None => BaseResolution::Unknown,
        }
    }

    fn resolve_call(
        &self,
        unit: &FileUnit<'_>,
        call: &CallSite,
        bindings: &HashMap<String, Binding>,
        shard: &mut Shard,
    ) {
        let caller = unit.nodes[call.caller];
        let outcome = match call.receiver.as_deref() {
            None => self.resolve_bare_call(unit, call, bindings),
            Some(receiver) => self.resolve_receiver_call(unit, call, receiver, bindings),
        };

        let caller_name = &self.graph.entity(caller).qualified_name;
        match outcome {
            CallResolution::Found(pick) => {
                if pick.alternatives > 0 {
                    shard.diagnostics.push(self.ambiguity(
                        unit.path(),
                        call.line,
                        caller_name,
                        &call.callee,
                        &pick,
                    ));
                }
                shard.link(caller, pick.target, Edge::new(EdgeKind::Calls).at_line(call.line));
            }
            CallResolution::External => {}
            CallResolution::Unknown => {
                let written = match &call.receiver {
                    Some(receiver) => format!("{receiver}.{}", call.callee),
                    None => call.callee.clone(),
                };
                shard.diagnostics.push(
                    Diagnostic::new(
                        DiagnosticKind::UnresolvedReference,
                        format!("call to `{written}` matches no known entity"),
                    )
                    .in_file(unit.path())
                    .at_line(call.line)
                    .about(caller_name),
                );
            }
        }
    }

    /// Lexical scopes first, then imported names, then the global tiers.
    fn resolve_bare_call(
        &self,
        unit: &FileUnit<'_>,
        call: &CallSite,
        bindings: &HashMap<String, Binding>,
    ) -> CallResolution {
        let mut scope = Some(call.caller);
        while let Some(local) = scope {
            let extracted = &unit.parsed.entities[local];
            if extracted.entity.kind != EntityKind::Class {
                let hits: Vec<NodeIndex> = self
                    .graph
                    .children(unit.nodes[local])
                    .into_iter()
                    .filter(|&n| {
                        let child = self.graph.entity(n);
                        child.name == call.callee
                            && matches!(child.kind, EntityKind::Function | EntityKind::Class)
                    })
                    .collect();
                if let Some(pick) = Pick::from_tier(hits) {
                    return CallResolution::Found(pick);
                }
            }
            scope = extracted.parent;
        }

        match bindings.get(&call.callee) {
            Some(Binding::Entity(node)) => {
                return CallResolution::Found(Pick {
                    target: *node,
                    alternatives: 0,
                })
            }
            Some(Binding::External) => return CallResolution::External,
            None => {}
        }

        let mut candidates = self.lookup(&self.functions, &call.callee);
        candidates.extend(self.lookup(&self.classes, &call.callee));
        candidates.sort_unstable();
        self.global(&candidates, unit.path())
    }

    fn resolve_receiver_call(
        &self,
        unit: &FileUnit<'_>,
        call: &CallSite,
        receiver: &str,
        bindings: &HashMap<String, Binding>,
    ) -> CallResolution {
        let is_self = SELF_RECEIVERS.contains(&receiver);
        let is_super = SUPER_RECEIVERS.contains(&receiver);
        if is_self || is_super {
            if let Some(class_local) = unit.enclosing_class(call.caller) {
                let class = unit.nodes[class_local];
                let hits = self.find_member(class, &call.callee, is_super);
                if let Some(pick) = Pick::from_tier(hits) {
                    return CallResolution::Found(pick);
                }
            }
        } else {
            let bound = bindings
                .get(receiver)
                .or_else(|| bindings.get(first_segment(receiver)));
            match bound {
                Some(Binding::Entity(node)) => {
                    let hits = match self.graph.entity(*node).kind {
                        EntityKind::Class => self.find_member(*node, &call.callee, false),
                        _ => self.child_named(*node, &call.callee).into_iter().collect(),
                    };
                    if let Some(pick) = Pick::from_tier(hits) {
                        return CallResolution::Found(pick);
                    }
                }
                Some(Binding::External) => return CallResolution::External,
                None => {}
            }

            // `Type::new()` or `Type.create()` on a known class.
            let (_, last) = split_path(receiver);
            let classes = self.tiered(&self.lookup(&self.classes, last), unit.path());
            for class in classes {
                let hits = self.find_member(class, &call.callee, false);
                if let Some(pick) = Pick::from_tier(hits) {
                    return CallResolution::Found(pick);
                }
            }
        }

        let methods = self.lookup(&self.methods, &call.callee);
        if !methods.is_empty() {
            return self.global(&methods, unit.path());
        }
        self.global(&self.lookup(&self.functions, &call.callee), unit.path())
    }

    fn global(&self, candidates: &[NodeIndex], file: &str) -> CallResolution {
        match Pick::from_tier(self.tiered(candidates, file)) {
            Some(pick) => CallResolution::Found(pick),
            None => CallResolution::Unknown,
        }
    }

    /// Members named `name` on `class` or, breadth-first, on its bases.
    fn find_member(&self, class: NodeIndex, name: &str, skip_own: bool) -> Vec<NodeIndex> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        if skip_own {
            visited.insert(class);
            queue.extend(self.base_classes(class));
        } else {
            queue.push_back(class);
        }

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            let hits: Vec<NodeIndex> = self
                .graph
                .children(current)
                .into_iter()
                .filter(|&n| {
                    let member = self.graph.entity(n);
                    member.name == name && member.kind.is_callable()
                })
                .collect();
            if !hits.is_empty() {
                return hits;
            }
            queue.extend(self.base_classes(current));
        }
        Vec::new()
    }

    fn base_classes(&self, class: NodeIndex) -> Vec<NodeIndex> {
        let entity = self.graph.entity(class);
        let file = entity.file().unwrap_or("");
        entity
            .bases
            .iter()
            .filter_map(|base| {
                let (_, last) = split_path(strip_generics(base));
                let candidates: Vec<NodeIndex> = self
                    .lookup(&self.classes, last)
                    .into_iter()
                    .filter(|&n| n != class)
                    .collect();
                self.tiered(&candidates, file).first().copied()
            })
            .collect()
    }

    /// Same file, then same directory, then anywhere; first non-empty tier wins.
    fn tiered(&self, candidates: &[NodeIndex], file: &str) -> Vec<NodeIndex> {
        let same_file: Vec<NodeIndex> = candidates
            .iter()
            .copied()
            .filter(|&n| self.graph.entity(n).file() == Some(file))
            .collect();
        if !same_file.is_empty() {
            return same_file;
        }
        let dir = parent_dir(file);
        let same_dir: Vec<NodeIndex> = candidates
            .iter()
            .copied()
            .filter(|&n| {
                self.graph
                    .entity(n)
                    .file()
                    .map(|f| parent_dir(f) == dir)
                    .unwrap_or(false)
            })
            .collect();
        if !same_dir.is_empty() {
            return same_dir;
        }
        candidates.to_vec()
    }

    fn lookup(&self, index: &HashMap<&str, Vec<NodeIndex>>, name: &str) -> Vec<NodeIndex> {
        index.get(name).cloned().unwrap_or_default()
    }

    fn first_module(&self, candidates: &[String]) -> Option<NodeIndex> {
        candidates
            .iter()
            .find_map(|path| self.modules.get(path.as_str()).copied())
    }

    fn child_named(&self, parent: NodeIndex, name: &str) -> Option<NodeIndex> {
        self.graph
            .children(parent)
            .into_iter()
            .find(|&n| self.graph.entity(n).name == name)
    }

    fn ambiguity(
        &self,
        file: &str,
        line: usize,
        subject: &str,
        written: &str,
        pick: &Pick,
    ) -> Diagnostic {
        Diagnostic::new(
            DiagnosticKind::ResolutionAmbiguity,
            format!(
                "`{written}` matches {} entities, using {}",
                pick.alternatives + 1,
                self.graph.entity(pick.target).qualified_name
            ),
        )
        .in_file(file)
        .at_line(line)
        .about(subject)
    }
}

enum BaseResolution {
    Found(Pick),
    External,
    Unknown,
}

enum CallResolution {
    Found(Pick),
    External,
    Unknown,
}

/// Resolve every file in parallel, then merge the per-file buffers in
/// discovery order.
pub fn resolve(builder: &mut GraphBuilder, units: &[FileUnit<'_>]) -> ResolutionReport {
    let shards: Vec<Shard> = {
        let resolver = RelationshipResolver::new(builder, units);
        units
            .par_iter()
            .map(|unit| resolver.resolve_file(unit))
            .collect()
    };

    let mut report = ResolutionReport::default();
    for shard in shards {
        for pending in shard.edges {
            let target = match pending.target {
                Target::Entity(node) => node,
                Target::External(kind, name) => builder.intern_external(kind, &name),
            };
            let kind = pending.edge.kind;
            if builder.add_edge(pending.source, target, pending.edge).is_some() {
                match kind {
                    EdgeKind::Calls => report.calls += 1,
                    EdgeKind::Inherits => report.inherits += 1,
                    EdgeKind::Imports => report.imports += 1,
                    EdgeKind::Contains => {}
                }
            }
        }
        report.diagnostics.extend(shard.diagnostics);
    }

    info!(
        "resolved {} calls, {} inherits, {} imports ({} diagnostics)",
        report.calls,
        report.inherits,
        report.imports,
        report.diagnostics.len()
    );
    report
}

/// `Base[T]` or `Base<T>` to `Base`.
fn strip_generics(base: &str) -> &str {
    base.split(['[', '<', '(']).next().unwrap_or(base).trim()
}

/// Split `a.b.C` or `a::b::C` into its qualifier and final segment.
fn split_path(path: &str) -> (Option<&str>, &str) {
    let cut = path
        .rfind("::")
        .map(|i| (i, 2))
        .or_else(|| path.rfind('.').map(|i| (i, 1)));
    match cut {
        Some((i, width)) => (Some(&path[..i]), &path[i + width..]),
        None => (None, path),
    }
}

fn first_segment(path: &str) -> &str {
    path.split(['.', ':']).next().unwrap_or(path)
}
