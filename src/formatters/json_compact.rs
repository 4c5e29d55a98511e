use serde_json::{json, Value};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::core::{CodeGraph, Diagnostics, EdgeKind, EntityKind, EntityOrigin};
use crate::error::Result;

/// JSON export of a published graph for downstream generators.
///
/// Entities are numbered in graph order and edges refer to those numbers.
pub struct JsonCompactFormatter {
    /// Short keys and array edges instead of full objects.
    minimal: bool,
}

impl JsonCompactFormatter {
    pub fn new() -> Self {
        Self { minimal: true }
    }

    pub fn full() -> Self {
        Self { minimal: false }
    }

    pub fn format_to_file(
        &self,
        graph: &CodeGraph,
        diagnostics: &Diagnostics,
        output_path: &Path,
    ) -> Result<()> {
        let json_content = self.format_graph(graph, diagnostics)?;
        fs::write(output_path, json_content)?;
        Ok(())
    }

    pub fn format_graph(&self, graph: &CodeGraph, diagnostics: &Diagnostics) -> Result<String> {
        Ok(serde_json::to_string(&self.to_value(graph, diagnostics))?)
    }

    pub fn to_value(&self, graph: &CodeGraph, diagnostics: &Diagnostics) -> Value {
        let mut file_map: HashMap<&str, usize> = HashMap::new();
        let mut files: Vec<&str> = Vec::new();
        for (_, entity) in graph.entities() {
            if let Some(file) = entity.file() {
                file_map.entry(file).or_insert_with(|| {
                    files.push(file);
                    files.len() - 1
                });
            }
        }

        let mut node_id_map = HashMap::new();
        let mut nodes = Vec::with_capacity(graph.entity_count());
        for (position, (idx, entity)) in graph.entities().enumerate() {
            node_id_map.insert(idx, position);
            let file_id = entity.file().and_then(|f| file_map.get(f).copied());

            let node_json = if self.minimal {
                json!({
                    "n": entity.qualified_name,
                    "t": self.type_code(entity.kind),
                    "o": self.origin_code(entity.origin),
                    "f": file_id,
                    "l": entity.location.as_ref().map(|l| [l.start_line, l.end_line]),
                })
            } else {
                let mut node_obj = json!({
                    "qualified_name": entity.qualified_name,
                    "name": entity.name,
                    "kind": entity.kind,
                    "origin": entity.origin,
                    "file": file_id,
                    "lines": entity.location.as_ref().map(|l| [l.start_line, l.end_line]),
                    "lang": entity.language,
                });
                if !entity.parameters.is_empty() {
                    node_obj["params"] = json!(entity.parameters);
                }
                if let Some(sig) = &entity.signature {
                    node_obj["sig"] = json!(sig);
                }
                if let Some(ret) = &entity.return_type {
                    node_obj["returns"] = json!(ret);
                }
                if let Some(summary) = entity.summary() {
                    node_obj["summary"] = json!(summary);
                }
                if !entity.bases.is_empty() {
                    node_obj["bases"] = json!(entity.bases);
                }
                if !entity.decorators.is_empty() {
                    node_obj["decorators"] = json!(entity.decorators);
                }
                if !entity.attributes.is_empty() {
                    node_obj["attributes"] = json!(entity.attributes);
                }
                if entity.is_async {
                    node_obj["async"] = json!(true);
                }
                if let Some(complexity) = entity.complexity {
                    node_obj["complexity"] = json!(complexity);
                }
                node_obj
            };
            nodes.push(node_json);
        }

        let mut edges = Vec::with_capacity(graph.edge_count());
        for (source, target, edge) in graph.edges() {
            if let (Some(&src_id), Some(&tgt_id)) = (node_id_map.get(&source), node_id_map.get(&target)) {
                let edge_json = if self.minimal {
                    json!([src_id, tgt_id, self.edge_code(edge.kind)])
                } else {
                    json!({
                        "src": src_id,
                        "tgt": tgt_id,
                        "kind": edge.kind,
                        "line": edge.line,
                    })
                };
                edges.push(edge_json);
            }
        }

        json!({
            "meta": {
                "entities": graph.entity_count(),
                "edges": graph.edge_count(),
                "status": graph.status(),
                "partial": graph.is_partial(),
                "format": if self.minimal { "compact" } else { "full" },
            },
            "files": files,
            "nodes": nodes,
            "edges": edges,
            "diagnostics": diagnostics.entries(),
        })
    }

    fn type_code(&self, kind: EntityKind) -> u8 {
        match kind {
            EntityKind::Module => 0,
            EntityKind::Class => 1,
            EntityKind::Function => 2,
            EntityKind::Method => 3,
        }
    }

    fn origin_code(&self, origin: EntityOrigin) -> u8 {
        match origin {
            EntityOrigin::Repository => 0,
            EntityOrigin::Source => 1,
            EntityOrigin::Unparsed => 2,
            EntityOrigin::External => 3,
        }
    }

    fn edge_code(&self, kind: EdgeKind) -> u8 {
        match kind {
            EdgeKind::Imports => 0,
            EdgeKind::Calls => 1,
            EdgeKind::Inherits => 2,
            EdgeKind::Contains => 5,
        }
    }
}

impl Default for JsonCompactFormatter {
    fn default() -> Self {
        Self::new()
    }
}
