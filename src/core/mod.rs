pub mod analyzer;
pub mod diagnostics;
pub mod extractor;
pub mod graph;
pub mod query;
pub mod resolver;
pub mod scanner;

pub use analyzer::{build, build_async, CodebaseAnalyzer};
pub use diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
pub use graph::{
    external_qualified_name, module_name_from_path, AnalysisStatus, CodeGraph, Edge, EdgeKind,
    Entity, EntityKind, EntityOrigin, GraphBuilder, Parameter, SourceLocation,
    ROOT_QUALIFIED_NAME,
};
pub use query::{query, QueryKind, QueryParams, QueryResult, Relationship};
pub use scanner::{
    EntryPointScorer, FileScanner, PriorityScorer, ProjectMetadata, SourceEntry, SourceTree,
};
