//! # ccgraph
//!
//! Builds a Code Context Graph (CCG) from a source tree: modules, classes,
//! functions and methods, linked by containment, calls, inheritance and
//! imports.
//!
//! ## Pipeline
//!
//! 1. **Discovery** ranks candidate files and applies the file cap.
//! 2. **Extraction** parses each file independently, in parallel.
//! 3. **Resolution** links names across files once extraction is complete.
//! 4. **Publication** hands over an immutable [`CodeGraph`] that answers
//!    [`query`] calls.
//!
//! Resolution is name based and does no type inference, so shadowed or
//! overloaded names can produce wrong or missing edges.
//!
//! ## Supported Languages
//!
//! Python, JavaScript, TypeScript, Rust, Jac

pub mod config;
pub mod core;
pub mod error;
pub mod formatters;
pub mod parsers;

pub use crate::config::AnalysisConfig;
pub use crate::core::{
    build, build_async, query, CodeGraph, CodebaseAnalyzer, Diagnostics, EdgeKind, EntityKind,
    QueryKind, QueryParams, QueryResult, Relationship, SourceEntry, SourceTree,
};
pub use crate::error::{CcgError, Result};
