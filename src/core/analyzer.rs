use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::diagnostics::Diagnostics;
use super::extractor::{EntityExtractor, FileExtraction};
use super::graph::{AnalysisStatus, CodeGraph, Edge, EdgeKind, Entity, GraphBuilder};
use super::resolver::{self, FileUnit};
use super::scanner::{EntryPointScorer, FileScanner, PriorityScorer, SourceTree};
use crate::config::AnalysisConfig;
use crate::error::{CcgError, Result};
use crate::parsers::ParserFactory;

/// Runs discovery, extraction, resolution and publication for one session.
pub struct CodebaseAnalyzer {
    config: AnalysisConfig,
    parser_factory: ParserFactory,
    scorer: Box<dyn PriorityScorer>,
}

impl CodebaseAnalyzer {
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            parser_factory: ParserFactory::new(&config.languages),
            config,
            scorer: Box::new(EntryPointScorer),
        })
    }

    /// Replace the file ranking used under the file cap.
    pub fn with_scorer(mut self, scorer: impl PriorityScorer + 'static) -> Self {
        self.scorer = Box::new(scorer);
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn analyze_directory(&self, root: &Path) -> Result<(CodeGraph, Diagnostics)> {
        let tree = SourceTree::from_directory(root, &self.config)?;
        self.analyze(&tree)
    }

    /// Build and publish the graph for `tree`.
    ///
    /// Only an empty candidate set or a run without a single extracted entity
    /// is an error; everything else lands in the returned diagnostics.
    pub fn analyze(&self, tree: &SourceTree) -> Result<(CodeGraph, Diagnostics)> {
        let started = Instant::now();
        let deadline = started
            .checked_add(self.config.time_budget())
            .unwrap_or_else(|| started + Duration::from_secs(u64::from(u32::MAX)));

        let discovery = FileScanner::new(&self.config, self.scorer.as_ref()).discover(tree)?;
        let extraction = EntityExtractor::new(&self.parser_factory, self.config.concurrency, deadline)
            .extract(&discovery.candidates)?;

        let mut builder = GraphBuilder::new();
        let root = builder.root();
        let mut units = Vec::with_capacity(extraction.files.len());
        for file in &extraction.files {
            match file {
                FileExtraction::Parsed(parsed) => {
                    let mut nodes = Vec::with_capacity(parsed.entities.len());
                    for extracted in &parsed.entities {
                        let node = builder.add_entity(extracted.entity.clone());
                        let parent = extracted.parent.map(|p| nodes[p]).unwrap_or(root);
                        builder.add_edge(parent, node, Edge::new(EdgeKind::Contains));
                        nodes.push(node);
                    }
                    units.push(FileUnit { parsed, nodes });
                }
                FileExtraction::Failed {
                    path,
                    language,
                    line_count,
                } => {
                    let marker = builder.add_entity(Entity::unparsed(path, *language, *line_count));
                    builder.add_edge(root, marker, Edge::new(EdgeKind::Contains));
                }
                FileExtraction::Skipped { .. } => {}
            }
        }

        if builder.source_entity_count() == 0 {
            return Err(CcgError::NoEntities);
        }

        let report = resolver::resolve(&mut builder, &units);

        let status = if discovery.truncated || extraction.timed_out {
            AnalysisStatus::Partial
        } else {
            AnalysisStatus::Complete
        };
        if status == AnalysisStatus::Partial {
            warn!("graph is partially analyzed");
        }

        let mut diagnostics = discovery.diagnostics;
        diagnostics.extend(extraction.diagnostics);
        diagnostics.extend(report.diagnostics);

        let graph = builder
            .publish(status)
            .with_diagram_limit(self.config.diagram_limit);
        info!(
            "published graph with {} entities and {} edges in {:.2?}",
            graph.entity_count(),
            graph.edge_count(),
            started.elapsed()
        );
        Ok((graph, diagnostics))
    }
}

/// Build a graph for `tree` with the default file ranking.
pub fn build(tree: &SourceTree, config: &AnalysisConfig) -> Result<(CodeGraph, Diagnostics)> {
    CodebaseAnalyzer::new(config.clone())?.analyze(tree)
}

/// [`build`] on the blocking pool, for async callers.
pub async fn build_async(
    tree: SourceTree,
    config: AnalysisConfig,
) -> Result<(CodeGraph, Diagnostics)> {
    tokio::task::spawn_blocking(move || build(&tree, &config))
        .await
        .map_err(|err| CcgError::Task(err.to_string()))?
}
