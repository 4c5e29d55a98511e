use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use ccgraph::core::query::statistics;
use ccgraph::core::{DiagnosticKind, Diagnostics};
use ccgraph::formatters::JsonCompactFormatter;
use ccgraph::parsers::Language;
use ccgraph::{
    query, AnalysisConfig, CodeGraph, CodebaseAnalyzer, EntityKind, QueryKind, QueryParams,
    Relationship,
};

#[derive(Debug, Parser)]
#[command(
    name = "ccg",
    version,
    about = "Build and query a code context graph for a source tree"
)]
struct Cli {
    /// More log output (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Analyze a directory and print statistics and diagnostics
    Analyze {
        #[command(flatten)]
        source: SourceArgs,

        /// Write the graph as JSON to this file
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Full JSON objects instead of compact arrays
        #[arg(long)]
        full: bool,
    },
    /// Analyze a directory and run one query against the graph
    Query {
        #[command(flatten)]
        source: SourceArgs,

        /// Query kind, e.g. callers, call_graph, diagram_subgraph
        query: String,

        /// Qualified or short entity name
        #[arg(short, long)]
        target: Option<String>,

        /// Restrict to one entity kind
        #[arg(short, long)]
        kind: Option<EntityKind>,

        /// Cap the number of results
        #[arg(short, long)]
        limit: Option<usize>,

        /// For `related`: calls, called_by, inherits or all
        #[arg(short, long)]
        relation: Option<Relationship>,
    },
}

#[derive(Debug, Args)]
struct SourceArgs {
    /// Directory to analyze
    #[arg(value_name = "PATH")]
    input: PathBuf,

    /// TOML config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Comma-separated languages to analyze
    #[arg(long, value_delimiter = ',')]
    languages: Vec<Language>,

    /// Maximum number of files to analyze
    #[arg(long)]
    max_files: Option<usize>,

    /// Extraction worker threads
    #[arg(long)]
    concurrency: Option<usize>,
}

impl SourceArgs {
    fn config(&self) -> Result<AnalysisConfig> {
        let mut config = match &self.config {
            Some(path) => AnalysisConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => AnalysisConfig::default(),
        };
        if !self.languages.is_empty() {
            config = config.with_languages(self.languages.clone());
        }
        if let Some(max_files) = self.max_files {
            config = config.with_max_files(max_files);
        }
        if let Some(concurrency) = self.concurrency {
            config = config.with_concurrency(concurrency);
        }
        Ok(config)
    }

    fn analyze(&self) -> Result<(CodeGraph, Diagnostics)> {
        let config = self.config()?;
        let analyzer = CodebaseAnalyzer::new(config).context("invalid configuration")?;
        let (graph, diagnostics) = analyzer
            .analyze_directory(&self.input)
            .with_context(|| format!("failed to analyze {}", self.input.display()))?;
        Ok((graph, diagnostics))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);
    match cli.command {
        Command::Analyze {
            source,
            output,
            full,
        } => run_analyze(&source, output.as_deref(), full),
        Command::Query {
            source,
            query,
            target,
            kind,
            limit,
            relation,
        } => {
            let kind_of_query: QueryKind = query.parse()?;
            let params = QueryParams {
                target,
                kind,
                limit,
                relation,
            };
            run_query(&source, kind_of_query, params)
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, _) => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn run_analyze(source: &SourceArgs, output: Option<&Path>, full: bool) -> Result<()> {
    let started = Instant::now();
    let (graph, diagnostics) = source.analyze()?;
    let stats = statistics(&graph);

    let mut out = io::stdout().lock();
    writeln!(out, "Analyzed {} in {:.2}s", source.input.display(), started.elapsed().as_secs_f64())?;
    writeln!(
        out,
        "Status: {}",
        if graph.is_partial() { "partial" } else { "complete" }
    )?;
    writeln!(
        out,
        "Files: {} analyzed, {} unparsed",
        stats.files_analyzed, stats.unparsed_files
    )?;
    writeln!(out, "Entities: {} total", stats.total_entities)?;
    for (kind, count) in &stats.entities_by_kind {
        writeln!(out, "  {kind}: {count}")?;
    }
    writeln!(out, "Edges: {} total", stats.total_edges)?;
    for (kind, count) in &stats.edges_by_kind {
        writeln!(out, "  {kind}: {count}")?;
    }
    writeln!(
        out,
        "Complexity: avg {:.2}, max {}",
        stats.avg_complexity, stats.max_complexity
    )?;

    writeln!(out, "Diagnostics: {}", diagnostics.len())?;
    for kind in [
        DiagnosticKind::ParseError,
        DiagnosticKind::ResolutionAmbiguity,
        DiagnosticKind::UnresolvedReference,
        DiagnosticKind::BudgetExceeded,
        DiagnosticKind::FileExcluded,
    ] {
        let count = diagnostics.count(kind);
        if count > 0 {
            writeln!(out, "  {kind}: {count}")?;
        }
    }
    let skipped = diagnostics.skipped_files();
    if !skipped.is_empty() {
        writeln!(out, "Files skipped:")?;
        for file in skipped {
            writeln!(out, "  {file}")?;
        }
    }

    if let Some(path) = output {
        let formatter = if full {
            JsonCompactFormatter::full()
        } else {
            JsonCompactFormatter::new()
        };
        formatter
            .format_to_file(&graph, &diagnostics, path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        writeln!(out, "JSON output: {}", path.display())?;
    }
    Ok(())
}

fn run_query(source: &SourceArgs, kind: QueryKind, params: QueryParams) -> Result<()> {
    let (graph, _) = source.analyze()?;
    let results = query(&graph, kind, &params)?;

    let mut out = io::stdout().lock();
    for result in &results {
        writeln!(out, "{}", serde_json::to_string(result)?)?;
    }
    Ok(())
}
