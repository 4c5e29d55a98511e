use rayon::prelude::*;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
use super::scanner::CandidateFile;
use crate::error::{CcgError, Result};
use crate::parsers::{Language, ParseResult, ParserFactory};

/// What extraction produced for one candidate file.
#[derive(Debug)]
pub enum FileExtraction {
    Parsed(ParseResult),
    /// The file could not be parsed; it becomes an unparsed marker.
    Failed {
        path: String,
        language: Language,
        line_count: usize,
    },
    /// Never started because the time budget ran out.
    Skipped { path: String },
}

#[derive(Debug, Default)]
pub struct Extraction {
    /// One entry per candidate, in candidate order.
    pub files: Vec<FileExtraction>,
    pub diagnostics: Diagnostics,
    pub timed_out: bool,
}

impl Extraction {
    pub fn parsed(&self) -> impl Iterator<Item = &ParseResult> + '_ {
        self.files.iter().filter_map(|file| match file {
            FileExtraction::Parsed(result) => Some(result),
            _ => None,
        })
    }
}

pub struct EntityExtractor<'a> {
    factory: &'a ParserFactory,
    concurrency: usize,
    deadline: Instant,
}

impl<'a> EntityExtractor<'a> {
    pub fn new(factory: &'a ParserFactory, concurrency: usize, deadline: Instant) -> Self {
        Self {
            factory,
            concurrency: concurrency.max(1),
            deadline,
        }
    }

    /// Parse every candidate on a bounded pool.
    ///
    /// Workers check the deadline before starting each file; a file that has
    /// started always runs to completion.
    pub fn extract(&self, candidates: &[CandidateFile]) -> Result<Extraction> {
        let threads = self.concurrency.min(candidates.len()).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|err| CcgError::Task(format!("extraction pool: {err}")))?;

        let outcomes: Vec<(FileExtraction, Option<Diagnostic>)> = pool.install(|| {
            candidates
                .par_iter()
                .map(|candidate| self.extract_file(candidate))
                .collect()
        });

        let mut extraction = Extraction::default();
        for (file, diagnostic) in outcomes {
            if matches!(file, FileExtraction::Skipped { .. }) {
                extraction.timed_out = true;
            }
            if let Some(diagnostic) = diagnostic {
                extraction.diagnostics.push(diagnostic);
            }
            extraction.files.push(file);
        }

        let parsed = extraction.parsed().count();
        info!(
            "extracted {} of {} files ({} failed, {} skipped)",
            parsed,
            candidates.len(),
            extraction.diagnostics.count(DiagnosticKind::ParseError),
            extraction.diagnostics.count(DiagnosticKind::BudgetExceeded)
        );
        if extraction.timed_out {
            warn!("time budget exhausted during extraction");
        }
        Ok(extraction)
    }

    fn extract_file(&self, candidate: &CandidateFile) -> (FileExtraction, Option<Diagnostic>) {
        if Instant::now() >= self.deadline {
            let diagnostic = Diagnostic::new(
                DiagnosticKind::BudgetExceeded,
                "skipped, time budget exhausted",
            )
            .in_file(&candidate.path);
            return (
                FileExtraction::Skipped {
                    path: candidate.path.clone(),
                },
                Some(diagnostic),
            );
        }

        let Some(parser) = self.factory.get_parser(candidate.language) else {
            let diagnostic = Diagnostic::new(
                DiagnosticKind::ParseError,
                format!("no parser for {}", candidate.language),
            )
            .in_file(&candidate.path);
            return (self.failed(candidate), Some(diagnostic));
        };

        match parser.parse(&candidate.path, &candidate.source) {
            Ok(result) => {
                debug!(
                    "{}: {} entities, {} imports, {} call sites",
                    candidate.path,
                    result.entities.len(),
                    result.imports.len(),
                    result.call_sites.len()
                );
                (FileExtraction::Parsed(result), None)
            }
            Err(err) => {
                warn!("failed to parse {}: {}", candidate.path, err);
                let mut diagnostic = Diagnostic::new(DiagnosticKind::ParseError, err.message)
                    .in_file(&candidate.path);
                if let Some(line) = err.line {
                    diagnostic = diagnostic.at_line(line);
                }
                (self.failed(candidate), Some(diagnostic))
            }
        }
    }

    fn failed(&self, candidate: &CandidateFile) -> FileExtraction {
        FileExtraction::Failed {
            path: candidate.path.clone(),
            language: candidate.language,
            line_count: candidate.source.lines().count(),
        }
    }
}
