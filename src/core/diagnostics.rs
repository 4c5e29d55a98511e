use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a non-fatal issue found while building the graph.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// The file could not be parsed; it is represented by a marker entity.
    ParseError,
    /// More than one candidate matched; the edge points at the best guess.
    ResolutionAmbiguity,
    /// No candidate matched a call, import or base class.
    UnresolvedReference,
    /// File-count or time budget hit; the file was not analysed.
    BudgetExceeded,
    /// The file was filtered out by an exclusion rule.
    FileExcluded,
}

impl DiagnosticKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagnosticKind::ParseError => "parse_error",
            DiagnosticKind::ResolutionAmbiguity => "resolution_ambiguity",
            DiagnosticKind::UnresolvedReference => "unresolved_reference",
            DiagnosticKind::BudgetExceeded => "budget_exceeded",
            DiagnosticKind::FileExcluded => "file_excluded",
        }
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub file: Option<String>,
    pub line: Option<usize>,
    /// Qualified name of the entity the issue is about, if any.
    pub subject: Option<String>,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            file: None,
            line: None,
            subject: None,
            message: message.into(),
        }
    }

    pub fn in_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    pub fn about(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.kind)?;
        if let Some(file) = &self.file {
            write!(f, " {file}")?;
            if let Some(line) = self.line {
                write!(f, ":{line}")?;
            }
        }
        write!(f, " {}", self.message)
    }
}

/// Side-channel record attached to a finished graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.entries.push(diagnostic);
    }

    pub fn extend(&mut self, other: impl IntoIterator<Item = Diagnostic>) {
        self.entries.extend(other);
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn of_kind(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> + '_ {
        self.entries.iter().filter(move |d| d.kind == kind)
    }

    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.of_kind(kind).count()
    }

    /// Files that were not analysed, whether by failure, budget or exclusion.
    pub fn skipped_files(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|d| {
                matches!(
                    d.kind,
                    DiagnosticKind::ParseError
                        | DiagnosticKind::BudgetExceeded
                        | DiagnosticKind::FileExcluded
                )
            })
            .filter_map(|d| d.file.as_deref())
            .collect()
    }

    pub fn budget_exceeded(&self) -> bool {
        self.count(DiagnosticKind::BudgetExceeded) > 0
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
