use std::cmp::Reverse;
use std::path::Path;

use tracing::{debug, info};
use walkdir::WalkDir;

use super::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
use crate::config::AnalysisConfig;
use crate::error::{CcgError, Result};
use crate::parsers::common::{join_relative, parent_dir};
use crate::parsers::Language;

/// Bytes inspected for a NUL when sniffing binary content.
const BINARY_SNIFF_LEN: usize = 8 * 1024;

const METADATA_FILES: &[&str] = &["pyproject.toml", "package.json", "Cargo.toml"];

const ENTRY_STEMS: &[&str] = &["main", "app", "__init__", "__main__", "index", "lib", "mod"];

/// One file of the tree handed to the analyzer, path relative to the root.
#[derive(Debug, Clone)]
pub struct SourceEntry {
    pub path: String,
    pub size: u64,
    pub content: Vec<u8>,
}

impl SourceEntry {
    pub fn new(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        let content = content.into();
        Self {
            path: normalize_path(&path.into()),
            size: content.len() as u64,
            content,
        }
    }

    /// An entry whose content was not loaded, only its size.
    pub fn unread(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: normalize_path(&path.into()),
            size,
            content: Vec::new(),
        }
    }

    fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// The file listing plus raw content consumed by a build.
#[derive(Debug, Clone, Default)]
pub struct SourceTree {
    entries: Vec<SourceEntry>,
    metadata: ProjectMetadata,
}

impl SourceTree {
    pub fn from_entries(entries: Vec<SourceEntry>) -> Self {
        let metadata = ProjectMetadata::detect(&entries);
        Self { entries, metadata }
    }

    /// Walk `root`, pruning ignored directories.
    ///
    /// Only files a parser could use, and project metadata files, are read;
    /// anything over the size ceiling keeps just its size.
    pub fn from_directory(root: &Path, config: &AnalysisConfig) -> Result<Self> {
        if !root.is_dir() {
            return Err(CcgError::Discovery(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        let mut entries = Vec::new();
        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !entry.file_type().is_dir()
                    || !config.is_ignored_dir(&entry.file_name().to_string_lossy())
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    debug!("skipping unreadable entry: {err}");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = match entry.path().strip_prefix(root) {
                Ok(relative) => relative.to_string_lossy().replace('\\', "/"),
                Err(_) => continue,
            };
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            let file_name = entry.file_name().to_string_lossy();
            let wanted = Language::from_path(&relative).is_some()
                || METADATA_FILES.contains(&file_name.as_ref());
            if !wanted || size > config.max_file_size {
                entries.push(SourceEntry::unread(relative, size));
                continue;
            }
            let content = std::fs::read(entry.path())?;
            entries.push(SourceEntry::new(relative, content));
        }

        debug!("walked {} files under {}", entries.len(), root.display());
        Ok(Self::from_entries(entries))
    }

    pub fn entries(&self) -> &[SourceEntry] {
        &self.entries
    }

    pub fn metadata(&self) -> &ProjectMetadata {
        &self.metadata
    }

    pub fn with_metadata(mut self, metadata: ProjectMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Entry points declared by project manifests found in the tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectMetadata {
    pub entry_points: Vec<String>,
}

impl ProjectMetadata {
    pub fn detect(entries: &[SourceEntry]) -> Self {
        let mut entry_points = Vec::new();
        for entry in entries {
            let Ok(text) = std::str::from_utf8(&entry.content) else {
                continue;
            };
            let dir = parent_dir(&entry.path);
            let declared = match entry.file_name() {
                "pyproject.toml" => pyproject_entry_points(text),
                "package.json" => package_json_entry_points(text),
                "Cargo.toml" => cargo_entry_points(text),
                _ => continue,
            };
            for path in declared {
                if let Some(joined) = join_relative(dir, &path) {
                    if !entry_points.contains(&joined) {
                        entry_points.push(joined);
                    }
                }
            }
        }
        Self { entry_points }
    }

    pub fn declares(&self, path: &str) -> bool {
        self.entry_points.iter().any(|p| p == path)
    }
}

fn pyproject_entry_points(text: &str) -> Vec<String> {
    let Ok(doc) = text.parse::<toml::Value>() else {
        return Vec::new();
    };
    let tables = [
        doc.get("project").and_then(|p| p.get("scripts")),
        doc.get("tool")
            .and_then(|t| t.get("poetry"))
            .and_then(|p| p.get("scripts")),
    ];
    tables
        .into_iter()
        .flatten()
        .filter_map(|table| table.as_table())
        .flat_map(|table| table.values())
        .filter_map(|value| value.as_str())
        .filter_map(|target| target.split(':').next())
        .flat_map(|module| {
            let path = module.trim().replace('.', "/");
            [format!("{path}.py"), format!("{path}/__init__.py")]
        })
        .collect()
}

fn package_json_entry_points(text: &str) -> Vec<String> {
    let Ok(doc) = serde_json::from_str::<serde_json::Value>(text) else {
        return Vec::new();
    };
    let mut paths = Vec::new();
    if let Some(main) = doc.get("main").and_then(|m| m.as_str()) {
        paths.push(main.to_string());
    }
    match doc.get("bin") {
        Some(serde_json::Value::String(bin)) => paths.push(bin.clone()),
        Some(serde_json::Value::Object(bins)) => paths.extend(
            bins.values()
                .filter_map(|v| v.as_str())
                .map(str::to_string),
        ),
        _ => {}
    }
    paths
}

fn cargo_entry_points(text: &str) -> Vec<String> {
    let Ok(doc) = text.parse::<toml::Value>() else {
        return Vec::new();
    };
    let mut paths = Vec::new();
    if let Some(bins) = doc.get("bin").and_then(|b| b.as_array()) {
        paths.extend(
            bins.iter()
                .filter_map(|bin| bin.get("path"))
                .filter_map(|p| p.as_str())
                .map(str::to_string),
        );
    }
    if let Some(lib) = doc.get("lib").and_then(|l| l.get("path")).and_then(|p| p.as_str()) {
        paths.push(lib.to_string());
    }
    paths
}

/// Ranks candidate files; higher scores are analysed first.
pub trait PriorityScorer: Send + Sync {
    fn score(&self, path: &str, metadata: &ProjectMetadata) -> i64;
}

/// Favours declared and conventional entry points, demotes tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntryPointScorer;

impl EntryPointScorer {
    const DECLARED: i64 = 100;
    const ENTRY_NAME: i64 = 50;
    const TEST: i64 = -50;
}

impl PriorityScorer for EntryPointScorer {
    fn score(&self, path: &str, metadata: &ProjectMetadata) -> i64 {
        let mut score = 0;
        if metadata.declares(path) {
            score += Self::DECLARED;
        }
        let file = path.rsplit('/').next().unwrap_or(path);
        let stem = file.split('.').next().unwrap_or(file);
        if ENTRY_STEMS.contains(&stem) {
            score += Self::ENTRY_NAME;
        }
        let in_tests_dir = path
            .split('/')
            .rev()
            .skip(1)
            .any(|dir| dir == "tests" || dir == "test");
        if stem.starts_with("test_") || stem.ends_with("_test") || in_tests_dir {
            score += Self::TEST;
        }
        score
    }
}

/// A file selected for extraction.
#[derive(Debug, Clone)]
pub struct CandidateFile {
    pub path: String,
    pub language: Language,
    pub score: i64,
    pub source: String,
}

impl CandidateFile {
    pub fn depth(&self) -> usize {
        self.path.matches('/').count()
    }
}

/// Ordered candidates plus exclusion and budget diagnostics.
#[derive(Debug, Default)]
pub struct Discovery {
    pub candidates: Vec<CandidateFile>,
    pub diagnostics: Diagnostics,
    /// Set when eligible files were left out by the file cap.
    pub truncated: bool,
}

pub struct FileScanner<'a> {
    config: &'a AnalysisConfig,
    scorer: &'a dyn PriorityScorer,
}

impl<'a> FileScanner<'a> {
    pub fn new(config: &'a AnalysisConfig, scorer: &'a dyn PriorityScorer) -> Self {
        Self { config, scorer }
    }

    /// Filter, rank and cap the files of `tree`.
    pub fn discover(&self, tree: &SourceTree) -> Result<Discovery> {
        let mut diagnostics = Diagnostics::new();
        let mut eligible = Vec::new();

        for entry in tree.entries() {
            if self.in_ignored_dir(&entry.path) {
                continue;
            }
            let Some(language) = Language::from_path(&entry.path) else {
                continue;
            };
            if !self.config.languages.contains(&language) {
                continue;
            }
            if entry.size > self.config.max_file_size {
                diagnostics.push(
                    Diagnostic::new(
                        DiagnosticKind::FileExcluded,
                        format!(
                            "{} bytes exceeds the {} byte ceiling",
                            entry.size, self.config.max_file_size
                        ),
                    )
                    .in_file(&entry.path),
                );
                continue;
            }
            let Some(source) = decode_text(&entry.content) else {
                diagnostics.push(
                    Diagnostic::new(DiagnosticKind::FileExcluded, "binary content")
                        .in_file(&entry.path),
                );
                continue;
            };
            eligible.push(CandidateFile {
                score: self.scorer.score(&entry.path, tree.metadata()),
                path: entry.path.clone(),
                language,
                source,
            });
        }

        if eligible.is_empty() {
            return Err(CcgError::Discovery(format!(
                "no eligible source files among {} entries",
                tree.len()
            )));
        }

        eligible.sort_by(|a, b| {
            (Reverse(a.score), a.depth(), &a.path).cmp(&(Reverse(b.score), b.depth(), &b.path))
        });

        let truncated = eligible.len() > self.config.max_files;
        if truncated {
            for skipped in eligible.drain(self.config.max_files..) {
                diagnostics.push(
                    Diagnostic::new(
                        DiagnosticKind::BudgetExceeded,
                        format!("skipped, file cap of {} reached", self.config.max_files),
                    )
                    .in_file(skipped.path),
                );
            }
        }

        info!(
            "discovered {} candidate files ({} excluded or skipped)",
            eligible.len(),
            diagnostics.len()
        );
        Ok(Discovery {
            candidates: eligible,
            diagnostics,
            truncated,
        })
    }

    fn in_ignored_dir(&self, path: &str) -> bool {
        let mut components: Vec<&str> = path.split('/').collect();
        components.pop();
        components.iter().any(|dir| self.config.is_ignored_dir(dir))
    }
}

fn decode_text(content: &[u8]) -> Option<String> {
    let sniff = &content[..content.len().min(BINARY_SNIFF_LEN)];
    if sniff.contains(&0) {
        return None;
    }
    std::str::from_utf8(content).ok().map(str::to_string)
}

fn normalize_path(path: &str) -> String {
    path.replace('\\', "/").trim_start_matches("./").to_string()
}
