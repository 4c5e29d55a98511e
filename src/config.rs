use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::core::query::DEFAULT_DIAGRAM_LIMIT;
use crate::error::{CcgError, Result};
use crate::parsers::Language;

const DEFAULT_IGNORE_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "__pycache__",
    ".venv",
    "venv",
    "env",
    ".env",
    "dist",
    "build",
    "target",
    ".idea",
    ".vscode",
    "coverage",
    ".pytest_cache",
    ".mypy_cache",
    "eggs",
    ".eggs",
    ".tox",
];

/// Settings for one analysis run, matching `ccg.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Hard cap on the number of files analysed per run.
    pub max_files: usize,
    /// Files larger than this many bytes are excluded.
    pub max_file_size: u64,
    /// Directory names pruned anywhere in the tree.
    pub ignore_dirs: Vec<String>,
    /// Skip any path component starting with `.`.
    pub skip_hidden: bool,
    /// Enabled languages.
    pub languages: Vec<Language>,
    /// Upper bound on extraction workers.
    pub concurrency: usize,
    /// Wall-clock budget for the whole build phase.
    pub time_budget_ms: u64,
    /// Default entity cap for the diagram subgraph query, carried on the
    /// published graph.
    pub diagram_limit: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_files: 50,
            max_file_size: 1_000_000,
            ignore_dirs: DEFAULT_IGNORE_DIRS.iter().map(|d| d.to_string()).collect(),
            skip_hidden: true,
            languages: Language::ALL.to_vec(),
            concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            time_budget_ms: 120_000,
            diagram_limit: DEFAULT_DIAGRAM_LIMIT,
        }
    }
}

impl AnalysisConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_files == 0 {
            return Err(CcgError::Config("max_files must be at least 1".into()));
        }
        if self.concurrency == 0 {
            return Err(CcgError::Config("concurrency must be at least 1".into()));
        }
        if self.languages.is_empty() {
            return Err(CcgError::Config("at least one language must be enabled".into()));
        }
        Ok(())
    }

    pub fn time_budget(&self) -> Duration {
        Duration::from_millis(self.time_budget_ms)
    }

    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = max_files;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_diagram_limit(mut self, limit: usize) -> Self {
        self.diagram_limit = limit;
        self
    }

    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget_ms = u64::try_from(budget.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_languages(mut self, languages: Vec<Language>) -> Self {
        self.languages = languages;
        self
    }

    pub fn is_ignored_dir(&self, name: &str) -> bool {
        (self.skip_hidden && name.starts_with('.') && name != "." && name != "..")
            || self.ignore_dirs.iter().any(|d| d == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = AnalysisConfig::from_toml_str("max_files = 7\nlanguages = [\"python\"]\n")
            .unwrap();
        assert_eq!(config.max_files, 7);
        assert_eq!(config.languages, vec![Language::Python]);
        assert_eq!(config.max_file_size, 1_000_000);
        assert!(config.is_ignored_dir("node_modules"));
        assert!(config.is_ignored_dir(".cache"));
    }

    #[test]
    fn zero_file_cap_is_rejected() {
        let err = AnalysisConfig::from_toml_str("max_files = 0").unwrap_err();
        assert!(matches!(err, CcgError::Config(_)));
    }

    #[test]
    fn unknown_language_is_rejected() {
        assert!(AnalysisConfig::from_toml_str("languages = [\"cobol\"]").is_err());
    }
}
