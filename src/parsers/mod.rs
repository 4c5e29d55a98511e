pub mod common;
pub mod jac;
pub mod javascript;
pub mod python;
pub mod rust;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::core::Entity;
use crate::error::CcgError;

/// Source languages with a parser implementation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Rust,
    Jac,
}

impl Language {
    pub const ALL: [Language; 5] = [
        Language::Python,
        Language::JavaScript,
        Language::TypeScript,
        Language::Rust,
        Language::Jac,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Rust => "rust",
            Language::Jac => "jac",
        }
    }

    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            Language::Python => &["py", "pyi"],
            Language::JavaScript => &["js", "jsx", "mjs", "cjs"],
            Language::TypeScript => &["ts", "tsx"],
            Language::Rust => &["rs"],
            Language::Jac => &["jac"],
        }
    }

    pub fn from_extension(extension: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|language| language.extensions().contains(&extension))
    }

    pub fn from_path(path: &str) -> Option<Self> {
        let file = path.rsplit('/').next().unwrap_or(path);
        let (_, extension) = file.rsplit_once('.')?;
        Self::from_extension(extension)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = CcgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "python" | "py" => Ok(Language::Python),
            "javascript" | "js" => Ok(Language::JavaScript),
            "typescript" | "ts" => Ok(Language::TypeScript),
            "rust" | "rs" => Ok(Language::Rust),
            "jac" => Ok(Language::Jac),
            other => Err(CcgError::Config(format!("unsupported language '{other}'"))),
        }
    }
}

/// Failure to turn a file's text into a syntax tree.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Parse error in {path}: {message}")]
pub struct ParseError {
    pub path: String,
    pub line: Option<usize>,
    pub message: String,
}

impl ParseError {
    pub fn new(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            line: None,
            message: message.into(),
        }
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }
}

/// An entity found in one file, linked to its enclosing entity by local index.
#[derive(Debug, Clone)]
pub struct ExtractedEntity {
    pub entity: Entity,
    /// Index of the enclosing entity; `None` only for the file module.
    pub parent: Option<usize>,
}

/// A call expression inside a function or method body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSite {
    /// Local index of the calling function or method.
    pub caller: usize,
    pub callee: String,
    /// Receiver text for `obj.method()` style calls.
    pub receiver: Option<String>,
    pub line: usize,
}

/// A name brought in by an import statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedSymbol {
    pub name: String,
    pub alias: Option<String>,
    /// File paths that would hold `name` if it is itself a module.
    pub candidates: Vec<String>,
}

impl ImportedSymbol {
    /// The name the symbol is bound to in the importing file.
    pub fn binding(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// An import statement, with the file paths it may refer to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRef {
    /// Local index of the importing module.
    pub importer: usize,
    /// Module path as written.
    pub target: String,
    /// Repository-relative paths tried in order.
    pub candidates: Vec<String>,
    pub symbols: Vec<ImportedSymbol>,
    /// Name the module itself is bound to, if any.
    pub alias: Option<String>,
    pub line: usize,
}

#[derive(Debug, Clone)]
pub struct ParseResult {
    pub path: String,
    pub language: Language,
    /// Index 0 is always the file module.
    pub entities: Vec<ExtractedEntity>,
    pub imports: Vec<ImportRef>,
    pub call_sites: Vec<CallSite>,
}

pub trait LanguageParser: Send + Sync {
    fn language(&self) -> Language;

    /// Parse one file. `path` is repository-relative with `/` separators.
    fn parse(&self, path: &str, source: &str) -> Result<ParseResult, ParseError>;
}

/// Holds one parser per enabled language and picks them by file extension.
pub struct ParserFactory {
    parsers: HashMap<Language, Box<dyn LanguageParser>>,
}

impl ParserFactory {
    pub fn new(languages: &[Language]) -> Self {
        let parsers = languages
            .iter()
            .map(|&language| (language, Self::create(language)))
            .collect();
        Self { parsers }
    }

    fn create(language: Language) -> Box<dyn LanguageParser> {
        match language {
            Language::Python => Box::new(python::PythonParser::new()),
            Language::JavaScript => Box::new(javascript::JavaScriptParser::javascript()),
            Language::TypeScript => Box::new(javascript::JavaScriptParser::typescript()),
            Language::Rust => Box::new(rust::RustParser::new()),
            Language::Jac => Box::new(jac::JacParser::new()),
        }
    }

    pub fn get_parser(&self, language: Language) -> Option<&dyn LanguageParser> {
        self.parsers.get(&language).map(|parser| parser.as_ref())
    }

    pub fn for_path(&self, path: &str) -> Option<&dyn LanguageParser> {
        Language::from_path(path).and_then(|language| self.get_parser(language))
    }

    pub fn supports(&self, language: Language) -> bool {
        self.parsers.contains_key(&language)
    }
}

impl Default for ParserFactory {
    fn default() -> Self {
        Self::new(&Language::ALL)
    }
}
