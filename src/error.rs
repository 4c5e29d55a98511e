/// Top-level error type for graph construction and querying.
///
/// Only the fatal cases surface here. Per-file parse failures, ambiguous
/// resolutions and budget overruns are collected into
/// [`Diagnostics`](crate::core::Diagnostics) instead.
#[derive(thiserror::Error, Debug)]
pub enum CcgError {
    /// No eligible source file remained after filtering.
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Extraction finished without producing a single source entity.
    #[error("No entities extracted from any analysed file")]
    NoEntities,

    /// Query kind outside the supported set.
    #[error("Unsupported query: {0}")]
    UnsupportedQuery(String),

    /// A query referenced an entity that is not in the graph.
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    /// A query was issued without a parameter it requires.
    #[error("Missing query parameter: {0}")]
    MissingParameter(&'static str),

    /// Configuration values are present but invalid.
    #[error("Invalid config: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The background build task panicked or was cancelled.
    #[error("Build task failed: {0}")]
    Task(String),
}

/// Convenience alias for `Result<T, CcgError>`.
pub type Result<T> = std::result::Result<T, CcgError>;
