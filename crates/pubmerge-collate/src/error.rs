use thiserror::Error;

/// Failure taxonomy for the collation run. Everything a source client can
/// produce is converted to one of these at the client boundary; only
/// `Configuration` is allowed to abort a run.
#[derive(Debug, Error)]
pub enum CollateError {
    /// Remote rate limit. Halts further calls to that source for the rest
    /// of the run; never retried.
    #[error("{source_id}: remote quota exhausted")]
    QuotaExceeded { source_id: &'static str },

    /// No match for any identifier. Expected, logged at info level.
    #[error("{source_id}: no match for {local_key}")]
    NotFound {
        source_id: &'static str,
        local_key: String,
    },

    /// Network, parse, or missing-required-field failure. The publication
    /// proceeds with other sources; nothing is retried within the run.
    #[error("{source_id}: transient failure for {local_key}: {message}")]
    Transient {
        source_id: &'static str,
        local_key: String,
        message: String,
    },

    /// Keyspace collision or unreadable persisted artifact. Fatal for the
    /// affected publication only.
    #[error("cache corruption for {local_key}: {message}")]
    CacheCorruption { local_key: String, message: String },

    /// Missing credential or malformed setup. Fatal at startup, before any
    /// fetch begins.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl CollateError {
    /// Stable label stored on merged records and shown in summaries.
    pub fn kind_label(&self) -> &'static str {
        match self {
            CollateError::QuotaExceeded { .. } => "quota_exceeded",
            CollateError::NotFound { .. } => "not_found",
            CollateError::Transient { .. } => "transient",
            CollateError::CacheCorruption { .. } => "cache_corruption",
            CollateError::Configuration(_) => "configuration",
        }
    }
}

pub type Result<T> = std::result::Result<T, CollateError>;
