pub mod cache;

pub use cache::CacheError;

/// Result type alias for adapter and retrieval operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the adapter registry, retrievers, and pipeline.
///
/// `TemplateMatchBelowThreshold` deliberately has no variant here: a query
/// that fails to clear the confidence threshold is not an error to the
/// caller, it is an empty result set with `{"no_match": true}` metadata.
/// Producing an `Err` for it would force every caller of the base retriever
/// to special-case "no match" vs. "failure", which the rest of the pipeline
/// does not need to do.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// `registry.get(name)` found no instance registered under that name.
    #[error("Unknown adapter: {0}")]
    UnknownAdapter(String),

    /// `registry.register` was called for a `(type, datasource, name)` key
    /// that already names a different adapter implementation.
    #[error("Duplicate registration for adapter '{0}'")]
    DuplicateRegistration(String),

    /// The processing context is missing a parameter the adapter's
    /// capabilities declare as required.
    #[error("Capability violation: adapter '{adapter}' requires parameter '{parameter}'")]
    CapabilityViolation { adapter: String, parameter: String },

    /// A template parameter has no default and could not be extracted from
    /// the query.
    #[error("Missing parameter '{parameter}' for template '{template_id}'")]
    MissingParameter {
        template_id: String,
        parameter: String,
    },

    /// An extracted parameter failed its declared validation rule
    /// (`allowed_values`, numeric bounds, or type check).
    #[error("Parameter '{parameter}' failed validation: {reason}")]
    ParameterValidationError { parameter: String, reason: String },

    /// Strict rendering hit an undeclared placeholder, or a template
    /// attempted identifier interpolation without a declared
    /// `allowed_values` set.
    #[error("Template render error for '{template_id}': {reason}")]
    TemplateRenderError { template_id: String, reason: String },

    /// Connection, timeout, or query failure against a concrete datasource.
    /// Never carries a connection string or credential.
    #[error("Datasource error on adapter '{adapter}': {message}")]
    DatasourceError { adapter: String, message: String },

    /// The circuit breaker for this adapter is open; fast failure without
    /// attempting the call.
    #[error("Circuit open for adapter '{adapter}', retry after {retry_after_secs}s")]
    CircuitOpen {
        adapter: String,
        retry_after_secs: u64,
    },

    /// The configured reranker is unavailable. The composite retriever
    /// degrades by skipping Stage 2 and renormalizing the remaining
    /// weights rather than failing the whole request.
    #[error("Reranker unavailable: {0}")]
    RerankerUnavailable(String),

    /// The configured embedding provider is unavailable. Callers degrade:
    /// the composite retriever skips embedding-dependent stages, the
    /// follow-up cache falls back to keyword heuristics and the
    /// classifier.
    #[error("Embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The follow-up cache's backing store is unavailable; retrieval
    /// proceeds as if every request were a fresh query.
    #[error("Follow-up cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Cache operation error with detailed context.
    #[error("{0}")]
    Cache(#[from] CacheError),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Whether this error can be retried with backoff and should count
    /// against a circuit breaker's consecutive-failure threshold.
    /// Request-shaped problems (bad config, failed validation, a render
    /// error) are not recoverable — retrying a malformed request changes
    /// nothing.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::DatasourceError { .. }
            | Error::Timeout(_)
            | Error::RerankerUnavailable(_)
            | Error::EmbeddingUnavailable(_)
            | Error::CacheUnavailable(_)
            | Error::Io(_) => true,
            // The circuit being open is the breaker's own output, not a
            // fresh observation to feed back into it.
            Error::CircuitOpen { .. } => false,
            Error::Configuration(_)
            | Error::UnknownAdapter(_)
            | Error::DuplicateRegistration(_)
            | Error::CapabilityViolation { .. }
            | Error::MissingParameter { .. }
            | Error::ParameterValidationError { .. }
            | Error::TemplateRenderError { .. }
            | Error::Serialization(_)
            | Error::Yaml(_)
            | Error::InvalidInput(_) => false,
            Error::Cache(cache_err) => matches!(
                cache_err,
                CacheError::EvictionFailed { .. } | CacheError::SerializationFailed { .. }
            ),
        }
    }

    /// `true` for errors that should surface as 503 (fast failure /
    /// upstream exhaustion) rather than a 400-class request error.
    #[must_use]
    pub fn is_service_unavailable(&self) -> bool {
        matches!(
            self,
            Error::DatasourceError { .. } | Error::CircuitOpen { .. }
        )
    }

    /// Check if this is a cache error.
    #[must_use]
    pub fn is_cache_error(&self) -> bool {
        matches!(self, Error::Cache(_))
    }

    /// Get the cache error if this is one.
    #[must_use]
    pub fn as_cache_error(&self) -> Option<&CacheError> {
        match self {
            Error::Cache(e) => Some(e),
            _ => None,
        }
    }
}
