use thiserror::Error;

/// Failure taxonomy for the ingestion pipeline and query engine.
///
/// The propagation policy is per-stage: the normalizer and deduplicator fail
/// closed (no record is created), enrichment stages fail open with safe
/// defaults and never surface here, and storage/embedding dependencies are
/// retried before the error reaches the caller.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed or too-short article/query text. Rejected before the
    /// pipeline runs; never retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The embedding provider, vector store, or structured store is
    /// unreachable. Retried with backoff at the call site; after retries
    /// are exhausted the article is deferred, not dropped.
    #[error("{dependency} unavailable: {source}")]
    DependencyUnavailable {
        dependency: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// A pipeline stage exceeded its configured budget. Treated like
    /// `DependencyUnavailable` for retry purposes.
    #[error("stage '{stage}' timed out after {budget_ms}ms")]
    Timeout { stage: &'static str, budget_ms: u64 },

    /// Exactly one of the two stores accepted the write. The caller retries
    /// only the failed half rather than re-running the whole pipeline.
    #[error(
        "partial storage failure (vector stored: {vector_stored}, structured stored: {structured_stored}): {source}"
    )]
    PartialStorage {
        vector_stored: bool,
        structured_stored: bool,
        #[source]
        source: anyhow::Error,
    },
}

impl PipelineError {
    pub fn dependency(dependency: &'static str, source: impl Into<anyhow::Error>) -> Self {
        PipelineError::DependencyUnavailable {
            dependency,
            source: source.into(),
        }
    }

    /// Whether a retry after backoff could plausibly succeed.
    pub fn is_retriable(&self) -> bool {
        match self {
            PipelineError::InvalidInput(_) => false,
            PipelineError::DependencyUnavailable { .. }
            | PipelineError::Timeout { .. }
            | PipelineError::PartialStorage { .. } => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_input_is_not_retriable() {
        assert!(!PipelineError::InvalidInput("empty title".into()).is_retriable());
    }

    #[test]
    fn dependency_failures_are_retriable() {
        let err = PipelineError::dependency("vector store", anyhow::anyhow!("connection refused"));
        assert!(err.is_retriable());

        let err = PipelineError::Timeout {
            stage: "embed",
            budget_ms: 1000,
        };
        assert!(err.is_retriable());
    }

    #[test]
    fn partial_storage_reports_which_half_failed() {
        let err = PipelineError::PartialStorage {
            vector_stored: true,
            structured_stored: false,
            source: anyhow::anyhow!("disk full"),
        };
        let message = err.to_string();
        assert!(message.contains("vector stored: true"));
        assert!(message.contains("structured stored: false"));
    }
}
