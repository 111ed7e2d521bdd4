//! Error Types
//!
//! Load-time and query-time failures of the embedding index.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EmbeddingError>;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// The table file could not be parsed. No index is produced.
    #[error("Malformed embedding table at line {line}: {reason}")]
    MalformedTable { line: usize, reason: String },

    #[error("Unknown token: {0}")]
    UnknownToken(String),

    #[error("Invalid neighbor count: {0} (must be at least 1)")]
    InvalidNeighborCount(usize),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Non-finite query component at position {0}")]
    NonFiniteVector(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Query task failed: {0}")]
    TaskFailed(String),
}

impl EmbeddingError {
    pub(crate) fn malformed(line: usize, reason: impl Into<String>) -> Self {
        EmbeddingError::MalformedTable {
            line,
            reason: reason.into(),
        }
    }

    /// Whether the error was caused by the query rather than the index
    pub fn is_query_error(&self) -> bool {
        matches!(
            self,
            EmbeddingError::UnknownToken(_)
                | EmbeddingError::InvalidNeighborCount(_)
                | EmbeddingError::DimensionMismatch { .. }
                | EmbeddingError::NonFiniteVector(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = EmbeddingError::malformed(3, "expected 2 components, got 3");
        assert_eq!(
            err.to_string(),
            "Malformed embedding table at line 3: expected 2 components, got 3"
        );

        let err = EmbeddingError::DimensionMismatch {
            expected: 300,
            actual: 2,
        };
        assert_eq!(err.to_string(), "Dimension mismatch: expected 300, got 2");
    }

    #[test]
    fn test_query_error_classification() {
        assert!(EmbeddingError::UnknownToken("gato".into()).is_query_error());
        assert!(EmbeddingError::InvalidNeighborCount(0).is_query_error());
        assert!(!EmbeddingError::malformed(1, "empty").is_query_error());
        assert!(!EmbeddingError::Config("bad".into()).is_query_error());
        assert!(EmbeddingError::NonFiniteVector(0).is_query_error());
    }
}
