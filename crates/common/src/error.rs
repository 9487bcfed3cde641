use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The error kinds every core component surfaces. Retrieval-path components
/// convert upstream failures into degraded results where a best-effort
/// answer exists; only the outermost dispatch maps these onto protocol
/// responses.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("no result available: {0}")]
    Unavailable(String),

    #[error("corrupt state, project needs rebuild: {0}")]
    Corrupt(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("invariant violation: {0}")]
    Fatal(String),
}

impl CoreError {
    pub fn io(context: &str, err: &std::io::Error) -> Self {
        Self::Transient(format!("{context}: {err}"))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Reason strings attached to a degraded-but-successful response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DegradedReason {
    EmbedderUnavailable,
    VectorUnavailable,
    RerankUnavailable,
    RerankTimeout,
    AnswerUnavailable,
}

impl DegradedReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EmbedderUnavailable => "embedder-unavailable",
            Self::VectorUnavailable => "vector-unavailable",
            Self::RerankUnavailable => "rerank-unavailable",
            Self::RerankTimeout => "rerank-timeout",
            Self::AnswerUnavailable => "answer-unavailable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CoreError, DegradedReason};

    #[test]
    fn dimension_mismatch_names_both_sides() {
        let err = CoreError::DimensionMismatch {
            expected: 384,
            got: 1536,
        };
        let text = err.to_string();
        assert!(text.contains("384"));
        assert!(text.contains("1536"));
    }

    #[test]
    fn degraded_reasons_serialize_kebab_case() {
        let raw = serde_json::to_string(&DegradedReason::EmbedderUnavailable).expect("serialize");
        assert_eq!(raw, "\"embedder-unavailable\"");
        assert_eq!(DegradedReason::RerankTimeout.as_str(), "rerank-timeout");
    }
}
