use thiserror::Error;

/// Engine failure classes. The HTTP layer maps these onto status codes;
/// everything else in the engine degrades instead of erroring.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed input the lenient normalizer cannot coerce.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Unsatisfiable weight target, e.g. zero equity against a nonzero
    /// equity target. Explicitly signaled, never masked by an
    /// empty-but-"valid" result.
    #[error("degenerate portfolio: {0}")]
    Degenerate(String),

    /// A portfolio that violates the normalizer's post-condition reached a
    /// computation that requires it. Caller bug, not user error.
    #[error("portfolio not normalized: weights sum to {total:.4}, expected ~1.0")]
    NotNormalized { total: f64 },
}
