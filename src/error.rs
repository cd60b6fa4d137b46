use thiserror::Error;

/// Error type for fetches and mutations.
///
/// Errors are cloneable so a single failure can be handed to every caller
/// sharing a deduplicated fetch and also kept on the cache entry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// The remote call was rejected or timed out.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The resource does not exist.
    #[error("Not found: {0}")]
    NotFoundError(String),

    /// The server rejected the payload.
    #[error("Validation failed: {0}")]
    ValidationError(String),
}
