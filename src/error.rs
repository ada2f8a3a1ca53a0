use thiserror::Error;

/// Error surfaced through a query's state when a fetch fails.
///
/// Hooks never intercept or retry these; they are reported through the
/// result's `error` signal and nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// The remote call failed.
    #[error("remote call failed: {0}")]
    Rpc(String),

    /// The query parameters could not be turned into a cache key token.
    #[error("query parameters could not be serialized: {0}")]
    InvalidParams(String),
}

impl QueryError {
    /// Wraps an arbitrary remote-call error.
    pub fn rpc(error: impl std::fmt::Display) -> Self {
        QueryError::Rpc(error.to_string())
    }
}
