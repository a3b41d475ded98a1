//! Error types for story-engine

use story_core::StoreError;
use thiserror::Error;

use crate::session::SessionHandle;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Main error type for engine operations.
///
/// An empty result is never an error: queries with no matches return an
/// empty collection.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// The store could not be reached or failed underneath a query
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Filter options could not be compiled into a query
    #[error("Query compile error: {0}")]
    QueryCompile(String),

    /// Operation on a closed or unknown session
    #[error("Session closed: {0}")]
    SessionClosed(SessionHandle),

    /// A record addressed by id does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller-supplied input was rejected
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Any other store-reported failure
    #[error("Store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(msg) | StoreError::Storage(msg) => {
                EngineError::StoreUnavailable(msg)
            }
            StoreError::NotFound(id) => EngineError::NotFound(id.to_string()),
            other => EngineError::Store(other),
        }
    }
}

impl EngineError {
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, EngineError::StoreUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_failures_map_to_unavailable() {
        let e: EngineError = StoreError::Unavailable("offline".into()).into();
        assert!(e.is_store_unavailable());

        let e: EngineError = StoreError::Storage("disk I/O error".into()).into();
        assert_eq!(e, EngineError::StoreUnavailable("disk I/O error".into()));
    }

    #[test]
    fn other_store_errors_keep_their_kind() {
        let e: EngineError = StoreError::AlreadyExists("family".into()).into();
        assert!(matches!(e, EngineError::Store(StoreError::AlreadyExists(_))));

        let e: EngineError = StoreError::NotFound(uuid::Uuid::nil()).into();
        assert!(matches!(e, EngineError::NotFound(_)));
    }
}
