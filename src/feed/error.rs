use thiserror::Error;

use crate::remote::RemoteError;
use crate::storage::DatabaseError;

/// Classified failure of a feed cache operation.
///
/// Every variant is recoverable: the local cache keeps its previous
/// contents and the caller decides whether to retry.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Remote unreachable, timed out, or answered with an error status
    #[error("Network error: {0}")]
    Network(#[source] RemoteError),

    /// Remote answered with something that is not a feed page
    #[error("Malformed feed page: {0}")]
    Decode(String),

    /// Local persistence failed
    #[error("Local cache error: {0}")]
    Storage(#[from] DatabaseError),
}

impl From<RemoteError> for FeedError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Decode(msg) => FeedError::Decode(msg),
            other => FeedError::Network(other),
        }
    }
}
