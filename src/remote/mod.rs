//! Remote collaborators of the feed cache.
//!
//! - [`RemoteFeedSource`] - paginated query over the remote item collection
//! - [`UserDirectory`] - user record lookup backing the annotation cache
//! - [`HttpBackend`] - both of the above over a JSON REST endpoint
//!
//! The remote query engine itself is a black box: all the cache relies on
//! is "up to `page_size` items after this cursor, in this ordering".

mod document;
mod http;

use async_trait::async_trait;
use thiserror::Error;

use crate::storage::{FeedItem, FeedOrdering, UserAnnotation};

pub use document::{decode_page, DecodedPage};
pub use http::HttpBackend;

/// Errors from a remote page fetch.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body was not a page envelope at all
    #[error("Malformed page: {0}")]
    Decode(String),
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// Errors from a user record lookup. All of them mean "no annotation".
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("User not found: {0}")]
    NotFound(String),
    #[error("User lookup failed: {0}")]
    Network(String),
    #[error("Malformed user record: {0}")]
    Malformed(String),
}

/// Opaque continuation token: "resume after this position".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationCursor(String);

impl PaginationCursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One page returned by a [`RemoteFeedSource`].
#[derive(Debug, Clone, Default)]
pub struct RemotePage {
    pub items: Vec<FeedItem>,
    pub next_cursor: Option<PaginationCursor>,
    /// Records dropped because they could not be decoded
    pub skipped: usize,
}

/// Black-box paginated query over the remote feed collection.
#[async_trait]
pub trait RemoteFeedSource: Send + Sync {
    /// Fetch up to `page_size` items for `filter_key` in `ordering`,
    /// starting after `after` (or from the top when `None`).
    async fn fetch_page(
        &self,
        filter_key: &str,
        ordering: FeedOrdering,
        page_size: usize,
        after: Option<&PaginationCursor>,
    ) -> Result<RemotePage, RemoteError>;
}

/// Remote fallback for user annotation lookups.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn fetch_user(&self, user_id: &str) -> Result<UserAnnotation, LookupError>;
}
