use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds a lock on the cache database
    #[error("The feed cache database is locked by another process. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A JSON column (media URLs, annotation) could not be encoded or decoded
    #[error("Failed to encode cached column: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5): database is locked
        // SQLITE_LOCKED (6): database table is locked
        // SQLITE_CANTOPEN (14): unable to open database file
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Ordering
// ============================================================================

/// Server-side and local ordering of a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedOrdering {
    /// Newest first (`created_at DESC`).
    #[default]
    Recent,
    /// Most liked first, ties broken by recency.
    Trending,
}

impl FeedOrdering {
    /// Wire name used in remote queries.
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedOrdering::Recent => "recent",
            FeedOrdering::Trending => "trending",
        }
    }
}

impl std::fmt::Display for FeedOrdering {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// Display projection of a user, embedded into feed items.
///
/// Never a strong reference to a full user record: it is looked up by the
/// item's `owner_id` and may be absent ("unknown user").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAnnotation {
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub role: String,
}

/// One unit of remote content cached locally.
///
/// `id` is globally unique and stable across the remote and local
/// representations. `filter_key` is the partition (e.g. a locality code)
/// the item was fetched under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: String,
    pub filter_key: String,
    pub owner_id: String,
    pub body: String,
    /// Creation time, unix seconds
    pub created_at: i64,
    pub like_count: i64,
    pub comment_count: i64,
    pub media_urls: Vec<String>,
    pub annotation: Option<UserAnnotation>,
}

/// Internal row type for feed item queries (used by sqlx FromRow).
/// JSON columns are decoded by `into_item()`.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedItemDbRow {
    pub id: String,
    pub filter_key: String,
    pub owner_id: String,
    pub body: String,
    pub created_at: i64,
    pub like_count: i64,
    pub comment_count: i64,
    pub media_urls: String,
    pub annotation: Option<String>,
}

impl FeedItemDbRow {
    pub(crate) fn into_item(self) -> Result<FeedItem, DatabaseError> {
        let media_urls = serde_json::from_str(&self.media_urls)?;
        let annotation = self
            .annotation
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(FeedItem {
            id: self.id,
            filter_key: self.filter_key,
            owner_id: self.owner_id,
            body: self.body,
            created_at: self.created_at,
            like_count: self.like_count,
            comment_count: self.comment_count,
            media_urls,
            annotation,
        })
    }
}
