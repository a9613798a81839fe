use async_trait::async_trait;

use super::schema::Database;
use super::types::{DatabaseError, FeedItem, FeedOrdering};

/// Local persistent store the feed controller writes through to.
///
/// Replace and append are separate operations so each keeps its own
/// invariant: `replace_scope` leaves exactly `items` under the key,
/// `append_scope` never removes anything. Every call is transactionally
/// consistent: a read issued after a completed write observes it.
#[async_trait]
pub trait LocalFeedStore: Send + Sync {
    /// Replace all items under `filter_key` with `items`.
    async fn replace_scope(&self, filter_key: &str, items: &[FeedItem])
        -> Result<(), DatabaseError>;

    /// Upsert `items` under `filter_key`, keeping everything else.
    async fn append_scope(&self, filter_key: &str, items: &[FeedItem])
        -> Result<(), DatabaseError>;

    /// All items under `filter_key` in `order`.
    async fn fetch_all(
        &self,
        filter_key: &str,
        order: FeedOrdering,
    ) -> Result<Vec<FeedItem>, DatabaseError>;

    /// Delete items by id.
    async fn delete(&self, ids: &[String]) -> Result<u64, DatabaseError>;

    /// Number of items under `filter_key`.
    async fn count(&self, filter_key: &str) -> Result<i64, DatabaseError>;

    /// Remove every item under `filter_key`.
    async fn clear_scope(&self, filter_key: &str) -> Result<u64, DatabaseError>;

    /// Keep the `keep` most recent items under `filter_key` and delete the
    /// rest, returning how many were deleted.
    async fn evict_oldest(&self, filter_key: &str, keep: usize) -> Result<u64, DatabaseError>;
}

#[async_trait]
impl LocalFeedStore for Database {
    async fn replace_scope(
        &self,
        filter_key: &str,
        items: &[FeedItem],
    ) -> Result<(), DatabaseError> {
        self.replace_feed_items(filter_key, items).await.map(|_| ())
    }

    async fn append_scope(&self, filter_key: &str, items: &[FeedItem]) -> Result<(), DatabaseError> {
        self.append_feed_items(filter_key, items).await.map(|_| ())
    }

    async fn fetch_all(
        &self,
        filter_key: &str,
        order: FeedOrdering,
    ) -> Result<Vec<FeedItem>, DatabaseError> {
        self.get_feed_items(filter_key, order).await
    }

    async fn delete(&self, ids: &[String]) -> Result<u64, DatabaseError> {
        self.delete_feed_items(ids).await
    }

    async fn count(&self, filter_key: &str) -> Result<i64, DatabaseError> {
        self.count_feed_items(filter_key).await
    }

    async fn clear_scope(&self, filter_key: &str) -> Result<u64, DatabaseError> {
        self.clear_feed_items(filter_key).await
    }

    async fn evict_oldest(&self, filter_key: &str, keep: usize) -> Result<u64, DatabaseError> {
        self.evict_oldest_feed_items(filter_key, keep).await
    }
}
