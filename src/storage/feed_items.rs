use sqlx::{QueryBuilder, Sqlite, Transaction};

use super::schema::Database;
use super::types::{DatabaseError, FeedItem, FeedItemDbRow, FeedOrdering};

// ============================================================================
// Query Limit Constants
// ============================================================================

/// Rows per multi-row INSERT. 10 columns * 50 = 500 binds, well under
/// SQLite's 999 parameter limit.
const UPSERT_BATCH_SIZE: usize = 50;

/// IDs per `IN (...)` clause for batch deletes.
const DELETE_CHUNK_SIZE: usize = 500;

/// Hard cap on rows returned by a scope read (OOM protection).
const MAX_SCOPE_ROWS: i64 = 5000;

impl Database {
    // ========================================================================
    // Feed Item Writes
    // ========================================================================

    /// Replace everything cached under `filter_key` with `items`.
    ///
    /// Delete and insert run in one transaction: readers observe either the
    /// old scope or the new one, never a partially replaced scope.
    pub async fn replace_feed_items(
        &self,
        filter_key: &str,
        items: &[FeedItem],
    ) -> Result<usize, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM feed_items WHERE filter_key = ?")
            .bind(filter_key)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let written = upsert_in_tx(&mut tx, filter_key, items).await?;
        tx.commit().await?;

        tracing::debug!(
            filter_key = %filter_key,
            removed = removed,
            written = written,
            "Replaced cached feed scope"
        );
        Ok(written)
    }

    /// Upsert `items` into `filter_key` without touching other cached rows.
    ///
    /// An existing row with the same id is fully replaced (no partial
    /// field patches).
    pub async fn append_feed_items(
        &self,
        filter_key: &str,
        items: &[FeedItem],
    ) -> Result<usize, DatabaseError> {
        if items.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let written = upsert_in_tx(&mut tx, filter_key, items).await?;
        tx.commit().await?;
        Ok(written)
    }

    /// Delete items by id, returns the number of rows removed.
    pub async fn delete_feed_items(&self, ids: &[String]) -> Result<u64, DatabaseError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut removed = 0;

        for chunk in ids.chunks(DELETE_CHUNK_SIZE) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("DELETE FROM feed_items WHERE id IN (");
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(id);
            }
            separated.push_unseparated(")");

            removed += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(removed)
    }

    /// Drop everything cached under `filter_key`.
    pub async fn clear_feed_items(&self, filter_key: &str) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM feed_items WHERE filter_key = ?")
            .bind(filter_key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Delete everything under `filter_key` except the `keep` most recent
    /// items. Runs as one statement, so it is not bounded by the scope read
    /// cap.
    pub async fn evict_oldest_feed_items(
        &self,
        filter_key: &str,
        keep: usize,
    ) -> Result<u64, DatabaseError> {
        let keep = i64::try_from(keep).unwrap_or(i64::MAX);
        let result = sqlx::query(
            r#"
            DELETE FROM feed_items
            WHERE filter_key = ?
              AND id NOT IN (
                  SELECT id FROM feed_items
                  WHERE filter_key = ?
                  ORDER BY created_at DESC, id ASC
                  LIMIT ?
              )
        "#,
        )
        .bind(filter_key)
        .bind(filter_key)
        .bind(keep)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // ========================================================================
    // Feed Item Queries
    // ========================================================================

    /// All items cached under `filter_key`, in the requested order.
    ///
    /// Ties are broken by id so the order is stable across reads.
    pub async fn get_feed_items(
        &self,
        filter_key: &str,
        order: FeedOrdering,
    ) -> Result<Vec<FeedItem>, DatabaseError> {
        let order_by = match order {
            FeedOrdering::Recent => "created_at DESC, id ASC",
            FeedOrdering::Trending => "like_count DESC, created_at DESC, id ASC",
        };

        let sql = format!(
            r#"
            SELECT id, filter_key, owner_id, body, created_at, like_count,
                   comment_count, media_urls, annotation
            FROM feed_items
            WHERE filter_key = ?
            ORDER BY {order_by}
            LIMIT ?
        "#
        );

        let rows = sqlx::query_as::<_, FeedItemDbRow>(&sql)
            .bind(filter_key)
            .bind(MAX_SCOPE_ROWS)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(FeedItemDbRow::into_item).collect()
    }

    /// Number of items cached under `filter_key`.
    pub async fn count_feed_items(&self, filter_key: &str) -> Result<i64, DatabaseError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM feed_items WHERE filter_key = ?")
            .bind(filter_key)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    /// Get a single cached item by id.
    pub async fn get_feed_item(&self, id: &str) -> Result<Option<FeedItem>, DatabaseError> {
        let row = sqlx::query_as::<_, FeedItemDbRow>(
            r#"
            SELECT id, filter_key, owner_id, body, created_at, like_count,
                   comment_count, media_urls, annotation
            FROM feed_items
            WHERE id = ?
        "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(FeedItemDbRow::into_item).transpose()
    }
}

/// Full-replacement upsert of `items` under `filter_key` inside `tx`.
async fn upsert_in_tx(
    tx: &mut Transaction<'_, Sqlite>,
    filter_key: &str,
    items: &[FeedItem],
) -> Result<usize, DatabaseError> {
    let now = chrono::Utc::now().timestamp();
    let mut written = 0;

    for chunk in items.chunks(UPSERT_BATCH_SIZE) {
        // Encode JSON columns up front so a bad row fails before any bind
        let encoded = chunk
            .iter()
            .map(|item| {
                let media = serde_json::to_string(&item.media_urls)?;
                let annotation = item
                    .annotation
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?;
                Ok((item, media, annotation))
            })
            .collect::<Result<Vec<_>, serde_json::Error>>()?;

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO feed_items (id, filter_key, owner_id, body, created_at, like_count, \
             comment_count, media_urls, annotation, cached_at) ",
        );

        builder.push_values(&encoded, |mut b, (item, media, annotation)| {
            b.push_bind(&item.id)
                .push_bind(filter_key)
                .push_bind(&item.owner_id)
                .push_bind(&item.body)
                .push_bind(item.created_at)
                .push_bind(item.like_count)
                .push_bind(item.comment_count)
                .push_bind(media)
                .push_bind(annotation)
                .push_bind(now);
        });

        builder.push(
            " ON CONFLICT(id) DO UPDATE SET \
             filter_key = excluded.filter_key, \
             owner_id = excluded.owner_id, \
             body = excluded.body, \
             created_at = excluded.created_at, \
             like_count = excluded.like_count, \
             comment_count = excluded.comment_count, \
             media_urls = excluded.media_urls, \
             annotation = excluded.annotation, \
             cached_at = excluded.cached_at",
        );

        builder.build().execute(&mut **tx).await?;
        written += chunk.len();
    }

    Ok(written)
}
