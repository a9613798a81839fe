use serde::Deserialize;

use super::PaginationCursor;
use crate::storage::FeedItem;
use crate::util::validate_media_url;

/// Wire envelope of a page response.
#[derive(Debug, Deserialize)]
struct PageEnvelope {
    #[serde(default)]
    documents: Vec<serde_json::Value>,
    #[serde(default)]
    next_cursor: Option<String>,
}

/// One remote item document. Counters and media default when absent.
#[derive(Debug, Deserialize)]
struct RemoteDocument {
    id: String,
    owner_id: String,
    #[serde(default)]
    body: String,
    created_at: i64,
    #[serde(default)]
    like_count: i64,
    #[serde(default)]
    comment_count: i64,
    #[serde(default)]
    media_urls: Vec<String>,
}

/// Result of decoding a page with best-effort recovery.
#[derive(Debug)]
pub struct DecodedPage {
    pub items: Vec<FeedItem>,
    pub next_cursor: Option<PaginationCursor>,
    /// Documents dropped as undecodable
    pub skipped: usize,
}

/// Decode a page response body for `filter_key`.
///
/// Only a body that is not a page envelope fails. Individual documents
/// that do not decode (or carry an empty id) are skipped and counted, so a
/// partially broken page still contributes its valid items. Media URLs that
/// are not public http(s) URLs are dropped from the item.
pub fn decode_page(bytes: &[u8], filter_key: &str) -> Result<DecodedPage, serde_json::Error> {
    let envelope: PageEnvelope = serde_json::from_slice(bytes)?;

    let mut skipped = 0;
    let mut items = Vec::with_capacity(envelope.documents.len());

    for value in envelope.documents {
        let doc = match serde_json::from_value::<RemoteDocument>(value) {
            Ok(doc) if !doc.id.trim().is_empty() => doc,
            Ok(_) => {
                tracing::debug!(filter_key = %filter_key, "Skipping remote document with empty id");
                skipped += 1;
                continue;
            }
            Err(e) => {
                tracing::debug!(filter_key = %filter_key, error = %e, "Skipping undecodable remote document");
                skipped += 1;
                continue;
            }
        };

        let total_media = doc.media_urls.len();
        let media_urls: Vec<String> = doc
            .media_urls
            .into_iter()
            .filter(|u| validate_media_url(u).is_ok())
            .collect();
        if media_urls.len() < total_media {
            tracing::warn!(
                item_id = %doc.id,
                dropped = total_media - media_urls.len(),
                "Dropped invalid media URLs from remote document"
            );
        }

        items.push(FeedItem {
            id: doc.id,
            filter_key: filter_key.to_string(),
            owner_id: doc.owner_id,
            body: doc.body,
            created_at: doc.created_at,
            like_count: doc.like_count.max(0),
            comment_count: doc.comment_count.max(0),
            media_urls,
            annotation: None,
        });
    }

    Ok(DecodedPage {
        items,
        next_cursor: envelope
            .next_cursor
            .filter(|c| !c.is_empty())
            .map(PaginationCursor::new),
        skipped,
    })
}
