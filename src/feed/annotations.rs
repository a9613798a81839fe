use futures::stream::{self, StreamExt};
use lru::LruCache;
use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};

use crate::remote::{LookupError, UserDirectory};
use crate::storage::UserAnnotation;

/// Default number of users kept in memory
pub const DEFAULT_ANNOTATION_CAPACITY: usize = 500;

/// Maximum concurrent directory lookups issued by `get_many`
const MAX_CONCURRENT_LOOKUPS: usize = 8;

/// Memoized user id -> display annotation lookups.
///
/// Constructed once and shared as an `Arc` by every controller that needs
/// it. Concurrent misses for the same id may both hit the directory; the
/// later write wins, which is harmless because entries are projections of
/// the same remote record.
pub struct UserAnnotationCache {
    directory: Arc<dyn UserDirectory>,
    entries: Mutex<LruCache<String, UserAnnotation>>,
}

impl UserAnnotationCache {
    pub fn new(directory: Arc<dyn UserDirectory>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            directory,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Cached annotation for `user_id`, fetching it on a miss.
    ///
    /// Lookup failures are never cached and yield `None`; callers render an
    /// "unknown user" fallback.
    pub async fn get(&self, user_id: &str) -> Option<UserAnnotation> {
        let cached = self.lock().get(user_id).cloned();
        if cached.is_some() {
            return cached;
        }

        match self.directory.fetch_user(user_id).await {
            Ok(annotation) => {
                self.lock().put(user_id.to_string(), annotation.clone());
                Some(annotation)
            }
            Err(LookupError::NotFound(_)) => {
                tracing::debug!(user_id = %user_id, "No user record for annotation");
                None
            }
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "User annotation lookup failed");
                None
            }
        }
    }

    /// Resolve several ids at once. Duplicates are looked up once; ids that
    /// fail to resolve are absent from the result.
    pub async fn get_many(&self, user_ids: &[String]) -> HashMap<String, UserAnnotation> {
        let unique: HashSet<String> = user_ids.iter().cloned().collect();

        let mut lookups = stream::iter(unique)
            .map(|id: String| async move {
                let annotation = self.get(&id).await;
                (id, annotation)
            })
            .buffer_unordered(MAX_CONCURRENT_LOOKUPS);

        let mut resolved = HashMap::new();
        while let Some((id, annotation)) = lookups.next().await {
            if let Some(annotation) = annotation {
                resolved.insert(id, annotation);
            }
        }
        resolved
    }

    /// Drop every cached entry (sign-out, explicit reset, pull-to-refresh).
    pub fn clear(&self) {
        let mut entries = self.lock();
        let dropped = entries.len();
        entries.clear();
        tracing::debug!(dropped = dropped, "Cleared user annotation cache");
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<String, UserAnnotation>> {
        // Entries stay valid even if a holder panicked mid-operation
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
