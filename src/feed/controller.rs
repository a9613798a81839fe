use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

use super::annotations::UserAnnotationCache;
use super::error::FeedError;
use super::lifecycle::FreshnessOracle;
use super::scratch::ScratchCleaner;
use crate::remote::{PaginationCursor, RemoteFeedSource, RemotePage};
use crate::storage::{DatabaseError, FeedItem, FeedOrdering, LocalFeedStore};

/// Scrolling within this many positions of the end triggers the next page
const LOAD_MORE_THRESHOLD: usize = 3;

/// Tunables of a [`FeedCacheController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedSettings {
    /// Items requested per remote page
    pub page_size: usize,
    /// Upper bound on items kept locally per filter key
    pub max_cached_items: usize,
    /// Age after which `initial_load` fetches again
    pub cache_expiry_minutes: u64,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            page_size: 10,
            max_cached_items: 50,
            cache_expiry_minutes: 30,
        }
    }
}

impl FeedSettings {
    /// Clamp to usable values: at least one item per page, and room for at
    /// least one full page in the cache.
    pub fn normalized(self) -> Self {
        let page_size = self.page_size.max(1);
        Self {
            page_size,
            max_cached_items: self.max_cached_items.max(page_size),
            cache_expiry_minutes: self.cache_expiry_minutes,
        }
    }
}

/// Collaborators injected into a controller. Each is constructed once by the
/// caller and may be shared between controllers.
#[derive(Clone)]
pub struct FeedServices {
    pub remote: Arc<dyn RemoteFeedSource>,
    pub store: Arc<dyn LocalFeedStore>,
    pub annotations: Arc<UserAnnotationCache>,
    pub freshness: Arc<dyn FreshnessOracle>,
    pub scratch: Arc<dyn ScratchCleaner>,
}

/// Observable snapshot of the controller, scoped to the current filter key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedStatus {
    pub is_loading: bool,
    pub is_loading_more: bool,
    pub has_more_content: bool,
    pub last_fetch_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for FeedStatus {
    fn default() -> Self {
        Self {
            is_loading: false,
            is_loading_more: false,
            has_more_content: true,
            last_fetch_time: None,
            last_error: None,
        }
    }
}

/// Pagination bookkeeping for one filter key.
#[derive(Debug)]
struct CacheState {
    generation: u64,
    initial_load_done: bool,
    last_fetch: Option<DateTime<Utc>>,
    has_more: bool,
    cursor: Option<PaginationCursor>,
    first_page_in_flight: bool,
    next_page_in_flight: bool,
}

impl Default for CacheState {
    fn default() -> Self {
        Self {
            generation: 0,
            initial_load_done: false,
            last_fetch: None,
            has_more: true,
            cursor: None,
            first_page_in_flight: false,
            next_page_in_flight: false,
        }
    }
}

#[derive(Debug, Default)]
struct ControllerState {
    /// Source of generations. Shared by every key so a generation is never
    /// reused, even after a key's state is dropped and recreated.
    epoch: u64,
    current_key: Option<String>,
    scopes: HashMap<String, CacheState>,
    last_error: Option<String>,
}

impl ControllerState {
    /// Make `filter_key` current, dropping the previous key's state.
    ///
    /// Fetches still in flight for the previous key find no live state when
    /// they complete and are discarded.
    fn switch_key(&mut self, filter_key: &str, freshness: &dyn FreshnessOracle) {
        if self.current_key.as_deref() == Some(filter_key) {
            return;
        }
        if let Some(previous) = self.current_key.take() {
            self.scopes.remove(&previous);
            freshness.forget(&previous);
            tracing::debug!(from = %previous, to = %filter_key, "Switched filter key");
        }
        self.current_key = Some(filter_key.to_string());
        self.last_error = None;
    }

    /// Start a first-page load for `filter_key`, superseding anything in
    /// flight for it. Returns the new generation.
    fn begin_first_page(&mut self, filter_key: &str) -> u64 {
        self.epoch += 1;
        let generation = self.epoch;
        let scope = self.scopes.entry(filter_key.to_string()).or_default();
        scope.generation = generation;
        scope.first_page_in_flight = true;
        // A superseded next-page fetch can no longer clear its own flag
        scope.next_page_in_flight = false;
        generation
    }

    fn is_live(&self, filter_key: &str, generation: u64) -> bool {
        self.scopes
            .get(filter_key)
            .is_some_and(|scope| scope.generation == generation)
    }

    fn snapshot(&self) -> FeedStatus {
        let scope = self
            .current_key
            .as_ref()
            .and_then(|key| self.scopes.get(key));
        FeedStatus {
            is_loading: scope.is_some_and(|s| s.first_page_in_flight),
            is_loading_more: scope.is_some_and(|s| s.next_page_in_flight),
            has_more_content: scope.map_or(true, |s| s.has_more),
            last_fetch_time: scope.and_then(|s| s.last_fetch),
            last_error: self.last_error.clone(),
        }
    }
}

/// Write-path orchestrator of the local feed cache.
///
/// Fetches pages from the remote source, annotates them with user display
/// data, writes them through to the local store and keeps the store bounded.
/// Readers query the store directly; the controller only exposes loading
/// state through [`FeedCacheController::subscribe`].
///
/// The state mutex is held for decisions and commits, never across a remote
/// fetch. Every load carries a generation; a fetch whose generation is no
/// longer current when it completes is dropped without touching the store.
pub struct FeedCacheController {
    settings: FeedSettings,
    ordering: FeedOrdering,
    services: FeedServices,
    state: Mutex<ControllerState>,
    status_tx: watch::Sender<FeedStatus>,
}

impl FeedCacheController {
    pub fn new(settings: FeedSettings, ordering: FeedOrdering, services: FeedServices) -> Self {
        let (status_tx, _) = watch::channel(FeedStatus::default());
        Self {
            settings: settings.normalized(),
            ordering,
            services,
            state: Mutex::new(ControllerState::default()),
            status_tx,
        }
    }

    pub fn settings(&self) -> FeedSettings {
        self.settings
    }

    pub fn ordering(&self) -> FeedOrdering {
        self.ordering
    }

    /// Current status snapshot.
    pub fn status(&self) -> FeedStatus {
        self.status_tx.borrow().clone()
    }

    /// Receiver notified on every status change.
    pub fn subscribe(&self) -> watch::Receiver<FeedStatus> {
        self.status_tx.subscribe()
    }

    /// Load the first page of `filter_key` unless a fresh load already
    /// happened within the expiry window.
    ///
    /// Switching to a new key drops the previous key's pagination state.
    /// A call while the first page is already loading does nothing.
    pub async fn initial_load(&self, filter_key: &str) -> Result<(), FeedError> {
        if filter_key.is_empty() {
            return Ok(());
        }

        let generation = {
            let mut state = self.state.lock().await;
            state.switch_key(filter_key, self.services.freshness.as_ref());

            let freshness = &self.services.freshness;
            let needs_load = !freshness.is_initialized(filter_key)
                || freshness.should_force_refresh(filter_key, self.settings.cache_expiry_minutes);
            if !needs_load {
                tracing::debug!(filter_key = %filter_key, "Cache fresh, skipping initial load");
                self.publish(&state);
                return Ok(());
            }

            if state
                .scopes
                .get(filter_key)
                .is_some_and(|s| s.first_page_in_flight)
            {
                tracing::debug!(filter_key = %filter_key, "First page already loading");
                return Ok(());
            }

            let generation = state.begin_first_page(filter_key);
            self.publish(&state);
            generation
        };

        self.load_first_page(filter_key, generation).await
    }

    /// Unconditionally reload `filter_key` from the first page.
    ///
    /// Clears temporary media and the annotation cache first. Supersedes any
    /// load in flight for the key: the latest refresh is the one committed.
    pub async fn refresh(&self, filter_key: &str) -> Result<(), FeedError> {
        if filter_key.is_empty() {
            return Ok(());
        }

        let generation = {
            let mut state = self.state.lock().await;
            state.switch_key(filter_key, self.services.freshness.as_ref());
            let generation = state.begin_first_page(filter_key);
            self.publish(&state);
            generation
        };

        match self.services.scratch.clear_temporary().await {
            Ok(removed) if removed > 0 => {
                tracing::debug!(removed = removed, "Removed temporary media before refresh");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to clear temporary media"),
        }
        self.services.annotations.clear();

        tracing::info!(filter_key = %filter_key, generation = generation, "Refreshing feed");
        self.load_first_page(filter_key, generation).await
    }

    /// Fetch the next page when `current_item` is among the last few
    /// `visible_items`.
    ///
    /// Does nothing unless the key is current, its first page has loaded,
    /// more content is available and no other load is running for it.
    pub async fn load_more_if_needed(
        &self,
        filter_key: &str,
        current_item: &FeedItem,
        visible_items: &[FeedItem],
    ) -> Result<(), FeedError> {
        let (generation, cursor) = {
            let mut state = self.state.lock().await;
            if state.current_key.as_deref() != Some(filter_key) {
                return Ok(());
            }
            let Some(scope) = state.scopes.get_mut(filter_key) else {
                return Ok(());
            };
            if !scope.has_more
                || scope.next_page_in_flight
                || !scope.initial_load_done
                || scope.first_page_in_flight
                || !is_near_end(current_item, visible_items)
            {
                return Ok(());
            }

            scope.next_page_in_flight = true;
            let claimed = (scope.generation, scope.cursor.clone());
            self.publish(&state);
            claimed
        };

        tracing::debug!(
            filter_key = %filter_key,
            generation = generation,
            has_cursor = cursor.is_some(),
            "Loading next page"
        );
        let fetched = self.fetch_annotated_page(filter_key, cursor.as_ref()).await;

        let mut state = self.state.lock().await;
        if !state.is_live(filter_key, generation) {
            tracing::debug!(
                filter_key = %filter_key,
                generation = generation,
                "Discarding superseded next page"
            );
            return Ok(());
        }

        let outcome = match fetched {
            Ok((page, received)) => match self.commit_next_page(filter_key, &page).await {
                Ok(()) => Ok((page.next_cursor, received)),
                Err(e) => Err(FeedError::from(e)),
            },
            Err(e) => Err(e),
        };

        let page_size = self.settings.page_size;
        let result = match outcome {
            Ok((next_cursor, received)) => {
                if let Some(scope) = state.scopes.get_mut(filter_key) {
                    scope.has_more = received >= page_size && next_cursor.is_some();
                    scope.cursor = next_cursor;
                    scope.last_fetch = Some(Utc::now());
                    scope.next_page_in_flight = false;
                }
                state.last_error = None;
                Ok(())
            }
            Err(e) => {
                // Cursor and has_more were never advanced
                if let Some(scope) = state.scopes.get_mut(filter_key) {
                    scope.next_page_in_flight = false;
                }
                tracing::warn!(filter_key = %filter_key, error = %e, "Next page load failed");
                state.last_error = Some(e.to_string());
                Err(e)
            }
        };
        self.publish(&state);
        result
    }

    /// Drop everything cached for `filter_key`: stored items, pagination
    /// state and freshness. Returns the number of items removed.
    pub async fn clear_cache(&self, filter_key: &str) -> Result<u64, FeedError> {
        let mut state = self.state.lock().await;
        let removed = self.services.store.clear_scope(filter_key).await?;
        state.scopes.remove(filter_key);
        self.services.freshness.forget(filter_key);
        self.publish(&state);
        tracing::info!(filter_key = %filter_key, removed = removed, "Cleared feed cache");
        Ok(removed)
    }

    async fn load_first_page(&self, filter_key: &str, generation: u64) -> Result<(), FeedError> {
        let fetched = self.fetch_annotated_page(filter_key, None).await;

        let mut state = self.state.lock().await;
        if !state.is_live(filter_key, generation) {
            tracing::debug!(
                filter_key = %filter_key,
                generation = generation,
                "Discarding superseded first page"
            );
            return Ok(());
        }

        let outcome = match fetched {
            Ok((page, received)) => match self.commit_first_page(filter_key, &page).await {
                Ok(()) => Ok((page, received)),
                Err(e) => Err(FeedError::from(e)),
            },
            Err(e) => Err(e),
        };

        let page_size = self.settings.page_size;
        let result = match outcome {
            Ok((page, received)) => {
                if let Some(scope) = state.scopes.get_mut(filter_key) {
                    scope.has_more = received >= page_size && page.next_cursor.is_some();
                    scope.cursor = page.next_cursor;
                    scope.initial_load_done = true;
                    scope.last_fetch = Some(Utc::now());
                    scope.first_page_in_flight = false;
                }
                self.services.freshness.mark_initialized(filter_key);
                state.last_error = None;
                tracing::info!(
                    filter_key = %filter_key,
                    items = page.items.len(),
                    skipped = page.skipped,
                    "Loaded first page"
                );
                Ok(())
            }
            Err(e) => {
                // Pagination state is only replaced on success
                if let Some(scope) = state.scopes.get_mut(filter_key) {
                    scope.first_page_in_flight = false;
                }
                tracing::warn!(filter_key = %filter_key, error = %e, "First page load failed");
                state.last_error = Some(e.to_string());
                Err(e)
            }
        };
        self.publish(&state);
        result
    }

    async fn commit_first_page(
        &self,
        filter_key: &str,
        page: &RemotePage,
    ) -> Result<(), DatabaseError> {
        self.services.store.replace_scope(filter_key, &page.items).await?;
        self.enforce_size_bound(filter_key).await?;
        Ok(())
    }

    async fn commit_next_page(
        &self,
        filter_key: &str,
        page: &RemotePage,
    ) -> Result<(), DatabaseError> {
        self.services.store.append_scope(filter_key, &page.items).await?;
        self.enforce_size_bound(filter_key).await?;
        Ok(())
    }

    /// Delete the oldest items of `filter_key` beyond `max_cached_items`.
    async fn enforce_size_bound(&self, filter_key: &str) -> Result<u64, DatabaseError> {
        let max_cached_items = self.settings.max_cached_items;
        let cached = self.services.store.count(filter_key).await?;
        if usize::try_from(cached).unwrap_or(0) <= max_cached_items {
            return Ok(0);
        }

        let deleted = self
            .services
            .store
            .evict_oldest(filter_key, max_cached_items)
            .await?;
        tracing::debug!(
            filter_key = %filter_key,
            cached = cached,
            deleted = deleted,
            max_cached_items = max_cached_items,
            "Evicted oldest cached items"
        );
        Ok(deleted)
    }

    /// Fetch one page and attach user annotations to its items.
    ///
    /// Returns the page and the number of documents the remote sent,
    /// counting the ones that failed to decode. A page longer than
    /// `page_size` is kept whole so its cursor still follows the last item.
    async fn fetch_annotated_page(
        &self,
        filter_key: &str,
        after: Option<&PaginationCursor>,
    ) -> Result<(RemotePage, usize), FeedError> {
        let mut page = self
            .services
            .remote
            .fetch_page(filter_key, self.ordering, self.settings.page_size, after)
            .await?;

        let received = page.items.len() + page.skipped;
        if page.items.len() > self.settings.page_size {
            tracing::debug!(
                filter_key = %filter_key,
                received = page.items.len(),
                page_size = self.settings.page_size,
                "Remote sent more than a page"
            );
        }

        let owners: Vec<String> = page.items.iter().map(|i| i.owner_id.clone()).collect();
        let annotations = self.services.annotations.get_many(&owners).await;
        for item in &mut page.items {
            item.filter_key = filter_key.to_string();
            item.annotation = annotations.get(&item.owner_id).cloned();
        }

        Ok((page, received))
    }

    fn publish(&self, state: &ControllerState) {
        self.status_tx.send_replace(state.snapshot());
    }
}

fn is_near_end(current: &FeedItem, visible: &[FeedItem]) -> bool {
    visible
        .iter()
        .position(|item| item.id == current.id)
        .is_some_and(|idx| idx + LOAD_MORE_THRESHOLD >= visible.len())
}
