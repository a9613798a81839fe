use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// External freshness signal consulted by `initial_load`.
///
/// Answers "has this filter key been loaded, and is that load still
/// fresh?" independently of the controller's own pagination state.
pub trait FreshnessOracle: Send + Sync {
    fn is_initialized(&self, filter_key: &str) -> bool;

    fn mark_initialized(&self, filter_key: &str);

    /// True when the key was never initialized or its last initialization
    /// is at least `expiry_minutes` old.
    fn should_force_refresh(&self, filter_key: &str, expiry_minutes: u64) -> bool;

    /// Forget the key (filter-key switch, explicit cache clear).
    fn forget(&self, filter_key: &str);
}

/// In-process freshness oracle: filter key -> time of last initialization.
///
/// Lives as long as the process, like the pagination cursors it guards; a
/// restart always starts from "uninitialized".
#[derive(Debug, Default)]
pub struct AppLifecycle {
    initialized: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl AppLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an initialization at an explicit time.
    pub fn mark_initialized_at(&self, filter_key: &str, at: DateTime<Utc>) {
        self.lock().insert(filter_key.to_string(), at);
    }

    /// Time of the last initialization of `filter_key`, if any.
    pub fn initialized_at(&self, filter_key: &str) -> Option<DateTime<Utc>> {
        self.lock().get(filter_key).copied()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        self.initialized.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FreshnessOracle for AppLifecycle {
    fn is_initialized(&self, filter_key: &str) -> bool {
        self.lock().contains_key(filter_key)
    }

    fn mark_initialized(&self, filter_key: &str) {
        self.mark_initialized_at(filter_key, Utc::now());
    }

    fn should_force_refresh(&self, filter_key: &str, expiry_minutes: u64) -> bool {
        let Some(at) = self.initialized_at(filter_key) else {
            return true;
        };
        // TimeDelta is bounded by i64::MAX milliseconds
        let minutes = i64::try_from(expiry_minutes)
            .unwrap_or(i64::MAX)
            .min(i64::MAX / 60_000);
        let expiry = Duration::minutes(minutes);
        Utc::now().signed_duration_since(at) >= expiry
    }

    fn forget(&self, filter_key: &str) {
        self.lock().remove(filter_key);
    }
}
