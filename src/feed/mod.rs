//! Feed cache orchestration.
//!
//! - [`FeedCacheController`] - initial load, refresh, forward pagination and
//!   size-bounded eviction over a [`LocalFeedStore`](crate::storage::LocalFeedStore)
//! - [`UserAnnotationCache`] - memoized user id -> display annotation lookups
//! - [`FreshnessOracle`] / [`AppLifecycle`] - "is this filter key loaded and fresh?"
//! - [`ScratchCleaner`] - temporary media discarded on refresh
//!
//! The controller only writes. Readers query the store directly and observe
//! loading state through [`FeedCacheController::subscribe`].

mod annotations;
mod controller;
mod error;
mod lifecycle;
mod scratch;

pub use annotations::{UserAnnotationCache, DEFAULT_ANNOTATION_CAPACITY};
pub use controller::{FeedCacheController, FeedServices, FeedSettings, FeedStatus};
pub use error::FeedError;
pub use lifecycle::{AppLifecycle, FreshnessOracle};
pub use scratch::{NoScratch, ScratchCleaner, TempMediaDir};
