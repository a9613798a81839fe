//! Paginated, size-bounded local cache for a location-scoped news feed.
//!
//! Pages are fetched from a remote source, annotated with user display data,
//! written through to SQLite and evicted oldest-first beyond a configured
//! bound.

pub mod config;
pub mod feed;
pub mod remote;
pub mod storage;
pub mod util;
