mod feed_items;
mod schema;
mod store;
mod types;

pub use schema::Database;
pub use store::LocalFeedStore;
pub use types::{DatabaseError, FeedItem, FeedOrdering, UserAnnotation};
