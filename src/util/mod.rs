//! Utility functions shared by the remote and storage layers.
//!
//! - **URL validation**: backend base URLs must be HTTPS (localhost excepted),
//!   and media URLs carried by remote documents must be public http(s) URLs.

mod url_validator;

pub use url_validator::{validate_backend_url, validate_media_url, UrlValidationError};
