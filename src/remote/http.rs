use async_trait::async_trait;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use url::Url;

use super::document::decode_page;
use super::{LookupError, PaginationCursor, RemoteError, RemoteFeedSource, RemotePage, UserDirectory};
use crate::storage::{FeedOrdering, UserAnnotation};
use crate::util::{validate_backend_url, UrlValidationError};

const MAX_PAGE_SIZE: usize = 10 * 1024 * 1024; // 10MB
const MAX_USER_RECORD_SIZE: usize = 64 * 1024;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// JSON REST backend serving feed pages and user records.
///
/// Endpoints, relative to the base URL:
/// - `GET v1/feeds/{filter_key}/items?limit=N&order=recent|trending[&after=CURSOR]`
/// - `GET v1/users/{user_id}`
///
/// No request is retried here; the feed controller surfaces failures and
/// the user decides whether to retry.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<SecretString>,
    timeout: Duration,
}

impl HttpBackend {
    /// Create a backend rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Rejects base URLs that are not HTTPS (plain HTTP is allowed for
    /// localhost only).
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        api_key: Option<SecretString>,
    ) -> Result<Self, UrlValidationError> {
        let base_url = validate_backend_url(base_url)?;
        Ok(Self {
            client,
            base_url,
            api_key,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Override the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build `{base}/v1/{segments...}` with each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // http(s) URLs always have a base, so this never fails after validation
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("v1").extend(segments);
        }
        url
    }

    /// GET `url` and read its body, at most `limit` bytes. The timeout
    /// covers the whole exchange, body included.
    async fn get_body(&self, url: Url, limit: usize) -> Result<Vec<u8>, RemoteError> {
        let mut request = self.client.get(url);
        if let Some(key) = &self.api_key {
            tracing::trace!("Backend authentication configured");
            request = request.bearer_auth(key.expose_secret());
        }

        let exchange = async {
            let response = request.send().await.map_err(RemoteError::Network)?;
            if !response.status().is_success() {
                return Err(RemoteError::HttpStatus(response.status().as_u16()));
            }
            read_limited_bytes(response, limit).await
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| RemoteError::Timeout)?
    }
}

#[async_trait]
impl RemoteFeedSource for HttpBackend {
    async fn fetch_page(
        &self,
        filter_key: &str,
        ordering: FeedOrdering,
        page_size: usize,
        after: Option<&PaginationCursor>,
    ) -> Result<RemotePage, RemoteError> {
        let mut url = self.endpoint(&["feeds", filter_key, "items"]);
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("limit", &page_size.to_string())
                .append_pair("order", ordering.as_str());
            if let Some(cursor) = after {
                query.append_pair("after", cursor.as_str());
            }
        }

        tracing::debug!(
            filter_key = %filter_key,
            ordering = %ordering,
            page_size = page_size,
            has_cursor = after.is_some(),
            "Fetching remote feed page"
        );

        let bytes = self.get_body(url, MAX_PAGE_SIZE).await?;
        let decoded =
            decode_page(&bytes, filter_key).map_err(|e| RemoteError::Decode(e.to_string()))?;

        if decoded.skipped > 0 {
            tracing::warn!(
                filter_key = %filter_key,
                skipped = decoded.skipped,
                "Undecodable remote documents skipped"
            );
        }

        Ok(RemotePage {
            items: decoded.items,
            next_cursor: decoded.next_cursor,
            skipped: decoded.skipped,
        })
    }
}

#[async_trait]
impl UserDirectory for HttpBackend {
    async fn fetch_user(&self, user_id: &str) -> Result<UserAnnotation, LookupError> {
        let url = self.endpoint(&["users", user_id]);
        let bytes = match self.get_body(url, MAX_USER_RECORD_SIZE).await {
            Ok(bytes) => bytes,
            Err(RemoteError::HttpStatus(404)) => {
                return Err(LookupError::NotFound(user_id.to_string()))
            }
            Err(RemoteError::HttpStatus(status)) => {
                return Err(LookupError::Network(format!("HTTP error: status {status}")))
            }
            Err(e) => return Err(LookupError::Network(e.to_string())),
        };
        serde_json::from_slice(&bytes).map_err(|e| LookupError::Malformed(e.to_string()))
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, RemoteError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(RemoteError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(RemoteError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(RemoteError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(RemoteError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAGE: &str = r#"{
        "documents": [
            {"id": "n1", "owner_id": "u1", "body": "Water supply cut", "created_at": 100},
            {"id": "n2", "owner_id": "u2", "body": "Market open", "created_at": 90}
        ],
        "next_cursor": "n2"
    }"#;

    fn backend(server: &MockServer) -> HttpBackend {
        HttpBackend::new(reqwest::Client::new(), &server.uri(), None).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_first_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/feeds/560001/items"))
            .and(query_param("limit", "2"))
            .and(query_param("order", "recent"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .expect(1)
            .mount(&server)
            .await;

        let page = backend(&server)
            .fetch_page("560001", FeedOrdering::Recent, 2, None)
            .await
            .unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].id, "n1");
        assert_eq!(page.next_cursor, Some(PaginationCursor::new("n2")));
    }

    #[tokio::test]
    async fn test_fetch_sends_cursor_and_ordering() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/feeds/560001/items"))
            .and(query_param("order", "trending"))
            .and(query_param("after", "n2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"documents": []}"#))
            .expect(1)
            .mount(&server)
            .await;

        let cursor = PaginationCursor::new("n2");
        let page = backend(&server)
            .fetch_page("560001", FeedOrdering::Trending, 10, Some(&cursor))
            .await
            .unwrap();
        assert!(page.items.is_empty());
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_fetch_sends_bearer_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer secret-key"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .expect(1)
            .mount(&server)
            .await;

        let backend = HttpBackend::new(
            reqwest::Client::new(),
            &server.uri(),
            Some(SecretString::from("secret-key".to_string())),
        )
        .unwrap();
        assert!(backend
            .fetch_page("k", FeedOrdering::Recent, 10, None)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_fetch_http_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let err = backend(&server)
            .fetch_page("k", FeedOrdering::Recent, 10, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::HttpStatus(503)));
    }

    #[tokio::test]
    async fn test_fetch_malformed_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;

        let err = backend(&server)
            .fetch_page("k", FeedOrdering::Recent, 10, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Decode(_)));
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(PAGE)
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let err = backend(&server)
            .with_timeout(Duration::from_millis(50))
            .fetch_page("k", FeedOrdering::Recent, 10, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Timeout));
    }

    /// Serve one response whose headers arrive at once but whose body is
    /// held back for `body_delay`.
    async fn slow_body_server(body: &'static str, body_delay: Duration) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;
            let head = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n",
                body.len()
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(body_delay).await;
            let _ = socket.write_all(body.as_bytes()).await;
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_timeout_covers_slow_body() {
        let base = slow_body_server(PAGE, Duration::from_millis(500)).await;
        let backend = HttpBackend::new(reqwest::Client::new(), &base, None)
            .unwrap()
            .with_timeout(Duration::from_millis(100));

        let err = backend
            .fetch_page("k", FeedOrdering::Recent, 10, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Timeout));
    }

    #[tokio::test]
    async fn test_user_lookup_timeout_covers_slow_body() {
        let base = slow_body_server(r#"{"display_name": "Ravi"}"#, Duration::from_millis(500)).await;
        let backend = HttpBackend::new(reqwest::Client::new(), &base, None)
            .unwrap()
            .with_timeout(Duration::from_millis(100));

        let err = backend.fetch_user("u1").await.unwrap_err();
        assert!(matches!(err, LookupError::Network(_)));
    }

    #[tokio::test]
    async fn test_fetch_user_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = backend(&server).fetch_user("u1").await.unwrap_err();
        assert!(matches!(err, LookupError::Network(msg) if msg.contains("500")));
    }

    #[tokio::test]
    async fn test_fetch_user() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/users/u1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"display_name": "Ravi", "avatar_url": "https://cdn.example.com/r.png", "role": "citizen"}"#,
            ))
            .mount(&server)
            .await;

        let user = backend(&server).fetch_user("u1").await.unwrap();
        assert_eq!(user.display_name, "Ravi");
        assert_eq!(user.role, "citizen");
    }

    #[tokio::test]
    async fn test_fetch_user_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = backend(&server).fetch_user("ghost").await.unwrap_err();
        assert!(matches!(err, LookupError::NotFound(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn test_fetch_user_without_optional_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/users/u2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"display_name": "X"}"#))
            .expect(1)
            .mount(&server)
            .await;

        let user = backend(&server).fetch_user("u2").await.unwrap();
        assert_eq!(user.display_name, "X");
        assert!(user.avatar_url.is_none());
        assert_eq!(user.role, "");
    }

    #[tokio::test]
    async fn test_fetch_user_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = backend(&server).fetch_user("u3").await.unwrap_err();
        assert!(matches!(err, LookupError::Malformed(_)));
    }

    #[test]
    fn test_rejects_insecure_backend() {
        assert!(HttpBackend::new(reqwest::Client::new(), "http://api.example.com", None).is_err());
    }
}
