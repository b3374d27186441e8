//! HTTP transport for the ticketing service.
//!
//! `ApiClient` is deliberately thin: it joins paths onto the configured base
//! URL, applies the request timeout, attaches an optional Authorization
//! header and one body encoding, and folds every failure (network, timeout,
//! non-2xx) into [`ApiError`] so that callers all handle errors the same way.

use std::time::Duration;

use reqwest::{header, Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Default service location when nothing is configured.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

/// HTTP request timeout in seconds.
/// Every call is bounded so no operation can hang indefinitely.
pub const DEFAULT_TIMEOUT_SECS: u64 = 8;

/// Body encoding for a request. At most one is sent.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
}

/// Per-request options for [`ApiClient::request`].
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub authorization: Option<String>,
    pub headers: header::HeaderMap,
    pub body: RequestBody,
    /// Overrides the client-wide timeout for this call only.
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn authorization(mut self, value: Option<String>) -> Self {
        self.authorization = value;
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn form<K: Into<String>, V: Into<String>>(
        mut self,
        fields: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        self.body = RequestBody::Form(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    pub fn header(mut self, name: header::HeaderName, value: header::HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A successful (2xx) response, fully read.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl ApiResponse {
    /// Parse the body as JSON. A body that doesn't match `T` is a malformed
    /// response, not a transport failure.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }
}

/// HTTP client for the ticketing service.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone, Debug)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a client for `base_url` with the given request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Create a client for `base_url` with the default 8 second timeout.
    pub fn with_base_url(base_url: &str) -> Result<Self, ApiError> {
        Self::new(base_url, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// URL for `segments` under the base URL. Each segment is percent-encoded,
    /// so a `/`, `?` or `#` inside one cannot change the resource.
    fn segment_url(&self, segments: &[&str]) -> Result<String, ApiError> {
        let invalid = || ApiError::InvalidUrl(self.base_url.clone());
        let mut url = Url::parse(&self.base_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(segments);
        Ok(url.to_string())
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Perform one request against `path` (relative to the base URL).
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse, ApiError> {
        self.send(method, self.url(path), options).await
    }

    async fn send(
        &self,
        method: Method,
        url: String,
        options: RequestOptions,
    ) -> Result<ApiResponse, ApiError> {
        let mut builder = self
            .client
            .request(method.clone(), &url)
            .headers(options.headers);

        if let Some(auth) = options.authorization {
            builder = builder.header(header::AUTHORIZATION, auth);
        }

        builder = match options.body {
            RequestBody::Empty => builder,
            RequestBody::Json(body) => builder.json(&body),
            RequestBody::Form(fields) => builder.form(&fields),
        };

        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }

        debug!(%method, url = %url, "Sending request");
        let response = builder.send().await?;
        let response = Self::check_response(response).await?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?.to_vec();
        debug!(status = %status, bytes = body.len(), "Response received");

        Ok(ApiResponse {
            status,
            content_type,
            body,
        })
    }

    pub async fn get(&self, path: &str, authorization: Option<String>) -> Result<ApiResponse, ApiError> {
        self.request(
            Method::GET,
            path,
            RequestOptions::new().authorization(authorization),
        )
        .await
    }

    /// GET a resource addressed by raw path segments, such as a server-assigned
    /// identifier that may contain reserved characters.
    pub async fn get_segments(
        &self,
        segments: &[&str],
        authorization: Option<String>,
    ) -> Result<ApiResponse, ApiError> {
        let url = self.segment_url(segments)?;
        self.send(
            Method::GET,
            url,
            RequestOptions::new().authorization(authorization),
        )
        .await
    }

    pub async fn post_json(
        &self,
        path: &str,
        authorization: Option<String>,
        body: serde_json::Value,
    ) -> Result<ApiResponse, ApiError> {
        self.request(
            Method::POST,
            path,
            RequestOptions::new().authorization(authorization).json(body),
        )
        .await
    }

    pub async fn post_form(
        &self,
        path: &str,
        fields: &[(&str, &str)],
    ) -> Result<ApiResponse, ApiError> {
        self.request(
            Method::POST,
            path,
            RequestOptions::new().form(fields.iter().copied()),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string, header as header_is, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_url_joining() {
        let api = ApiClient::with_base_url("http://127.0.0.1:8000/").unwrap();
        assert_eq!(api.base_url(), "http://127.0.0.1:8000");
        assert_eq!(api.url("/wallet"), "http://127.0.0.1:8000/wallet");
        assert_eq!(api.url("qr/t1"), "http://127.0.0.1:8000/qr/t1");
    }

    #[test]
    fn test_segment_url_encodes_reserved_characters() {
        let api = ApiClient::with_base_url("http://127.0.0.1:8000").unwrap();
        assert_eq!(
            api.segment_url(&["qr", "a/b?c#d"]).unwrap(),
            "http://127.0.0.1:8000/qr/a%2Fb%3Fc%23d"
        );

        let prefixed = ApiClient::with_base_url("http://127.0.0.1:8000/api/").unwrap();
        assert_eq!(
            prefixed.segment_url(&["qr", "t1"]).unwrap(),
            "http://127.0.0.1:8000/api/qr/t1"
        );

        let broken = ApiClient::with_base_url("not a url").unwrap();
        assert!(matches!(
            broken.segment_url(&["qr", "t1"]),
            Err(ApiError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_form_body_and_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(header_is("content-type", "application/x-www-form-urlencoded"))
            .and(body_string("username=alice&password=s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let api = ApiClient::with_base_url(&server.uri()).unwrap();
        let response = api
            .post_form("/token", &[("username", "alice"), ("password", "s3cret")])
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::OK);
        let body: serde_json::Value = response.json().unwrap();
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn test_authorization_header_sent_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wallet"))
            .and(header_is("authorization", "bearer abc.def"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let api = ApiClient::with_base_url(&server.uri()).unwrap();
        api.get("/wallet", Some("bearer abc.def".to_string()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_non_success_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate"))
            .respond_with(ResponseTemplate::new(422).set_body_string("bad ticket type"))
            .mount(&server)
            .await;

        let api = ApiClient::with_base_url(&server.uri()).unwrap();
        let err = api
            .post_json("/generate", None, json!({"ticket_type": "nope"}))
            .await
            .unwrap_err();

        match err {
            ApiError::Rejected { status, body } => {
                assert_eq!(status.as_u16(), 422);
                assert_eq!(body, "bad ticket type");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_transport_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wallet"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let api = ApiClient::new(&server.uri(), Duration::from_millis(100)).unwrap();
        let err = api.get("/wallet", None).await.unwrap_err();
        assert!(err.is_transport());
        match err {
            ApiError::Network(e) => assert!(e.is_timeout()),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_failure() {
        // Bind and drop a listener to get a port nothing is listening on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let api = ApiClient::with_base_url(&format!("http://{}", addr)).unwrap();
        let err = api.get("/wallet", None).await.unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_malformed_json_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wallet"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let api = ApiClient::with_base_url(&server.uri()).unwrap();
        let response = api.get("/wallet", None).await.unwrap();
        let err = response.json::<Vec<serde_json::Value>>().unwrap_err();
        assert!(matches!(err, ApiError::InvalidResponse(_)));
    }
}
