//! GitHub API client implementation.

use crate::auth::{CredentialResolver, TokenIssuer};
use crate::config::RuntimeConfig;
use crate::errors::{ErrorKind, RuntimeError, RuntimeResult};
use crate::resilience::{classify_status, BackoffPolicy, RetryDecision, RetryExecutor, StatusClass};
use crate::services::{CollaboratorsService, ContentsService};
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Media type sent in the `Accept` header of every request.
pub const PREVIEW_ACCEPT: &str = "application/vnd.github.machine-man-preview+json";

/// A single API request.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    headers: HeaderMap,
    body: Option<serde_json::Value>,
    token: Option<SecretString>,
}

impl ApiRequest {
    /// Starts building a request.
    pub fn builder(method: Method, path: impl Into<String>) -> ApiRequestBuilder {
        ApiRequestBuilder::new(method, path)
    }

    /// A GET request with default headers and no token.
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
            token: None,
        }
    }

    /// Returns the request with the given token attached (or removed).
    pub fn with_token(mut self, token: Option<&SecretString>) -> Self {
        self.token = token.cloned();
        self
    }

    /// HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path relative to the base URL.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Caller-supplied headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// JSON body, if any.
    pub fn body(&self) -> Option<&serde_json::Value> {
        self.body.as_ref()
    }

    /// Whether the request carries a token.
    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// GET and HEAD requests never carry a body.
    fn includes_body(&self) -> bool {
        !(self.method == Method::GET || self.method == Method::HEAD)
    }
}

/// Builder for [`ApiRequest`].
#[derive(Debug)]
pub struct ApiRequestBuilder {
    method: Method,
    path: String,
    headers: Vec<(String, String)>,
    body: Option<serde_json::Value>,
    token: Option<SecretString>,
}

impl ApiRequestBuilder {
    /// Creates a new builder.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
            token: None,
        }
    }

    /// Adds a header; overrides the client defaults of the same name.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the JSON body. Ignored for GET and HEAD.
    pub fn body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Sets the access token.
    pub fn token(mut self, token: SecretString) -> Self {
        self.token = Some(token);
        self
    }

    /// Validates headers and builds the request.
    pub fn build(self) -> RuntimeResult<ApiRequest> {
        if self.path.trim_matches('/').is_empty() {
            return Err(RuntimeError::new(
                ErrorKind::InvalidParameter,
                "Request path cannot be empty",
            ));
        }

        let mut headers = HeaderMap::new();
        for (name, value) in self.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                RuntimeError::new(
                    ErrorKind::InvalidParameter,
                    format!("Invalid header name {:?}: {}", name, e),
                )
            })?;
            let header_value = HeaderValue::from_str(&value).map_err(|e| {
                RuntimeError::new(
                    ErrorKind::InvalidParameter,
                    format!("Invalid value for header {:?}: {}", name, e),
                )
            })?;
            headers.insert(header_name, header_value);
        }

        Ok(ApiRequest {
            method: self.method,
            path: self.path,
            headers,
            body: self.body,
            token: self.token,
        })
    }
}

/// A buffered API response.
///
/// Non-2xx statuses outside the retryable class are returned as responses,
/// not errors; check [`ApiResponse::is_success`].
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: StatusCode,
    url: String,
    headers: HeaderMap,
    body: Bytes,
}

impl ApiResponse {
    /// HTTP status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Final URL of the request.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Raw body.
    pub fn bytes(&self) -> &Bytes {
        &self.body
    }

    /// Body as text, with invalid UTF-8 replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Deserializes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> RuntimeResult<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            RuntimeError::deserialization(format!("Failed to deserialize response: {}", e))
                .with_status(self.status.as_u16())
                .with_url(self.url.clone())
                .with_cause(e)
        })
    }
}

/// GitHub API client with retry and installation-token fallback.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    user_agent: String,
    retry: RetryExecutor,
    credentials: CredentialResolver,
}

impl ApiClient {
    /// Creates a client from configuration.
    pub fn new(config: &RuntimeConfig) -> RuntimeResult<Self> {
        ApiClientBuilder::new(config).build()
    }

    /// Creates a client builder.
    pub fn builder(config: &RuntimeConfig) -> ApiClientBuilder<'_> {
        ApiClientBuilder::new(config)
    }

    /// Gets the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Gets the credential resolver.
    pub fn credentials(&self) -> &CredentialResolver {
        &self.credentials
    }

    /// Gets the contents service.
    pub fn contents(&self) -> ContentsService<'_> {
        ContentsService::new(self)
    }

    /// Gets the collaborators service.
    pub fn collaborators(&self) -> CollaboratorsService<'_> {
        CollaboratorsService::new(self)
    }

    /// Makes a GET request.
    pub async fn get(&self, token: Option<&SecretString>, path: &str) -> RuntimeResult<ApiResponse> {
        self.call(&ApiRequest::get(path).with_token(token)).await
    }

    /// Sends a request, retrying 401 and 5xx responses and transport failures.
    ///
    /// Any other non-2xx response is returned to the caller untouched.
    pub async fn call(&self, request: &ApiRequest) -> RuntimeResult<ApiResponse> {
        let url = self.build_url(request.path());
        let headers = self.headers_for(request)?;

        let body = if request.includes_body() {
            request
                .body()
                .map(serde_json::to_vec)
                .transpose()
                .map_err(|e| {
                    RuntimeError::new(
                        ErrorKind::InvalidParameter,
                        format!("Failed to serialize request body: {}", e),
                    )
                })?
        } else {
            None
        };

        let (method, url, headers, body) = (request.method(), url.as_str(), &headers, body.as_deref());
        self.retry
            .execute(move |attempt| self.send_once(attempt, method, url, headers, body))
            .await
    }

    async fn send_once(
        &self,
        attempt: u32,
        method: &Method,
        url: &str,
        headers: &HeaderMap,
        body: Option<&[u8]>,
    ) -> RetryDecision<ApiResponse> {
        tracing::debug!(attempt, method = %method, url, "Sending GitHub API request");

        let mut request = self.http.request(method.clone(), url).headers(headers.clone());
        if let Some(bytes) = body {
            request = request.body(bytes.to_vec());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return RetryDecision::Retry(RuntimeError::from_transport(e, url)),
        };

        let status = response.status();
        let final_url = response.url().to_string();
        let response_headers = response.headers().clone();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => return RetryDecision::Retry(RuntimeError::from_transport(e, &final_url)),
        };

        match classify_status(status) {
            StatusClass::Retryable => {
                RetryDecision::Retry(RuntimeError::retryable_status(status.as_u16(), final_url))
            }
            StatusClass::Success | StatusClass::Terminal => RetryDecision::Accept(ApiResponse {
                status,
                url: final_url,
                headers: response_headers,
                body,
            }),
        }
    }

    fn build_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Defaults first, then caller headers, then the token.
    fn headers_for(&self, request: &ApiRequest) -> RuntimeResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(PREVIEW_ACCEPT));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&self.user_agent)
                .map_err(|_| RuntimeError::configuration("User-Agent contains invalid characters"))?,
        );

        for (name, value) in request.headers() {
            headers.insert(name.clone(), value.clone());
        }

        if let Some(ref token) = request.token {
            let mut value = HeaderValue::from_str(&format!("token {}", token.expose_secret()))
                .map_err(|_| {
                    RuntimeError::new(ErrorKind::InvalidParameter, "Token contains invalid characters")
                })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        Ok(headers)
    }
}

/// Builder for ApiClient.
pub struct ApiClientBuilder<'a> {
    config: &'a RuntimeConfig,
    backoff: Option<Arc<dyn BackoffPolicy>>,
    issuer: Option<Arc<dyn TokenIssuer>>,
}

impl<'a> ApiClientBuilder<'a> {
    /// Creates a new builder.
    pub fn new(config: &'a RuntimeConfig) -> Self {
        Self {
            config,
            backoff: None,
            issuer: None,
        }
    }

    /// Replaces the backoff policy between retries.
    pub fn backoff(mut self, backoff: Arc<dyn BackoffPolicy>) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Replaces the installation token issuer.
    pub fn token_issuer(mut self, issuer: Arc<dyn TokenIssuer>) -> Self {
        self.issuer = Some(issuer);
        self
    }

    /// Builds the client.
    pub fn build(self) -> RuntimeResult<ApiClient> {
        let config = self.config;
        config.validate()?;

        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| {
                RuntimeError::configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        let retry = match self.backoff {
            Some(backoff) => RetryExecutor::new(config.retry.max_retries, backoff),
            None => RetryExecutor::from_config(&config.retry),
        };

        let credentials = match self.issuer {
            Some(issuer) => CredentialResolver::new(config.installation_id, issuer),
            None => CredentialResolver::from_config(config)?,
        };

        Ok(ApiClient {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            user_agent: config.user_agent.clone(),
            retry,
            credentials,
        })
    }
}
