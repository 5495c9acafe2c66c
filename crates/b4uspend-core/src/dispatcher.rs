//! Request dispatcher: one outbound call, no retries, no caching.

use crate::error::ApiError;
use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a request participates in the bearer/renewal protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Bearer,
    /// Auth endpoints: sent without a token, never renewed.
    Public,
}

/// A call relative to the API prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub auth: AuthMode,
}

impl ApiRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            auth: AuthMode::Bearer,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Patch, path)
    }

    /// Attach a JSON body.
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn public(mut self) -> Self {
        self.auth = AuthMode::Public;
        self
    }

    /// `METHOD /path` for logs.
    pub fn describe(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

/// Innermost transport primitive.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Issue one call. A supplied token becomes `Authorization: Bearer <token>`.
    /// Empty bodies decode as `Value::Null`.
    async fn send(&self, request: &ApiRequest, access_token: Option<&str>) -> Result<Value, ApiError>;
}

/// Connection settings for [`HttpDispatcher`].
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub base_url: String,
    pub prefix: String,
    pub timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            prefix: "/api/v1".to_string(),
            timeout: Duration::from_secs(15),
        }
    }
}

/// reqwest-backed dispatcher for the JSON REST backend.
#[derive(Clone)]
pub struct HttpDispatcher {
    client: reqwest::Client,
    root: String,
}

impl HttpDispatcher {
    pub fn new(config: &DispatcherConfig) -> Result<Self, ApiError> {
        if config.base_url.trim().is_empty() {
            return Err(ApiError::Config("api base url must not be empty".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ApiError::Config(e.to_string()))?;

        let prefix = config.prefix.trim_matches('/');
        let base = config.base_url.trim_end_matches('/');
        let root = if prefix.is_empty() {
            base.to_string()
        } else {
            format!("{}/{}", base, prefix)
        };
        Ok(Self { client, root })
    }

    /// Absolute URL for an API path.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.root, path.trim_start_matches('/'))
    }

    async fn parse_response(&self, response: reqwest::Response) -> Result<Value, ApiError> {
        let status = response.status();
        let bytes = response.bytes().await?;
        if status.is_success() {
            if bytes.iter().all(u8::is_ascii_whitespace) {
                return Ok(Value::Null);
            }
            return Ok(serde_json::from_slice(&bytes)?);
        }

        let text = String::from_utf8_lossy(&bytes);
        Err(ApiError::status(status.as_u16(), extract_detail(&text)))
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn send(&self, request: &ApiRequest, access_token: Option<&str>) -> Result<Value, ApiError> {
        let url = self.url(&request.path);
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, &url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = access_token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| ApiError::Config(format!("invalid access token: {}", e)))?;
            builder = builder.header(AUTHORIZATION, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        trace!(target: "b4uspend::http", "-> {}", request.describe());
        let response = builder.send().await?;
        let result = self.parse_response(response).await;
        match &result {
            Ok(_) => trace!(target: "b4uspend::http", "<- {} ok", request.describe()),
            Err(e) => debug!(target: "b4uspend::http", "<- {} failed: {}", request.describe(), e),
        }
        result
    }
}

/// Pull the human-readable detail out of an error body.
///
/// Understands `{"detail": "..."}` and validation lists of the form
/// `{"detail": [{"msg": "..."}, ...]}` (joined with `; `).
pub fn extract_detail(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let messages: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(Value::as_str))
                .collect();
            if messages.is_empty() {
                None
            } else {
                Some(messages.join("; "))
            }
        }
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_prefix() {
        let dispatcher = HttpDispatcher::new(&DispatcherConfig {
            base_url: "http://api.test/".to_string(),
            prefix: "/api/v1/".to_string(),
            timeout: Duration::from_secs(1),
        })
        .unwrap();
        assert_eq!(dispatcher.url("/users/me"), "http://api.test/api/v1/users/me");
        assert_eq!(dispatcher.url("dashboard"), "http://api.test/api/v1/dashboard");
    }

    #[test]
    fn test_url_without_prefix() {
        let dispatcher = HttpDispatcher::new(&DispatcherConfig {
            base_url: "http://api.test".to_string(),
            prefix: String::new(),
            timeout: Duration::from_secs(1),
        })
        .unwrap();
        assert_eq!(dispatcher.url("/chat/send"), "http://api.test/chat/send");
    }

    #[test]
    fn test_empty_base_url_rejected() {
        let config = DispatcherConfig {
            base_url: "  ".to_string(),
            ..Default::default()
        };
        assert!(matches!(HttpDispatcher::new(&config), Err(ApiError::Config(_))));
    }

    #[test]
    fn test_extract_detail_string() {
        assert_eq!(
            extract_detail(r#"{"detail":"Invalid or expired token"}"#).as_deref(),
            Some("Invalid or expired token")
        );
    }

    #[test]
    fn test_extract_detail_validation_list() {
        let body = r#"{"detail":[{"loc":["body","amount"],"msg":"must be > 0"},{"msg":"category required"}]}"#;
        assert_eq!(
            extract_detail(body).as_deref(),
            Some("must be > 0; category required")
        );
    }

    #[test]
    fn test_extract_detail_absent() {
        assert_eq!(extract_detail("<html>bad gateway</html>"), None);
        assert_eq!(extract_detail(r#"{"error":"x"}"#), None);
    }

    #[test]
    fn test_request_builders() {
        let req = ApiRequest::get("/expenses").query("month", 3).query("year", 2025);
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.query, vec![("month".into(), "3".into()), ("year".into(), "2025".into())]);
        assert_eq!(req.auth, AuthMode::Bearer);
        assert_eq!(req.describe(), "GET /expenses");

        let req = ApiRequest::post("/auth/login")
            .json(&serde_json::json!({"phone": "9999999999"}))
            .unwrap()
            .public();
        assert_eq!(req.auth, AuthMode::Public);
        assert!(req.body.is_some());
    }
}
