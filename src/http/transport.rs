//! Transport seam
//!
//! The login flow and the API client only ever talk to [`HttpTransport`].
//! The default implementation is reqwest-backed; tests substitute an
//! in-memory fake.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => f.write_str("GET"),
            Method::Post => f.write_str("POST"),
        }
    }
}

/// Outbound request. Header values are already resolved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub form: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn query(mut self, params: Vec<(String, String)>) -> Self {
        self.query = params;
        self
    }

    pub fn form(mut self, params: Vec<(String, String)>) -> Self {
        self.form = params;
        self
    }

    pub fn headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    /// Add or replace a header (case-insensitive)
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// URL with the query string appended
    pub fn full_url(&self) -> Result<String, TransportError> {
        if self.query.is_empty() {
            return Ok(self.url.clone());
        }
        let encoded = serde_urlencoded::to_string(&self.query)
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        let sep = if self.url.contains('?') { '&' } else { '?' };
        Ok(format!("{}{}{}", self.url, sep, encoded))
    }
}

/// Response in the shape every caller consumes
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub url: String,
    pub method: Method,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Every `Set-Cookie` header value
    pub fn set_cookies(&self) -> impl Iterator<Item = &str> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case("set-cookie"))
            .map(|(_, v)| v.as_str())
    }

    /// Body as JSON, tolerating the `for (;;);` anti-hijacking prefix
    pub fn json(&self) -> Result<Value, serde_json::Error> {
        let body = self.body.trim_start();
        let body = body.strip_prefix("for (;;);").unwrap_or(body);
        serde_json::from_str(body)
    }
}

/// HTTP transport collaborator
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;

    /// URL-encoded form POST
    async fn post(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;

    /// Multipart form POST
    async fn post_form_data(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_url_encodes_query() {
        let request = HttpRequest::new("https://www.facebook.com/ajax/x")
            .query(vec![("q".into(), "a b&c".into()), ("n".into(), "1".into())]);
        assert_eq!(
            request.full_url().unwrap(),
            "https://www.facebook.com/ajax/x?q=a+b%26c&n=1"
        );
    }

    #[test]
    fn test_header_replaces_case_insensitively() {
        let request = HttpRequest::new("u")
            .header("User-Agent", "a")
            .header("user-agent", "b");
        assert_eq!(request.headers.len(), 1);
        assert_eq!(request.header_value("USER-AGENT"), Some("b"));
    }

    #[test]
    fn test_json_strips_guard_prefix() {
        let response = HttpResponse {
            status_code: 200,
            headers: vec![("Set-Cookie".into(), "a=1".into())],
            body: r#"for (;;);{"payload":{"token":"t"}}"#.into(),
            url: "u".into(),
            method: Method::Get,
        };
        assert_eq!(response.json().unwrap()["payload"]["token"], "t");
        assert_eq!(response.set_cookies().collect::<Vec<_>>(), vec!["a=1"]);
    }
}
