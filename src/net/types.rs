use bytes::Bytes;
use futures::stream::BoxStream;
use reqwest::Method;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("too many redirects (limit {0})")]
    TooManyRedirects(usize),

    #[error("response body exceeds {0} bytes")]
    TooLarge(u64),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl FetchError {
    /// Failures worth another attempt: the same request may succeed later.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout | FetchError::ConnectionFailed(_) => true,
            FetchError::HttpStatus(code) => *code >= 500,
            _ => false,
        }
    }

    /// Converts a reqwest error without its URL, since query strings can carry
    /// signed tokens.
    pub fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            FetchError::Timeout
        } else if error.is_redirect() {
            FetchError::TooManyRedirects(0)
        } else if error.is_builder() {
            FetchError::InvalidRequest(error.without_url().to_string())
        } else {
            FetchError::ConnectionFailed(error.without_url().to_string())
        }
    }
}

/// Everything needed to issue one HTTP request.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
}

impl RequestSpec {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: &serde_json::Value) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: Some(body.to_string().into_bytes()),
            timeout: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Like `header`, but replaces any earlier value of the same name.
    pub fn set_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Same request aimed at another URL, used when following redirects.
    pub fn redirected(&self, url: String) -> Self {
        let mut next = self.clone();
        next.url = url;
        if next.method != Method::GET && next.method != Method::HEAD {
            next.method = Method::GET;
            next.body = None;
        }
        next
    }

    /// Header list with credential values masked, for logging.
    pub fn masked_headers(&self) -> Vec<(String, String)> {
        self.headers
            .iter()
            .map(|(k, v)| {
                if k.eq_ignore_ascii_case("cookie") || k.eq_ignore_ascii_case("authorization") {
                    (k.clone(), "***".to_string())
                } else {
                    (k.clone(), v.clone())
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl FetchResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|v| v.as_str())
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    /// Absolute target of a redirect response, resolved against the request URL.
    pub fn location(&self) -> Option<String> {
        let raw = self.header("location")?;
        match url::Url::parse(&self.url).and_then(|base| base.join(raw)) {
            Ok(resolved) => Some(resolved.to_string()),
            Err(_) => Some(raw.to_string()),
        }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// A media body delivered in chunks.
pub struct MediaStream {
    pub content_length: Option<u64>,
    pub chunks: BoxStream<'static, Result<Bytes, FetchError>>,
}

impl std::fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStream")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(FetchError::Timeout.is_transient());
        assert!(FetchError::ConnectionFailed("reset".into()).is_transient());
        assert!(FetchError::HttpStatus(503).is_transient());
        assert!(!FetchError::HttpStatus(404).is_transient());
        assert!(!FetchError::TooLarge(10).is_transient());
        assert!(!FetchError::TooManyRedirects(5).is_transient());
    }

    #[test]
    fn test_masked_headers_hide_cookie() {
        let spec = RequestSpec::get("https://example.com")
            .header("Cookie", "sessionid=secret")
            .header("Referer", "https://example.com/");
        let masked = spec.masked_headers();
        assert_eq!(masked[0], ("Cookie".to_string(), "***".to_string()));
        assert_eq!(masked[1].1, "https://example.com/");
    }

    #[test]
    fn test_set_header_replaces() {
        let spec = RequestSpec::get("https://example.com")
            .header("Referer", "https://a.example/")
            .set_header("referer", "https://b.example/");
        assert_eq!(spec.headers, vec![("referer".to_string(), "https://b.example/".to_string())]);
    }

    #[test]
    fn test_location_resolves_relative() {
        let mut headers = HashMap::new();
        headers.insert("location".to_string(), "/video/123".to_string());
        let response = FetchResponse {
            status: 302,
            url: "https://www.example.com/s/abc".to_string(),
            headers,
            body: Bytes::new(),
        };
        assert!(response.is_redirect());
        assert_eq!(
            response.location().as_deref(),
            Some("https://www.example.com/video/123")
        );
    }

    #[test]
    fn test_redirected_post_becomes_get() {
        let spec = RequestSpec::post_json("https://a.example/x", &serde_json::json!({"a": 1}));
        let next = spec.redirected("https://b.example/y".to_string());
        assert_eq!(next.method, Method::GET);
        assert!(next.body.is_none());
        assert_eq!(next.url, "https://b.example/y");
    }
}
