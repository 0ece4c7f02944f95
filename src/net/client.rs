use super::fetch::Fetch;
use super::types::{FetchError, FetchResponse, MediaStream, RequestSpec};
use crate::config::HttpConfig;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, LOCATION, USER_AGENT};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// reqwest-backed fetcher with retries, a redirect cap and a body size limit.
pub struct HttpFetcher {
    client: reqwest::Client,
    config: HttpConfig,
    next_agent: AtomicUsize,
}

impl HttpFetcher {
    pub fn new(config: &HttpConfig) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .read_timeout(Duration::from_secs(config.timeout_secs));

        if let Some(proxy) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy.as_str()).map_err(|e| {
                FetchError::InvalidRequest(format!("invalid proxy: {}", e.without_url()))
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build().map_err(FetchError::from_reqwest)?;

        Ok(Self {
            client,
            config: config.clone(),
            next_agent: AtomicUsize::new(0),
        })
    }

    fn rotate_user_agent(&self) -> Option<&str> {
        if self.config.user_agents.is_empty() {
            return None;
        }
        let index = self.next_agent.fetch_add(1, Ordering::Relaxed) % self.config.user_agents.len();
        Some(self.config.user_agents[index].as_str())
    }

    fn build(
        &self,
        request: &RequestSpec,
        total_timeout: Option<Duration>,
    ) -> Result<reqwest::RequestBuilder, FetchError> {
        let url = reqwest::Url::parse(&request.url)
            .map_err(|e| FetchError::InvalidRequest(format!("{}: {}", e, loggable(&request.url))))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| FetchError::InvalidRequest(format!("bad header name {}", name)))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|_| FetchError::InvalidRequest(format!("bad value for header {}", name)))?;
            headers.append(header_name, header_value);
        }

        if !request.has_header("user-agent") {
            if let Some(agent) = self.rotate_user_agent() {
                if let Ok(value) = HeaderValue::from_str(agent) {
                    headers.insert(USER_AGENT, value);
                }
            }
        }

        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .headers(headers);
        if let Some(timeout) = total_timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        Ok(builder)
    }

    /// Send with retries for idempotent methods. 5xx responses count as
    /// transient failures; anything else is handed back to the caller.
    async fn send(
        &self,
        request: &RequestSpec,
        total_timeout: Option<Duration>,
    ) -> Result<reqwest::Response, FetchError> {
        let attempts = if request.method.is_idempotent() {
            self.config.max_attempts.max(1)
        } else {
            1
        };
        let mut attempt = 1;

        loop {
            let result = match self.build(request, total_timeout)?.send().await {
                Ok(response) if response.status().is_server_error() => {
                    Err(FetchError::HttpStatus(response.status().as_u16()))
                }
                Ok(response) => Ok(response),
                Err(e) => Err(FetchError::from_reqwest(e)),
            };

            match result {
                Err(e) if e.is_transient() && attempt < attempts => {
                    let delay =
                        backoff_delay(self.config.backoff_base_ms, self.config.backoff_max_ms, attempt);
                    warn!(
                        "Attempt {}/{} for {} failed: {}, retrying in {:?}",
                        attempt,
                        attempts,
                        loggable(&request.url),
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, request: &RequestSpec) -> Result<FetchResponse, FetchError> {
        debug!(
            "{} {} headers={:?}",
            request.method,
            loggable(&request.url),
            request.masked_headers()
        );

        let timeout = request
            .timeout
            .unwrap_or(Duration::from_secs(self.config.timeout_secs));
        let response = self.send(request, Some(timeout)).await?;

        let status = response.status().as_u16();
        if status >= 400 {
            return Err(FetchError::HttpStatus(status));
        }

        let url = response.url().to_string();
        let headers = collect_headers(response.headers());
        let body = read_limited(response, self.config.max_body_bytes).await?;

        Ok(FetchResponse {
            status,
            url,
            headers,
            body,
        })
    }

    async fn stream(&self, request: &RequestSpec) -> Result<MediaStream, FetchError> {
        let max_hops = self.config.max_redirects;
        let mut current = request.clone();
        let mut hops = 0;

        loop {
            debug!("Opening stream {}", loggable(&current.url));
            let response = self.send(&current, request.timeout).await?;
            let status = response.status();

            if status.is_redirection() {
                let next = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|location| response.url().join(location).ok());

                if let Some(next) = next {
                    hops += 1;
                    if hops > max_hops {
                        return Err(FetchError::TooManyRedirects(max_hops));
                    }
                    current = current.redirected(next.to_string());
                    continue;
                }
            }

            if !status.is_success() {
                return Err(FetchError::HttpStatus(status.as_u16()));
            }

            let content_length = response.content_length();
            let chunks = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(FetchError::from_reqwest))
                .boxed();

            return Ok(MediaStream {
                content_length,
                chunks,
            });
        }
    }

    fn max_redirects(&self) -> usize {
        self.config.max_redirects
    }
}

fn collect_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}

async fn read_limited(response: reqwest::Response, limit: u64) -> Result<Bytes, FetchError> {
    if let Some(length) = response.content_length() {
        if length > limit {
            return Err(FetchError::TooLarge(limit));
        }
    }

    let mut body = BytesMut::new();
    let mut chunks = response.bytes_stream();
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(FetchError::from_reqwest)?;
        if (body.len() + chunk.len()) as u64 > limit {
            return Err(FetchError::TooLarge(limit));
        }
        body.extend_from_slice(&chunk);
    }

    Ok(body.freeze())
}

/// Exponential backoff with up to half the base delay of random jitter.
pub(crate) fn backoff_delay(base_ms: u64, max_ms: u64, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(16);
    let delay = base_ms.saturating_mul(1u64 << shift).min(max_ms);
    let jitter = if base_ms >= 2 {
        rand::thread_rng().gen_range(0..=base_ms / 2)
    } else {
        0
    };
    Duration::from_millis(delay + jitter)
}

/// Scheme, host and path only: query strings may carry signatures or tokens.
pub(crate) fn loggable(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(parsed) => format!(
            "{}://{}{}",
            parsed.scheme(),
            parsed.host_str().unwrap_or_default(),
            parsed.path()
        ),
        Err(_) => "<invalid url>".to_string(),
    }
}
