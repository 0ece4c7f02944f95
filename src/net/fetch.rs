use super::types::{FetchError, FetchResponse, MediaStream, RequestSpec};
use async_trait::async_trait;
use tracing::debug;

#[async_trait]
pub trait Fetch: Send + Sync {
    /// Issue a single request. Redirect responses are returned as-is; 4xx/5xx
    /// statuses surface as `FetchError::HttpStatus` once retries are exhausted.
    async fn fetch(&self, request: &RequestSpec) -> Result<FetchResponse, FetchError>;

    /// Open a chunked body for large media, following redirects.
    async fn stream(&self, request: &RequestSpec) -> Result<MediaStream, FetchError>;

    /// Redirect cap used when the caller does not pass one.
    fn max_redirects(&self) -> usize {
        5
    }

    async fn fetch_following_redirects(
        &self,
        request: &RequestSpec,
        max_hops: usize,
    ) -> Result<FetchResponse, FetchError> {
        let mut current = request.clone();
        let mut hops = 0;

        loop {
            let response = self.fetch(&current).await?;
            if !response.is_redirect() {
                return Ok(response);
            }

            let Some(next) = response.location() else {
                return Ok(response);
            };

            hops += 1;
            if hops > max_hops {
                return Err(FetchError::TooManyRedirects(max_hops));
            }

            debug!("Redirect {} -> {}", current.url, next);
            current = current.redirected(next);
        }
    }

    /// Expand a short link by one hop. Returns the original URL when the server
    /// answers directly instead of redirecting.
    async fn expand_url(&self, request: &RequestSpec) -> Result<String, FetchError> {
        let response = self.fetch(request).await?;
        if response.is_redirect() {
            if let Some(location) = response.location() {
                return Ok(location);
            }
        }
        Ok(response.url)
    }
}
