mod cache;
mod downloader;
mod error;
mod platforms;
mod registry;
mod resolver;
mod types;

pub use cache::CacheStore;
pub use downloader::DownloadOrchestrator;

use downloader::Deadline;
pub use error::{DownloadError, ResolveError};
pub use registry::ResolverRegistry;
pub use resolver::ResolverContext;
pub use types::{
    DownloadResult, DownloadStatus, MediaVariant, PlatformId, RankPolicy, ResolutionRequest,
    VideoInfo,
};

use crate::config::Config;
use crate::detect::{DetectError, PlatformDetector};
use crate::net::{Fetch, HttpFetcher};
use crate::sign::Clock;
use anyhow::{Context, Result};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error(transparent)]
    Detect(#[from] DetectError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("cancelled before the video was resolved")]
    Cancelled,

    #[error("timed out before the video was resolved")]
    TimedOut,
}

/// Share text in, resolved video (and optionally stored files) out.
pub struct VideoPipeline {
    detector: PlatformDetector,
    registry: ResolverRegistry,
    downloader: DownloadOrchestrator,
}

impl VideoPipeline {
    pub fn new(
        detector: PlatformDetector,
        registry: ResolverRegistry,
        downloader: DownloadOrchestrator,
    ) -> Self {
        Self {
            detector,
            registry,
            downloader,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let fetcher = HttpFetcher::new(&config.http).context("Failed to build HTTP client")?;
        info!(
            "Video pipeline initialized - cache ttl {:?}, output dir {}",
            config.cache.ttl(),
            config.download.output_dir.display()
        );
        Ok(Self::with_fetcher(config, Arc::new(fetcher), Clock::System))
    }

    /// Wire every component around one shared fetcher.
    pub fn with_fetcher(config: &Config, fetcher: Arc<dyn Fetch>, clock: Clock) -> Self {
        let cache = Arc::new(CacheStore::new(config.cache.ttl()));
        let ctx = ResolverContext::new(fetcher.clone(), config.signing.clone()).with_clock(clock);
        Self::new(
            PlatformDetector::from_config(config),
            ResolverRegistry::new(config, ctx, cache),
            DownloadOrchestrator::new(fetcher, config.download.clone()),
        )
    }

    pub async fn parse(&self, request: &ResolutionRequest) -> Result<VideoInfo, PipelineError> {
        let detection = match request.platform {
            Some(platform) => self.detector.detect_as(&request.text, platform)?,
            None => self.detector.detect(&request.text)?,
        };
        Ok(self
            .registry
            .dispatch(detection.platform, &detection.url)
            .await?)
    }

    /// Resolve, then download, both abandoned as soon as `cancel` fires or
    /// the `[download] timeout_secs` budget runs out.
    pub async fn fetch(
        &self,
        request: &ResolutionRequest,
        cancel: &CancellationToken,
    ) -> Result<(VideoInfo, DownloadResult), PipelineError> {
        let deadline = Deadline::new(cancel, self.downloader.timeout());
        let token = deadline.token();
        let info = tokio::select! {
            biased;
            _ = token.cancelled() => {
                return Err(if deadline.expired() {
                    PipelineError::TimedOut
                } else {
                    PipelineError::Cancelled
                });
            }
            info = self.parse(request) => info?,
        };
        let result = self.downloader.download_within(&info, token).await;
        Ok((info, result))
    }
}
