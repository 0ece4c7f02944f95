use super::error::DownloadError;
use super::types::{DownloadResult, DownloadStatus, VideoInfo};
use crate::config::DownloadConfig;
use crate::net::{loggable, Fetch, FetchError, RequestSpec};
use crate::utils::{format_number, safe_filename, url_extension};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Why one URL could not be stored.
#[derive(Error, Debug)]
enum AttemptError {
    #[error("{0}")]
    Fetch(#[from] FetchError),

    #[error("file exceeds {0} bytes")]
    TooLarge(u64),

    #[error("{0}")]
    Storage(#[from] std::io::Error),

    #[error("cancelled")]
    Cancelled,
}

/// Child token that the parent cancels, or a timer does once `limit` passes.
pub(super) struct Deadline {
    token: CancellationToken,
    expired: Arc<AtomicBool>,
    timer: Option<JoinHandle<()>>,
}

impl Deadline {
    pub(super) fn new(parent: &CancellationToken, limit: Option<Duration>) -> Self {
        let token = parent.child_token();
        let expired = Arc::new(AtomicBool::new(false));
        let timer = limit.map(|limit| {
            let token = token.clone();
            let expired = expired.clone();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                warn!("Timed out after {:?}", limit);
                expired.store(true, Ordering::SeqCst);
                token.cancel();
            })
        });
        Self {
            token,
            expired,
            timer,
        }
    }

    pub(super) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(super) fn expired(&self) -> bool {
        self.expired.load(Ordering::SeqCst)
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        if let Some(timer) = &self.timer {
            timer.abort();
        }
    }
}

/// Streams resolved media to disk.
///
/// Files land under `<output_dir>/media/<platform>/` and
/// `<output_dir>/cover/<platform>/`, written to a `.part` sibling first and
/// renamed once complete.
pub struct DownloadOrchestrator {
    fetcher: Arc<dyn Fetch>,
    config: DownloadConfig,
}

impl DownloadOrchestrator {
    pub fn new(fetcher: Arc<dyn Fetch>, config: DownloadConfig) -> Self {
        Self { fetcher, config }
    }

    pub fn output_dir(&self) -> &Path {
        &self.config.output_dir
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.config.timeout()
    }

    /// Download the best media variant that works, then the cover. Never
    /// fails outright: the outcome is reported in the returned status.
    pub async fn download(&self, info: &VideoInfo, cancel: &CancellationToken) -> DownloadResult {
        let deadline = Deadline::new(cancel, self.timeout());
        self.download_within(info, deadline.token()).await
    }

    /// Same as [`download`](Self::download) without arming a timer of its
    /// own; `cancel` already carries the caller's deadline.
    pub(super) async fn download_within(
        &self,
        info: &VideoInfo,
        cancel: &CancellationToken,
    ) -> DownloadResult {
        let media_dir = self
            .config
            .output_dir
            .join("media")
            .join(info.platform.as_str());
        if let Err(e) = tokio::fs::create_dir_all(&media_dir).await {
            return DownloadResult::failed(DownloadError::StorageWriteFailed(e.to_string()));
        }
        let stem = media_stem(info);

        let mut errors = Vec::new();
        let mut stored = None;
        for variant in &info.media {
            let ext = url_extension(&variant.url).unwrap_or_else(|| "mp4".to_string());
            let dest = media_dir.join(format!("{}.{}", stem, ext));
            let request = self.media_request(&variant.url, info);

            match self
                .stream_to_file(&request, &dest, self.config.max_file_bytes(), cancel)
                .await
            {
                Ok(bytes) => {
                    stored = Some((dest, bytes));
                    break;
                }
                Err(AttemptError::Cancelled) => {
                    info!("Download of {}:{} cancelled", info.platform, info.video_id);
                    return DownloadResult::failed(DownloadError::Cancelled);
                }
                Err(AttemptError::Storage(e)) => {
                    return DownloadResult::failed(DownloadError::StorageWriteFailed(e.to_string()));
                }
                Err(e) => {
                    warn!("Media URL {} failed: {}", loggable(&variant.url), e);
                    errors.push(format!("{}: {}", loggable(&variant.url), e));
                }
            }
        }

        let Some((media_path, bytes)) = stored else {
            return DownloadResult::failed(DownloadError::AllMediaUrlsFailed(errors));
        };
        info!(
            "Stored {} bytes for {}:{} at {}",
            format_number(bytes),
            info.platform,
            info.video_id,
            media_path.display()
        );

        let (cover_path, status) = match &info.cover_url {
            None => (None, DownloadStatus::Success),
            Some(cover_url) => match self.download_cover(info, cover_url, cancel).await {
                Ok(path) => (Some(path), DownloadStatus::Success),
                Err(e) => {
                    warn!("Cover for {}:{} not stored: {}", info.platform, info.video_id, e);
                    (None, DownloadStatus::Partial)
                }
            },
        };

        DownloadResult {
            media_path: Some(media_path),
            bytes,
            cover_path,
            status,
        }
    }

    async fn download_cover(
        &self,
        info: &VideoInfo,
        cover_url: &str,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, AttemptError> {
        let cover_dir = self
            .config
            .output_dir
            .join("cover")
            .join(info.platform.as_str());
        tokio::fs::create_dir_all(&cover_dir).await?;

        let ext = url_extension(cover_url).unwrap_or_else(|| "jpg".to_string());
        let dest = cover_dir.join(format!("{}.{}", info.video_id, ext));
        let request = self.media_request(cover_url, info);
        self.stream_to_file(&request, &dest, None, cancel).await?;
        Ok(dest)
    }

    fn media_request(&self, url: &str, info: &VideoInfo) -> RequestSpec {
        let mut request = RequestSpec::get(url);
        if let Some(referer) = &info.referer {
            request = request.header("Referer", referer.as_str());
        }
        if let Some(agent) = &info.user_agent {
            request = request.header("User-Agent", agent.as_str());
        }
        request
    }

    /// Stream into `<dest>.part` and rename on success. The part file is
    /// removed on any failure.
    async fn stream_to_file(
        &self,
        request: &RequestSpec,
        dest: &Path,
        max_bytes: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<u64, AttemptError> {
        let part = part_path(dest);
        let written = match self.write_part(request, &part, max_bytes, cancel).await {
            Ok(written) => written,
            Err(e) => {
                remove_part(&part).await;
                return Err(e);
            }
        };
        if let Err(e) = tokio::fs::rename(&part, dest).await {
            remove_part(&part).await;
            return Err(e.into());
        }
        Ok(written)
    }

    async fn write_part(
        &self,
        request: &RequestSpec,
        part: &Path,
        max_bytes: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<u64, AttemptError> {
        let stream = tokio::select! {
            _ = cancel.cancelled() => return Err(AttemptError::Cancelled),
            stream = self.fetcher.stream(request) => stream?,
        };
        if let (Some(limit), Some(length)) = (max_bytes, stream.content_length) {
            if length > limit {
                return Err(AttemptError::TooLarge(limit));
            }
        }

        let mut file = tokio::fs::File::create(part).await?;
        let mut chunks = stream.chunks;
        let mut written = 0u64;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AttemptError::Cancelled),
                next = chunks.next() => next,
            };
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk?;
            written += chunk.len() as u64;
            if max_bytes.is_some_and(|limit| written > limit) {
                return Err(AttemptError::TooLarge(max_bytes.unwrap_or_default()));
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        debug!("Wrote {} bytes to {}", written, part.display());
        Ok(written)
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

async fn remove_part(part: &Path) {
    match tokio::fs::remove_file(part).await {
        Ok(()) => debug!("Removed partial file {}", part.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove partial file {}: {}", part.display(), e),
    }
}

/// `<title>-<id>`, or just the id when the title has nothing usable.
fn media_stem(info: &VideoInfo) -> String {
    let title = safe_filename(&info.title, &info.video_id);
    if title == info.video_id {
        title
    } else {
        format!("{}-{}", title, info.video_id)
    }
}
