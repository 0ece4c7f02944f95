use super::error::{DownloadError, ResolveError};
use crate::config::RankPolicyName;
use crate::sign::Clock;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformId {
    Douyin,
    Kuaishou,
    Bilibili,
    Xiaohongshu,
    Haokan,
    Weishi,
    Pear,
    Pipigaoxiao,
}

impl PlatformId {
    /// Every platform, in detection priority order.
    pub const ALL: [PlatformId; 8] = [
        PlatformId::Douyin,
        PlatformId::Kuaishou,
        PlatformId::Bilibili,
        PlatformId::Xiaohongshu,
        PlatformId::Haokan,
        PlatformId::Weishi,
        PlatformId::Pear,
        PlatformId::Pipigaoxiao,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformId::Douyin => "douyin",
            PlatformId::Kuaishou => "kuaishou",
            PlatformId::Bilibili => "bilibili",
            PlatformId::Xiaohongshu => "xiaohongshu",
            PlatformId::Haokan => "haokan",
            PlatformId::Weishi => "weishi",
            PlatformId::Pear => "pear",
            PlatformId::Pipigaoxiao => "pipigaoxiao",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            PlatformId::Douyin => "抖音",
            PlatformId::Kuaishou => "快手",
            PlatformId::Bilibili => "哔哩哔哩",
            PlatformId::Xiaohongshu => "小红书",
            PlatformId::Haokan => "好看视频",
            PlatformId::Weishi => "微视",
            PlatformId::Pear => "梨视频",
            PlatformId::Pipigaoxiao => "皮皮搞笑",
        }
    }
}

impl fmt::Display for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown platform: {0}")]
pub struct UnknownPlatform(pub String);

impl FromStr for PlatformId {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        PlatformId::ALL
            .into_iter()
            .find(|p| p.as_str() == name)
            .ok_or(UnknownPlatform(s.to_string()))
    }
}

/// One playable rendition of a video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaVariant {
    pub url: String,
    pub watermark_free: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl MediaVariant {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            watermark_free: false,
            bitrate: None,
            height: None,
            label: None,
        }
    }

    pub fn watermark_free(mut self, value: bool) -> Self {
        self.watermark_free = value;
        self
    }

    pub fn bitrate(mut self, bitrate: Option<u64>) -> Self {
        self.bitrate = bitrate;
        self
    }

    pub fn height(mut self, height: Option<u32>) -> Self {
        self.height = height;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Normalized result of resolving one video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoInfo {
    pub video_id: String,
    pub platform: PlatformId,
    pub title: String,
    pub author: String,
    pub cover_url: Option<String>,
    /// Ranked, best first. Never empty.
    pub media: Vec<MediaVariant>,
    pub duration_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(skip)]
    pub referer: Option<String>,
    #[serde(skip)]
    pub user_agent: Option<String>,
    pub fingerprint: String,
}

impl VideoInfo {
    pub fn primary_url(&self) -> Option<&str> {
        self.media.first().map(|m| m.url.as_str())
    }
}

/// Resolver output before defaults are applied. Parsers fill what the
/// response offers and leave the rest unset.
#[derive(Debug, Clone, Default)]
pub struct VideoDraft {
    pub title: Option<String>,
    pub author: Option<String>,
    pub cover_url: Option<String>,
    pub media: Vec<MediaVariant>,
    pub duration_secs: Option<u64>,
    pub audio_url: Option<String>,
    pub referer: Option<String>,
}

impl VideoDraft {
    pub fn push_media(&mut self, variant: MediaVariant) {
        if !variant.url.is_empty() && !self.media.iter().any(|m| m.url == variant.url) {
            self.media.push(variant);
        }
    }

    pub fn finish(
        self,
        platform: PlatformId,
        video_id: &str,
        fingerprint: String,
    ) -> Result<VideoInfo, ResolveError> {
        if self.media.is_empty() {
            return Err(ResolveError::parse(platform, "no playable media in response"));
        }

        Ok(VideoInfo {
            video_id: video_id.to_string(),
            platform,
            title: non_empty(self.title).unwrap_or_default(),
            author: non_empty(self.author).unwrap_or_else(|| "unknown".to_string()),
            cover_url: non_empty(self.cover_url),
            media: self.media,
            duration_secs: self.duration_secs,
            audio_url: non_empty(self.audio_url),
            referer: self.referer,
            user_agent: None,
            fingerprint,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

type Comparator = dyn Fn(&MediaVariant, &MediaVariant) -> Ordering + Send + Sync;

/// Preference order among media variants.
#[derive(Clone, Default)]
pub enum RankPolicy {
    #[default]
    WatermarkFreeFirst,
    HighestQualityFirst,
    Custom(Arc<Comparator>),
}

impl fmt::Debug for RankPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RankPolicy::WatermarkFreeFirst => f.write_str("WatermarkFreeFirst"),
            RankPolicy::HighestQualityFirst => f.write_str("HighestQualityFirst"),
            RankPolicy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl From<RankPolicyName> for RankPolicy {
    fn from(name: RankPolicyName) -> Self {
        match name {
            RankPolicyName::WatermarkFreeFirst => RankPolicy::WatermarkFreeFirst,
            RankPolicyName::HighestQualityFirst => RankPolicy::HighestQualityFirst,
        }
    }
}

impl RankPolicy {
    pub fn custom<F>(compare: F) -> Self
    where
        F: Fn(&MediaVariant, &MediaVariant) -> Ordering + Send + Sync + 'static,
    {
        RankPolicy::Custom(Arc::new(compare))
    }

    /// Stable sort, best variant first.
    pub fn rank(&self, media: &mut [MediaVariant]) {
        match self {
            RankPolicy::WatermarkFreeFirst => media.sort_by(|a, b| {
                b.watermark_free
                    .cmp(&a.watermark_free)
                    .then_with(|| quality(b).cmp(&quality(a)))
            }),
            RankPolicy::HighestQualityFirst => media.sort_by(|a, b| {
                quality(b)
                    .cmp(&quality(a))
                    .then_with(|| b.watermark_free.cmp(&a.watermark_free))
            }),
            RankPolicy::Custom(compare) => media.sort_by(|a, b| compare(a, b)),
        }
    }
}

fn quality(variant: &MediaVariant) -> (u64, u32) {
    (variant.bitrate.unwrap_or(0), variant.height.unwrap_or(0))
}

/// One incoming resolution call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionRequest {
    pub text: String,
    pub platform: Option<PlatformId>,
    pub requested_at_ms: u64,
}

impl ResolutionRequest {
    pub fn new(text: impl Into<String>, platform: Option<PlatformId>, clock: Clock) -> Self {
        Self {
            text: text.into(),
            platform,
            requested_at_ms: clock.now_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub platform: PlatformId,
    pub video_id: String,
}

impl CacheKey {
    pub fn new(platform: PlatformId, video_id: impl Into<String>) -> Self {
        Self {
            platform,
            video_id: video_id.into(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.platform, self.video_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadStatus {
    Success,
    /// Media stored, cover missing.
    Partial,
    Failed(DownloadError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResult {
    pub media_path: Option<PathBuf>,
    pub bytes: u64,
    pub cover_path: Option<PathBuf>,
    pub status: DownloadStatus,
}

impl DownloadResult {
    pub fn failed(error: DownloadError) -> Self {
        Self {
            media_path: None,
            bytes: 0,
            cover_path: None,
            status: DownloadStatus::Failed(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == DownloadStatus::Success
    }
}
