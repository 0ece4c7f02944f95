use crate::config::PlatformOverride;
use crate::media::error::ResolveError;
use crate::media::resolver::{
    Canonical, MOBILE_UA, PlatformProfile, Resolver, ResolverContext, embedded_json, id_from_url,
    null_as_default,
};
use crate::media::types::{MediaVariant, PlatformId, VideoDraft, VideoInfo};
use crate::sign::fingerprint;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

static VID_QUERY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[?&]vid=(\d+)").unwrap());

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PreloadedState {
    cur_video_meta: Option<VideoMeta>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct VideoMeta {
    title: Option<String>,
    poster: Option<String>,
    duration: Option<f64>,
    #[serde(deserialize_with = "null_as_default")]
    clarity_url: Vec<Clarity>,
    playurl: Option<String>,
    mth: Option<Author>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Clarity {
    url: Option<String>,
    title: Option<String>,
    /// Bits per second.
    video_bps: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Author {
    author_name: Option<String>,
}

pub struct HaokanResolver {
    ctx: ResolverContext,
    profile: PlatformProfile,
}

impl HaokanResolver {
    pub fn new(ctx: ResolverContext, patch: Option<&PlatformOverride>) -> Self {
        let profile = PlatformProfile::new(
            PlatformId::Haokan,
            &[("video_page", "https://haokan.baidu.com/v?vid={id}")],
        )
        .user_agent(MOBILE_UA)
        .referer("https://haokan.baidu.com/")
        .apply(patch);
        Self { ctx, profile }
    }
}

fn parse_page(html: &str, vid: &str) -> Result<VideoDraft, ResolveError> {
    let raw = embedded_json(html, "window.__PRELOADED_STATE__")
        .ok_or_else(|| ResolveError::parse(PlatformId::Haokan, "page has no preloaded state"))?;
    let state: PreloadedState = serde_json::from_str(raw)
        .map_err(|e| ResolveError::parse(PlatformId::Haokan, e.to_string()))?;
    let meta = state
        .cur_video_meta
        .ok_or_else(|| ResolveError::NotFound(format!("haokan video {} not found", vid)))?;

    let mut draft = VideoDraft {
        title: meta.title,
        author: meta.mth.and_then(|m| m.author_name),
        cover_url: meta.poster,
        duration_secs: meta.duration.map(|d| d.round() as u64),
        ..Default::default()
    };
    for clarity in meta.clarity_url {
        if let Some(url) = clarity.url {
            let mut variant = MediaVariant::new(url)
                .watermark_free(true)
                .bitrate(clarity.video_bps);
            if let Some(label) = clarity.title {
                variant = variant.label(label);
            }
            draft.push_media(variant);
        }
    }
    if let Some(url) = meta.playurl {
        draft.push_media(MediaVariant::new(url).watermark_free(true));
    }

    Ok(draft)
}

#[async_trait]
impl Resolver for HaokanResolver {
    fn platform(&self) -> PlatformId {
        PlatformId::Haokan
    }

    async fn canonical_id(&self, url: &str) -> Result<Canonical, ResolveError> {
        id_from_url(self.ctx.fetcher.as_ref(), &self.profile, url, &[&*VID_QUERY]).await
    }

    async fn fetch_info(&self, target: &Canonical) -> Result<VideoInfo, ResolveError> {
        let url = self
            .profile
            .endpoint("video_page", &[("id", target.video_id.as_str())])?;
        let response = self
            .ctx
            .fetcher
            .fetch_following_redirects(&self.profile.get(url), self.ctx.fetcher.max_redirects())
            .await?;
        let draft = parse_page(&response.text(), &target.video_id)?;
        self.profile
            .finish(draft, &target.video_id, fingerprint(&response.body))
    }
}
