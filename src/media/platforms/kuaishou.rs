use crate::config::PlatformOverride;
use crate::media::error::ResolveError;
use crate::media::resolver::{
    Canonical, PlatformProfile, Resolver, ResolverContext, embedded_json, id_from_url,
    null_as_default,
};
use crate::media::types::{MediaVariant, PlatformId, VideoDraft, VideoInfo};
use crate::sign::{fingerprint, kuaishou_did};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::LazyLock;

static PHOTO_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/(?:short-video|photo|fw/photo)/([0-9A-Za-z_-]+)").unwrap());
static PHOTO_QUERY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?&]photoId=([0-9A-Za-z_-]+)").unwrap());

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Photo {
    caption: Option<String>,
    cover_url: Option<String>,
    photo_url: Option<String>,
    photo_h265_url: Option<String>,
    /// Milliseconds.
    duration: Option<u64>,
    manifest: Option<Manifest>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Manifest {
    #[serde(deserialize_with = "null_as_default")]
    adaptation_set: Vec<Adaptation>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Adaptation {
    #[serde(deserialize_with = "null_as_default")]
    representation: Vec<Representation>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Representation {
    url: Option<String>,
    height: Option<u32>,
    avg_bitrate: Option<u64>,
    quality_label: Option<String>,
}

pub struct KuaishouResolver {
    ctx: ResolverContext,
    profile: PlatformProfile,
}

impl KuaishouResolver {
    pub fn new(ctx: ResolverContext, patch: Option<&PlatformOverride>) -> Self {
        let mut profile = PlatformProfile::new(
            PlatformId::Kuaishou,
            &[("video_page", "https://www.kuaishou.com/short-video/{id}")],
        )
        .referer("https://www.kuaishou.com/")
        .apply(patch);
        if profile.cookie.is_none() {
            profile.cookie = Some(format!("did={}", kuaishou_did(&ctx.signing.device_id)));
        }
        Self { ctx, profile }
    }
}

/// Find the first Apollo cache entry whose key starts with `prefix`.
fn apollo_entry<'a>(state: &'a Value, prefix: &str) -> Option<&'a Value> {
    let client = state.get("defaultClient").unwrap_or(state);
    client
        .as_object()?
        .iter()
        .find(|(key, _)| key.starts_with(prefix))
        .map(|(_, value)| value)
}

fn parse_page(html: &str) -> Result<VideoDraft, ResolveError> {
    let raw = embedded_json(html, "window.__APOLLO_STATE__")
        .ok_or_else(|| ResolveError::parse(PlatformId::Kuaishou, "page has no apollo state"))?;
    let state: Value = serde_json::from_str(raw)
        .map_err(|e| ResolveError::parse(PlatformId::Kuaishou, e.to_string()))?;

    let photo = apollo_entry(&state, "VisionVideoDetailPhoto:")
        .ok_or_else(|| ResolveError::NotFound("kuaishou page carries no photo".to_string()))?;
    let photo: Photo = serde_json::from_value(photo.clone())
        .map_err(|e| ResolveError::parse(PlatformId::Kuaishou, e.to_string()))?;

    let mut draft = VideoDraft {
        title: photo.caption,
        author: apollo_entry(&state, "VisionVideoDetailAuthor:")
            .and_then(|a| a.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string),
        cover_url: photo.cover_url,
        duration_secs: photo.duration.map(|ms| ms / 1000),
        ..Default::default()
    };

    if let Some(url) = photo.photo_url {
        draft.push_media(MediaVariant::new(url).watermark_free(true).label("h264"));
    }
    if let Some(url) = photo.photo_h265_url {
        draft.push_media(MediaVariant::new(url).watermark_free(true).label("h265"));
    }
    let representations = photo
        .manifest
        .into_iter()
        .flat_map(|m| m.adaptation_set)
        .flat_map(|a| a.representation);
    for rep in representations {
        if let Some(url) = rep.url {
            let mut variant = MediaVariant::new(url)
                .watermark_free(true)
                .bitrate(rep.avg_bitrate)
                .height(rep.height);
            if let Some(label) = rep.quality_label {
                variant = variant.label(label);
            }
            draft.push_media(variant);
        }
    }

    Ok(draft)
}

#[async_trait]
impl Resolver for KuaishouResolver {
    fn platform(&self) -> PlatformId {
        PlatformId::Kuaishou
    }

    async fn canonical_id(&self, url: &str) -> Result<Canonical, ResolveError> {
        id_from_url(
            self.ctx.fetcher.as_ref(),
            &self.profile,
            url,
            &[&*PHOTO_PATH, &*PHOTO_QUERY],
        )
        .await
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
        let draft = parse_page(&response.text())?;
        self.profile
            .finish(draft, &target.video_id, fingerprint(&response.body))
    }
}
