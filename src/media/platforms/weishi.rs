use crate::config::PlatformOverride;
use crate::media::error::ResolveError;
use crate::media::resolver::{
    Canonical, MOBILE_UA, PlatformProfile, Resolver, ResolverContext, fetch_json, id_from_url,
    null_as_default,
};
use crate::media::types::{MediaVariant, PlatformId, VideoDraft, VideoInfo};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::debug;

static FEED_QUERY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?&]feedid=([0-9A-Za-z_]+)").unwrap());
static FEED_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/feed/([0-9A-Za-z_]+)").unwrap());

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PlayPage {
    #[serde(deserialize_with = "null_as_default")]
    ret: i64,
    msg: Option<String>,
    data: Option<PlayPageData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PlayPageData {
    #[serde(deserialize_with = "null_as_default")]
    errcode: i64,
    #[serde(deserialize_with = "null_as_default")]
    feeds: Vec<Feed>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Feed {
    feed_desc: Option<String>,
    poster: Option<Poster>,
    video_url: Option<String>,
    video_cover: Option<VideoCover>,
    video: Option<FeedVideo>,
    /// Keyed by spec id; values carry their own url and bitrate.
    #[serde(deserialize_with = "null_as_default")]
    video_spec_urls: BTreeMap<String, SpecUrl>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Poster {
    nick: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VideoCover {
    static_cover: Option<Cover>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Cover {
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FeedVideo {
    /// Milliseconds.
    duration: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SpecUrl {
    url: Option<String>,
    /// Kbit/s.
    video_quality: Option<u64>,
    height: Option<u32>,
}

/// Errcodes for a deleted or private feed. Anything else is an unexpected answer.
const FEED_GONE_CODES: &[i64] = &[-1001, -1002];

pub struct WeishiResolver {
    ctx: ResolverContext,
    profile: PlatformProfile,
}

impl WeishiResolver {
    pub fn new(ctx: ResolverContext, patch: Option<&PlatformOverride>) -> Self {
        let profile = PlatformProfile::new(
            PlatformId::Weishi,
            &[(
                "play_page",
                "https://h5.weishi.qq.com/webapp/json/weishi/WSH5GetPlayPage",
            )],
        )
        .user_agent(MOBILE_UA)
        .referer("https://h5.weishi.qq.com/")
        .apply(patch);
        Self { ctx, profile }
    }
}

fn feed_to_draft(page: PlayPage, feed_id: &str) -> Result<VideoDraft, ResolveError> {
    let data = page.data.unwrap_or_default();
    if page.ret != 0 || data.errcode != 0 {
        debug!(
            "weishi feed {} rejected: ret={} errcode={} msg={:?}",
            feed_id, page.ret, data.errcode, page.msg
        );
        if page.ret == 0 && FEED_GONE_CODES.contains(&data.errcode) {
            return Err(ResolveError::NotFound(format!("weishi feed {} not found", feed_id)));
        }
        return Err(ResolveError::parse(
            PlatformId::Weishi,
            format!(
                "play page ret {} errcode {}: {}",
                page.ret,
                data.errcode,
                page.msg.unwrap_or_default()
            ),
        ));
    }
    let feed = data
        .feeds
        .into_iter()
        .next()
        .ok_or_else(|| ResolveError::NotFound(format!("weishi feed {} not found", feed_id)))?;

    let mut draft = VideoDraft {
        title: feed.feed_desc,
        author: feed.poster.and_then(|p| p.nick),
        cover_url: feed
            .video_cover
            .and_then(|c| c.static_cover)
            .and_then(|c| c.url),
        duration_secs: feed.video.and_then(|v| v.duration).map(|ms| ms / 1000),
        ..Default::default()
    };
    if let Some(url) = feed.video_url {
        draft.push_media(MediaVariant::new(url).watermark_free(true).label("default"));
    }
    for (spec, entry) in feed.video_spec_urls {
        if let Some(url) = entry.url {
            draft.push_media(
                MediaVariant::new(url)
                    .watermark_free(true)
                    .bitrate(entry.video_quality.map(|kbps| kbps * 1000))
                    .height(entry.height)
                    .label(format!("spec-{}", spec)),
            );
        }
    }

    Ok(draft)
}

#[async_trait]
impl Resolver for WeishiResolver {
    fn platform(&self) -> PlatformId {
        PlatformId::Weishi
    }

    async fn canonical_id(&self, url: &str) -> Result<Canonical, ResolveError> {
        id_from_url(
            self.ctx.fetcher.as_ref(),
            &self.profile,
            url,
            &[&*FEED_QUERY, &*FEED_PATH],
        )
        .await
    }

    async fn fetch_info(&self, target: &Canonical) -> Result<VideoInfo, ResolveError> {
        let url = self.profile.endpoint("play_page", &[])?;
        let request = self
            .profile
            .post_json(url, &json!({ "feedid": target.video_id, "recommendtype": 0 }));
        let (page, fingerprint) =
            fetch_json::<PlayPage>(self.ctx.fetcher.as_ref(), PlatformId::Weishi, &request).await?;
        let draft = feed_to_draft(page, &target.video_id)?;
        self.profile.finish(draft, &target.video_id, fingerprint)
    }
}
