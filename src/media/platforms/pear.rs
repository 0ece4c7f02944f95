use crate::config::PlatformOverride;
use crate::media::error::ResolveError;
use crate::media::resolver::{
    Canonical, PlatformProfile, Resolver, ResolverContext, capture_first, fetch_json, id_from_url,
    null_as_default,
};
use crate::media::types::{MediaVariant, PlatformId, VideoDraft, VideoInfo};
use crate::sign::pear_mrd;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use tracing::warn;

static CONT_PATH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/(?:video|detail)_(\d+)").unwrap());
static CONT_QUERY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[?&]contId=(\d+)").unwrap());
static TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<h1 class="video-tt">([^<]+)</h1>"#).unwrap());
static AUTHOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"class="col-name"[^>]*>(?:<i[^>]*></i>)?([^<]+)<"#).unwrap());
/// The status endpoint returns the media URL with the request time in place
/// of the `cont-<id>` segment the CDN actually serves.
static SYSTEM_TIME_SEGMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/(\d{10,})-").unwrap());

const DESKTOP_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/128.0.0.0 Safari/537.36";

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct StatusResponse {
    #[serde(deserialize_with = "null_as_default")]
    result_code: String,
    result_msg: Option<String>,
    system_time: Option<String>,
    video_info: Option<StatusVideo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StatusVideo {
    video_image: Option<String>,
    videos: Option<StatusUrls>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct StatusUrls {
    src_url: Option<String>,
}

pub struct PearResolver {
    ctx: ResolverContext,
    profile: PlatformProfile,
}

impl PearResolver {
    pub fn new(ctx: ResolverContext, patch: Option<&PlatformOverride>) -> Self {
        let profile = PlatformProfile::new(
            PlatformId::Pear,
            &[
                ("page", "https://www.pearvideo.com/video_{id}"),
                (
                    "status",
                    "https://www.pearvideo.com/videoStatus.jsp?contId={id}&mrd={mrd}",
                ),
            ],
        )
        .user_agent(DESKTOP_UA)
        .referer("https://www.pearvideo.com/")
        .apply(patch);
        Self { ctx, profile }
    }

    /// Title and author from the article page. Missing page data only costs
    /// metadata, so failures are logged and skipped.
    async fn page_metadata(&self, page_url: &str) -> (Option<String>, Option<String>) {
        let response = match self
            .ctx
            .fetcher
            .fetch_following_redirects(&self.profile.get(page_url), self.ctx.fetcher.max_redirects())
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("pear page fetch failed, continuing without metadata: {}", e);
                return (None, None);
            }
        };
        let html = response.text();
        (
            capture_first(&[&*TITLE], &html).map(|t| t.trim().to_string()),
            capture_first(&[&*AUTHOR], &html).map(|a| a.trim().to_string()),
        )
    }
}

/// Swap the time segment for `cont-<id>`, using the reported system time when
/// present and the generic pattern otherwise.
fn playable_url(src_url: &str, cont_id: &str, system_time: Option<&str>) -> String {
    let replacement = format!("cont-{}", cont_id);
    if let Some(time) = system_time.filter(|t| !t.is_empty() && src_url.contains(*t)) {
        return src_url.replacen(time, &replacement, 1);
    }
    SYSTEM_TIME_SEGMENT
        .replace(src_url, format!("/{}-", replacement).as_str())
        .into_owned()
}

#[async_trait]
impl Resolver for PearResolver {
    fn platform(&self) -> PlatformId {
        PlatformId::Pear
    }

    async fn canonical_id(&self, url: &str) -> Result<Canonical, ResolveError> {
        id_from_url(
            self.ctx.fetcher.as_ref(),
            &self.profile,
            url,
            &[&*CONT_PATH, &*CONT_QUERY],
        )
        .await
    }

    async fn fetch_info(&self, target: &Canonical) -> Result<VideoInfo, ResolveError> {
        let id = target.video_id.as_str();
        let page_url = self.profile.endpoint("page", &[("id", id)])?;
        let mrd = pear_mrd(self.ctx.clock.now_ms());
        let status_url = self
            .profile
            .endpoint("status", &[("id", id), ("mrd", mrd.as_str())])?;

        let request = self.profile.get(status_url).set_header("Referer", page_url.as_str());
        let (status, fingerprint) =
            fetch_json::<StatusResponse>(self.ctx.fetcher.as_ref(), PlatformId::Pear, &request)
                .await?;
        if status.result_code != "1" {
            return Err(ResolveError::NotFound(format!(
                "pear video {} unavailable: {}",
                id,
                status.result_msg.unwrap_or_default()
            )));
        }

        let video = status.video_info.unwrap_or_default();
        let src_url = video
            .videos
            .and_then(|v| v.src_url)
            .ok_or_else(|| ResolveError::parse(PlatformId::Pear, "status has no srcUrl"))?;

        let (title, author) = self.page_metadata(&page_url).await;
        let mut draft = VideoDraft {
            title,
            author,
            cover_url: video.video_image,
            referer: Some(page_url),
            ..Default::default()
        };
        draft.push_media(
            MediaVariant::new(playable_url(&src_url, id, status.system_time.as_deref()))
                .watermark_free(true),
        );
        self.profile.finish(draft, id, fingerprint)
    }
}
