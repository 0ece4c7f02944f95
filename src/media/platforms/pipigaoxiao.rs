use crate::config::PlatformOverride;
use crate::media::error::ResolveError;
use crate::media::resolver::{
    Canonical, MOBILE_UA, PlatformProfile, Resolver, ResolverContext, capture_first, fetch_json,
    id_from_url, null_as_default,
};
use crate::media::types::{MediaVariant, PlatformId, VideoDraft, VideoInfo};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::LazyLock;

static POST_PATH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/post/(\d+)").unwrap());
static MID_QUERY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[?&]mid=(\d+)").unwrap());

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FetchContent {
    #[serde(deserialize_with = "null_as_default")]
    ret: i64,
    msg: Option<String>,
    data: Option<ContentData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ContentData {
    post: Option<Post>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Post {
    content: Option<String>,
    member: Option<Member>,
    #[serde(deserialize_with = "null_as_default")]
    imgs: Vec<Img>,
    /// Keyed by image id.
    #[serde(deserialize_with = "null_as_default")]
    videos: BTreeMap<String, PostVideo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Member {
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Img {
    id: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PostVideo {
    url: Option<String>,
    urlwm: Option<String>,
    /// Seconds.
    dur: Option<u64>,
}

pub struct PipigaoxiaoResolver {
    ctx: ResolverContext,
    profile: PlatformProfile,
}

impl PipigaoxiaoResolver {
    pub fn new(ctx: ResolverContext, patch: Option<&PlatformOverride>) -> Self {
        let profile = PlatformProfile::new(
            PlatformId::Pipigaoxiao,
            &[
                (
                    "fetch_content",
                    "https://h5.pipigx.com/ppapi/share/fetch_content",
                ),
                ("cover", "https://file.ippzone.com/img/view/id/{id}"),
            ],
        )
        .user_agent(MOBILE_UA)
        .referer("https://h5.pipigx.com/")
        .apply(patch);
        Self { ctx, profile }
    }

    fn to_draft(&self, post: Post) -> Result<VideoDraft, ResolveError> {
        let mut draft = VideoDraft {
            title: post.content,
            author: post.member.and_then(|m| m.name),
            ..Default::default()
        };
        if let Some(img_id) = post.imgs.first().and_then(|i| i.id) {
            let img_id = img_id.to_string();
            draft.cover_url = Some(self.profile.endpoint("cover", &[("id", img_id.as_str())])?);
        }
        for video in post.videos.into_values() {
            if draft.duration_secs.is_none() {
                draft.duration_secs = video.dur;
            }
            if let Some(url) = video.url {
                draft.push_media(MediaVariant::new(url).watermark_free(true));
            }
            if let Some(url) = video.urlwm {
                draft.push_media(MediaVariant::new(url).label("watermarked"));
            }
        }
        Ok(draft)
    }
}

#[async_trait]
impl Resolver for PipigaoxiaoResolver {
    fn platform(&self) -> PlatformId {
        PlatformId::Pipigaoxiao
    }

    async fn canonical_id(&self, url: &str) -> Result<Canonical, ResolveError> {
        id_from_url(self.ctx.fetcher.as_ref(), &self.profile, url, &[&*POST_PATH]).await
    }

    async fn fetch_info(&self, target: &Canonical) -> Result<VideoInfo, ResolveError> {
        let pid: u64 = target.video_id.parse().map_err(|_| {
            ResolveError::NotFound(format!("invalid pipigaoxiao post id {}", target.video_id))
        })?;
        let mid = capture_first(&[&*MID_QUERY], &target.url)
            .and_then(|m| m.parse::<u64>().ok())
            .map_or(Value::Null, Value::from);

        let url = self.profile.endpoint("fetch_content", &[])?;
        let request = self
            .profile
            .post_json(url, &json!({ "pid": pid, "type": "post", "mid": mid }));
        let (content, fingerprint) = fetch_json::<FetchContent>(
            self.ctx.fetcher.as_ref(),
            PlatformId::Pipigaoxiao,
            &request,
        )
        .await?;

        if content.ret != 1 {
            return Err(ResolveError::NotFound(format!(
                "pipigaoxiao post {} unavailable: {}",
                pid,
                content.msg.unwrap_or_default()
            )));
        }
        let post = content
            .data
            .and_then(|d| d.post)
            .ok_or_else(|| ResolveError::NotFound(format!("pipigaoxiao post {} not found", pid)))?;

        let draft = self.to_draft(post)?;
        self.profile.finish(draft, &target.video_id, fingerprint)
    }
}
