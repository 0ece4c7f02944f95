use crate::config::PlatformOverride;
use crate::media::error::ResolveError;
use crate::media::resolver::{
    Canonical, MOBILE_UA, PlatformProfile, Resolver, ResolverContext, embedded_json, id_from_url,
    null_as_default,
};
use crate::media::types::{MediaVariant, PlatformId, VideoDraft, VideoInfo};
use crate::sign::{douyin_ms_token, fingerprint};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::debug;

static VIDEO_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/(?:share/)?(?:video|note|slides)/(\d{8,})").unwrap());
static MODAL_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[?&]modal_id=(\d{8,})").unwrap());

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RouterData {
    #[serde(rename = "loaderData")]
    #[serde(deserialize_with = "null_as_default")]
    loader_data: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VideoInfoRes {
    #[serde(deserialize_with = "null_as_default")]
    item_list: Vec<AwemeItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AwemeItem {
    desc: Option<String>,
    author: Option<Author>,
    video: Option<AwemeVideo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Author {
    nickname: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AwemeVideo {
    play_addr: Option<UrlList>,
    cover: Option<UrlList>,
    /// Milliseconds.
    duration: Option<u64>,
    height: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UrlList {
    #[serde(deserialize_with = "null_as_default")]
    url_list: Vec<String>,
}

pub struct DouyinResolver {
    ctx: ResolverContext,
    profile: PlatformProfile,
}

impl DouyinResolver {
    pub fn new(ctx: ResolverContext, patch: Option<&PlatformOverride>) -> Self {
        let profile = PlatformProfile::new(
            PlatformId::Douyin,
            &[(
                "share_page",
                "https://www.iesdouyin.com/share/video/{id}/?msToken={ms_token}",
            )],
        )
        .user_agent(MOBILE_UA)
        .referer("https://www.douyin.com/")
        .apply(patch);
        Self { ctx, profile }
    }

    fn parse_page(&self, html: &str) -> Result<VideoDraft, ResolveError> {
        let raw = embedded_json(html, "window._ROUTER_DATA")
            .ok_or_else(|| ResolveError::parse(PlatformId::Douyin, "page has no router data"))?;
        let router: RouterData = serde_json::from_str(raw)
            .map_err(|e| ResolveError::parse(PlatformId::Douyin, e.to_string()))?;

        let res = router
            .loader_data
            .into_values()
            .find_map(|page| page.get("videoInfoRes").cloned())
            .ok_or_else(|| ResolveError::parse(PlatformId::Douyin, "no videoInfoRes in router data"))?;
        let res: VideoInfoRes = serde_json::from_value(res)
            .map_err(|e| ResolveError::parse(PlatformId::Douyin, e.to_string()))?;

        let Some(item) = res.item_list.into_iter().next() else {
            return Err(ResolveError::NotFound("douyin returned an empty item list".to_string()));
        };

        let mut draft = VideoDraft {
            title: item.desc,
            author: item.author.and_then(|a| a.nickname),
            ..Default::default()
        };

        if let Some(video) = item.video {
            draft.cover_url = video.cover.and_then(|c| c.url_list.into_iter().next());
            draft.duration_secs = video.duration.map(|ms| ms / 1000);
            for url in video.play_addr.map(|p| p.url_list).unwrap_or_default() {
                if url.contains("playwm") {
                    draft.push_media(
                        MediaVariant::new(url.replace("playwm", "play"))
                            .watermark_free(true)
                            .height(video.height)
                            .label("no watermark"),
                    );
                }
                draft.push_media(MediaVariant::new(url).height(video.height));
            }
        }

        Ok(draft)
    }
}

#[async_trait]
impl Resolver for DouyinResolver {
    fn platform(&self) -> PlatformId {
        PlatformId::Douyin
    }

    async fn canonical_id(&self, url: &str) -> Result<Canonical, ResolveError> {
        id_from_url(
            self.ctx.fetcher.as_ref(),
            &self.profile,
            url,
            &[&*VIDEO_PATH, &*MODAL_ID],
        )
        .await
    }

    async fn fetch_info(&self, target: &Canonical) -> Result<VideoInfo, ResolveError> {
        let ms_token = douyin_ms_token(&self.ctx.signing.device_id, self.ctx.clock.now_ms());
        let url = self.profile.endpoint(
            "share_page",
            &[("id", target.video_id.as_str()), ("ms_token", ms_token.as_str())],
        )?;

        debug!("Fetching douyin share page for {}", target.video_id);
        let response = self
            .ctx
            .fetcher
            .fetch_following_redirects(&self.profile.get(url), self.ctx.fetcher.max_redirects())
            .await?;
        let draft = self.parse_page(&response.text())?;
        self.profile
            .finish(draft, &target.video_id, fingerprint(&response.body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SigningConfig;
    use crate::sign::Clock;
    use crate::testutil::{douyin_share_page as share_page, FakeFetcher, FakeReply};
    use std::sync::Arc;

    fn resolver(fetcher: Arc<FakeFetcher>) -> DouyinResolver {
        let signing = SigningConfig {
            device_id: "vidgrab-test-device".to_string(),
            ..Default::default()
        };
        let ctx = ResolverContext::new(fetcher, signing)
            .with_clock(Clock::Fixed(1_700_000_000_123));
        DouyinResolver::new(ctx, None)
    }

    #[tokio::test]
    async fn test_short_link_expands_to_video_id() {
        let fetcher = Arc::new(FakeFetcher::new().route(
            "https://v.douyin.com/ABCDE/",
            FakeReply::redirect("https://www.iesdouyin.com/share/video/7312345678901234567/?region=CN"),
        ));
        let canonical = resolver(fetcher.clone())
            .canonical_id("https://v.douyin.com/ABCDE/")
            .await
            .unwrap();
        assert_eq!(canonical.video_id, "7312345678901234567");
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_long_url_needs_no_request() {
        let fetcher = Arc::new(FakeFetcher::new());
        let canonical = resolver(fetcher.clone())
            .canonical_id("https://www.douyin.com/user/MS4w?modal_id=7300000000000000001")
            .await
            .unwrap();
        assert_eq!(canonical.video_id, "7300000000000000001");
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_fetch_info_prefers_watermark_free() {
        let fetcher = Arc::new(FakeFetcher::new().route(
            "https://www.iesdouyin.com/share/video/7312345678901234567/",
            FakeReply::ok(share_page("7312345678901234567")),
        ));
        let resolver = resolver(fetcher.clone());
        let info = resolver
            .fetch_info(&Canonical {
                video_id: "7312345678901234567".to_string(),
                url: String::new(),
            })
            .await
            .unwrap();

        assert_eq!(info.title, "城市夜景 #vlog");
        assert_eq!(info.author, "小王");
        assert_eq!(info.duration_secs, Some(15));
        assert_eq!(info.media.len(), 2);
        assert!(info.media[0].watermark_free);
        assert_eq!(
            info.media[0].url,
            "https://aweme.snssdk.com/aweme/v1/play/?video_id=v07312345678901234567"
        );
        assert_eq!(info.referer.as_deref(), Some("https://www.douyin.com/"));

        let request = &fetcher.requests()[0];
        assert!(request.url.contains("msToken=lalEDT293Waasb8XlN3deYym7L8L2Syff3SjhL18wJg"));
    }

    #[tokio::test]
    async fn test_empty_item_list_is_not_found() {
        let page = r#"<script>window._ROUTER_DATA = {"loaderData":{"video_(id)/page":{"videoInfoRes":{"item_list":[],"filter_list":[{"detail_msg":"gone"}]}}}}</script>"#;
        let fetcher = Arc::new(FakeFetcher::new().route("https://www.iesdouyin.com/", FakeReply::ok(page)));
        let err = resolver(fetcher)
            .fetch_info(&Canonical {
                video_id: "1".to_string(),
                url: String::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_null_lists_are_treated_as_empty() {
        let page = r#"<script>window._ROUTER_DATA = {"loaderData":{"video_(id)/page":{"videoInfoRes":{"item_list":[{"desc":"夜跑","video":{"play_addr":{"url_list":["https://aweme.snssdk.com/aweme/v1/playwm/?video_id=v1"]},"cover":{"url_list":null}}}]}}}}</script>"#;
        let fetcher = Arc::new(FakeFetcher::new().route("https://www.iesdouyin.com/", FakeReply::ok(page)));
        let target = Canonical {
            video_id: "1".to_string(),
            url: String::new(),
        };
        let info = resolver(fetcher).fetch_info(&target).await.unwrap();
        assert_eq!(info.cover_url, None);
        assert!(info.media[0].watermark_free);

        let page = r#"<script>window._ROUTER_DATA = {"loaderData":{"video_(id)/page":{"videoInfoRes":{"item_list":null}}}}</script>"#;
        let fetcher = Arc::new(FakeFetcher::new().route("https://www.iesdouyin.com/", FakeReply::ok(page)));
        let err = resolver(fetcher).fetch_info(&target).await.unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_page_without_router_data_is_parse_failure() {
        let fetcher = Arc::new(
            FakeFetcher::new().route("https://www.iesdouyin.com/", FakeReply::ok("<html>captcha</html>")),
        );
        let err = resolver(fetcher)
            .fetch_info(&Canonical {
                video_id: "1".to_string(),
                url: String::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::ParseFailure { .. }));
    }
}
