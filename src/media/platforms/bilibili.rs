use crate::config::PlatformOverride;
use crate::media::error::ResolveError;
use crate::media::resolver::{
    Canonical, PlatformProfile, Resolver, ResolverContext, fetch_json, id_from_url, null_as_default,
};
use crate::media::types::{MediaVariant, PlatformId, VideoDraft, VideoInfo};
use crate::net::FetchError;
use crate::sign::bilibili::{av_to_bv, key_from_url, mixin_key, wbi_sign};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::{LazyLock, Mutex};
use tracing::{debug, warn};

static BV_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(BV1[0-9A-Za-z]{9})").unwrap());
static AV_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/video/av(\d+)").unwrap());

const DESKTOP_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/128.0.0.0 Safari/537.36";

/// WBI keys rotate daily upstream; refetch well before that.
const MIXIN_TTL_SECS: u64 = 6 * 60 * 60;

const FNVAL_PROGRESSIVE: u32 = 1;
const FNVAL_DASH: u32 = 16;

/// `code` values meaning the video is gone, private or region locked.
const GONE_CODES: [i64; 4] = [-404, 62002, 62004, 62012];

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ViewData {
    title: Option<String>,
    pic: Option<String>,
    duration: Option<u64>,
    cid: Option<u64>,
    owner: Option<Owner>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Owner {
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NavData {
    wbi_img: Option<WbiImg>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WbiImg {
    #[serde(deserialize_with = "null_as_default")]
    img_url: String,
    #[serde(deserialize_with = "null_as_default")]
    sub_url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PlayData {
    quality: Option<u32>,
    #[serde(deserialize_with = "null_as_default")]
    durl: Vec<Durl>,
    dash: Option<Dash>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Durl {
    url: Option<String>,
    backup_url: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Dash {
    audio: Option<Vec<DashAudio>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DashAudio {
    #[serde(alias = "baseUrl")]
    base_url: Option<String>,
    bandwidth: Option<u64>,
}

/// Height for a Bilibili `qn` quality code.
fn quality_height(qn: u32) -> Option<u32> {
    match qn {
        127 => Some(4320),
        120 => Some(2160),
        116 | 112 | 80 => Some(1080),
        74 | 64 => Some(720),
        32 => Some(480),
        16 => Some(360),
        _ => None,
    }
}

fn check_code<T>(response: ApiResponse<T>, what: &str) -> Result<T, ResolveError> {
    match response.code {
        0 => response
            .data
            .ok_or_else(|| ResolveError::parse(PlatformId::Bilibili, format!("{} without data", what))),
        code if GONE_CODES.contains(&code) => Err(ResolveError::NotFound(format!(
            "bilibili {} answered {}: {}",
            what,
            code,
            response.message.unwrap_or_default()
        ))),
        -412 => Err(ResolveError::Upstream(FetchError::HttpStatus(412))),
        code => Err(ResolveError::parse(
            PlatformId::Bilibili,
            format!("{} code {}: {}", what, code, response.message.unwrap_or_default()),
        )),
    }
}

pub struct BilibiliResolver {
    ctx: ResolverContext,
    profile: PlatformProfile,
    mixin: Mutex<Option<(String, u64)>>,
}

impl BilibiliResolver {
    pub fn new(ctx: ResolverContext, patch: Option<&PlatformOverride>) -> Self {
        let profile = PlatformProfile::new(
            PlatformId::Bilibili,
            &[
                ("view", "https://api.bilibili.com/x/web-interface/view?bvid={bvid}"),
                ("nav", "https://api.bilibili.com/x/web-interface/nav"),
                ("playurl", "https://api.bilibili.com/x/player/wbi/playurl?{query}"),
                ("page", "https://www.bilibili.com/video/{bvid}"),
            ],
        )
        .user_agent(DESKTOP_UA)
        .referer("https://www.bilibili.com/")
        .apply(patch);

        let configured = match (&ctx.signing.bilibili_img_key, &ctx.signing.bilibili_sub_key) {
            (Some(img), Some(sub)) => mixin_key(img, sub).map(|key| (key, u64::MAX)),
            _ => None,
        };

        Self {
            ctx,
            profile,
            mixin: Mutex::new(configured),
        }
    }

    async fn mixin_key(&self) -> Result<String, ResolveError> {
        let now = self.ctx.clock.now_secs();
        if let Ok(guard) = self.mixin.lock() {
            if let Some((key, fetched_at)) = guard.as_ref() {
                if *fetched_at == u64::MAX || now.saturating_sub(*fetched_at) < MIXIN_TTL_SECS {
                    return Ok(key.clone());
                }
            }
        }

        debug!("Fetching bilibili WBI keys");
        let url = self.profile.endpoint("nav", &[])?;
        let (nav, _): (ApiResponse<NavData>, _) =
            fetch_json(self.ctx.fetcher.as_ref(), PlatformId::Bilibili, &self.profile.get(url)).await?;

        let img = nav
            .data
            .and_then(|d| d.wbi_img)
            .ok_or_else(|| ResolveError::parse(PlatformId::Bilibili, "nav has no wbi_img"))?;
        let key = key_from_url(&img.img_url)
            .zip(key_from_url(&img.sub_url))
            .and_then(|(img, sub)| mixin_key(&img, &sub))
            .ok_or_else(|| ResolveError::parse(PlatformId::Bilibili, "malformed WBI keys"))?;

        if let Ok(mut guard) = self.mixin.lock() {
            *guard = Some((key.clone(), now));
        }
        Ok(key)
    }

    /// Signed playurl request; `fnval` picks progressive (`durl`) or DASH.
    async fn play_data(
        &self,
        bvid: &str,
        cid: u64,
        fnval: u32,
        page_url: &str,
    ) -> Result<PlayData, ResolveError> {
        let mixin = self.mixin_key().await?;
        let params = [
            ("bvid", bvid.to_string()),
            ("cid", cid.to_string()),
            ("qn", "80".to_string()),
            ("fnval", fnval.to_string()),
            ("fourk", "0".to_string()),
        ];
        let query = wbi_sign(&params, self.ctx.clock.now_secs(), &mixin);
        let play_url = self.profile.endpoint("playurl", &[("query", query.as_str())])?;

        let (play, _): (ApiResponse<PlayData>, _) = fetch_json(
            self.ctx.fetcher.as_ref(),
            PlatformId::Bilibili,
            &self.profile.get(play_url).set_header("Referer", page_url),
        )
        .await?;
        check_code(play, "playurl")
    }
}

#[async_trait]
impl Resolver for BilibiliResolver {
    fn platform(&self) -> PlatformId {
        PlatformId::Bilibili
    }

    async fn canonical_id(&self, url: &str) -> Result<Canonical, ResolveError> {
        let mut canonical = id_from_url(
            self.ctx.fetcher.as_ref(),
            &self.profile,
            url,
            &[&*BV_ID, &*AV_ID],
        )
        .await?;
        if let Ok(aid) = canonical.video_id.parse::<u64>() {
            canonical.video_id = av_to_bv(aid);
        }
        Ok(canonical)
    }

    async fn fetch_info(&self, target: &Canonical) -> Result<VideoInfo, ResolveError> {
        let bvid = target.video_id.as_str();
        let fetcher = self.ctx.fetcher.as_ref();

        let view_url = self.profile.endpoint("view", &[("bvid", bvid)])?;
        let (view, fingerprint): (ApiResponse<ViewData>, _) =
            fetch_json(fetcher, PlatformId::Bilibili, &self.profile.get(view_url)).await?;
        let view = check_code(view, "view")?;
        let cid = view
            .cid
            .ok_or_else(|| ResolveError::parse(PlatformId::Bilibili, "view has no cid"))?;

        let page_url = self.profile.endpoint("page", &[("bvid", bvid)])?;
        let play = self.play_data(bvid, cid, FNVAL_PROGRESSIVE, &page_url).await?;

        let height = play.quality.and_then(quality_height);
        let mut draft = VideoDraft {
            title: view.title,
            author: view.owner.and_then(|o| o.name),
            cover_url: view.pic,
            duration_secs: view.duration,
            referer: Some(page_url.clone()),
            ..Default::default()
        };
        for durl in play.durl {
            if let Some(url) = durl.url {
                draft.push_media(MediaVariant::new(url).watermark_free(true).height(height));
            }
            for backup in durl.backup_url.unwrap_or_default() {
                draft.push_media(
                    MediaVariant::new(backup)
                        .watermark_free(true)
                        .height(height)
                        .label("backup"),
                );
            }
        }

        // Progressive answers carry no DASH block; the audio track needs its own request.
        match self.play_data(bvid, cid, FNVAL_DASH, &page_url).await {
            Ok(dash) => {
                let mut audio = dash.dash.and_then(|d| d.audio).unwrap_or_default();
                audio.sort_by(|a, b| b.bandwidth.cmp(&a.bandwidth));
                draft.audio_url = audio.into_iter().find_map(|a| a.base_url);
            }
            Err(e) => warn!("bilibili DASH playurl for {} failed, no audio track: {}", bvid, e),
        }

        if draft.media.is_empty() {
            warn!("bilibili playurl for {} returned no durl entries", bvid);
        }
        self.profile.finish(draft, bvid, fingerprint)
    }
}
