use crate::config::PlatformOverride;
use crate::media::error::ResolveError;
use crate::media::resolver::{
    Canonical, PlatformProfile, Resolver, ResolverContext, embedded_json, id_from_url,
    null_as_default,
};
use crate::media::types::{MediaVariant, PlatformId, VideoDraft, VideoInfo};
use crate::sign::fingerprint;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::LazyLock;
use tracing::{debug, warn};

static NOTE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/(?:explore|discovery/item|item)/([0-9a-f]{24})").unwrap()
});

const DESKTOP_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/128.0.0.0 Safari/537.36";

/// The note page intermittently comes back as an empty shell.
const EMPTY_PAGE_ATTEMPTS: usize = 5;

const ORIGIN_VIDEO_HOST: &str = "https://sns-video-bd.xhscdn.com";

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Note {
    title: Option<String>,
    desc: Option<String>,
    user: Option<User>,
    #[serde(deserialize_with = "null_as_default")]
    image_list: Vec<Image>,
    video: Option<NoteVideo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct User {
    nickname: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Image {
    url_default: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NoteVideo {
    consumer: Option<Consumer>,
    media: Option<VideoMedia>,
    capa: Option<Capa>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Consumer {
    origin_video_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VideoMedia {
    stream: Option<Streams>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Streams {
    #[serde(deserialize_with = "null_as_default")]
    h264: Vec<Stream>,
    #[serde(deserialize_with = "null_as_default")]
    h265: Vec<Stream>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Stream {
    master_url: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    backup_urls: Vec<String>,
    height: Option<u32>,
    avg_bitrate: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Capa {
    duration: Option<u64>,
}

pub struct XiaohongshuResolver {
    ctx: ResolverContext,
    profile: PlatformProfile,
}

impl XiaohongshuResolver {
    pub fn new(ctx: ResolverContext, patch: Option<&PlatformOverride>) -> Self {
        let profile = PlatformProfile::new(
            PlatformId::Xiaohongshu,
            &[("note_page", "https://www.xiaohongshu.com/explore/{id}")],
        )
        .user_agent(DESKTOP_UA)
        .referer("https://www.xiaohongshu.com/")
        .apply(patch);
        Self { ctx, profile }
    }

    fn page_url(&self, target: &Canonical) -> Result<String, ResolveError> {
        let mut url = self
            .profile
            .endpoint("note_page", &[("id", target.video_id.as_str())])?;
        if let Some((_, query)) = target.url.split_once('?') {
            let kept: Vec<&str> = query
                .split('&')
                .filter(|pair| pair.starts_with("xsec_token=") || pair.starts_with("xsec_source="))
                .collect();
            if !kept.is_empty() {
                url.push(if url.contains('?') { '&' } else { '?' });
                url.push_str(&kept.join("&"));
            }
        }
        Ok(url)
    }
}

/// The state blob is a JS literal: bare `undefined` values become `null`,
/// string contents are left alone.
fn undefined_to_null(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut rest = raw;
    while let Some(c) = rest.chars().next() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
        } else if c == '"' {
            in_string = true;
        } else if rest.starts_with("undefined")
            && !out.ends_with(|p: char| p.is_alphanumeric() || p == '_' || p == '$')
            && !rest["undefined".len()..].starts_with(|n: char| n.is_alphanumeric() || n == '_')
        {
            out.push_str("null");
            rest = &rest["undefined".len()..];
            continue;
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }
    out
}

/// The note object for `note_id`, or `None` when the page carries no note
/// state at all.
fn find_note(html: &str, note_id: &str) -> Result<Option<Note>, ResolveError> {
    let Some(raw) = embedded_json(html, "window.__INITIAL_STATE__") else {
        return Ok(None);
    };
    let patched = undefined_to_null(raw);
    let state: Value = serde_json::from_str(&patched)
        .map_err(|e| ResolveError::parse(PlatformId::Xiaohongshu, e.to_string()))?;

    let Some(detail_map) = state
        .pointer("/note/noteDetailMap")
        .and_then(Value::as_object)
    else {
        return Ok(None);
    };
    let first_id = state.pointer("/note/firstNoteId").and_then(Value::as_str);

    let entry = detail_map
        .get(note_id)
        .or_else(|| first_id.and_then(|id| detail_map.get(id)))
        .or_else(|| detail_map.values().next());
    match entry.and_then(|e| e.get("note")).filter(|n| n.is_object()) {
        Some(note) => serde_json::from_value(note.clone())
            .map(Some)
            .map_err(|e| ResolveError::parse(PlatformId::Xiaohongshu, e.to_string())),
        None => Ok(None),
    }
}

fn note_to_draft(note: Note, note_id: &str) -> Result<VideoDraft, ResolveError> {
    let Some(video) = note.video else {
        return Err(ResolveError::NotFound(format!("note {} has no video", note_id)));
    };

    let title = note.title.filter(|t| !t.trim().is_empty()).or(note.desc);
    let mut draft = VideoDraft {
        title,
        author: note.user.and_then(|u| u.nickname),
        cover_url: note.image_list.into_iter().find_map(|i| i.url_default),
        duration_secs: video.capa.and_then(|c| c.duration),
        ..Default::default()
    };

    if let Some(key) = video.consumer.and_then(|c| c.origin_video_key) {
        draft.push_media(
            MediaVariant::new(format!("{}/{}", ORIGIN_VIDEO_HOST, key))
                .watermark_free(true)
                .label("origin"),
        );
    }
    let streams = video.media.and_then(|m| m.stream).unwrap_or_default();
    for (codec, stream) in streams
        .h264
        .into_iter()
        .map(|s| ("h264", s))
        .chain(streams.h265.into_iter().map(|s| ("h265", s)))
    {
        let urls = stream.master_url.into_iter().chain(stream.backup_urls);
        for url in urls {
            draft.push_media(
                MediaVariant::new(url)
                    .bitrate(stream.avg_bitrate)
                    .height(stream.height)
                    .label(codec),
            );
        }
    }

    Ok(draft)
}

#[async_trait]
impl Resolver for XiaohongshuResolver {
    fn platform(&self) -> PlatformId {
        PlatformId::Xiaohongshu
    }

    async fn canonical_id(&self, url: &str) -> Result<Canonical, ResolveError> {
        id_from_url(self.ctx.fetcher.as_ref(), &self.profile, url, &[&*NOTE_PATH]).await
    }

    async fn fetch_info(&self, target: &Canonical) -> Result<VideoInfo, ResolveError> {
        let request = self.profile.get(self.page_url(target)?);

        for attempt in 1..=EMPTY_PAGE_ATTEMPTS {
            let response = self
                .ctx
                .fetcher
                .fetch_following_redirects(&request, self.ctx.fetcher.max_redirects())
                .await?;
            match find_note(&response.text(), &target.video_id)? {
                Some(note) => {
                    let draft = note_to_draft(note, &target.video_id)?;
                    return self
                        .profile
                        .finish(draft, &target.video_id, fingerprint(&response.body));
                }
                None => debug!(
                    "xiaohongshu note {} page without state (attempt {}/{})",
                    target.video_id, attempt, EMPTY_PAGE_ATTEMPTS
                ),
            }
        }

        warn!("xiaohongshu note {} kept returning empty pages", target.video_id);
        Err(ResolveError::parse(
            PlatformId::Xiaohongshu,
            format!("no note state after {} attempts", EMPTY_PAGE_ATTEMPTS),
        ))
    }
}
