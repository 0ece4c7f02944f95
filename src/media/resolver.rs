use super::error::ResolveError;
use super::types::{PlatformId, VideoDraft, VideoInfo};
use crate::config::{PlatformOverride, SigningConfig};
use crate::net::{loggable, Fetch, FetchError, RequestSpec};
use crate::sign::Clock;
use crate::utils::to_https;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A video id together with the long URL it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canonical {
    pub video_id: String,
    pub url: String,
}

#[async_trait]
pub trait Resolver: Send + Sync {
    fn platform(&self) -> PlatformId;

    /// Platform-native id for `url`, expanding a short link first when needed.
    async fn canonical_id(&self, url: &str) -> Result<Canonical, ResolveError>;

    /// Query the platform's API for one video.
    async fn fetch_info(&self, target: &Canonical) -> Result<VideoInfo, ResolveError>;
}

/// Shared collaborators handed to every resolver at construction.
#[derive(Clone)]
pub struct ResolverContext {
    pub fetcher: Arc<dyn Fetch>,
    pub signing: SigningConfig,
    pub clock: Clock,
}

impl ResolverContext {
    pub fn new(fetcher: Arc<dyn Fetch>, signing: SigningConfig) -> Self {
        Self {
            fetcher,
            signing,
            clock: Clock::System,
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }
}

/// Request template for one platform: endpoints plus the headers its API
/// expects. Built from defaults, then patched by config.
#[derive(Debug, Clone)]
pub struct PlatformProfile {
    pub platform: PlatformId,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub cookie: Option<String>,
    pub headers: Vec<(String, String)>,
    endpoints: HashMap<String, String>,
}

pub const MOBILE_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_5 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Mobile/15E148 Safari/604.1";

impl PlatformProfile {
    pub fn new(platform: PlatformId, endpoints: &[(&str, &str)]) -> Self {
        Self {
            platform,
            user_agent: None,
            referer: None,
            cookie: None,
            headers: Vec::new(),
            endpoints: endpoints
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    pub fn user_agent(mut self, agent: &str) -> Self {
        self.user_agent = Some(agent.to_string());
        self
    }

    pub fn referer(mut self, referer: &str) -> Self {
        self.referer = Some(referer.to_string());
        self
    }

    pub fn apply(mut self, patch: Option<&PlatformOverride>) -> Self {
        let Some(patch) = patch else {
            return self;
        };
        for (name, template) in &patch.endpoints {
            self.endpoints.insert(name.clone(), template.clone());
        }
        if patch.user_agent.is_some() {
            self.user_agent = patch.user_agent.clone();
        }
        if patch.referer.is_some() {
            self.referer = patch.referer.clone();
        }
        if patch.cookie.is_some() {
            self.cookie = patch.cookie.clone();
        }
        let mut extra: Vec<_> = patch.headers.iter().collect();
        extra.sort();
        for (name, value) in extra {
            self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
            self.headers.push((name.clone(), value.clone()));
        }
        self
    }

    /// Fill `{name}` placeholders of an endpoint template.
    pub fn endpoint(&self, name: &str, vars: &[(&str, &str)]) -> Result<String, ResolveError> {
        let template = self.endpoints.get(name).ok_or_else(|| {
            ResolveError::Upstream(FetchError::InvalidRequest(format!(
                "{} has no endpoint named {}",
                self.platform, name
            )))
        })?;
        Ok(vars.iter().fold(template.clone(), |url, (key, value)| {
            url.replace(&format!("{{{}}}", key), value)
        }))
    }

    /// GET carrying the platform's UA, referer, cookie and extra headers.
    pub fn get(&self, url: impl Into<String>) -> RequestSpec {
        self.decorate(RequestSpec::get(url))
    }

    pub fn post_json(&self, url: impl Into<String>, body: &serde_json::Value) -> RequestSpec {
        self.decorate(RequestSpec::post_json(url, body))
    }

    fn decorate(&self, mut request: RequestSpec) -> RequestSpec {
        if let Some(agent) = &self.user_agent {
            request = request.header("User-Agent", agent.as_str());
        }
        if let Some(referer) = &self.referer {
            request = request.header("Referer", referer.as_str());
        }
        if let Some(cookie) = &self.cookie {
            request = request.header("Cookie", cookie.as_str());
        }
        request.headers(self.headers.iter().cloned())
    }

    /// Apply defaults, upgrade URLs to https and tag the result with what the
    /// downloader needs to replay media requests.
    pub fn finish(
        &self,
        mut draft: VideoDraft,
        video_id: &str,
        fingerprint: String,
    ) -> Result<VideoInfo, ResolveError> {
        for variant in &mut draft.media {
            variant.url = to_https(&variant.url);
        }
        let mut seen = Vec::new();
        draft.media.retain(|m| {
            if seen.contains(&m.url) {
                false
            } else {
                seen.push(m.url.clone());
                true
            }
        });
        draft.cover_url = draft.cover_url.map(|u| to_https(&u));
        draft.audio_url = draft.audio_url.map(|u| to_https(&u));
        if draft.referer.is_none() {
            draft.referer = self.referer.clone();
        }

        let mut info = draft.finish(self.platform, video_id, fingerprint)?;
        info.user_agent = self.user_agent.clone();
        Ok(info)
    }
}

/// First capture group of the first matching pattern.
pub fn capture_first(patterns: &[&Regex], text: &str) -> Option<String> {
    patterns
        .iter()
        .find_map(|re| re.captures(text))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Read the id straight from `url`, or follow one redirect hop (short links)
/// and read it from the expanded URL.
pub async fn id_from_url(
    fetcher: &dyn Fetch,
    profile: &PlatformProfile,
    url: &str,
    patterns: &[&Regex],
) -> Result<Canonical, ResolveError> {
    if let Some(video_id) = capture_first(patterns, url) {
        return Ok(Canonical {
            video_id,
            url: url.to_string(),
        });
    }

    let expanded = fetcher.expand_url(&profile.get(url)).await?;
    debug!("Expanded {} -> {}", loggable(url), loggable(&expanded));
    match capture_first(patterns, &expanded) {
        Some(video_id) => Ok(Canonical {
            video_id,
            url: expanded,
        }),
        None => Err(ResolveError::NotFound(format!(
            "no {} video id in {}",
            profile.platform,
            loggable(&expanded)
        ))),
    }
}

/// Pull the JSON object assigned right after `marker` out of an HTML page,
/// e.g. `window._ROUTER_DATA = {...}</script>`.
pub fn embedded_json<'a>(html: &'a str, marker: &str) -> Option<&'a str> {
    let start = html.find(marker)? + marker.len();
    let rest = &html[start..];
    let open = rest.find('{')?;
    if !rest[..open].trim_matches(|c: char| c.is_whitespace() || c == '=').is_empty() {
        return None;
    }

    let body = &rest[open..];
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in body.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&body[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Read an explicit `null` the same way as a missing key.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Fetch, treating a body that is not the expected JSON as API drift.
pub async fn fetch_json<T: serde::de::DeserializeOwned>(
    fetcher: &dyn Fetch,
    platform: PlatformId,
    request: &RequestSpec,
) -> Result<(T, String), ResolveError> {
    let response = fetcher.fetch(request).await?;
    let parsed = response
        .json::<T>()
        .map_err(|e| ResolveError::parse(platform, format!("invalid JSON: {}", e)))?;
    Ok((parsed, crate::sign::fingerprint(&response.body)))
}
