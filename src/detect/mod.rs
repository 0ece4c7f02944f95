//! Maps free-form share text to a platform and a clean URL.
//!
//! Rules run in three phases: domain suffix, then short-link prefix, then path
//! regex. Within a phase platforms are tried in `PlatformId::ALL` order and
//! the first match wins. Generic shorteners shared by several platforms
//! (`t.cn`, `url.cn`) are deliberately left unmapped.

use crate::config::Config;
use crate::media::PlatformId;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

static HTTP_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)https?://[A-Za-z0-9\-._~:/?#\[\]@!$&'()*+,;=%]+").unwrap()
});

static BARE_HOST_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:[a-z0-9-]+\.)+[a-z]{2,}/[A-Za-z0-9\-._~/?#&=%]*").unwrap()
});

static BV_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(BV1[0-9A-Za-z]{9})\b").unwrap());

const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', ')', '\'', ']'];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DetectError {
    #[error("no supported video link found")]
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub platform: PlatformId,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct PlatformRules {
    pub platform: PlatformId,
    pub domains: Vec<String>,
    pub short_links: Vec<String>,
    pub patterns: Vec<Regex>,
}

impl PlatformRules {
    fn defaults(platform: PlatformId) -> Self {
        let (domains, short_links, patterns): (&[&str], &[&str], &[&str]) = match platform {
            PlatformId::Douyin => (
                &["douyin.com", "iesdouyin.com"],
                &["v.douyin.com/"],
                &[r"/share/video/\d{15,}", r"/video/\d{15,}"],
            ),
            PlatformId::Kuaishou => (
                &["kuaishou.com", "kuaishouapp.com", "gifshow.com", "chenzhongtech.com"],
                &["v.kuaishou.com/"],
                &[r"/short-video/[0-9A-Za-z]+", r"/fw/photo/[0-9A-Za-z]+"],
            ),
            PlatformId::Bilibili => (
                &["bilibili.com"],
                &["b23.tv/", "bili2233.cn/"],
                &[r"/video/(?:BV1[0-9A-Za-z]{9}|av\d+)"],
            ),
            PlatformId::Xiaohongshu => (
                &["xiaohongshu.com"],
                &["xhslink.com/"],
                &[r"/(?:explore|discovery/item)/[0-9a-f]{24}"],
            ),
            PlatformId::Haokan => (
                &["haokan.baidu.com", "haokan.hao123.com"],
                &[],
                &[r"[?&]vid=\d{10,}"],
            ),
            PlatformId::Weishi => (
                &["weishi.qq.com"],
                &["isee.weishi.qq.com/"],
                &[r"[?&]feedid=[0-9A-Za-z]+"],
            ),
            PlatformId::Pear => (
                &["pearvideo.com"],
                &[],
                &[r"/(?:video|detail)_\d+"],
            ),
            PlatformId::Pipigaoxiao => (
                &["pipigx.com", "ippzone.com"],
                &[],
                &[r"/pp/post/\d+"],
            ),
        };

        Self {
            platform,
            domains: domains.iter().map(|d| d.to_string()).collect(),
            short_links: short_links.iter().map(|s| s.to_string()).collect(),
            patterns: patterns
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect(),
        }
    }

    fn matches_domain(&self, host: &str) -> bool {
        self.domains
            .iter()
            .any(|d| host == d || host.ends_with(&format!(".{}", d)))
    }

    fn matches_short_link(&self, host_and_path: &str) -> bool {
        self.short_links
            .iter()
            .any(|prefix| host_and_path.starts_with(prefix.as_str()))
    }

    fn matches_pattern(&self, url: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(url))
    }
}

#[derive(Debug, Clone)]
pub struct PlatformDetector {
    rules: Vec<PlatformRules>,
}

impl Default for PlatformDetector {
    fn default() -> Self {
        Self {
            rules: PlatformId::ALL
                .into_iter()
                .map(PlatformRules::defaults)
                .collect(),
        }
    }
}

impl PlatformDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default rules with per-platform overrides from `[platforms.<id>]`.
    pub fn from_config(config: &Config) -> Self {
        let mut detector = Self::default();
        for rules in &mut detector.rules {
            let Some(patch) = config.platform_override(rules.platform) else {
                continue;
            };
            if let Some(domains) = &patch.domains {
                rules.domains = domains.iter().map(|d| d.to_ascii_lowercase()).collect();
            }
            if let Some(short_links) = &patch.short_links {
                rules.short_links = short_links.iter().map(|s| s.to_ascii_lowercase()).collect();
            }
            if let Some(patterns) = &patch.patterns {
                rules.patterns = patterns
                    .iter()
                    .filter_map(|p| match Regex::new(p) {
                        Ok(re) => Some(re),
                        Err(e) => {
                            warn!("Skipping invalid {} pattern {}: {}", rules.platform, p, e);
                            None
                        }
                    })
                    .collect();
            }
        }
        detector
    }

    pub fn detect(&self, input: &str) -> Result<Detection, DetectError> {
        let url = self.extract_url(input).ok_or(DetectError::NotFound)?;
        let platform = self.classify(&url).ok_or(DetectError::NotFound)?;
        debug!("Detected {} for {}", platform, url);
        Ok(Detection {
            platform,
            url: clean_url(platform, &url),
        })
    }

    /// Skip classification when the caller already knows the platform.
    pub fn detect_as(&self, input: &str, platform: PlatformId) -> Result<Detection, DetectError> {
        let url = self.extract_url(input).ok_or(DetectError::NotFound)?;
        Ok(Detection {
            platform,
            url: clean_url(platform, &url),
        })
    }

    /// First URL-like substring of `input`: an explicit http(s) URL, else a
    /// scheme-less link on a known host, else a bare Bilibili BV code.
    pub fn extract_url(&self, input: &str) -> Option<String> {
        if let Some(m) = HTTP_URL.find(input) {
            return Some(m.as_str().trim_end_matches(TRAILING_PUNCTUATION).to_string());
        }

        for m in BARE_HOST_URL.find_iter(input) {
            let candidate = format!("https://{}", m.as_str().trim_end_matches(TRAILING_PUNCTUATION));
            if self.classify(&candidate).is_some() {
                return Some(candidate);
            }
        }

        BV_CODE
            .captures(input)
            .and_then(|c| c.get(1))
            .map(|bv| format!("https://www.bilibili.com/video/{}", bv.as_str()))
    }

    pub fn classify(&self, url: &str) -> Option<PlatformId> {
        let parsed = Url::parse(url).ok()?;
        let host = parsed.host_str()?.to_ascii_lowercase();
        let host = host.strip_prefix("www.").unwrap_or(&host);

        if let Some(rules) = self.rules.iter().find(|r| r.matches_domain(host)) {
            return Some(rules.platform);
        }

        let host_and_path = format!("{}{}", host, parsed.path());
        if let Some(rules) = self.rules.iter().find(|r| r.matches_short_link(&host_and_path)) {
            return Some(rules.platform);
        }

        self.rules
            .iter()
            .find(|r| r.matches_pattern(url))
            .map(|r| r.platform)
    }

    pub fn platforms(&self) -> impl Iterator<Item = PlatformId> + '_ {
        self.rules.iter().map(|r| r.platform)
    }
}

/// Strip tracking noise: Xiaohongshu keeps only its `xsec_*` parameters,
/// Kuaishou loses the whole query. Other platforms are left as-is.
pub fn clean_url(platform: PlatformId, url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };

    match platform {
        PlatformId::Xiaohongshu => {
            let kept: Vec<(String, String)> = parsed
                .query_pairs()
                .filter(|(k, _)| k == "xsec_token" || k == "xsec_source")
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            parsed.set_query(None);
            if !kept.is_empty() {
                parsed.query_pairs_mut().extend_pairs(kept);
            }
        }
        PlatformId::Kuaishou => parsed.set_query(None),
        _ => return url.to_string(),
    }

    parsed.set_fragment(None);
    parsed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn platform_of(input: &str) -> Result<PlatformId, DetectError> {
        PlatformDetector::new().detect(input).map(|d| d.platform)
    }

    #[test]
    fn test_detects_each_platform() {
        let cases = [
            ("https://v.douyin.com/ABCDE/", PlatformId::Douyin),
            ("https://www.douyin.com/video/7312345678901234567", PlatformId::Douyin),
            ("https://www.iesdouyin.com/share/video/7312345678901234567/", PlatformId::Douyin),
            ("https://v.kuaishou.com/Abc123", PlatformId::Kuaishou),
            ("https://www.kuaishou.com/short-video/3xabc?authorId=1", PlatformId::Kuaishou),
            ("https://b23.tv/xyz12", PlatformId::Bilibili),
            ("https://m.bilibili.com/video/BV1L9Uoa9EUx", PlatformId::Bilibili),
            ("http://xhslink.com/a/AbCdEf", PlatformId::Xiaohongshu),
            (
                "https://www.xiaohongshu.com/explore/64f1c2a3000000001f00abcd",
                PlatformId::Xiaohongshu,
            ),
            ("https://haokan.baidu.com/v?vid=1234567890123456789", PlatformId::Haokan),
            ("https://video.weishi.qq.com/abc", PlatformId::Weishi),
            ("https://h5.weishi.qq.com/weishi/feed/76ZAsdFe1OoAbc", PlatformId::Weishi),
            ("https://www.pearvideo.com/video_1790123", PlatformId::Pear),
            ("https://h5.pipigx.com/pp/post/593847261?mid=1", PlatformId::Pipigaoxiao),
        ];

        for (input, expected) in cases {
            assert_eq!(platform_of(input), Ok(expected), "input: {}", input);
        }
    }

    #[test]
    fn test_share_text_wrappers() {
        let detection = PlatformDetector::new()
            .detect("快来看这个视频 https://v.douyin.com/ABCDE/ 复制此链接，打开抖音搜索")
            .unwrap();
        assert_eq!(detection.platform, PlatformId::Douyin);
        assert_eq!(detection.url, "https://v.douyin.com/ABCDE/");

        let detection = PlatformDetector::new()
            .detect("【标题】https://b23.tv/AbC123。")
            .unwrap();
        assert_eq!(detection.url, "https://b23.tv/AbC123");

        assert_eq!(
            platform_of("看看 v.kuaishou.com/Xyz9 吧"),
            Ok(PlatformId::Kuaishou)
        );
        assert_eq!(platform_of("BV1L9Uoa9EUx"), Ok(PlatformId::Bilibili));
    }

    #[test]
    fn test_unrecognized_inputs() {
        assert_eq!(platform_of("http://example.com/not-a-video"), Err(DetectError::NotFound));
        assert_eq!(platform_of("no links here"), Err(DetectError::NotFound));
        assert_eq!(platform_of("https://t.cn/A6abcd"), Err(DetectError::NotFound));
        assert_eq!(platform_of(""), Err(DetectError::NotFound));
    }

    #[test]
    fn test_regex_fallback_on_unknown_host() {
        assert_eq!(
            platform_of("https://mirror.example/video/BV1L9Uoa9EUx"),
            Ok(PlatformId::Bilibili)
        );
        assert_eq!(
            platform_of("https://mirror.example/detail_1790123"),
            Ok(PlatformId::Pear)
        );
    }

    #[test]
    fn test_clean_url() {
        assert_eq!(
            clean_url(
                PlatformId::Xiaohongshu,
                "https://www.xiaohongshu.com/explore/64f1c2a3000000001f00abcd?xsec_token=T1&share_id=9&xsec_source=pc_share"
            ),
            "https://www.xiaohongshu.com/explore/64f1c2a3000000001f00abcd?xsec_token=T1&xsec_source=pc_share"
        );
        assert_eq!(
            clean_url(PlatformId::Kuaishou, "https://www.kuaishou.com/short-video/3xabc?utm=1#top"),
            "https://www.kuaishou.com/short-video/3xabc"
        );
        assert_eq!(
            clean_url(PlatformId::Haokan, "https://haokan.baidu.com/v?vid=1&pd=pc"),
            "https://haokan.baidu.com/v?vid=1&pd=pc"
        );
    }

    #[test]
    fn test_config_overrides_rules() {
        let config = Config::from_toml_str(
            r#"
            [platforms.pear]
            domains = ["pear.example"]
            patterns = ["(unclosed"]
            "#,
        )
        .unwrap();
        let detector = PlatformDetector::from_config(&config);
        assert_eq!(
            detector.classify("https://pear.example/anything"),
            Some(PlatformId::Pear)
        );
        assert_eq!(detector.classify("https://www.pearvideo.com/video_1"), None);
    }

    #[test]
    fn test_every_platform_has_rules() {
        let detector = PlatformDetector::new();
        assert_eq!(detector.platforms().collect::<Vec<_>>(), PlatformId::ALL.to_vec());
    }
}
