use crate::media::PlatformId;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub http: HttpConfig,
    pub cache: CacheConfig,
    pub download: DownloadConfig,
    pub signing: SigningConfig,
    pub ranking: RankingConfig,
    /// Keyed by platform name (`douyin`, `bilibili`, ...).
    pub platforms: HashMap<String, PlatformOverride>,
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path))?;
        Self::from_toml_str(&content).with_context(|| format!("Invalid config file {}", path))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn get_logging_format(&self) -> &str {
        &self.logging.format
    }

    pub fn platform_override(&self, platform: PlatformId) -> Option<&PlatformOverride> {
        self.platforms.get(platform.as_str())
    }

    /// `[platforms.<name>]` sections that match no supported platform.
    pub fn unknown_platforms(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .platforms
            .keys()
            .map(String::as_str)
            .filter(|name| PlatformId::from_str(name).is_err())
            .collect();
        names.sort_unstable();
        names
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: "json".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub max_redirects: usize,
    pub max_body_bytes: u64,
    /// Rotated round robin when a request carries no User-Agent of its own.
    pub user_agents: Vec<String>,
    pub proxy: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            timeout_secs: 30,
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 8_000,
            max_redirects: 5,
            max_body_bytes: 8 * 1024 * 1024,
            user_agents: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/128.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Safari/605.1.15".to_string(),
            ],
            proxy: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 600 }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DownloadConfig {
    pub output_dir: PathBuf,
    /// Overall limit for one download, 0 disables it.
    pub timeout_secs: u64,
    /// Largest accepted media file, 0 disables the check.
    pub max_file_bytes: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("downloads"),
            timeout_secs: 0,
            max_file_bytes: 0,
        }
    }
}

impl DownloadConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    pub fn max_file_bytes(&self) -> Option<u64> {
        (self.max_file_bytes > 0).then_some(self.max_file_bytes)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SigningConfig {
    pub device_id: String,
    pub bilibili_img_key: Option<String>,
    pub bilibili_sub_key: Option<String>,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            device_id: "vidgrab-device".to_string(),
            bilibili_img_key: None,
            bilibili_sub_key: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RankPolicyName {
    #[default]
    WatermarkFreeFirst,
    HighestQualityFirst,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct RankingConfig {
    pub policy: RankPolicyName,
}

/// Operator patches for one platform. Anything left unset keeps the built-in
/// default.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct PlatformOverride {
    pub domains: Option<Vec<String>>,
    pub short_links: Option<Vec<String>>,
    pub patterns: Option<Vec<String>>,
    pub endpoints: HashMap<String, String>,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub cookie: Option<String>,
    pub headers: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_empty() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.get_logging_format(), "json");
        assert_eq!(config.http.max_attempts, 3);
        assert_eq!(config.cache.ttl(), Duration::from_secs(600));
        assert_eq!(config.download.timeout(), None);
        assert_eq!(config.ranking.policy, RankPolicyName::WatermarkFreeFirst);
    }

    #[test]
    fn test_parse_full_file() {
        let config = Config::from_toml_str(
            r#"
            [logging]
            format = "text"

            [http]
            max_attempts = 5
            proxy = "http://127.0.0.1:8080"

            [cache]
            ttl_secs = 30

            [download]
            output_dir = "/tmp/videos"
            timeout_secs = 120

            [signing]
            device_id = "abc"
            bilibili_img_key = "img"

            [ranking]
            policy = "highest_quality_first"

            [platforms.douyin]
            domains = ["douyin.com", "douyin.cn"]
            referer = "https://www.douyin.com/"

            [platforms.douyin.endpoints]
            share_page = "https://m.douyin.example/share/{id}"

            [platforms.bilibili.headers]
            Origin = "https://www.bilibili.com"
            "#,
        )
        .unwrap();

        assert_eq!(config.get_logging_format(), "text");
        assert_eq!(config.http.max_attempts, 5);
        assert_eq!(config.http.connect_timeout_secs, 10);
        assert_eq!(config.http.proxy.as_deref(), Some("http://127.0.0.1:8080"));
        assert_eq!(config.cache.ttl_secs, 30);
        assert_eq!(config.download.output_dir, PathBuf::from("/tmp/videos"));
        assert_eq!(config.download.timeout(), Some(Duration::from_secs(120)));
        assert_eq!(config.signing.bilibili_img_key.as_deref(), Some("img"));
        assert_eq!(config.ranking.policy, RankPolicyName::HighestQualityFirst);

        let douyin = config.platform_override(PlatformId::Douyin).unwrap();
        assert_eq!(douyin.domains.as_ref().unwrap().len(), 2);
        assert_eq!(
            douyin.endpoints.get("share_page").map(String::as_str),
            Some("https://m.douyin.example/share/{id}")
        );
        let bilibili = config.platform_override(PlatformId::Bilibili).unwrap();
        assert_eq!(bilibili.headers.len(), 1);
        assert!(config.platform_override(PlatformId::Pear).is_none());
    }

    #[test]
    fn test_unknown_platform_is_tolerated() {
        let config = Config::from_toml_str(
            "[platforms.myspace]\nreferer = \"x\"\n[platforms.douyin]\nreferer = \"y\"\n[platforms.friendster]\n",
        )
        .unwrap();
        assert_eq!(config.platforms.len(), 3);
        assert_eq!(config.unknown_platforms(), vec!["friendster", "myspace"]);
        assert!(config.platform_override(PlatformId::Douyin).is_some());
    }

    #[test]
    fn test_invalid_toml_rejected() {
        assert!(Config::from_toml_str("[http]\nmax_attempts = \"many\"").is_err());
    }
}
