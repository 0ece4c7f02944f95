use super::cache::CacheStore;
use super::error::ResolveError;
use super::platforms::build_resolver;
use super::resolver::{Resolver, ResolverContext};
use super::types::{CacheKey, PlatformId, RankPolicy, VideoInfo};
use crate::config::Config;
use crate::net::loggable;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Routes a detected platform to its resolver. Cache lookup, single-flight
/// and ranking happen here so every resolver gets them the same way.
pub struct ResolverRegistry {
    resolvers: HashMap<PlatformId, Box<dyn Resolver>>,
    cache: Arc<CacheStore>,
    policy: RankPolicy,
}

impl ResolverRegistry {
    /// Registry with no resolvers, for callers that pick their own.
    pub fn empty(cache: Arc<CacheStore>) -> Self {
        Self {
            resolvers: HashMap::new(),
            cache,
            policy: RankPolicy::default(),
        }
    }

    /// Every built-in resolver, configured from `config`.
    pub fn new(config: &Config, ctx: ResolverContext, cache: Arc<CacheStore>) -> Self {
        let mut registry = Self::empty(cache).with_policy(config.ranking.policy.into());
        for platform in PlatformId::ALL {
            registry.register(build_resolver(platform, ctx.clone(), config));
        }
        registry
    }

    pub fn with_policy(mut self, policy: RankPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Add or replace the resolver for its platform.
    pub fn register(&mut self, resolver: Box<dyn Resolver>) {
        let platform = resolver.platform();
        if self.resolvers.insert(platform, resolver).is_some() {
            warn!("Replaced resolver for {}", platform);
        }
    }

    pub fn is_registered(&self, platform: PlatformId) -> bool {
        self.resolvers.contains_key(&platform)
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub async fn dispatch(&self, platform: PlatformId, url: &str) -> Result<VideoInfo, ResolveError> {
        let resolver = self
            .resolvers
            .get(&platform)
            .ok_or(ResolveError::UnsupportedPlatform(platform))?;

        let started = Instant::now();
        let canonical = resolver.canonical_id(url).await?;
        let key = CacheKey::new(platform, canonical.video_id.clone());

        let result = self
            .cache
            .get_or_resolve(key.clone(), || async {
                let mut info = resolver.fetch_info(&canonical).await?;
                self.policy.rank(&mut info.media);
                Ok(info)
            })
            .await;

        match &result {
            Ok(info) => info!(
                "Resolved {} with {} media variants in {:?}",
                key,
                info.media.len(),
                started.elapsed()
            ),
            Err(e) => warn!("Failed to resolve {} ({}): {}", key, loggable(url), e),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SigningConfig;
    use crate::detect::PlatformDetector;
    use crate::media::resolver::Canonical;
    use crate::media::types::{MediaVariant, VideoDraft};
    use crate::testutil::{bilibili_fetcher, FakeFetcher};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct StubResolver {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Resolver for StubResolver {
        fn platform(&self) -> PlatformId {
            PlatformId::Haokan
        }

        async fn canonical_id(&self, url: &str) -> Result<Canonical, ResolveError> {
            let video_id = url.rsplit('=').next().unwrap_or_default().to_string();
            Ok(Canonical {
                video_id,
                url: url.to_string(),
            })
        }

        async fn fetch_info(&self, target: &Canonical) -> Result<VideoInfo, ResolveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            if self.fail {
                return Err(ResolveError::NotFound(target.video_id.clone()));
            }
            let mut draft = VideoDraft::default();
            draft.push_media(MediaVariant::new("https://cdn.example/low.mp4").bitrate(Some(100)));
            draft.push_media(MediaVariant::new("https://cdn.example/wm.mp4").bitrate(Some(900)));
            draft.push_media(
                MediaVariant::new("https://cdn.example/clean.mp4")
                    .watermark_free(true)
                    .bitrate(Some(300)),
            );
            draft.finish(PlatformId::Haokan, &target.video_id, "fp".to_string())
        }
    }

    fn stub_registry(fail: bool) -> (ResolverRegistry, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ResolverRegistry::empty(Arc::new(CacheStore::new(Duration::from_secs(60))));
        registry.register(Box::new(StubResolver {
            calls: calls.clone(),
            fail,
        }));
        (registry, calls)
    }

    fn full_registry(fetcher: Arc<FakeFetcher>) -> ResolverRegistry {
        let ctx = ResolverContext::new(fetcher, SigningConfig::default());
        ResolverRegistry::new(
            &Config::default(),
            ctx,
            Arc::new(CacheStore::new(Duration::from_secs(600))),
        )
    }

    #[test]
    fn test_every_detected_platform_has_a_resolver() {
        let registry = full_registry(Arc::new(FakeFetcher::new()));
        for platform in PlatformDetector::new().platforms() {
            assert!(registry.is_registered(platform), "{} has no resolver", platform);
        }
    }

    #[tokio::test]
    async fn test_unregistered_platform() {
        let registry = ResolverRegistry::empty(Arc::new(CacheStore::new(Duration::from_secs(1))));
        let err = registry
            .dispatch(PlatformId::Pear, "https://www.pearvideo.com/video_1")
            .await
            .unwrap_err();
        assert_eq!(err, ResolveError::UnsupportedPlatform(PlatformId::Pear));
    }

    #[tokio::test]
    async fn test_ranks_with_policy() {
        let (registry, _) = stub_registry(false);
        let info = registry
            .dispatch(PlatformId::Haokan, "https://haokan.baidu.com/v?vid=1")
            .await
            .unwrap();
        let order: Vec<&str> = info.media.iter().map(|m| m.url.as_str()).collect();
        assert_eq!(
            order,
            vec![
                "https://cdn.example/clean.mp4",
                "https://cdn.example/wm.mp4",
                "https://cdn.example/low.mp4"
            ]
        );

        let (registry, _) = stub_registry(false);
        let registry = registry.with_policy(RankPolicy::HighestQualityFirst);
        let info = registry
            .dispatch(PlatformId::Haokan, "https://haokan.baidu.com/v?vid=1")
            .await
            .unwrap();
        assert_eq!(info.primary_url(), Some("https://cdn.example/wm.mp4"));
    }

    #[tokio::test]
    async fn test_concurrent_dispatch_resolves_once() {
        let (registry, calls) = stub_registry(false);
        let registry = Arc::new(registry);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    registry
                        .dispatch(PlatformId::Haokan, "https://haokan.baidu.com/v?vid=77")
                        .await
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().video_id, "77");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failures_are_retried_next_time() {
        let (registry, calls) = stub_registry(true);
        for _ in 0..2 {
            let err = registry
                .dispatch(PlatformId::Haokan, "https://haokan.baidu.com/v?vid=5")
                .await
                .unwrap_err();
            assert!(matches!(err, ResolveError::NotFound(_)));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(registry.cache().len(), 0);
    }

    #[tokio::test]
    async fn test_bilibili_second_dispatch_is_cached() {
        let fetcher = Arc::new(bilibili_fetcher());
        let registry = full_registry(fetcher.clone());
        let url = "https://www.bilibili.com/video/BV1L9Uoa9EUx";

        let first = registry.dispatch(PlatformId::Bilibili, url).await.unwrap();
        let calls_after_first = fetcher.calls();
        let second = registry.dispatch(PlatformId::Bilibili, url).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(fetcher.calls(), calls_after_first);
        assert_eq!(registry.cache().len(), 1);
    }
}
