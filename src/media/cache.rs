use super::error::ResolveError;
use super::types::{CacheKey, VideoInfo};
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::debug;

type Flight = Arc<OnceCell<Result<VideoInfo, ResolveError>>>;

#[derive(Debug, Clone)]
struct CacheEntry {
    info: VideoInfo,
    inserted_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) < self.ttl
    }
}

/// Resolved videos keyed by (platform, video id). Expired entries are dropped
/// when looked up, never swept. Concurrent misses on one key share a single
/// resolution.
#[derive(Debug)]
pub struct CacheStore {
    entries: DashMap<CacheKey, CacheEntry>,
    in_flight: DashMap<CacheKey, Flight>,
    ttl: Duration,
}

impl CacheStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            in_flight: DashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<VideoInfo> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if entry.is_fresh(now) => return Some(entry.info.clone()),
            Some(_) => {}
            None => return None,
        }

        debug!("Evicting expired cache entry {}", key);
        self.entries.remove_if(key, |_, entry| !entry.is_fresh(now));
        None
    }

    pub fn insert(&self, key: CacheKey, info: VideoInfo) {
        self.insert_with_ttl(key, info, self.ttl);
    }

    pub fn insert_with_ttl(&self, key: CacheKey, info: VideoInfo, ttl: Duration) {
        self.entries.insert(
            key,
            CacheEntry {
                info,
                inserted_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Entries currently stored, expired ones included until looked up.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Return the cached value or run `resolve` once for all concurrent
    /// callers of the same key. Errors reach every waiter but are not stored.
    pub async fn get_or_resolve<F, Fut>(
        &self,
        key: CacheKey,
        resolve: F,
    ) -> Result<VideoInfo, ResolveError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<VideoInfo, ResolveError>>,
    {
        if let Some(hit) = self.get(&key) {
            debug!("Cache hit for {}", key);
            return Ok(hit);
        }

        let flight = self
            .in_flight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .value()
            .clone();

        let result = flight
            .get_or_init(|| async {
                if let Some(hit) = self.get(&key) {
                    return Ok(hit);
                }
                debug!("Resolving {}", key);
                let result = resolve().await;
                if let Ok(info) = &result {
                    self.insert(key.clone(), info.clone());
                }
                result
            })
            .await
            .clone();

        self.in_flight
            .remove_if(&key, |_, current| Arc::ptr_eq(current, &flight));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::types::{MediaVariant, PlatformId, VideoDraft};
    use crate::net::FetchError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn info(id: &str) -> VideoInfo {
        let mut draft = VideoDraft::default();
        draft.push_media(MediaVariant::new(format!("https://cdn.example/{}.mp4", id)));
        draft
            .finish(PlatformId::Bilibili, id, "fp".to_string())
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = CacheStore::new(Duration::from_secs(60));
        let key = CacheKey::new(PlatformId::Bilibili, "BV1");
        cache.insert(key.clone(), info("BV1"));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(cache.get(&key), Some(info("BV1")));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get(&key), None);
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_entry_ttl() {
        let cache = CacheStore::new(Duration::from_secs(600));
        let key = CacheKey::new(PlatformId::Pear, "1");
        cache.insert_with_ttl(key.clone(), info("1"), Duration::from_secs(5));
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(cache.get(&key).is_none());
    }

    #[tokio::test]
    async fn test_single_flight_coalesces_concurrent_callers() {
        let cache = Arc::new(CacheStore::new(Duration::from_secs(60)));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_resolve(CacheKey::new(PlatformId::Douyin, "7"), || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(info("7"))
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().video_id, "7");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let cache = CacheStore::new(Duration::from_secs(60));
        let key = CacheKey::new(PlatformId::Kuaishou, "k");

        let first = cache
            .get_or_resolve(key.clone(), || async {
                Err(ResolveError::Upstream(FetchError::Timeout))
            })
            .await;
        assert!(first.is_err());

        let second = cache
            .get_or_resolve(key.clone(), || async { Ok(info("k")) })
            .await;
        assert_eq!(second.unwrap().video_id, "k");
        assert!(cache.get(&key).is_some());
    }

    #[tokio::test]
    async fn test_distinct_keys_resolve_independently() {
        let cache = CacheStore::new(Duration::from_secs(60));
        let a = cache
            .get_or_resolve(CacheKey::new(PlatformId::Haokan, "a"), || async { Ok(info("a")) })
            .await
            .unwrap();
        let b = cache
            .get_or_resolve(CacheKey::new(PlatformId::Haokan, "b"), || async { Ok(info("b")) })
            .await
            .unwrap();
        assert_ne!(a.video_id, b.video_id);
        assert_eq!(cache.len(), 2);
    }
}
