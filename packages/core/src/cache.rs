use std::future::Future;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

/// Shared TTL cache for one clonable upstream response, such as the
/// provider's country list served to every page load.
pub struct ResponseCache<T: Clone> {
    slot: RwLock<Option<(T, Instant)>>,
    ttl: Duration,
}

impl<T: Clone> ResponseCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slot: RwLock::new(None),
            ttl,
        }
    }

    /// Cached value, only while still within the TTL.
    pub async fn get(&self) -> Option<T> {
        let slot = self.slot.read().await;
        match slot.as_ref() {
            Some((value, cached_at)) if cached_at.elapsed() <= self.ttl => Some(value.clone()),
            _ => None,
        }
    }

    pub async fn set(&self, value: T) {
        *self.slot.write().await = Some((value, Instant::now()));
    }

    pub async fn invalidate(&self) {
        *self.slot.write().await = None;
    }

    /// Return the fresh cached value, or run `refresh` and cache its
    /// success. Errors are passed through and leave the cache untouched.
    pub async fn get_or_refresh<F, Fut, E>(&self, refresh: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get().await {
            return Ok(value);
        }
        let value = refresh().await?;
        self.set(value.clone()).await;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn get_returns_none_when_cache_is_empty() {
        let cache = ResponseCache::<u64>::new(Duration::from_secs(5));
        assert!(cache.get().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn value_expires_after_ttl() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        cache.set(42_u64).await;
        assert_eq!(cache.get().await, Some(42));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get().await.is_none());
    }

    #[tokio::test]
    async fn invalidate_clears_cached_value() {
        let cache = ResponseCache::new(Duration::from_secs(5));
        cache.set(42_u64).await;
        cache.invalidate().await;
        assert!(cache.get().await.is_none());
    }

    #[tokio::test]
    async fn refresh_runs_once_while_fresh() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value: Result<u64, String> = cache
                .get_or_refresh(|| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
                .await;
            assert_eq!(value, Ok(7));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refresh_error_is_not_cached() {
        let cache = ResponseCache::<u64>::new(Duration::from_secs(60));

        let first: Result<u64, &str> = cache.get_or_refresh(|| async { Err("upstream down") }).await;
        assert_eq!(first, Err("upstream down"));

        let second: Result<u64, &str> = cache.get_or_refresh(|| async { Ok(3) }).await;
        assert_eq!(second, Ok(3));
    }
}
