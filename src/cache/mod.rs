//! Fan-out cache: a newest-first list store that only shortens the time until
//! other viewers see a new chat message. It is never the source of truth.
//!
//! Every call tries the primary backend under a timeout and, on any error or
//! timeout, replays the same operation against the fallback backend.

mod memory;
mod redis;
mod rest;

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use self::memory::MemoryBackend;
pub use self::redis::RedisBackend;
pub use self::rest::RestBackend;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("{backend} timed out after {after:?}")]
    Timeout {
        backend: &'static str,
        after: Duration,
    },

    #[error("{backend} error: {message}")]
    Backend {
        backend: &'static str,
        message: String,
    },
}

impl CacheError {
    pub fn backend(backend: &'static str, err: impl std::fmt::Display) -> Self {
        CacheError::Backend {
            backend,
            message: err.to_string(),
        }
    }
}

/// List operations with Redis semantics. Indexes are inclusive and may be
/// negative (counted from the tail).
#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn lpush(&self, key: &str, value: &str) -> Result<(), CacheError>;

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<(), CacheError>;

    async fn lrange(&self, key: &str, start: isize, stop: isize)
        -> Result<Vec<String>, CacheError>;
}

enum CacheOp<'a> {
    Push { key: &'a str, value: &'a str },
    Trim { key: &'a str, start: isize, stop: isize },
    Range { key: &'a str, start: isize, stop: isize },
}

enum CacheReply {
    Done,
    Items(Vec<String>),
}

impl CacheOp<'_> {
    fn name(&self) -> &'static str {
        match self {
            CacheOp::Push { .. } => "lpush",
            CacheOp::Trim { .. } => "ltrim",
            CacheOp::Range { .. } => "lrange",
        }
    }

    async fn apply(&self, backend: &dyn CacheBackend) -> Result<CacheReply, CacheError> {
        match *self {
            CacheOp::Push { key, value } => backend.lpush(key, value).await.map(|_| CacheReply::Done),
            CacheOp::Trim { key, start, stop } => {
                backend.ltrim(key, start, stop).await.map(|_| CacheReply::Done)
            }
            CacheOp::Range { key, start, stop } => {
                backend.lrange(key, start, stop).await.map(CacheReply::Items)
            }
        }
    }
}

pub struct FanoutCache {
    primary: Option<Arc<dyn CacheBackend>>,
    fallback: Arc<dyn CacheBackend>,
    timeout: Duration,
    retry_primary_after: Duration,
    started: Instant,
    /// Milliseconds since `started` before which the primary is skipped.
    /// Shared across requests without coordination: concurrent callers may
    /// race on it and at worst each pay one extra primary timeout.
    skip_primary_until: AtomicU64,
}

impl FanoutCache {
    pub fn new(
        primary: Option<Arc<dyn CacheBackend>>,
        fallback: Arc<dyn CacheBackend>,
        timeout: Duration,
        retry_primary_after: Duration,
    ) -> Self {
        Self {
            primary,
            fallback,
            timeout,
            retry_primary_after,
            started: Instant::now(),
            skip_primary_until: AtomicU64::new(0),
        }
    }

    /// Single in-process backend, for tests and local development.
    pub fn in_memory() -> Self {
        Self::new(
            None,
            Arc::new(MemoryBackend::default()),
            Duration::from_secs(1),
            Duration::ZERO,
        )
    }

    pub async fn push(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.execute(CacheOp::Push { key, value }).await.map(|_| ())
    }

    pub async fn trim(&self, key: &str, start: isize, stop: isize) -> Result<(), CacheError> {
        self.execute(CacheOp::Trim { key, start, stop })
            .await
            .map(|_| ())
    }

    pub async fn range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, CacheError> {
        match self.execute(CacheOp::Range { key, start, stop }).await? {
            CacheReply::Items(items) => Ok(items),
            CacheReply::Done => Ok(Vec::new()),
        }
    }

    /// Push `value` and keep only the `keep` newest entries of `key`.
    pub async fn push_bounded(&self, key: &str, value: &str, keep: usize) -> Result<(), CacheError> {
        self.push(key, value).await?;
        let stop = isize::try_from(keep).unwrap_or(isize::MAX).saturating_sub(1);
        self.trim(key, 0, stop).await
    }

    /// Whether the advisory flag currently routes calls straight to the fallback.
    pub fn prefers_fallback(&self) -> bool {
        self.primary.is_none() || self.elapsed_ms() < self.skip_primary_until.load(Ordering::Relaxed)
    }

    async fn execute(&self, op: CacheOp<'_>) -> Result<CacheReply, CacheError> {
        if let Some(primary) = self.primary.as_ref().filter(|_| !self.prefers_fallback()) {
            match tokio::time::timeout(self.timeout, op.apply(primary.as_ref())).await {
                Ok(Ok(reply)) => {
                    self.skip_primary_until.store(0, Ordering::Relaxed);
                    return Ok(reply);
                }
                Ok(Err(e)) => {
                    tracing::warn!(op = op.name(), error = %e, "Primary cache failed, using {}", self.fallback.name());
                }
                Err(_) => {
                    let e = CacheError::Timeout {
                        backend: primary.name(),
                        after: self.timeout,
                    };
                    tracing::warn!(op = op.name(), error = %e, "Primary cache failed, using {}", self.fallback.name());
                }
            }
            let retry_at = self.elapsed_ms() + self.retry_primary_after.as_millis() as u64;
            self.skip_primary_until.store(retry_at, Ordering::Relaxed);
        }

        op.apply(self.fallback.as_ref()).await
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

/// Resolve Redis-style inclusive, possibly negative, list indexes against a
/// list of `len` items. `None` means the selection is empty.
pub(crate) fn resolve_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = isize::try_from(len).ok()?;
    if len == 0 {
        return None;
    }
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len {
        None
    } else {
        Some((start as usize, stop as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Backend that fails (or hangs) on every call and counts attempts.
    struct BrokenBackend {
        hang: bool,
        calls: AtomicUsize,
    }

    impl BrokenBackend {
        fn failing() -> Self {
            Self {
                hang: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn hanging() -> Self {
            Self {
                hang: true,
                calls: AtomicUsize::new(0),
            }
        }

        async fn fail(&self) -> Result<(), CacheError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            Err(CacheError::backend("broken", "connection refused"))
        }
    }

    #[async_trait]
    impl CacheBackend for BrokenBackend {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn lpush(&self, _key: &str, _value: &str) -> Result<(), CacheError> {
            self.fail().await
        }

        async fn ltrim(&self, _key: &str, _start: isize, _stop: isize) -> Result<(), CacheError> {
            self.fail().await
        }

        async fn lrange(
            &self,
            _key: &str,
            _start: isize,
            _stop: isize,
        ) -> Result<Vec<String>, CacheError> {
            self.fail().await.map(|_| Vec::new())
        }
    }

    #[test]
    fn resolve_range_matches_redis() {
        assert_eq!(resolve_range(5, 0, -1), Some((0, 4)));
        assert_eq!(resolve_range(5, 0, 99), Some((0, 4)));
        assert_eq!(resolve_range(5, -2, -1), Some((3, 4)));
        assert_eq!(resolve_range(5, -99, 1), Some((0, 1)));
        assert_eq!(resolve_range(5, 3, 1), None);
        assert_eq!(resolve_range(5, 5, 9), None);
        assert_eq!(resolve_range(5, 0, -6), None);
        assert_eq!(resolve_range(0, 0, -1), None);
    }

    #[tokio::test]
    async fn failing_primary_falls_back_transparently() {
        let primary = Arc::new(BrokenBackend::failing());
        let fallback = Arc::new(MemoryBackend::default());
        let cache = FanoutCache::new(
            Some(primary.clone()),
            fallback.clone(),
            Duration::from_millis(200),
            Duration::from_secs(60),
        );

        cache.push("k", "a").await.unwrap();
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
        assert!(cache.prefers_fallback());

        // The advisory flag now skips the primary entirely.
        cache.push("k", "b").await.unwrap();
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.range("k", 0, -1).await.unwrap(), vec!["b", "a"]);
    }

    #[tokio::test]
    async fn hanging_primary_is_cut_off_by_timeout() {
        let primary = Arc::new(BrokenBackend::hanging());
        let cache = FanoutCache::new(
            Some(primary.clone()),
            Arc::new(MemoryBackend::default()),
            Duration::from_millis(50),
            Duration::ZERO,
        );

        let started = Instant::now();
        cache.push("k", "a").await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));

        // With no retry delay each call probes the primary again.
        cache.push("k", "b").await.unwrap();
        assert_eq!(primary.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.range("k", 0, -1).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn healthy_primary_serves_everything() {
        let primary = Arc::new(MemoryBackend::default());
        let fallback = Arc::new(MemoryBackend::default());
        let cache = FanoutCache::new(
            Some(primary.clone()),
            fallback.clone(),
            Duration::from_millis(200),
            Duration::from_secs(60),
        );

        cache.push_bounded("k", "a", 100).await.unwrap();
        assert!(!cache.prefers_fallback());
        assert_eq!(primary.lrange("k", 0, -1).await.unwrap(), vec!["a"]);
        assert!(fallback.lrange("k", 0, -1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn both_backends_down_surfaces_error() {
        let cache = FanoutCache::new(
            Some(Arc::new(BrokenBackend::failing())),
            Arc::new(BrokenBackend::failing()),
            Duration::from_millis(50),
            Duration::ZERO,
        );
        assert!(cache.push("k", "a").await.is_err());
    }

    #[tokio::test]
    async fn push_bounded_keeps_newest() {
        let cache = FanoutCache::in_memory();
        for i in 0..10 {
            cache.push_bounded("k", &i.to_string(), 3).await.unwrap();
        }
        assert_eq!(cache.range("k", 0, -1).await.unwrap(), vec!["9", "8", "7"]);
    }
}
