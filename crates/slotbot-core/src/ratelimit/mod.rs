//! Token-bucket admission gates
//!
//! One [`KeyedLimiter`] holds an independent bucket per key. The same type backs
//! the process-wide gate for outbound chat API calls ([`GlobalLimiter`], a single
//! fixed key) and the per-conversation gate for inbound messages. Instances are
//! owned by the dispatcher and handed to tasks; there is no global registry.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use parking_lot::RwLock;
use slotbot_shared::config::RateLimitSettings;
use slotbot_shared::constants::GLOBAL_LIMITER_KEY;
use tracing::{debug, warn};

use crate::context::RequestContext;
use crate::error::DomainError;

/// Called with the limiter name whenever an admission has to wait.
pub type ExceededHook = Arc<dyn Fn(&'static str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimiterSettings {
    /// Tokens added per second; fractional rates are allowed.
    pub rate_per_sec: f64,
    /// Bucket capacity.
    pub burst: u32,
    /// Minimum idle time before a bucket may be evicted.
    pub idle_ttl: Duration,
}

impl LimiterSettings {
    pub fn new(rate_per_sec: f64, burst: u32, idle_ttl: Duration) -> Self {
        Self { rate_per_sec, burst, idle_ttl }
    }

    fn quota(&self) -> Result<Quota, DomainError> {
        if !(self.rate_per_sec.is_finite() && self.rate_per_sec > 0.0) {
            return Err(DomainError::InvalidInput(format!(
                "rate must be positive, got {}",
                self.rate_per_sec
            )));
        }
        let burst = NonZeroU32::new(self.burst)
            .ok_or_else(|| DomainError::InvalidInput("burst must be at least 1".into()))?;
        let period = Duration::try_from_secs_f64(1.0 / self.rate_per_sec).map_err(|_| {
            DomainError::InvalidInput(format!("rate is too low, got {}", self.rate_per_sec))
        })?;
        let quota = Quota::with_period(period)
            .ok_or_else(|| DomainError::InvalidInput("rate is too high".into()))?;
        Ok(quota.allow_burst(burst))
    }

    /// A bucket idle this long has refilled completely, so dropping it and
    /// recreating it later is indistinguishable from keeping it.
    fn eviction_threshold(&self) -> Result<Duration, DomainError> {
        let refill = Duration::try_from_secs_f64(f64::from(self.burst) / self.rate_per_sec)
            .map_err(|_| {
                DomainError::InvalidInput(format!(
                    "burst {} never refills at rate {}",
                    self.burst, self.rate_per_sec
                ))
            })?;
        Ok(self.idle_ttl.max(refill))
    }
}

struct Bucket {
    limiter: DefaultDirectRateLimiter,
    /// Milliseconds since the owning limiter's epoch.
    last_used: AtomicU64,
}

pub struct KeyedLimiter<K> {
    name: &'static str,
    settings: LimiterSettings,
    quota: Quota,
    idle_threshold: Duration,
    buckets: RwLock<HashMap<K, Arc<Bucket>>>,
    on_exceeded: Option<ExceededHook>,
    epoch: Instant,
}

impl<K> fmt::Debug for KeyedLimiter<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedLimiter")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .field("buckets", &self.buckets.read().len())
            .finish()
    }
}

impl<K> KeyedLimiter<K>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    pub fn new(name: &'static str, settings: LimiterSettings) -> Result<Self, DomainError> {
        Ok(Self {
            name,
            quota: settings.quota()?,
            idle_threshold: settings.eviction_threshold()?,
            settings,
            buckets: RwLock::new(HashMap::new()),
            on_exceeded: None,
            epoch: Instant::now(),
        })
    }

    pub fn with_exceeded_hook(mut self, hook: ExceededHook) -> Self {
        self.on_exceeded = Some(hook);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of live buckets.
    pub fn len(&self) -> usize {
        self.buckets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits until `key` has a token and consumes it.
    ///
    /// Fails with `Cancelled`/`Timeout` when the context fires first; no token
    /// is consumed in that case.
    pub async fn admit(&self, ctx: &RequestContext, key: &K) -> Result<(), DomainError> {
        ctx.check()?;

        let bucket = self.bucket(key);
        self.touch(&bucket);

        if bucket.limiter.check().is_err() {
            warn!(limiter = self.name, key = ?key, "message limit has been exceeded");
            if let Some(hook) = &self.on_exceeded {
                hook(self.name);
            }
            ctx.run(bucket.limiter.until_ready()).await?;
        }

        self.touch(&bucket);
        Ok(())
    }

    /// Admits, then runs `work`. On cancellation `work` is dropped unpolled.
    pub async fn run<F>(&self, ctx: &RequestContext, key: &K, work: F) -> Result<F::Output, DomainError>
    where
        F: Future,
    {
        self.admit(ctx, key).await?;
        Ok(work.await)
    }

    /// Removes buckets that are both fully refilled and not held by an
    /// in-flight admission. Returns how many were removed.
    pub fn evict_idle(&self) -> usize {
        let threshold = self.idle_threshold.as_millis() as u64;
        let now = self.now_millis();

        let mut buckets = self.buckets.write();
        let before = buckets.len();
        buckets.retain(|_, bucket| {
            Arc::strong_count(bucket) > 1
                || now.saturating_sub(bucket.last_used.load(Ordering::Relaxed)) < threshold
        });
        let evicted = before - buckets.len();
        if evicted > 0 {
            debug!(limiter = self.name, evicted, remaining = buckets.len(), "evicted idle buckets");
        }
        evicted
    }

    fn bucket(&self, key: &K) -> Arc<Bucket> {
        if let Some(bucket) = self.buckets.read().get(key) {
            return Arc::clone(bucket);
        }

        let mut buckets = self.buckets.write();
        // Another task may have created it between the two locks.
        let bucket = buckets.entry(key.clone()).or_insert_with(|| {
            Arc::new(Bucket {
                limiter: RateLimiter::direct(self.quota),
                last_used: AtomicU64::new(0),
            })
        });
        Arc::clone(bucket)
    }

    fn touch(&self, bucket: &Bucket) {
        bucket.last_used.store(self.now_millis(), Ordering::Relaxed);
    }

    fn now_millis(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

/// A single bucket shared by the whole process.
#[derive(Debug)]
pub struct GlobalLimiter {
    inner: KeyedLimiter<&'static str>,
}

impl GlobalLimiter {
    pub fn new(name: &'static str, settings: LimiterSettings) -> Result<Self, DomainError> {
        Ok(Self {
            inner: KeyedLimiter::new(name, settings)?,
        })
    }

    pub fn with_exceeded_hook(self, hook: ExceededHook) -> Self {
        Self {
            inner: self.inner.with_exceeded_hook(hook),
        }
    }

    pub async fn admit(&self, ctx: &RequestContext) -> Result<(), DomainError> {
        self.inner.admit(ctx, &GLOBAL_LIMITER_KEY).await
    }

    pub async fn run<F>(&self, ctx: &RequestContext, work: F) -> Result<F::Output, DomainError>
    where
        F: Future,
    {
        self.inner.run(ctx, &GLOBAL_LIMITER_KEY, work).await
    }
}

/// The two gates the bot needs: outbound API calls and per-conversation messages.
#[derive(Debug)]
pub struct BotLimiters {
    pub api: GlobalLimiter,
    pub conversations: KeyedLimiter<i64>,
}

impl BotLimiters {
    pub fn from_settings(
        settings: &RateLimitSettings,
        on_exceeded: Option<ExceededHook>,
    ) -> Result<Self, DomainError> {
        let idle = Duration::from_secs(settings.idle_eviction_secs);
        let mut api = GlobalLimiter::new(
            "api",
            LimiterSettings::new(settings.global_rps, settings.global_burst, idle),
        )?;
        let mut conversations = KeyedLimiter::new(
            "message",
            LimiterSettings::new(settings.message_rps, settings.message_burst, idle),
        )?;
        if let Some(hook) = on_exceeded {
            api = api.with_exceeded_hook(Arc::clone(&hook));
            conversations = conversations.with_exceeded_hook(hook);
        }
        Ok(Self { api, conversations })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn limiter(rate: f64, burst: u32) -> KeyedLimiter<i64> {
        KeyedLimiter::new("test", LimiterSettings::new(rate, burst, Duration::ZERO)).unwrap()
    }

    #[tokio::test]
    async fn test_back_to_back_admissions_are_spaced_by_refill_rate() {
        let limiter = limiter(20.0, 1);
        let ctx = RequestContext::new();

        let start = Instant::now();
        for _ in 0..5 {
            limiter.admit(&ctx, &1).await.unwrap();
        }
        // Four waits of 50ms each after the first free token.
        assert!(start.elapsed() >= Duration::from_millis(150), "took {:?}", start.elapsed());
    }

    #[tokio::test]
    async fn test_keys_have_independent_buckets() {
        let limiter = limiter(1.0, 1);
        let ctx = RequestContext::with_timeout(Duration::from_millis(200));

        limiter.admit(&ctx, &1).await.unwrap();
        limiter.admit(&ctx, &2).await.unwrap();
        limiter.admit(&ctx, &3).await.unwrap();
        assert_eq!(limiter.len(), 3);
    }

    #[tokio::test]
    async fn test_cancelled_context_skips_work() {
        let limiter = limiter(1.0, 1);
        let ctx = RequestContext::new();
        ctx.cancel();

        let mut ran = false;
        let res = limiter.run(&ctx, &1, async { ran = true }).await;
        assert_eq!(res, Err(DomainError::Cancelled));
        assert!(!ran);
    }

    #[tokio::test]
    async fn test_exhausted_bucket_times_out_and_fires_hook() {
        let fired = Arc::new(AtomicUsize::new(0));
        let limiter = limiter(1.0, 1).with_exceeded_hook({
            let fired = Arc::clone(&fired);
            Arc::new(move |name: &'static str| {
                assert_eq!(name, "test");
                fired.fetch_add(1, Ordering::SeqCst);
            })
        });

        limiter.admit(&RequestContext::new(), &9).await.unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        let ctx = RequestContext::with_timeout(Duration::from_millis(20));
        let res = limiter.admit(&ctx, &9).await;
        assert_eq!(res, Err(DomainError::Timeout));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_first_access_creates_one_bucket() {
        let limiter = Arc::new(limiter(1000.0, 100));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.admit(&RequestContext::new(), &42).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(limiter.len(), 1);
    }

    #[tokio::test]
    async fn test_evict_idle_drops_refilled_buckets() {
        let limiter = limiter(1000.0, 1);
        let ctx = RequestContext::new();
        limiter.admit(&ctx, &1).await.unwrap();
        limiter.admit(&ctx, &2).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(limiter.evict_idle(), 2);
        assert!(limiter.is_empty());

        // A fresh bucket starts full.
        limiter.admit(&ctx, &1).await.unwrap();
        assert_eq!(limiter.len(), 1);
    }

    #[tokio::test]
    async fn test_recent_buckets_survive_eviction() {
        let limiter = KeyedLimiter::<i64>::new(
            "test",
            LimiterSettings::new(1.0, 1, Duration::from_secs(600)),
        )
        .unwrap();
        limiter.admit(&RequestContext::new(), &1).await.unwrap();
        assert_eq!(limiter.evict_idle(), 0);
        assert_eq!(limiter.len(), 1);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        assert!(KeyedLimiter::<i64>::new("x", LimiterSettings::new(0.0, 1, Duration::ZERO)).is_err());
        assert!(KeyedLimiter::<i64>::new("x", LimiterSettings::new(-1.0, 1, Duration::ZERO)).is_err());
        assert!(KeyedLimiter::<i64>::new("x", LimiterSettings::new(5.0, 0, Duration::ZERO)).is_err());
    }

    #[test]
    fn test_unrepresentable_refill_period_rejected() {
        let res = KeyedLimiter::<i64>::new("x", LimiterSettings::new(1e-20, 1, Duration::ZERO));
        assert!(matches!(res, Err(DomainError::InvalidInput(_))));

        let settings = RateLimitSettings {
            global_rps: 30.0,
            global_burst: 30,
            message_rps: 1e-20,
            message_burst: 1,
            idle_eviction_secs: 600,
            sweep_interval_secs: 60,
        };
        assert!(matches!(
            BotLimiters::from_settings(&settings, None),
            Err(DomainError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_global_gate_shares_one_bucket() {
        let global = GlobalLimiter::new("api", LimiterSettings::new(20.0, 1, Duration::ZERO)).unwrap();
        let ctx = RequestContext::new();
        let start = Instant::now();
        assert_eq!(global.run(&ctx, async { 1 }).await, Ok(1));
        assert_eq!(global.run(&ctx, async { 2 }).await, Ok(2));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
