//! Per-client token-bucket rate limiting.
//!
//! Buckets live in one map owned by the [`RateLimiter`]. The map is bounded:
//! when a new client arrives at capacity a batch of arbitrary entries is
//! evicted first, and a background sweep trims the map whenever it is more
//! than half full. Eviction is approximate; an evicted client simply starts
//! again with a full bucket.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::RateLimitConfig;
use crate::http::response::ErrorEnvelope;
use crate::observability::MetricsRecorder;
use crate::security::auth::normalize_path;
use crate::security::headers::client_key;

/// Smallest batch removed by a single eviction pass.
const MIN_EVICTION_BATCH: usize = 10;

/// A single client's bucket.
#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_update: now,
        }
    }

    fn try_acquire(&mut self, now: Instant, capacity: f64, refill_rate: f64) -> bool {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();

        // Refill tokens
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

type Buckets = Arc<RwLock<HashMap<String, TokenBucket>>>;

/// Bounded per-client token-bucket limiter.
pub struct RateLimiter {
    buckets: Buckets,
    burst: f64,
    refill_per_sec: f64,
    max_clients: usize,
    close_tx: watch::Sender<bool>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl RateLimiter {
    /// Create a limiter and, when called inside a tokio runtime, start its
    /// eviction sweep.
    pub fn new(config: RateLimitConfig) -> Self {
        let quota = if config.requests_per_window <= 0 {
            1
        } else {
            config.requests_per_window
        };
        let window_secs = if config.window_secs <= 0 {
            60
        } else {
            config.window_secs
        };
        let burst = if quota > 10 { quota / 3 + 2 } else { quota };
        let max_clients = config.max_clients.max(1);

        let buckets: Buckets = Arc::new(RwLock::new(HashMap::new()));
        let (close_tx, close_rx) = watch::channel(false);

        let sweeper = match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let interval = Duration::from_secs(config.sweep_interval_secs.max(1));
                Some(handle.spawn(sweep_loop(
                    buckets.clone(),
                    max_clients,
                    interval,
                    close_rx,
                )))
            }
            Err(_) => {
                tracing::warn!("No tokio runtime; rate limit sweep disabled");
                None
            }
        };

        Self {
            buckets,
            burst: burst as f64,
            refill_per_sec: quota as f64 / window_secs as f64,
            max_clients,
            close_tx,
            sweeper: Mutex::new(sweeper),
        }
    }

    /// Take one token for `client`. Returns false when the bucket is empty.
    pub fn allow(&self, client: &str) -> bool {
        let now = Instant::now();
        let mut evicted = 0;

        let allowed = {
            let mut buckets = self.buckets.write();
            match buckets.get_mut(client) {
                Some(bucket) => bucket.try_acquire(now, self.burst, self.refill_per_sec),
                None => {
                    if buckets.len() >= self.max_clients {
                        evicted = evict_batch(&mut buckets);
                    }
                    let mut bucket = TokenBucket::new(self.burst, now);
                    let allowed = bucket.try_acquire(now, self.burst, self.refill_per_sec);
                    buckets.insert(client.to_string(), bucket);
                    allowed
                }
            }
        };

        if evicted > 0 {
            tracing::debug!(evicted, "Rate limiter at capacity, evicted clients");
        }
        allowed
    }

    /// Stop the background sweep. Idempotent.
    pub fn close(&self) {
        if !self.close_tx.send_replace(true) {
            tracing::debug!("Rate limiter closed");
        }
    }

    /// Close and wait for the sweep task to finish.
    pub async fn shutdown(&self) {
        self.close();
        let handle = self.sweeper.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Rate limit sweep task failed");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.close_tx.borrow()
    }

    pub fn tracked_clients(&self) -> usize {
        self.buckets.read().len()
    }

    pub fn burst(&self) -> f64 {
        self.burst
    }

    pub fn refill_per_sec(&self) -> f64 {
        self.refill_per_sec
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.close();
    }
}

/// Remove `max(len / 10, MIN_EVICTION_BATCH)` entries, capped at `len`.
fn evict_batch(buckets: &mut HashMap<String, TokenBucket>) -> usize {
    let count = (buckets.len() / 10).max(MIN_EVICTION_BATCH).min(buckets.len());
    let victims: Vec<String> = buckets.keys().take(count).cloned().collect();
    for key in &victims {
        buckets.remove(key);
    }
    victims.len()
}

async fn sweep_loop(
    buckets: Buckets,
    max_clients: usize,
    interval: Duration,
    mut close_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let (evicted, remaining) = {
                    let mut buckets = buckets.write();
                    if buckets.len() > max_clients / 2 {
                        (evict_batch(&mut buckets), buckets.len())
                    } else {
                        (0, buckets.len())
                    }
                };
                if evicted > 0 {
                    tracing::debug!(evicted, remaining, "Rate limit sweep evicted clients");
                }
            }
            _ = close_rx.changed() => break,
        }
    }

    tracing::debug!("Rate limit sweep stopped");
}

/// State for [`rate_limit_middleware`].
#[derive(Clone)]
pub struct RateLimitState {
    pub limiter: Arc<RateLimiter>,
    pub metrics: Arc<dyn MetricsRecorder>,
    /// Normalized path that is never limited (the health endpoint).
    pub exempt_path: String,
}

/// Middleware function for per-client rate limiting.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if normalize_path(request.uri().path()) == state.exempt_path {
        return next.run(request).await;
    }

    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = client_key(request.headers(), remote);

    let allowed = state.limiter.allow(&key);
    state.metrics.record_rate_limit(allowed);

    if allowed {
        next.run(request).await
    } else {
        tracing::warn!(client = %key, path = %request.uri().path(), "Rate limit exceeded");
        ErrorEnvelope::new(StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded")
            .with_request_id_from(request.headers())
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(quota: i64, window_secs: i64, max_clients: usize) -> RateLimitConfig {
        RateLimitConfig {
            requests_per_window: quota,
            window_secs,
            max_clients,
            sweep_interval_secs: 300,
        }
    }

    #[test]
    fn test_burst_derivation() {
        assert_eq!(RateLimiter::new(config(5, 60, 10)).burst(), 5.0);
        assert_eq!(RateLimiter::new(config(10, 60, 10)).burst(), 10.0);
        assert_eq!(RateLimiter::new(config(60, 60, 10)).burst(), 22.0);
        assert_eq!(RateLimiter::new(config(0, 60, 10)).burst(), 1.0);
        assert_eq!(RateLimiter::new(config(-5, 60, 10)).burst(), 1.0);
    }

    #[test]
    fn test_burst_then_reject() {
        let limiter = RateLimiter::new(config(60, 60, 100));
        for i in 0..22 {
            assert!(limiter.allow("10.0.0.1"), "request {i} should pass");
        }
        assert!(!limiter.allow("10.0.0.1"));
        // Other clients are unaffected.
        assert!(limiter.allow("10.0.0.2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_over_time() {
        let limiter = RateLimiter::new(config(60, 60, 100));
        for _ in 0..22 {
            assert!(limiter.allow("c"));
        }
        assert!(!limiter.allow("c"));

        // One token per second.
        tokio::time::advance(Duration::from_millis(1_000)).await;
        assert!(limiter.allow("c"));
        assert!(!limiter.allow("c"));

        // Refill is capped at burst.
        tokio::time::advance(Duration::from_secs(3_600)).await;
        for _ in 0..22 {
            assert!(limiter.allow("c"));
        }
        assert!(!limiter.allow("c"));
    }

    #[test]
    fn test_map_stays_bounded() {
        let limiter = RateLimiter::new(config(100, 60, 10_000));
        for i in 0..15_000 {
            limiter.allow(&format!("client-{i}"));
            assert!(limiter.tracked_clients() <= 10_000);
        }
        assert!(limiter.tracked_clients() > 9_000);
    }

    #[test]
    fn test_eviction_batch_size() {
        let mut map = HashMap::new();
        let now = Instant::now();
        for i in 0..5 {
            map.insert(i.to_string(), TokenBucket::new(1.0, now));
        }
        assert_eq!(evict_batch(&mut map), 5);
        assert!(map.is_empty());

        for i in 0..500 {
            map.insert(i.to_string(), TokenBucket::new(1.0, now));
        }
        assert_eq!(evict_batch(&mut map), 50);
        assert_eq!(map.len(), 450);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let limiter = RateLimiter::new(config(10, 60, 100));
        limiter.close();
        limiter.close();
        assert!(limiter.is_closed());

        tokio::time::timeout(Duration::from_secs(1), limiter.shutdown())
            .await
            .expect("sweep should stop promptly");
        limiter.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_trims_half_full_map() {
        let limiter = RateLimiter::new(RateLimitConfig {
            requests_per_window: 10,
            window_secs: 60,
            max_clients: 100,
            sweep_interval_secs: 1,
        });
        for i in 0..60 {
            limiter.allow(&format!("client-{i}"));
        }
        assert_eq!(limiter.tracked_clients(), 60);

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(limiter.tracked_clients(), 50);

        // At the half-way mark the sweep leaves the map alone.
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(limiter.tracked_clients(), 50);

        limiter.shutdown().await;
    }

    #[test]
    fn test_limiter_without_runtime() {
        let limiter = RateLimiter::new(config(1, 60, 10));
        assert!(limiter.allow("x"));
        assert!(!limiter.allow("x"));
        limiter.close();
    }
}
