//! Fixed-window rate limiting.
//!
//! Each [`RateLimiter`] pairs a hot-swappable [`RateLimitPolicy`] with its own
//! [`RateLimitStore`]. The store owns the per-client counters and the
//! background task that sweeps expired ones.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time;

use crate::config::RateLimitPolicy;
use crate::http::request::request_id_of;
use crate::observability::metrics;
use crate::security::client_id::{resolve_client_id, PlatformIp};
use crate::security::error::GateError;

/// Wall-clock source in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync + 'static {
    fn now_millis(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_millis: u64) -> Self {
        Self { now: AtomicU64::new(start_millis) }
    }

    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Requests seen from one client in its current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitCounter {
    pub count: u32,
    pub reset_at_ms: u64,
}

/// Outcome of counting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allow { remaining: u32, reset_at_ms: u64 },
    Reject { retry_after_secs: u64, reset_at_ms: u64 },
}

struct Sweeper {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// In-memory counter store for one policy.
///
/// Counters are process-local. Running several gate processes behind a load
/// balancer gives each its own counts.
pub struct RateLimitStore {
    label: String,
    counters: DashMap<String, RateLimitCounter>,
    clock: Arc<dyn Clock>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl RateLimitStore {
    /// Create a store without a background sweeper.
    pub fn new(label: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            label: label.into(),
            counters: DashMap::new(),
            clock,
            sweeper: Mutex::new(None),
        }
    }

    /// Create a store and start sweeping expired counters every `sweep_interval`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(label: impl Into<String>, clock: Arc<dyn Clock>, sweep_interval: Duration) -> Arc<Self> {
        let store = Arc::new(Self::new(label, clock));
        let (stop, stopped) = oneshot::channel();
        let handle = tokio::spawn(sweep_loop(Arc::downgrade(&store), sweep_interval, stopped));

        tracing::debug!(
            store = %store.label,
            interval_secs = sweep_interval.as_secs(),
            "Rate limit sweeper started"
        );
        *store.sweeper.lock().unwrap_or_else(|e| e.into_inner()) = Some(Sweeper { stop, handle });
        store
    }

    /// Stop the sweeper and wait for it to exit. Counters are kept.
    pub async fn close(&self) {
        let sweeper = self.sweeper.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(Sweeper { stop, handle }) = sweeper {
            let _ = stop.send(());
            if let Err(e) = handle.await {
                tracing::warn!(store = %self.label, error = %e, "Rate limit sweeper ended abnormally");
            }
            tracing::debug!(store = %self.label, "Rate limit sweeper stopped");
        }
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|s| !s.handle.is_finished())
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Count a request from `key`.
    ///
    /// The entry stays locked for the whole read-modify-write, so concurrent
    /// requests for one key are serialised.
    pub fn hit(&self, key: &str, max_requests: u32, window: Duration) -> RateLimitDecision {
        let now = self.clock.now_millis();
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        let fresh = RateLimitCounter {
            count: 1,
            reset_at_ms: now.saturating_add(window_ms),
        };
        let allow_fresh = RateLimitDecision::Allow {
            remaining: max_requests.saturating_sub(1),
            reset_at_ms: fresh.reset_at_ms,
        };

        match self.counters.entry(key.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(fresh);
                allow_fresh
            }
            Entry::Occupied(mut slot) => {
                let counter = slot.get_mut();
                if counter.reset_at_ms <= now {
                    *counter = fresh;
                    allow_fresh
                } else if counter.count < max_requests {
                    counter.count += 1;
                    RateLimitDecision::Allow {
                        remaining: max_requests - counter.count,
                        reset_at_ms: counter.reset_at_ms,
                    }
                } else {
                    RateLimitDecision::Reject {
                        retry_after_secs: (counter.reset_at_ms - now).div_ceil(1000),
                        reset_at_ms: counter.reset_at_ms,
                    }
                }
            }
        }
    }

    /// Remove every counter whose window has ended. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.counters.len();
        self.counters.retain(|_, counter| counter.reset_at_ms > now);
        before.saturating_sub(self.counters.len())
    }

    pub fn get(&self, key: &str) -> Option<RateLimitCounter> {
        self.counters.get(key).map(|c| *c)
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

async fn sweep_loop(store: Weak<RateLimitStore>, interval: Duration, mut stop: oneshot::Receiver<()>) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(live) = store.upgrade() else {
                    break;
                };
                let removed = live.sweep();
                let remaining = live.len();
                metrics::record_rate_limit_sweep(&live.label, removed, remaining);
                if removed > 0 {
                    tracing::debug!(store = %live.label, removed, remaining, "Swept expired rate limit counters");
                }
            }
            _ = &mut stop => break,
        }
    }
}

/// A named policy bound to its counter store.
pub struct RateLimiter {
    name: &'static str,
    policy: ArcSwap<RateLimitPolicy>,
    store: Arc<RateLimitStore>,
    platform_ip: PlatformIp,
}

impl RateLimiter {
    pub fn new(name: &'static str, policy: RateLimitPolicy, store: Arc<RateLimitStore>) -> Self {
        Self {
            name,
            policy: ArcSwap::from_pointee(policy),
            store,
            platform_ip: PlatformIp::Peer,
        }
    }

    /// Take the platform client address from `source` instead of the TCP peer.
    pub fn with_platform_ip(mut self, source: PlatformIp) -> Self {
        self.platform_ip = source;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn policy(&self) -> Arc<RateLimitPolicy> {
        self.policy.load_full()
    }

    /// Replace the policy. Existing windows keep their reset time.
    pub fn update_policy(&self, policy: RateLimitPolicy) {
        if *self.policy.load_full() != policy {
            tracing::info!(
                limiter = self.name,
                max_requests = policy.max_requests,
                window_secs = policy.window_secs,
                "Rate limit policy updated"
            );
            self.policy.store(Arc::new(policy));
        }
    }

    pub fn store(&self) -> &Arc<RateLimitStore> {
        &self.store
    }

    /// Count a request from `client_id` against the current policy.
    pub fn check(&self, client_id: &str) -> Result<(), GateError> {
        let policy = self.policy.load();
        match self.store.hit(client_id, policy.max_requests, Duration::from_secs(policy.window_secs)) {
            RateLimitDecision::Allow { .. } => Ok(()),
            RateLimitDecision::Reject { retry_after_secs, reset_at_ms } => Err(GateError::RateLimited {
                message: policy.message.clone(),
                limit: policy.max_requests,
                retry_after_secs,
                reset_at_secs: reset_at_ms.div_ceil(1000),
            }),
        }
    }
}

/// Middleware that counts every request against the limiter in its state.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let platform_ip = limiter.platform_ip.lookup(peer, request.headers());
    let client_id = resolve_client_id(platform_ip, request.headers());

    match limiter.check(&client_id) {
        Ok(()) => next.run(request).await,
        Err(err) => {
            tracing::warn!(
                request_id = %request_id_of(&request),
                client = %client_id,
                limiter = limiter.name(),
                path = %request.uri().path(),
                "Rate limit exceeded"
            );
            metrics::record_rate_limited(limiter.name());
            err.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn store_at(start: u64) -> (Arc<ManualClock>, RateLimitStore) {
        let clock = Arc::new(ManualClock::new(start));
        let store = RateLimitStore::new("test", clock.clone());
        (clock, store)
    }

    fn policy(max_requests: u32, window_secs: u64) -> RateLimitPolicy {
        RateLimitPolicy {
            max_requests,
            window_secs,
            message: "slow down".into(),
        }
    }

    #[test]
    fn test_allows_up_to_max_then_rejects() {
        let (_clock, store) = store_at(1_000);
        let window = Duration::from_secs(60);

        for i in 0..5 {
            let decision = store.hit("1.2.3.4", 5, window);
            assert_eq!(
                decision,
                RateLimitDecision::Allow { remaining: 4 - i, reset_at_ms: 61_000 }
            );
        }
        assert!(matches!(store.hit("1.2.3.4", 5, window), RateLimitDecision::Reject { .. }));
        assert_eq!(store.get("1.2.3.4").unwrap().count, 5);
    }

    #[test]
    fn test_window_expiry_starts_fresh_window() {
        let (clock, store) = store_at(0);
        let window = Duration::from_secs(60);
        for _ in 0..6 {
            store.hit("a", 5, window);
        }

        clock.set(60_000);
        assert_eq!(
            store.hit("a", 5, window),
            RateLimitDecision::Allow { remaining: 4, reset_at_ms: 120_000 }
        );
        assert_eq!(store.get("a"), Some(RateLimitCounter { count: 1, reset_at_ms: 120_000 }));
    }

    #[test]
    fn test_identifiers_are_independent() {
        let (_clock, store) = store_at(0);
        let window = Duration::from_secs(60);
        store.hit("a", 1, window);
        assert!(matches!(store.hit("a", 1, window), RateLimitDecision::Reject { .. }));
        assert!(matches!(store.hit("b", 1, window), RateLimitDecision::Allow { .. }));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_documented_scenario() {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(RateLimitStore::new("auth", clock.clone()));
        let limiter = RateLimiter::new("auth", policy(5, 60), store);

        for _ in 0..5 {
            assert_eq!(limiter.check("1.2.3.4"), Ok(()));
        }

        clock.set(30_000);
        assert_eq!(
            limiter.check("1.2.3.4"),
            Err(GateError::RateLimited {
                message: "slow down".into(),
                limit: 5,
                retry_after_secs: 30,
                reset_at_secs: 60,
            })
        );

        clock.set(61_000);
        assert_eq!(limiter.check("1.2.3.4"), Ok(()));
        assert_eq!(limiter.store().get("1.2.3.4").unwrap().count, 1);
    }

    #[test]
    fn test_huge_window_saturates_instead_of_wrapping() {
        let (_clock, store) = store_at(1_700_000_000_000);
        let window = Duration::from_secs(i64::MAX as u64);

        assert_eq!(
            store.hit("a", 1, window),
            RateLimitDecision::Allow { remaining: 0, reset_at_ms: u64::MAX }
        );
        assert!(matches!(store.hit("a", 1, window), RateLimitDecision::Reject { .. }));
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let (clock, store) = store_at(0);
        let window = Duration::from_secs(10);
        store.hit("a", 1, window);
        clock.set(9_001);
        assert_eq!(
            store.hit("a", 1, window),
            RateLimitDecision::Reject { retry_after_secs: 1, reset_at_ms: 10_000 }
        );
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let (clock, store) = store_at(0);
        store.hit("old", 5, Duration::from_secs(10));
        clock.set(5_000);
        store.hit("new", 5, Duration::from_secs(10));

        clock.set(10_000);
        assert_eq!(store.sweep(), 1);
        assert!(store.get("old").is_none());
        assert!(store.get("new").is_some());
    }

    #[test]
    fn test_policy_update_applies_to_next_check() {
        let (_clock, store) = store_at(0);
        let limiter = RateLimiter::new("api", policy(10, 60), Arc::new(store));
        for _ in 0..3 {
            assert!(limiter.check("c").is_ok());
        }

        limiter.update_policy(policy(3, 60));
        assert!(limiter.check("c").is_err());
        assert_eq!(limiter.policy().max_requests, 3);
    }

    #[test]
    fn test_concurrent_hits_never_exceed_max() {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(RateLimitStore::new("race", clock));
        let window = Duration::from_secs(60);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    (0..50)
                        .filter(|_| matches!(store.hit("shared", 100, window), RateLimitDecision::Allow { .. }))
                        .count()
                })
            })
            .collect();

        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 100);
        assert_eq!(store.get("shared").unwrap().count, 100);
    }

    #[tokio::test]
    async fn test_sweeper_runs_and_closes() {
        let clock = Arc::new(ManualClock::new(0));
        let store = RateLimitStore::open("sweep", clock.clone(), Duration::from_millis(20));
        store.hit("gone", 5, Duration::from_secs(1));
        assert!(store.is_sweeping());

        clock.advance(Duration::from_secs(2));
        time::sleep(Duration::from_millis(150)).await;
        assert!(store.is_empty());

        store.close().await;
        assert!(!store.is_sweeping());

        // Closed stores keep counting, they just stop sweeping.
        store.hit("kept", 5, Duration::from_secs(1));
        clock.advance(Duration::from_secs(2));
        time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.len(), 1);
    }
}
