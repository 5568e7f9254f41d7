use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sliding window in-memory rate limiter (pod local).
#[derive(Clone)]
pub struct InMemoryRateLimiter {
    store: Arc<DashMap<String, VecDeque<Instant>>>,
    pub enabled: bool,
}

impl InMemoryRateLimiter {
    pub fn new(enabled: bool) -> Self {
        Self { store: Arc::new(DashMap::new()), enabled }
    }

    /// Returns true if allowed, false if limited.
    pub fn check(&self, key: &str, limit: usize, window: Duration) -> bool {
        if !self.enabled { return true; }
        let now = Instant::now();
        let mut entry = self.store.entry(key.to_string()).or_default();
        while let Some(front) = entry.front() {
            if now.duration_since(*front) >= window { entry.pop_front(); } else { break; }
        }
        if entry.len() < limit {
            entry.push_back(now);
            true
        } else {
            false
        }
    }
}

/// Per-action limits derived from env.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub swap_limit: usize,
    pub swap_window: Duration,
    pub message_limit: usize,
    pub message_window: Duration,
    pub upload_limit: usize,
    pub upload_window: Duration,
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        fn usize_env(name: &str, default: usize) -> usize { std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default) }
        fn dur_env(name: &str, default: u64) -> Duration { Duration::from_secs(std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)) }
        Self {
            swap_limit: usize_env("RL_SWAP_LIMIT", 10),
            swap_window: dur_env("RL_SWAP_WINDOW", 3600),
            message_limit: usize_env("RL_MESSAGE_LIMIT", 30),
            message_window: dur_env("RL_MESSAGE_WINDOW", 60),
            upload_limit: usize_env("RL_UPLOAD_LIMIT", 20),
            upload_window: dur_env("RL_UPLOAD_WINDOW", 3600),
        }
    }
}

/// High level guard used by handlers; keys are per-user, not per-IP, since
/// every limited action requires auth anyway.
#[derive(Clone)]
pub struct RateLimiterFacade {
    pub limiter: InMemoryRateLimiter,
    pub cfg: RateLimitConfig,
}

impl RateLimiterFacade {
    pub fn new(limiter: InMemoryRateLimiter, cfg: RateLimitConfig) -> Self { Self { limiter, cfg } }
    pub fn allow_swap(&self, user_id: i64) -> bool { self.limiter.check(&format!("swap:{user_id}"), self.cfg.swap_limit, self.cfg.swap_window) }
    pub fn allow_message(&self, user_id: i64) -> bool { self.limiter.check(&format!("message:{user_id}"), self.cfg.message_limit, self.cfg.message_window) }
    pub fn allow_upload(&self, user_id: i64) -> bool { self.limiter.check(&format!("upload:{user_id}"), self.cfg.upload_limit, self.cfg.upload_window) }
}
