//! Fixed-window request limiting per client and endpoint class


use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{Config, ConfigError, RateLimitConfig};
use crate::{BidMatchError, Result};

/// Outcome of a single admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the current window resets
    pub reset_after: Duration,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

pub struct RateLimiter {
    classes: BTreeMap<String, RateLimitConfig>,
    windows: Mutex<HashMap<(String, String), Window>>,
}

impl RateLimiter {
    #[inline]
    pub fn new(classes: BTreeMap<String, RateLimitConfig>) -> Result<Self> {
        for (class, limit) in &classes {
            if limit.max_requests == 0 || limit.window_seconds == 0 {
                return Err(ConfigError::InvalidRateLimit(class.clone()).into());
            }
        }
        Ok(Self {
            classes,
            windows: Mutex::new(HashMap::new()),
        })
    }

    #[inline]
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.rate_limits.clone())
    }

    #[inline]
    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    /// Count one request from `client` against `class`.
    ///
    /// Rejected requests are not counted.
    #[inline]
    pub fn check(&self, class: &str, client: &str) -> Result<RateLimitDecision> {
        let limit = self.classes.get(class).ok_or_else(|| {
            BidMatchError::InvalidArgument(format!("unknown rate limit class '{}'", class))
        })?;
        let window_length = limit.window();
        let now = Instant::now();

        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let window = windows
            .entry((class.to_string(), client.to_string()))
            .or_insert(Window {
                started: now,
                count: 0,
            });

        if now.duration_since(window.started) >= window_length {
            window.started = now;
            window.count = 0;
        }

        let allowed = window.count < limit.max_requests;
        if allowed {
            window.count += 1;
        }
        let decision = RateLimitDecision {
            allowed,
            limit: limit.max_requests,
            remaining: limit.max_requests.saturating_sub(window.count),
            reset_after: window_length.saturating_sub(now.duration_since(window.started)),
        };
        drop(windows);

        if allowed {
            debug!(
                "Rate limit {} for {}: {} remaining",
                class, client, decision.remaining
            );
        } else {
            warn!(
                "Rate limit {} exceeded for {}; resets in {:?}",
                class, client, decision.reset_after
            );
        }
        Ok(decision)
    }

    /// Drop windows that have already elapsed, returning how many were removed
    #[inline]
    pub fn purge_idle(&self) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let before = windows.len();
        windows.retain(|(class, _), window| {
            self.classes
                .get(class)
                .is_some_and(|limit| now.duration_since(window.started) < limit.window())
        });
        before - windows.len()
    }

    /// Shortest configured window, the natural period for [`Self::spawn_sweeper`]
    #[inline]
    pub fn sweep_interval(&self) -> Option<Duration> {
        self.classes.values().map(RateLimitConfig::window).min()
    }

    /// Purge elapsed windows every `interval` until `cancel` fires
    #[inline]
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(interval) => {}
                }
                let purged = limiter.purge_idle();
                if purged > 0 {
                    debug!("Rate limit sweeper purged {} idle windows", purged);
                }
            }
            debug!("Rate limit sweeper stopped");
        })
    }

    #[inline]
    pub fn tracked_windows(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
