//! Rate-limited logging (§4.7): gates repeated warnings to at most once per window per kind.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Guards `tracing::warn!` calls so a noisy failure mode logs at most once per window per
/// `kind`, instead of once per item.
pub struct RateLimiter {
    window: Duration,
    last_logged: Mutex<HashMap<&'static str, Instant>>,
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_logged: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` the first time it's called for `kind`, and then again only after
    /// `window` has elapsed since the last `true`.
    pub fn allow(&self, kind: &'static str) -> bool {
        let now = Instant::now();
        let mut last_logged = self.last_logged.lock().unwrap();
        match last_logged.get(kind) {
            Some(last) if now.duration_since(*last) < self.window => false,
            _ => {
                last_logged.insert(kind, now);
                true
            }
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}
