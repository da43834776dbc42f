//! Fixed-window rate limiting for the auth request endpoint.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::time::interval;

type Clock = Arc<dyn Fn() -> Instant + Send + Sync>;

struct Window {
    count: u32,
    reset_at: Instant,
}

pub struct RateLimiter {
    requests: Mutex<HashMap<String, Window>>,
    limit: u32,
    window: Duration,
    clock: Clock,
}

impl RateLimiter {
    /// Construct and start the background sweeper. Must be called from
    /// within a tokio runtime.
    pub fn new(limit: u32, window: Duration) -> Arc<Self> {
        let limiter = Self::with_clock(limit, window, Arc::new(Instant::now));
        limiter.spawn_sweeper();
        limiter
    }

    /// Clock-injected constructor for tests; the sweeper is not started.
    pub fn with_clock(limit: u32, window: Duration, clock: Clock) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(HashMap::new()),
            limit,
            window,
            clock,
        })
    }

    /// Count a hit against the key's current window. A fresh or expired
    /// window resets to one; a full window denies.
    pub fn allow(&self, key: &str) -> bool {
        let mut requests = self.requests.lock().unwrap();
        let now = (self.clock)();

        match requests.get_mut(key) {
            Some(entry) if now <= entry.reset_at => {
                if entry.count >= self.limit {
                    return false;
                }
                entry.count += 1;
                true
            }
            _ => {
                requests.insert(
                    key.to_string(),
                    Window {
                        count: 1,
                        reset_at: now + self.window,
                    },
                );
                true
            }
        }
    }

    fn sweep(&self) {
        let mut requests = self.requests.lock().unwrap();
        let now = (self.clock)();
        requests.retain(|_, entry| now <= entry.reset_at);
    }

    /// Evict expired windows once per window length.
    fn spawn_sweeper(self: &Arc<Self>) {
        if self.window.is_zero() {
            return;
        }
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(limiter.window);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                limiter.sweep();
            }
        });
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}
