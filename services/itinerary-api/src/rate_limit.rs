//! Per-user fixed-window rate limiting
//!
//! In-process only: counts reset on restart and are not shared between
//! replicas.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

/// Prune expired windows once the table grows past this many users.
const PRUNE_THRESHOLD: usize = 1024;

/// Rejection carrying how long until the caller's window resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimited {
    pub retry_after_secs: u64,
}

struct Window {
    count: u32,
    reset_at: Instant,
}

/// Allows `max_requests` per `window` for each key.
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Take one slot for `key`. A limit of 0 disables limiting.
    ///
    /// The slot counts immediately so concurrent callers cannot overshoot;
    /// hand it back with [`RateLimiter::refund`] if the work fails.
    pub fn reserve(&self, key: &str) -> Result<Reservation, RateLimited> {
        self.reserve_at(key, Instant::now())
    }

    fn reserve_at(&self, key: &str, now: Instant) -> Result<Reservation, RateLimited> {
        if self.max_requests == 0 {
            return Ok(Reservation { window_reset_at: None });
        }

        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        if windows.len() > PRUNE_THRESHOLD {
            windows.retain(|_, w| w.reset_at > now);
        }

        let fresh = Window {
            count: 0,
            reset_at: now + self.window,
        };
        let window = windows.entry(key.to_string()).or_insert(fresh);
        if now >= window.reset_at {
            window.count = 0;
            window.reset_at = now + self.window;
        }

        if window.count >= self.max_requests {
            let remaining = window.reset_at - now;
            debug!(key, remaining_secs = remaining.as_secs(), "rate limited");
            return Err(RateLimited {
                retry_after_secs: ceil_secs(remaining),
            });
        }
        window.count += 1;
        Ok(Reservation {
            window_reset_at: Some(window.reset_at),
        })
    }

    /// Return a slot taken by [`RateLimiter::reserve`].
    ///
    /// No-op once the reserving window has been replaced.
    pub fn refund(&self, key: &str, reservation: Reservation) {
        let Some(reset_at) = reservation.window_reset_at else {
            return;
        };
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(window) = windows.get_mut(key)
            && window.reset_at == reset_at
        {
            window.count = window.count.saturating_sub(1);
            debug!(key, "slot refunded");
        }
    }

    /// Number of users with an open window.
    pub fn tracked(&self) -> usize {
        self.windows.lock().map(|w| w.len()).unwrap_or(0)
    }
}

/// Slot handed out by [`RateLimiter::reserve`]; tied to the window it was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    window_reset_at: Option<Instant>,
}

fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 { secs + 1 } else { secs }
}
