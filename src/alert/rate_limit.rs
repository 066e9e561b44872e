use std::{sync::Arc, time::Duration};

use tokio::time::Instant;

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Enforces a minimum gap between remote sends. Anything arriving inside the
/// window is refused outright; callers drop it rather than retry later.
pub struct RateLimiter {
    interval: Duration,
    clock: Arc<dyn Clock>,
    last_send: Option<Instant>,
}

impl RateLimiter {
    pub fn new(interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            interval,
            clock,
            last_send: None,
        }
    }

    /// True when a send may go out now. Reaching the boundary exactly counts.
    pub fn permits(&self) -> bool {
        match self.last_send {
            None => true,
            Some(last) => self.clock.now().saturating_duration_since(last) >= self.interval,
        }
    }

    /// Call once a send has actually been attempted, whatever its outcome.
    pub fn record_send(&mut self) {
        self.last_send = Some(self.clock.now());
    }
}
