use crate::config::RateLimitConfig;
use std::time::{Duration, Instant};

/// Verdict for one inbound event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    /// Over the per-window limit
    Limited { retry_after: Duration },
    /// Over the burst limit, or still inside a ban
    Banned { retry_after: Duration },
}

/// A fixed-window counter restarted by the first event after it expires
#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

impl Window {
    fn hit(&mut self, length: Duration, now: Instant) -> u32 {
        if self.count == 0 || now.saturating_duration_since(self.started) >= length {
            self.started = now;
            self.count = 0;
        }
        self.count += 1;
        self.count
    }

    fn remaining(&self, length: Duration, now: Instant) -> Duration {
        (self.started + length).saturating_duration_since(now)
    }
}

/// Per-connection event limiter with burst protection.
///
/// Every event counts, rejected ones included. Exceeding the burst limit
/// bans the connection for `ban_duration`.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    window: Window,
    burst: Window,
    banned_until: Option<Instant>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let now = Instant::now();
        Self {
            config,
            window: Window { started: now, count: 0 },
            burst: Window { started: now, count: 0 },
            banned_until: None,
        }
    }

    pub fn check(&mut self) -> RateDecision {
        self.check_at(Instant::now())
    }

    pub fn check_at(&mut self, now: Instant) -> RateDecision {
        if !self.config.is_enabled() {
            return RateDecision::Allowed;
        }

        if let Some(until) = self.banned_until {
            if now < until {
                return RateDecision::Banned {
                    retry_after: until - now,
                };
            }
            self.banned_until = None;
            self.window = Window { started: now, count: 0 };
            self.burst = Window { started: now, count: 0 };
        }

        let in_window = self.window.hit(self.config.window, now);
        let in_burst = self.burst.hit(self.config.burst_window, now);

        if in_burst > self.config.burst_limit {
            self.banned_until = Some(now + self.config.ban_duration);
            return RateDecision::Banned {
                retry_after: self.config.ban_duration,
            };
        }
        if in_window > self.config.max_events {
            return RateDecision::Limited {
                retry_after: self.window.remaining(self.config.window, now),
            };
        }
        RateDecision::Allowed
    }
}
