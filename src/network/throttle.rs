//! Connection throttles
//!
//! Per-IP login attempt limiting and per-session inbound packet rate limiting.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Sliding one-minute window of login attempts per remote IP.
pub struct LoginThrottle {
    limit: u32,
    window: Duration,
    counts: Mutex<HashMap<IpAddr, (Instant, u32)>>,
}

impl LoginThrottle {
    pub fn new(limit_per_minute: u32) -> Self {
        Self {
            limit: limit_per_minute,
            window: Duration::from_secs(60),
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Record a login attempt. Returns false once `ip` is over its limit.
    pub fn allow(&self, ip: IpAddr) -> bool {
        self.allow_at(ip, Instant::now())
    }

    fn allow_at(&self, ip: IpAddr, now: Instant) -> bool {
        let Ok(mut counts) = self.counts.lock() else {
            return true;
        };
        let entry = counts.entry(ip).or_insert((now, 0));
        if now.duration_since(entry.0) >= self.window {
            *entry = (now, 0);
        }
        entry.1 += 1;
        let ok = entry.1 <= self.limit;
        if !ok {
            tracing::debug!("[throttle] login limited ip={} count={}", ip, entry.1);
        }
        ok
    }

    /// Drop windows that have expired.
    pub fn sweep(&self) {
        if let Ok(mut counts) = self.counts.lock() {
            let window = self.window;
            counts.retain(|_, (start, _)| start.elapsed() < window);
            tracing::debug!("[throttle] swept remaining={}", counts.len());
        }
    }
}

/// Fixed one-second bucket for one session's inbound packets.
#[derive(Debug)]
pub struct PacketRateLimiter {
    limit: u32,
    window_start: Instant,
    count: u32,
}

impl PacketRateLimiter {
    pub fn new(limit_per_second: u32) -> Self {
        Self {
            limit: limit_per_second,
            window_start: Instant::now(),
            count: 0,
        }
    }

    /// Count one packet; false when the session exceeded its budget.
    pub fn hit(&mut self) -> bool {
        self.hit_at(Instant::now())
    }

    fn hit_at(&mut self, now: Instant) -> bool {
        if now.duration_since(self.window_start) >= Duration::from_secs(1) {
            self.window_start = now;
            self.count = 0;
        }
        self.count += 1;
        self.count <= self.limit
    }
}
