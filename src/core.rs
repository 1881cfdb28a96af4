//! Core server functionality
//!
//! This module provides:
//! - Tick timing constants
//! - Shutdown signalling shared by every task
//! - Process signal classification
//! - The in-game clock

use std::time::Duration;
use tokio::sync::watch;

/// World tick length in milliseconds
pub const TICK_RATE_MS: u64 = 200;

/// World tick length as a Duration for convenience
pub const TICK_RATE: Duration = Duration::from_millis(TICK_RATE_MS);

/// Ticks per wall-clock second at the default rate
pub const TICKS_PER_SECOND: u64 = 1000 / TICK_RATE_MS;

/// Converts seconds into whole ticks at the default rate.
pub fn secs_to_ticks(secs: u64) -> u64 {
    secs * TICKS_PER_SECOND
}

/// Converts milliseconds into ticks, rounding up so a nonzero delay
/// always spans at least one tick.
pub fn ms_to_ticks(ms: u64) -> u64 {
    ms.div_ceil(TICK_RATE_MS)
}

/// Unix time at which the in-game clock reads midnight of day zero.
pub const GAME_EPOCH: i64 = 1_057_233_600;

/// In-game time of day in seconds. The game clock runs six times faster
/// than the wall clock.
pub fn game_clock(unix_secs: i64) -> i32 {
    ((unix_secs - GAME_EPOCH) * 6).rem_euclid(86_400) as i32
}

/// Broadcast shutdown flag. Clones observe the same flag.
#[derive(Clone)]
pub struct Shutdown {
    tx: std::sync::Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: std::sync::Arc::new(tx),
            rx,
        }
    }

    /// Request server shutdown
    pub fn request_shutdown(&self) {
        let _ = self.tx.send(true);
    }

    /// Check if shutdown has been requested
    pub fn should_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been requested.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Signal types that can trigger server shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Ctrl+C
    Interrupt,
    /// Graceful stop from a supervisor
    Terminate,
}

impl Signal {
    /// Check if this signal should trigger shutdown
    pub fn should_shutdown(&self) -> bool {
        matches!(self, Signal::Interrupt | Signal::Terminate)
    }
}

/// Waits for Ctrl+C (and SIGTERM on unix).
pub async fn wait_for_signal() -> Signal {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        if let Ok(mut term) = signal(SignalKind::terminate()) {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => return Signal::Interrupt,
                _ = term.recv() => return Signal::Terminate,
            }
        }
    }
    let _ = tokio::signal::ctrl_c().await;
    Signal::Interrupt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_creation() {
        let s = Shutdown::new();
        assert!(!s.should_shutdown());
    }

    #[test]
    fn test_shutdown_shared_between_clones() {
        let s = Shutdown::new();
        let c = s.clone();
        c.request_shutdown();
        assert!(s.should_shutdown());
    }

    #[tokio::test]
    async fn test_shutdown_wait_wakes() {
        let s = Shutdown::new();
        let c = s.clone();
        let h = tokio::spawn(async move { c.wait().await });
        s.request_shutdown();
        tokio::time::timeout(Duration::from_secs(1), h).await.unwrap().unwrap();
    }

    #[test]
    fn test_signal_should_shutdown() {
        assert!(Signal::Interrupt.should_shutdown());
        assert!(Signal::Terminate.should_shutdown());
    }

    #[test]
    fn test_constants() {
        assert_eq!(TICK_RATE, Duration::from_millis(200));
        assert_eq!(TICKS_PER_SECOND, 5);
        assert_eq!(secs_to_ticks(60), 300);
        assert_eq!(ms_to_ticks(1000), 5);
        assert_eq!(ms_to_ticks(1), 1);
        assert_eq!(ms_to_ticks(0), 0);
    }

    #[test]
    fn test_game_clock_wraps_daily() {
        assert_eq!(game_clock(GAME_EPOCH), 0);
        assert_eq!(game_clock(GAME_EPOCH + 10), 60);
        assert_eq!(game_clock(GAME_EPOCH + 14_400), 0);
        assert_eq!(game_clock(GAME_EPOCH - 10), 86_340);
    }
}
