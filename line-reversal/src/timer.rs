//! Retransmit and idle timer settings.
//!
//! Reliable delivery requires that an unacknowledged chunk is re-sent if no
//! ack arrives within a bounded time, and that a session whose peer has
//! vanished is eventually reclaimed.  This module provides:
//! - [`TimerConfig`] — the retransmission interval, the retry bound, and the
//!   idle timeout.
//! - [`IdleTimer`] — tracks the last inbound activity of one session and
//!   yields the instant at which it expires.
//!
//! The retransmission deadline itself is derived from the in-flight chunk's
//! send time (see [`crate::sender::InFlight`]), so only idleness needs its own
//! bookkeeping.

use std::time::Duration;

use tokio::time::Instant;

/// Adjustable timeout parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerConfig {
    /// Time an in-flight chunk may stay unacknowledged before it is resent.
    pub retransmit_timeout: Duration,
    /// Resends of one chunk before the session is abandoned.
    pub max_retries: u32,
    /// Time without any inbound message before the session is torn down.
    pub idle_timeout: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            retransmit_timeout: Duration::from_secs(3),
            max_retries: 20,
            idle_timeout: Duration::from_secs(60),
        }
    }
}

/// Inactivity tracker for one session.
#[derive(Debug, Clone, Copy)]
pub struct IdleTimer {
    timeout: Duration,
    last_activity: Instant,
}

impl IdleTimer {
    /// Start tracking from `now`.
    pub fn new(timeout: Duration, now: Instant) -> Self {
        Self {
            timeout,
            last_activity: now,
        }
    }

    /// Record inbound activity.
    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// Instant at which the session expires unless touched again.
    pub fn deadline(&self) -> Instant {
        self.last_activity + self.timeout
    }

    /// When the peer was last heard from.
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }
}
