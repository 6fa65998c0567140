//! # Clocks and timers
//!
//! Every time-dependent decision in the tracker (session windows, cookie
//! expiry, the unload delay, the heartbeat) reads time through [`Clock`] and
//! schedules future work through [`TimerBackend`], so that the host decides
//! what "now" and "later" mean.
//!
//! ```text
//! ┌──────────────────────┐        ┌──────────────────────────────┐
//! │ Clock                │        │ TimerBackend                 │
//! │  SystemClock (chrono)│        │  MockTimerBackend (records)  │
//! │  MockClock (tests)   │        │  setTimeout (beacon-wasm)    │
//! └──────────────────────┘        └──────────────────────────────┘
//! ```
//!
//! Timers never call back on their own: when a scheduled timer fires, the
//! host hands the [`TimerEvent`] back to the tracker.

pub mod mock;

use std::time::Duration;

use chrono::{DateTime, FixedOffset, Local};

pub use mock::{MockClock, MockTimerBackend, RecordedTimer};

/// Source of the current time
pub trait Clock {
    /// Current local time
    fn now(&self) -> DateTime<FixedOffset>;

    /// Milliseconds since the Unix epoch
    fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }

    /// Seconds since the Unix epoch
    fn now_seconds(&self) -> i64 {
        self.now().timestamp()
    }

    /// Busy-wait until `deadline_millis` has passed.
    ///
    /// Best effort only: the host may terminate the page before the deadline
    /// is reached. Returns immediately when the deadline is already in the past.
    fn pause_until(&self, deadline_millis: i64) {
        while self.now_millis() < deadline_millis {
            std::hint::spin_loop();
        }
    }
}

/// Wall clock in the local timezone
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Local::now().fixed_offset()
    }
}

/// Timer event types the tracker schedules
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    /// Activity check for the heartbeat ping
    Heartbeat,
    /// Custom timer
    Custom { name: String },
}

/// Abstract timer backend
pub trait TimerBackend {
    /// Schedule a one-shot timer, replacing any timer with the same id
    fn schedule_once(&self, id: &str, delay: Duration, event: TimerEvent);

    /// Cancel a scheduled timer; returns whether one was pending
    fn cancel(&self, id: &str) -> bool;

    /// Check if a timer is pending
    fn exists(&self, id: &str) -> bool;

    /// Backend name (for logging)
    fn name(&self) -> &'static str;
}

/// Timer backend that drops every request
///
/// Used when the host has no scheduler; features relying on timers
/// (the heartbeat) then simply never fire.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTimerBackend;

impl TimerBackend for NullTimerBackend {
    fn schedule_once(&self, id: &str, delay: Duration, _event: TimerEvent) {
        tracing::debug!(timer = id, delay_ms = delay.as_millis() as u64, "no timer backend, dropping timer");
    }

    fn cancel(&self, _id: &str) -> bool {
        false
    }

    fn exists(&self, _id: &str) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "null"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_after_epoch() {
        let clock = SystemClock;
        assert!(clock.now_seconds() > 1_500_000_000);
        assert_eq!(clock.now_millis() / 1000, clock.now().timestamp_millis() / 1000);
    }

    #[test]
    fn test_pause_until_past_deadline_returns() {
        let clock = SystemClock;
        clock.pause_until(clock.now_millis() - 10);
    }

    #[test]
    fn test_null_backend_never_holds_timers() {
        let backend = NullTimerBackend;
        backend.schedule_once("heartbeat", Duration::from_secs(1), TimerEvent::Heartbeat);
        assert!(!backend.exists("heartbeat"));
        assert!(!backend.cancel("heartbeat"));
    }
}
