//! Activity heartbeat
//!
//! After the first page view, a timer checks every interval whether the
//! visitor did anything during the last interval. If so, a ping is sent
//! (once the minimum visit time has passed) and the timer is re-armed; the
//! first idle interval stops the heartbeat for good.

use std::time::Duration;

/// Timer id used for the heartbeat
pub const TIMER_ID: &str = "heartbeat";

/// DOM events that count as activity, with the object they are bound to
pub const ACTIVITY_EVENTS: [(&str, &str); 13] = [
    ("document", "click"),
    ("document", "mouseup"),
    ("document", "mousedown"),
    ("document", "mousemove"),
    ("document", "mousewheel"),
    ("window", "DOMMouseScroll"),
    ("window", "scroll"),
    ("document", "keypress"),
    ("document", "keydown"),
    ("document", "keyup"),
    ("window", "resize"),
    ("window", "focus"),
    ("window", "blur"),
];

/// What a heartbeat timer firing should do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatStep {
    /// Send a ping and re-arm
    Ping,
    /// Active, but the minimum visit time has not passed; re-arm only
    Wait,
    /// No activity in the last interval; stop
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heartbeat {
    interval_ms: i64,
    /// Unix millis before which no ping is sent
    minimum_visit_at_ms: i64,
    last_activity_ms: i64,
    stopped: bool,
}

impl Heartbeat {
    pub fn new(interval_secs: u64, minimum_visit_at_ms: i64, now_ms: i64) -> Self {
        Self {
            interval_ms: i64::try_from(interval_secs.saturating_mul(1000)).unwrap_or(i64::MAX),
            minimum_visit_at_ms,
            last_activity_ms: now_ms,
            stopped: false,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(0) as u64)
    }

    pub fn record_activity(&mut self, now_ms: i64) {
        self.last_activity_ms = now_ms;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Decide what the timer firing at `now_ms` does
    pub fn tick(&mut self, now_ms: i64) -> HeartbeatStep {
        if self.stopped {
            return HeartbeatStep::Stop;
        }
        if self.last_activity_ms.saturating_add(self.interval_ms) <= now_ms {
            self.stopped = true;
            return HeartbeatStep::Stop;
        }
        if self.minimum_visit_at_ms < now_ms {
            HeartbeatStep::Ping
        } else {
            HeartbeatStep::Wait
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: i64 = 1_000_000;

    #[test]
    fn test_waits_for_minimum_visit() {
        let mut heartbeat = Heartbeat::new(15, START + 30_000, START);

        heartbeat.record_activity(START + 10_000);
        assert_eq!(heartbeat.tick(START + 15_000), HeartbeatStep::Wait);

        heartbeat.record_activity(START + 25_000);
        assert_eq!(heartbeat.tick(START + 30_000), HeartbeatStep::Wait);

        heartbeat.record_activity(START + 40_000);
        assert_eq!(heartbeat.tick(START + 45_000), HeartbeatStep::Ping);
    }

    #[test]
    fn test_idle_interval_stops_for_good() {
        let mut heartbeat = Heartbeat::new(15, START, START);
        assert_eq!(heartbeat.tick(START + 15_000), HeartbeatStep::Stop);

        heartbeat.record_activity(START + 16_000);
        assert_eq!(heartbeat.tick(START + 20_000), HeartbeatStep::Stop);
        assert!(heartbeat.is_stopped());
    }
}
