//! Mock clock and timer backend for testing
//!
//! The clock only moves when told to; the timer backend records every
//! scheduled timer for inspection without ever firing it.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};

use crate::timing::{Clock, TimerBackend, TimerEvent};

/// Settable clock; clones share the same instant
#[derive(Debug, Clone)]
pub struct MockClock {
    now: Rc<Cell<DateTime<FixedOffset>>>,
    pauses: Rc<Cell<u32>>,
}

impl MockClock {
    /// Clock fixed at `unix_seconds` in UTC
    pub fn at(unix_seconds: i64) -> Self {
        let now = DateTime::<Utc>::from_timestamp(unix_seconds, 0).unwrap_or_default();
        Self::from_datetime(now.fixed_offset())
    }

    /// Clock fixed at an explicit instant
    pub fn from_datetime(now: DateTime<FixedOffset>) -> Self {
        Self {
            now: Rc::new(Cell::new(now)),
            pauses: Rc::new(Cell::new(0)),
        }
    }

    /// Move the clock to an explicit instant
    pub fn set(&self, now: DateTime<FixedOffset>) {
        self.now.set(now);
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        let delta = chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
        self.now.set(self.now.get() + delta);
    }

    /// Number of times [`Clock::pause_until`] actually had to wait
    pub fn pause_count(&self) -> u32 {
        self.pauses.get()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        // 2024-03-01T12:00:00Z
        Self::at(1_709_294_400)
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<FixedOffset> {
        self.now.get()
    }

    fn pause_until(&self, deadline_millis: i64) {
        let now = self.now_millis();
        if now < deadline_millis {
            self.pauses.set(self.pauses.get() + 1);
            self.advance(Duration::from_millis((deadline_millis - now) as u64));
        }
    }
}

/// Recorded timer
#[derive(Debug, Clone)]
pub struct RecordedTimer {
    /// Timer ID
    pub id: String,
    /// Delay before firing
    pub delay: Duration,
    /// Event to fire
    pub event: TimerEvent,
    /// Whether this timer was cancelled
    pub cancelled: bool,
}

/// Mock timer backend that records scheduled timers
///
/// Tests fire a timer by taking it out with [`MockTimerBackend::take`] and
/// handing its event to the tracker.
#[derive(Debug, Default)]
pub struct MockTimerBackend {
    timers: RefCell<HashMap<String, RecordedTimer>>,
    scheduled: Cell<usize>,
}

impl MockTimerBackend {
    /// Create a new mock backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a recorded timer
    pub fn get_timer(&self, id: &str) -> Option<RecordedTimer> {
        self.timers.borrow().get(id).cloned()
    }

    /// Remove a pending timer, as if it had fired
    pub fn take(&self, id: &str) -> Option<RecordedTimer> {
        let mut timers = self.timers.borrow_mut();
        match timers.get(id) {
            Some(timer) if !timer.cancelled => timers.remove(id),
            _ => None,
        }
    }

    /// Count of active timers
    pub fn active_count(&self) -> usize {
        self.timers.borrow().values().filter(|t| !t.cancelled).count()
    }

    /// Total number of schedule calls
    pub fn scheduled_count(&self) -> usize {
        self.scheduled.get()
    }
}

impl TimerBackend for MockTimerBackend {
    fn schedule_once(&self, id: &str, delay: Duration, event: TimerEvent) {
        self.scheduled.set(self.scheduled.get() + 1);
        self.timers.borrow_mut().insert(
            id.to_string(),
            RecordedTimer {
                id: id.to_string(),
                delay,
                event,
                cancelled: false,
            },
        );
    }

    fn cancel(&self, id: &str) -> bool {
        match self.timers.borrow_mut().get_mut(id) {
            Some(timer) if !timer.cancelled => {
                timer.cancelled = true;
                true
            }
            _ => false,
        }
    }

    fn exists(&self, id: &str) -> bool {
        self.timers
            .borrow()
            .get(id)
            .map(|t| !t.cancelled)
            .unwrap_or(false)
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
