//! `setTimeout`-backed [`TimerBackend`]

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use wasm_bindgen::prelude::*;

use beacon_core::{TimerBackend, TimerEvent};

/// Receives the event of every timer that fires
pub type TimerSink = Rc<dyn Fn(TimerEvent)>;

/// Timers of one tracker, keyed by id
#[derive(Default)]
pub struct TimeoutTimers {
    handles: Rc<RefCell<HashMap<String, i32>>>,
    sink: RefCell<Option<TimerSink>>,
}

impl TimeoutTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route fired timers to `sink`. Timers scheduled before this call fire
    /// into the void.
    pub fn connect(&self, sink: TimerSink) {
        *self.sink.borrow_mut() = Some(sink);
    }
}

impl TimerBackend for TimeoutTimers {
    fn schedule_once(&self, id: &str, delay: Duration, event: TimerEvent) {
        self.cancel(id);
        let Some(window) = web_sys::window() else {
            tracing::warn!(timer = id, "no window, timer dropped");
            return;
        };

        let handles = self.handles.clone();
        let sink = self.sink.borrow().clone();
        let key = id.to_string();
        let callback = Closure::once_into_js(move || {
            handles.borrow_mut().remove(&key);
            if let Some(sink) = sink {
                sink(event);
            }
        });

        let delay_ms = i32::try_from(delay.as_millis()).unwrap_or(i32::MAX);
        match window.set_timeout_with_callback_and_timeout_and_arguments_0(callback.unchecked_ref(), delay_ms) {
            Ok(handle) => {
                self.handles.borrow_mut().insert(id.to_string(), handle);
            }
            Err(err) => tracing::warn!(timer = id, error = ?err, "setTimeout failed"),
        }
    }

    fn cancel(&self, id: &str) -> bool {
        let Some(handle) = self.handles.borrow_mut().remove(id) else {
            return false;
        };
        if let Some(window) = web_sys::window() {
            window.clear_timeout_with_handle(handle);
        }
        true
    }

    fn exists(&self, id: &str) -> bool {
        self.handles.borrow().contains_key(id)
    }

    fn name(&self) -> &'static str {
        "set-timeout"
    }
}
