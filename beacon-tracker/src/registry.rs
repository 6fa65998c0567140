//! Page-wide registry
//!
//! One [`Registry`] exists per embedding page. It owns what every tracker on
//! the page shares: the plugin list, the load/unload lifecycle with its
//! unload deadline, the host capabilities, and the default tracker that the
//! command queue drives.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use beacon_core::{
    Clock, CookieJar, Environment, Hook, Plugin, PluginRegistry, TimerBackend, TrackerConfig,
};

use crate::tracker::Tracker;
use crate::transport::Transport;

/// Capabilities the embedding host provides
#[derive(Clone)]
pub struct Host {
    pub env: Rc<dyn Environment>,
    pub clock: Rc<dyn Clock>,
    pub cookies: Rc<dyn CookieJar>,
    pub transport: Rc<dyn Transport>,
    pub timers: Rc<dyn TimerBackend>,
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("transport", &self.transport.name())
            .field("timers", &self.timers.name())
            .finish()
    }
}

/// Load state and unload deadline shared by all trackers on a page
#[derive(Default)]
pub struct PageLifecycle {
    loaded: Cell<bool>,
    deferred: RefCell<Vec<Box<dyn FnOnce()>>>,
    unload_deadline_ms: Cell<i64>,
}

impl PageLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.get()
    }

    /// Run `handler` once the page has loaded; immediately if it already has
    pub fn defer_until_load(&self, handler: Box<dyn FnOnce()>) {
        if self.loaded.get() {
            handler();
        } else {
            self.deferred.borrow_mut().push(handler);
        }
    }

    /// Mark the page loaded and hand back the handlers waiting for it.
    /// Returns `None` when the page was already loaded.
    fn mark_loaded(&self) -> Option<Vec<Box<dyn FnOnce()>>> {
        if self.loaded.replace(true) {
            return None;
        }
        Some(std::mem::take(&mut *self.deferred.borrow_mut()))
    }

    pub fn set_unload_deadline(&self, deadline_ms: i64) {
        self.unload_deadline_ms.set(deadline_ms);
    }

    /// Instant (Unix millis) the unload handler waits for; 0 before any dispatch
    pub fn unload_deadline(&self) -> i64 {
        self.unload_deadline_ms.get()
    }
}

impl fmt::Debug for PageLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageLifecycle")
            .field("loaded", &self.loaded.get())
            .field("deferred", &self.deferred.borrow().len())
            .field("unload_deadline_ms", &self.unload_deadline_ms.get())
            .finish()
    }
}

/// Page-wide registry
pub struct Registry {
    host: Host,
    plugins: Rc<PluginRegistry>,
    lifecycle: Rc<PageLifecycle>,
    default_tracker: RefCell<Option<Rc<Tracker>>>,
}

impl Registry {
    pub fn new(host: Host) -> Self {
        Self {
            host,
            plugins: Rc::new(PluginRegistry::new()),
            lifecycle: Rc::new(PageLifecycle::new()),
            default_tracker: RefCell::new(None),
        }
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn plugins(&self) -> &Rc<PluginRegistry> {
        &self.plugins
    }

    pub fn lifecycle(&self) -> &Rc<PageLifecycle> {
        &self.lifecycle
    }

    pub fn add_plugin(&self, name: &str, plugin: Rc<dyn Plugin>) {
        self.plugins.add(name, plugin);
    }

    /// A new tracker sharing this page's plugins and lifecycle
    pub fn tracker(&self, tracker_url: &str, site_id: &str) -> Rc<Tracker> {
        self.tracker_with_config(TrackerConfig::new(tracker_url, site_id))
    }

    pub fn tracker_with_config(&self, config: TrackerConfig) -> Rc<Tracker> {
        Rc::new(Tracker::new(
            config,
            self.host.clone(),
            self.plugins.clone(),
            self.lifecycle.clone(),
        ))
    }

    /// The tracker queued commands apply to, created on first use
    pub fn default_tracker(&self) -> Rc<Tracker> {
        self.default_tracker
            .borrow_mut()
            .get_or_insert_with(|| self.tracker_with_config(TrackerConfig::default()))
            .clone()
    }

    /// Page finished loading: run `load` hooks, then everything deferred
    /// until load. Only the first call has an effect.
    pub fn on_load(&self) {
        let Some(handlers) = self.lifecycle.mark_loaded() else {
            return;
        };
        self.plugins.execute(Hook::Load);
        tracing::debug!(deferred = handlers.len(), "page loaded");
        for handler in handlers {
            handler();
        }
    }

    /// Page is unloading: run `unload` hooks, then hold the page until the
    /// last dispatch's delay has passed. Best effort; the browser may still
    /// cut the page short.
    pub fn before_unload(&self) {
        self.plugins.execute(Hook::Unload);
        let deadline = self.lifecycle.unload_deadline();
        if deadline > self.host.clock.now_millis() {
            tracing::debug!(deadline_ms = deadline, "delaying unload for in-flight beacon");
            self.host.clock.pause_until(deadline);
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("host", &self.host)
            .field("plugins", &self.plugins)
            .field("lifecycle", &self.lifecycle)
            .finish()
    }
}
