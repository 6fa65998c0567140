//! The page-wide entry point and its DOM listeners
//!
//! `BeaconPage` owns the [`Registry`] for the document, wires the window's
//! load, unload, visibility, activity, click and error events to every
//! tracker it created, and replays the global command queue.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use js_sys::{Array, Function, Object, Promise, Reflect};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::{future_to_promise, spawn_local};
use web_sys::{Element, ErrorEvent, Event, EventTarget, MouseEvent};

use beacon_core::{Clock, FnPlugin, Hook, SystemClock, TrackerConfig};
use beacon_tracker::events::heartbeat::ACTIVITY_EVENTS;
use beacon_tracker::queue::apply;
use beacon_tracker::{
    Anchor, Command, CommandQueue, Host, PointerEventKind, QueueItem, Registry, Tracker, TrackerResult,
};

use crate::bindings::{js_error, json_value, JsTracker};
use crate::cookies::DocumentCookieJar;
use crate::env::{prop, prop_string, BrowserEnvironment};
use crate::timers::{TimeoutTimers, TimerSink};
use crate::transport::BrowserTransport;

/// Global the page queues commands in before the module loads
pub const DEFAULT_QUEUE: &str = "_paq";

/// Expando property holding an anchor's identity
const ANCHOR_ID_KEY: &str = "__beaconAnchorId";

/// `MouseEvent.button` (0 left, 1 middle, 2 right) as a 1-based button number
pub(crate) fn which_button(button: i16) -> u16 {
    button.max(0) as u16 + 1
}

fn pointer_kind(event_type: &str) -> Option<PointerEventKind> {
    match event_type {
        "click" => Some(PointerEventKind::Click),
        "mousedown" => Some(PointerEventKind::MouseDown),
        "mouseup" => Some(PointerEventKind::MouseUp),
        _ => None,
    }
}

/// Route fired timers to `tracker` without keeping it alive
fn timer_sink(tracker: &Rc<Tracker>) -> TimerSink {
    let tracker = Rc::downgrade(tracker);
    Rc::new(move |event| {
        if let Some(tracker) = tracker.upgrade() {
            spawn_local(async move { tracker.on_timer(event).await });
        }
    })
}

/// Add a listener that lives as long as the page
fn listen(target: &EventTarget, event: &str, handler: impl FnMut(Event) + 'static) -> Result<(), JsError> {
    let closure = Closure::<dyn FnMut(Event)>::new(handler);
    target
        .add_event_listener_with_callback(event, closure.as_ref().unchecked_ref())
        .map_err(|_| JsError::new(&format!("cannot listen to {}", event)))?;
    closure.forget();
    Ok(())
}

struct PageState {
    registry: Registry,
    env: Rc<BrowserEnvironment>,
    trackers: RefCell<Vec<Rc<Tracker>>>,
    queue: RefCell<Option<Rc<CommandQueue>>>,
    next_anchor_id: Cell<u64>,
}

impl PageState {
    fn trackers(&self) -> Vec<Rc<Tracker>> {
        self.trackers.borrow().clone()
    }

    fn default_tracker(&self) -> Rc<Tracker> {
        self.registry.default_tracker()
    }

    /// The `<a>` or `<area>` an event happened on
    fn anchor_for(&self, event: &Event) -> Option<Anchor> {
        let element = event.target()?.dyn_into::<Element>().ok()?;
        let anchor = element.closest("a, area").ok().flatten()?;
        let href = prop_string(&anchor, "href")?;

        let id = match prop(&anchor, ANCHOR_ID_KEY).and_then(|id| id.as_f64()) {
            Some(id) => id as u64,
            None => {
                let id = self.next_anchor_id.get() + 1;
                self.next_anchor_id.set(id);
                let _ = Reflect::set(&anchor, &JsValue::from_str(ANCHOR_ID_KEY), &JsValue::from_f64(id as f64));
                id
            }
        };

        Some(Anchor {
            id,
            href,
            host: prop_string(&anchor, "hostname"),
            class_name: anchor.get_attribute("class").unwrap_or_default(),
        })
    }

    /// A queued entry: a command array, or a function run with the default
    /// tracker as `this`
    fn queue_item(&self, value: JsValue) -> TrackerResult<QueueItem> {
        if let Some(function) = value.dyn_ref::<Function>() {
            let function = function.clone();
            let this = JsValue::from(JsTracker::new(self.default_tracker()));
            return Ok(QueueItem::Callback(Box::new(move |_: &Tracker| {
                if let Err(err) = function.call0(&this) {
                    tracing::warn!(error = ?err, "queued function threw");
                }
            })));
        }
        let value = json_value(&value)?.unwrap_or_default();
        Ok(Command::from_value(&value)?.into())
    }

    fn queue_items(&self, values: impl Iterator<Item = JsValue>) -> Vec<QueueItem> {
        values
            .filter_map(|value| match self.queue_item(value) {
                Ok(item) => Some(item),
                Err(err) => {
                    tracing::warn!(error = %err, "skipping malformed queue entry");
                    None
                }
            })
            .collect()
    }
}

/// Analytics for the current document
#[wasm_bindgen]
pub struct BeaconPage {
    inner: Rc<PageState>,
}

#[wasm_bindgen]
impl BeaconPage {
    /// Bind to the current window and document and start listening to page
    /// events
    #[wasm_bindgen(constructor)]
    pub fn new() -> Result<BeaconPage, JsError> {
        let env = Rc::new(BrowserEnvironment::new().ok_or_else(|| JsError::new("no window or document"))?);
        let cookies = DocumentCookieJar::new(env.document()).ok_or_else(|| JsError::new("not an HTML document"))?;
        let timers = Rc::new(TimeoutTimers::new());
        let clock: Rc<dyn Clock> = Rc::new(SystemClock);

        let registry = Registry::new(Host {
            env: env.clone(),
            clock,
            cookies: Rc::new(cookies),
            transport: Rc::new(BrowserTransport::new()),
            timers: timers.clone(),
        });
        let default_tracker = registry.default_tracker();
        timers.connect(timer_sink(&default_tracker));

        let page = BeaconPage {
            inner: Rc::new(PageState {
                registry,
                env,
                trackers: RefCell::new(vec![default_tracker]),
                queue: RefCell::new(None),
                next_anchor_id: Cell::new(0),
            }),
        };
        page.install_listeners()?;
        Ok(page)
    }

    /// A new tracker sharing the page's plugins and unload deadline
    #[wasm_bindgen(js_name = getTracker)]
    pub fn tracker(&self, tracker_url: Option<String>, site_id: Option<String>) -> JsTracker {
        self.add_tracker(TrackerConfig::new(
            tracker_url.as_deref().unwrap_or_default(),
            site_id.as_deref().unwrap_or_default(),
        ))
    }

    /// A new tracker configured from a JSON document
    #[wasm_bindgen(js_name = newTracker)]
    pub fn new_tracker(&self, config_json: &str) -> Result<JsTracker, JsError> {
        let config = TrackerConfig::from_json(config_json).map_err(js_error)?;
        Ok(self.add_tracker(config))
    }

    /// The tracker the command queue drives
    #[wasm_bindgen(js_name = getAsyncTracker)]
    pub fn async_tracker(&self) -> JsTracker {
        JsTracker::new(self.inner.default_tracker())
    }

    /// Register hook handlers, e.g. `{ log: () => "&dimension1=x" }`. Each
    /// handler returns a query-string fragment (or nothing).
    #[wasm_bindgen(js_name = addPlugin)]
    pub fn add_plugin(&self, name: String, hooks: Object) -> Result<(), JsError> {
        let mut plugin = FnPlugin::new();
        for key in Object::keys(&hooks).iter() {
            let Some(key) = key.as_string() else {
                continue;
            };
            let hook: Hook = match key.parse() {
                Ok(hook) => hook,
                Err(err) => {
                    tracing::warn!(plugin = %name, error = %err, "ignoring unknown hook");
                    continue;
                }
            };
            let handler = Reflect::get(&hooks, &JsValue::from_str(&key))
                .map_err(|_| JsError::new(&format!("cannot read hook {}", key)))?
                .dyn_into::<Function>()
                .map_err(|_| JsError::new(&format!("hook {} is not a function", key)))?;
            plugin = plugin.on(hook, move || {
                handler
                    .call0(&JsValue::NULL)
                    .ok()
                    .and_then(|fragment| fragment.as_string())
            });
        }
        self.inner.registry.add_plugin(&name, Rc::new(plugin));
        Ok(())
    }

    /// Replay the commands queued in `window[global]` (default `_paq`), then
    /// replace it with an object whose `push` applies commands immediately
    #[wasm_bindgen(js_name = installQueue)]
    pub fn install_queue(&self, global: Option<String>) -> Promise {
        let state = self.inner.clone();
        let window = state.env.window().clone();
        let key = JsValue::from_str(global.as_deref().unwrap_or(DEFAULT_QUEUE));
        let pending = Reflect::get(&window, &key)
            .ok()
            .filter(Array::is_array)
            .map(|value| value.unchecked_into::<Array>())
            .unwrap_or_else(Array::new);
        let replayed = pending.length();
        let items = state.queue_items(pending.iter());

        future_to_promise(async move {
            let queue = Rc::new(CommandQueue::replay(state.default_tracker(), items).await);

            // Pushed onto the array while the replay was delivering
            for item in state.queue_items(pending.slice(replayed, pending.length()).iter()) {
                if let Err(err) = queue.push(item).await {
                    tracing::warn!(error = %err, "queued command failed");
                }
            }
            *state.queue.borrow_mut() = Some(queue.clone());

            let forward = state.clone();
            let push = Closure::<dyn FnMut(JsValue)>::new(move |value: JsValue| {
                let item = match forward.queue_item(value) {
                    Ok(item) => item,
                    Err(err) => {
                        tracing::warn!(error = %err, "ignoring malformed command");
                        return;
                    }
                };
                let queue = queue.clone();
                spawn_local(async move {
                    if let Err(err) = queue.push(item).await {
                        tracing::warn!(error = %err, "command failed");
                    }
                });
            });
            let forwarder = Object::new();
            Reflect::set(&forwarder, &JsValue::from_str("push"), &push.into_js_value())?;
            Reflect::set(&window, &key, &forwarder)?;
            Ok(JsValue::UNDEFINED)
        })
    }

    /// Apply one command (or function) to the async tracker
    pub fn push(&self, item: JsValue) -> Result<Promise, JsError> {
        let item = self.inner.queue_item(item).map_err(js_error)?;
        let state = self.inner.clone();
        Ok(future_to_promise(async move {
            let queue = state.queue.borrow().clone();
            let result = match (queue, item) {
                (Some(queue), item) => queue.push(item).await,
                (None, QueueItem::Command(command)) => apply(&state.default_tracker(), &command).await,
                (None, QueueItem::Callback(callback)) => {
                    callback(&state.default_tracker());
                    Ok(())
                }
            };
            result
                .map(|()| JsValue::UNDEFINED)
                .map_err(|err| JsValue::from(js_error(err)))
        }))
    }
}

impl BeaconPage {
    /// Each tracker gets its own timers so that heartbeat ids do not collide
    fn add_tracker(&self, config: TrackerConfig) -> JsTracker {
        let state = &self.inner;
        let timers = Rc::new(TimeoutTimers::new());
        let host = Host {
            timers: timers.clone(),
            ..state.registry.host().clone()
        };

        let tracker = Rc::new(Tracker::new(
            config,
            host,
            state.registry.plugins().clone(),
            state.registry.lifecycle().clone(),
        ));
        timers.connect(timer_sink(&tracker));
        state.trackers.borrow_mut().push(tracker.clone());
        JsTracker::new(tracker)
    }

    fn install_listeners(&self) -> Result<(), JsError> {
        let window: &EventTarget = self.inner.env.window();
        let document: &EventTarget = self.inner.env.document();

        let state = self.inner.clone();
        let on_load = move |_: Event| state.registry.on_load();
        listen(document, "DOMContentLoaded", on_load.clone())?;
        listen(window, "load", on_load)?;
        if self.inner.env.document().ready_state() != "loading" {
            self.inner.registry.on_load();
        }

        let state = self.inner.clone();
        listen(window, "beforeunload", move |_| state.registry.before_unload())?;

        let state = self.inner.clone();
        listen(document, "visibilitychange", move |_| {
            for tracker in state.trackers() {
                spawn_local(async move { tracker.on_visibility_change().await });
            }
        })?;

        for (target, event) in ACTIVITY_EVENTS {
            let target = if target == "window" { window } else { document };
            let state = self.inner.clone();
            listen(target, event, move |_| {
                for tracker in state.trackers() {
                    tracker.record_activity();
                }
            })?;
        }

        for name in ["click", "mousedown", "mouseup"] {
            let state = self.inner.clone();
            listen(document, name, move |event| {
                let Some(kind) = pointer_kind(&event.type_()) else {
                    return;
                };
                let button = event
                    .dyn_ref::<MouseEvent>()
                    .map(|mouse| which_button(mouse.button()))
                    .unwrap_or(1);
                let anchor = state.anchor_for(&event);
                for tracker in state.trackers() {
                    let anchor = anchor.clone();
                    spawn_local(async move {
                        tracker.handle_pointer_event(kind, button, anchor.as_ref()).await;
                    });
                }
            })?;
        }

        let state = self.inner.clone();
        listen(window, "error", move |event| {
            let Some(error) = event.dyn_ref::<ErrorEvent>() else {
                return;
            };
            let (message, url, line, column) = (error.message(), error.filename(), error.lineno(), error.colno());
            for tracker in state.trackers() {
                let (message, url) = (message.clone(), url.clone());
                spawn_local(async move {
                    tracker.on_script_error(&message, &url, line, Some(column)).await;
                });
            }
        })?;

        Ok(())
    }
}
