//! # Tracker
//!
//! The public tracking façade. A [`Tracker`] owns one [`RequestBuilder`]
//! (and through it the cookie-backed identity, session and attribution
//! state), the ecommerce cart, and the heartbeat. Every tracking call goes
//! through the pre-render gate, is turned into leading request parameters,
//! built, and handed to the [`Dispatcher`].
//!
//! ```text
//! track_*() ──▶ PrerenderGate ──▶ TrackingCall::into_outgoing
//!                   │ (deferred)          │
//!                   ▼                     ▼
//!          on_visibility_change   RequestBuilder::build ──▶ Dispatcher::send
//! ```
//!
//! Link clicks and heartbeat pings skip the gate: both can only happen on a
//! page the visitor is looking at.
//!
//! State lives behind a `RefCell` and is never borrowed across an `.await`.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde_json::{Map, Value};

use beacon_core::ecommerce::product_view_variables;
use beacon_core::request::format_number;
use beacon_core::url::{self, encode};
use beacon_core::{
    AttributionRecord, Cart, Category, Clock, EcommerceItem, EcommerceOrder, Environment, Hook,
    HeartbeatConfig, PluginRegistry, RequestBuilder, RequestFinisher, RequestMethod, RequestProcessor, Scope,
    TimerBackend, TimerEvent, TrackerConfig, VisitorIdentity,
};

use crate::dispatch::{Completion, Dispatcher};
use crate::events::heartbeat::{self, Heartbeat, HeartbeatStep};
use crate::events::{Anchor, ClickCapture, LinkClassifier, LinkKind, PointerEventKind, PrerenderGate};
use crate::registry::{Host, PageLifecycle};
use crate::transport::{Beacon, TransportKind};

/// Event category used for uncaught script errors
pub const JS_ERROR_CATEGORY: &str = "JavaScript Errors";

/// A tracking call waiting to be turned into a request
pub enum TrackingCall {
    PageView {
        title: Option<String>,
        custom_data: Option<Value>,
    },
    Event {
        category: String,
        action: String,
        name: Option<String>,
        value: Option<f64>,
        custom_data: Option<Value>,
    },
    SiteSearch {
        keyword: String,
        category: Option<String>,
        count: Option<u64>,
        custom_data: Option<Value>,
    },
    Goal {
        id: String,
        revenue: Option<f64>,
        custom_data: Option<Value>,
    },
    Link {
        url: String,
        kind: LinkKind,
        custom_data: Option<Value>,
        callback: Option<Completion>,
    },
    /// Order, or cart update when the id is empty
    Ecommerce(EcommerceOrder),
}

impl TrackingCall {
    fn hook(&self) -> Hook {
        match self {
            TrackingCall::PageView { .. } => Hook::Log,
            TrackingCall::Event { .. } => Hook::Event,
            TrackingCall::SiteSearch { .. } => Hook::SiteSearch,
            TrackingCall::Goal { .. } => Hook::Goal,
            TrackingCall::Link { .. } => Hook::Link,
            TrackingCall::Ecommerce(_) => Hook::Ecommerce,
        }
    }

    /// Leading parameters and dispatch settings; `None` when the call lacks
    /// a required value and must not send anything
    fn into_outgoing(self, page: &PageDefaults<'_>, cart: &Cart, now_secs: i64) -> Option<Outgoing> {
        let hook = self.hook();
        let mut delay_ms = page.pause_ms;
        let mut callback = None;
        let mut order_ts = None;

        let (params, custom_data) = match self {
            TrackingCall::PageView { title, custom_data } => {
                let title = title.filter(|t| !t.is_empty());
                let title = title.as_deref().unwrap_or(page.title);
                (format!("action_name={}", encode(title)), custom_data)
            }
            TrackingCall::Event {
                category,
                action,
                name,
                value,
                custom_data,
            } => {
                if category.is_empty() || action.is_empty() {
                    tracing::debug!("event without category or action ignored");
                    return None;
                }
                let mut params = format!("e_c={}&e_a={}", encode(&category), encode(&action));
                if let Some(name) = name {
                    params.push_str("&e_n=");
                    params.push_str(&encode(&name));
                }
                if let Some(value) = value {
                    params.push_str("&e_v=");
                    params.push_str(&format_number(value));
                }
                (params, custom_data)
            }
            TrackingCall::SiteSearch {
                keyword,
                category,
                count,
                custom_data,
            } => {
                let mut params = format!("search={}", encode(&keyword));
                if let Some(category) = category.filter(|c| !c.is_empty()) {
                    params.push_str("&search_cat=");
                    params.push_str(&encode(&category));
                }
                if let Some(count) = count {
                    params.push_str(&format!("&search_count={count}"));
                }
                (params, custom_data)
            }
            TrackingCall::Goal { id, revenue, custom_data } => {
                let mut params = format!("idgoal={}", encode(&id));
                if let Some(revenue) = revenue.filter(|r| *r != 0.0) {
                    params.push_str("&revenue=");
                    params.push_str(&format_number(revenue));
                }
                (params, custom_data)
            }
            TrackingCall::Link {
                url,
                kind,
                custom_data,
                callback: on_complete,
            } => {
                if on_complete.is_some() {
                    delay_ms = 0;
                }
                callback = on_complete;
                (format!("{kind}={}", encode(&url::purify(&url, page.discard_hash))), custom_data)
            }
            TrackingCall::Ecommerce(order) => {
                if !order.id.is_empty() {
                    order_ts = Some(now_secs);
                }
                (order.to_params(cart), None)
            }
        };

        Some(Outgoing {
            params,
            custom_data,
            hook,
            order_ts,
            delay_ms,
            callback,
        })
    }
}

impl fmt::Debug for TrackingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TrackingCall").field(&self.hook().as_str()).finish()
    }
}

/// Tracker settings a call falls back on
struct PageDefaults<'a> {
    title: &'a str,
    discard_hash: bool,
    pause_ms: u64,
}

struct Outgoing {
    params: String,
    custom_data: Option<Value>,
    hook: Hook,
    order_ts: Option<i64>,
    delay_ms: u64,
    callback: Option<Completion>,
}

struct State {
    builder: RequestBuilder,
    cart: Cart,
    /// Unix millis before which no heartbeat ping is sent
    minimum_visit_at_ms: i64,
    heartbeat: Option<Heartbeat>,
    /// Custom data of the page view that installed the heartbeat
    heartbeat_data: Option<Value>,
    js_error_tracking: bool,
}

/// One tracker instance, bound to a site and collection endpoint
pub struct Tracker {
    state: RefCell<State>,
    gate: PrerenderGate<TrackingCall>,
    dispatcher: Dispatcher,
    lifecycle: Rc<PageLifecycle>,
    click_capture: Rc<RefCell<Option<ClickCapture>>>,
    timers: Rc<dyn TimerBackend>,
    clock: Rc<dyn Clock>,
    env: Rc<dyn Environment>,
}

impl Tracker {
    pub fn new(config: TrackerConfig, host: Host, plugins: Rc<PluginRegistry>, lifecycle: Rc<PageLifecycle>) -> Self {
        let now_ms = host.clock.now_millis();
        let minimum_visit_at_ms = config
            .heartbeat
            .map(|h| minimum_visit_at(now_ms, h.minimum_visit_secs))
            .unwrap_or(now_ms);

        let builder = RequestBuilder::new(
            config,
            host.env.clone(),
            host.clock.clone(),
            host.cookies.clone(),
            plugins.clone(),
        );
        plugins.execute(Hook::Run);

        Self {
            state: RefCell::new(State {
                builder,
                cart: Cart::new(),
                minimum_visit_at_ms,
                heartbeat: None,
                heartbeat_data: None,
                js_error_tracking: false,
            }),
            gate: PrerenderGate::new(),
            dispatcher: Dispatcher::new(host.transport.clone(), host.clock.clone(), lifecycle.clone()),
            lifecycle,
            click_capture: Rc::new(RefCell::new(None)),
            timers: host.timers,
            clock: host.clock,
            env: host.env,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Tracking calls
    // ─────────────────────────────────────────────────────────────────────

    /// Log a page view; `title` falls back to the document title
    pub async fn track_page_view(&self, title: Option<&str>, custom_data: Option<Value>) {
        self.track(TrackingCall::PageView {
            title: title.map(str::to_string),
            custom_data,
        })
        .await;
    }

    pub async fn track_event(&self, category: &str, action: &str, name: Option<&str>, value: Option<f64>) {
        self.track(TrackingCall::Event {
            category: category.to_string(),
            action: action.to_string(),
            name: name.map(str::to_string),
            value,
            custom_data: None,
        })
        .await;
    }

    pub async fn track_site_search(&self, keyword: &str, category: Option<&str>, count: Option<u64>) {
        self.track(TrackingCall::SiteSearch {
            keyword: keyword.to_string(),
            category: category.map(str::to_string),
            count,
            custom_data: None,
        })
        .await;
    }

    /// Record a goal conversion; zero revenue is not sent
    pub async fn track_goal(&self, id: &str, revenue: Option<f64>, custom_data: Option<Value>) {
        self.track(TrackingCall::Goal {
            id: id.to_string(),
            revenue,
            custom_data,
        })
        .await;
    }

    /// Record an outlink or download. With a callback the request is sent
    /// without the link tracking pause and the callback runs once it is done.
    pub async fn track_link(
        &self,
        url: &str,
        kind: LinkKind,
        custom_data: Option<Value>,
        callback: Option<Completion>,
    ) {
        self.track(TrackingCall::Link {
            url: url.to_string(),
            kind,
            custom_data,
            callback,
        })
        .await;
    }

    /// Log an order with the current cart. Orders without an id are ignored.
    pub async fn track_ecommerce_order(&self, order: EcommerceOrder) {
        if order.id.is_empty() {
            tracing::debug!("ecommerce order without id ignored");
            return;
        }
        self.track(TrackingCall::Ecommerce(order)).await;
    }

    pub async fn track_ecommerce_cart_update(&self, grand_total: f64) {
        self.track(TrackingCall::Ecommerce(EcommerceOrder::cart_update(grand_total)))
            .await;
    }

    /// Log a script error as an event in the `JavaScript Errors` category
    pub async fn track_error(&self, message: &str, url: &str, line: u32, column: Option<u32>) {
        let mut action = format!("{url}:{line}");
        if let Some(column) = column.filter(|c| *c > 0) {
            action.push_str(&format!(":{column}"));
        }
        self.track(TrackingCall::Event {
            category: JS_ERROR_CATEGORY.to_string(),
            action,
            name: Some(message.to_string()),
            value: None,
            custom_data: None,
        })
        .await;
    }

    /// Run `call` now, or defer it while the page is pre-rendered
    pub async fn track(&self, call: TrackingCall) {
        let count_pre_rendered = self.state.borrow().builder.config().count_pre_rendered;
        if let Some(call) = self
            .gate
            .admit(self.env.visibility_state(), count_pre_rendered, call)
        {
            self.perform(call).await;
        }
    }

    async fn perform(&self, call: TrackingCall) {
        let page_view_data = match &call {
            TrackingCall::PageView { custom_data, .. } => Some(custom_data.clone()),
            _ => None,
        };

        let prepared = {
            let mut guard = self.state.borrow_mut();
            let state = &mut *guard;
            let title = state.builder.title();
            let page = PageDefaults {
                title: &title,
                discard_hash: state.builder.config().discard_hash_tag,
                pause_ms: state.builder.config().tracker_pause_ms,
            };
            call.into_outgoing(&page, &state.cart, self.clock.now_seconds())
                .map(|out| {
                    let assembled = state
                        .builder
                        .assemble(&out.params, out.custom_data.as_ref(), out.order_ts);
                    let beacon = beacon_for(state.builder.config(), assembled);
                    (beacon, state.builder.finisher(), out)
                })
        };

        if let Some((beacon, finisher, out)) = prepared {
            let beacon = finish(beacon, finisher, out.hook);
            self.dispatch(beacon, out.delay_ms, out.callback).await;
        }

        if let Some(data) = page_view_data {
            self.install_heartbeat(data);
        }
    }

    async fn dispatch(&self, beacon: Beacon, delay_ms: u64, callback: Option<Completion>) {
        if beacon.body.is_empty() {
            if let Some(callback) = callback {
                callback();
            }
            return;
        }
        self.dispatcher.send(beacon, delay_ms, callback).await;
    }

    /// The page became visible: run every call held back while pre-rendered
    pub async fn on_visibility_change(&self) {
        let deferred = self.gate.release();
        if !deferred.is_empty() {
            tracing::debug!(count = deferred.len(), "releasing pre-rendered calls");
        }
        for call in deferred {
            self.perform(call).await;
        }
    }

    /// Calls waiting for the page to become visible
    pub fn pending_calls(&self) -> usize {
        self.gate.pending()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Heartbeat
    // ─────────────────────────────────────────────────────────────────────

    /// Ping every `interval_secs` while the visitor is active, starting
    /// `minimum_visit_secs` from now
    pub fn set_heartbeat_timer(&self, minimum_visit_secs: u64, interval_secs: u64) {
        let mut state = self.state.borrow_mut();
        state.minimum_visit_at_ms = minimum_visit_at(self.clock.now_millis(), minimum_visit_secs);
        state.builder.config_mut().heartbeat = Some(HeartbeatConfig {
            minimum_visit_secs,
            interval_secs,
        });
    }

    fn install_heartbeat(&self, data: Option<Value>) {
        let mut state = self.state.borrow_mut();
        if state.heartbeat.is_some() {
            return;
        }
        let Some(config) = state.builder.config().heartbeat.filter(|h| h.interval_secs > 0) else {
            return;
        };

        let heartbeat = Heartbeat::new(config.interval_secs, state.minimum_visit_at_ms, self.clock.now_millis());
        self.timers
            .schedule_once(heartbeat::TIMER_ID, heartbeat.interval(), TimerEvent::Heartbeat);
        tracing::debug!(interval_secs = config.interval_secs, timers = self.timers.name(), "heartbeat installed");

        state.heartbeat = Some(heartbeat);
        state.heartbeat_data = data;
    }

    /// Visitor activity (mouse, keyboard, scroll, focus); only counted once
    /// the heartbeat is running
    pub fn record_activity(&self) {
        let now = self.clock.now_millis();
        if let Some(heartbeat) = self.state.borrow_mut().heartbeat.as_mut() {
            heartbeat.record_activity(now);
        }
    }

    pub fn heartbeat_running(&self) -> bool {
        self.state
            .borrow()
            .heartbeat
            .as_ref()
            .is_some_and(|h| !h.is_stopped())
    }

    /// A timer scheduled by this tracker fired
    pub async fn on_timer(&self, event: TimerEvent) {
        match event {
            TimerEvent::Heartbeat => self.heartbeat_tick().await,
            TimerEvent::Custom { name } => {
                tracing::debug!(timer = %name, "ignoring timer the tracker did not schedule");
            }
        }
    }

    async fn heartbeat_tick(&self) {
        let step = {
            let mut state = self.state.borrow_mut();
            let Some(heartbeat) = state.heartbeat.as_mut() else {
                return;
            };
            let step = heartbeat.tick(self.clock.now_millis());
            if step != HeartbeatStep::Stop {
                self.timers
                    .schedule_once(heartbeat::TIMER_ID, heartbeat.interval(), TimerEvent::Heartbeat);
            }
            step
        };

        match step {
            HeartbeatStep::Ping => {
                let (beacon, finisher, pause_ms) = {
                    let mut guard = self.state.borrow_mut();
                    let state = &mut *guard;
                    let assembled = state.builder.assemble("ping=1", state.heartbeat_data.as_ref(), None);
                    let config = state.builder.config();
                    (beacon_for(config, assembled), state.builder.finisher(), config.tracker_pause_ms)
                };
                let beacon = finish(beacon, finisher, Hook::Ping);
                self.dispatch(beacon, pause_ms, None).await;
            }
            HeartbeatStep::Wait => {}
            HeartbeatStep::Stop => tracing::debug!("no activity during the last interval, heartbeat stopped"),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Link clicks and script errors
    // ─────────────────────────────────────────────────────────────────────

    /// Track clicks on outlinks and downloads once the page has loaded.
    ///
    /// In pseudo-click mode a mousedown/mouseup pair counts as a click, which
    /// also catches middle clicks. Only the first call has an effect.
    pub fn enable_link_tracking(&self, pseudo_click: bool) {
        let slot = self.click_capture.clone();
        self.lifecycle.defer_until_load(Box::new(move || {
            let mut capture = slot.borrow_mut();
            if capture.is_none() {
                tracing::debug!(pseudo_click, "link tracking installed");
                *capture = Some(ClickCapture::new(pseudo_click));
            }
        }));
    }

    pub fn link_tracking_enabled(&self) -> bool {
        self.click_capture.borrow().is_some()
    }

    /// Feed a pointer event on `anchor`. Returns whether it was tracked.
    pub async fn handle_pointer_event(&self, kind: PointerEventKind, button: u16, anchor: Option<&Anchor>) -> bool {
        let accepted = self
            .click_capture
            .borrow()
            .as_ref()
            .map(|capture| capture.accept(kind, button, anchor.map(|a| a.id)));
        let (Some(true), Some(anchor)) = (accepted, anchor) else {
            return false;
        };

        let resolved = {
            let state = self.state.borrow();
            let classifier = LinkClassifier::new(state.builder.config());
            classifier.resolve(anchor, &state.builder.site_hosts())
        };
        let Some((kind, url)) = resolved else {
            return false;
        };

        self.perform(TrackingCall::Link {
            url,
            kind,
            custom_data: None,
            callback: None,
        })
        .await;
        true
    }

    /// Start reporting uncaught script errors. Returns `false` when already on.
    pub fn enable_js_error_tracking(&self) -> bool {
        let mut state = self.state.borrow_mut();
        if state.js_error_tracking {
            return false;
        }
        state.js_error_tracking = true;
        true
    }

    /// An uncaught script error reached the page's error handler
    pub async fn on_script_error(&self, message: &str, url: &str, line: u32, column: Option<u32>) {
        if !self.state.borrow().js_error_tracking {
            return;
        }
        self.track_error(message, url, line, column).await;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Ecommerce and custom variables
    // ─────────────────────────────────────────────────────────────────────

    /// Record a product or category page view in the reserved page-scope slots
    pub fn set_ecommerce_view(
        &self,
        sku: Option<&str>,
        name: Option<&str>,
        category: Option<&Category>,
        price: Option<f64>,
    ) {
        let mut state = self.state.borrow_mut();
        for (index, slot_name, value) in product_view_variables(sku, name, category, price) {
            state
                .builder
                .set_custom_variable(index, slot_name, &value, Scope::Page);
        }
    }

    pub fn add_ecommerce_item(&self, item: EcommerceItem) {
        self.state.borrow_mut().cart.add(item);
    }

    pub fn cart(&self) -> Cart {
        self.state.borrow().cart.clone()
    }

    pub fn set_custom_variable(&self, index: i64, name: &str, value: &str, scope: Scope) {
        self.state
            .borrow_mut()
            .builder
            .set_custom_variable(index, name, value, scope);
    }

    pub fn custom_variable(&self, index: i64, scope: Scope) -> Option<(String, String)> {
        self.state.borrow_mut().builder.custom_variable(index, scope)
    }

    pub fn delete_custom_variable(&self, index: i64, scope: Scope) {
        self.state.borrow_mut().builder.delete_custom_variable(index, scope);
    }

    pub fn store_custom_variables_in_cookie(&self) {
        self.with_config(|c| c.store_custom_variables_in_cookie = true);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Getters
    // ─────────────────────────────────────────────────────────────────────

    pub fn visitor_id(&self) -> String {
        self.state.borrow_mut().builder.visitor_id()
    }

    pub fn visitor_info(&self) -> VisitorIdentity {
        self.state.borrow_mut().builder.visitor_info()
    }

    pub fn attribution_info(&self) -> AttributionRecord {
        self.state.borrow().builder.attribution_info()
    }

    pub fn attribution_campaign_name(&self) -> String {
        self.attribution_info().campaign_name
    }

    pub fn attribution_campaign_keyword(&self) -> String {
        self.attribution_info().campaign_keyword
    }

    pub fn attribution_referrer_timestamp(&self) -> i64 {
        self.attribution_info().referral_ts
    }

    pub fn attribution_referrer_url(&self) -> String {
        self.attribution_info().referral_url
    }

    pub fn custom_data(&self) -> Option<Value> {
        self.state.borrow().builder.config().custom_data.clone()
    }

    /// Build a request for raw leading parameters without sending it.
    /// Cookies are refreshed exactly as for a sent request.
    pub fn get_request(&self, params: &str) -> String {
        let (assembled, finisher) = {
            let mut state = self.state.borrow_mut();
            (state.builder.assemble(params, None, None), state.builder.finisher())
        };
        finisher.finish(assembled, None)
    }

    pub fn config(&self) -> TrackerConfig {
        self.state.borrow().builder.config().clone()
    }

    pub fn current_url(&self) -> String {
        self.state.borrow().builder.current_url()
    }

    pub fn do_not_track(&self) -> bool {
        self.state.borrow().builder.do_not_track()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Setters
    // ─────────────────────────────────────────────────────────────────────

    fn with_config(&self, update: impl FnOnce(&mut TrackerConfig)) {
        update(self.state.borrow_mut().builder.config_mut());
    }

    pub fn set_tracker_url(&self, tracker_url: &str) {
        self.with_config(|c| c.tracker_url = tracker_url.to_string());
    }

    pub fn set_api_url(&self, api_url: &str) {
        self.with_config(|c| c.api_url = api_url.to_string());
    }

    pub fn set_site_id(&self, site_id: &str) {
        self.state.borrow_mut().builder.set_site_id(site_id);
    }

    pub fn set_user_id(&self, user_id: &str) {
        self.with_config(|c| c.user_id = user_id.to_string());
    }

    /// Replace the tracker-wide custom data
    pub fn set_custom_data(&self, data: Value) {
        self.with_config(|c| c.custom_data = Some(data));
    }

    /// Set one key of the tracker-wide custom data
    pub fn set_custom_data_value(&self, key: &str, value: Value) {
        self.with_config(|c| {
            let mut map = match c.custom_data.take() {
                Some(Value::Object(map)) => map,
                _ => Map::new(),
            };
            map.insert(key.to_string(), value);
            c.custom_data = Some(Value::Object(map));
        });
    }

    pub fn set_custom_request_processing(&self, processor: Option<RequestProcessor>) {
        self.state.borrow_mut().builder.set_request_processor(processor);
    }

    pub fn append_to_tracking_url(&self, query: &str) {
        self.with_config(|c| c.append_to_tracking_url = query.to_string());
    }

    pub fn set_custom_url(&self, custom_url: &str) {
        self.state.borrow_mut().builder.set_custom_url(custom_url);
    }

    pub fn set_referrer_url(&self, referrer_url: &str) {
        self.with_config(|c| c.referrer_url = Some(referrer_url.to_string()));
    }

    pub fn set_document_title(&self, title: &str) {
        self.with_config(|c| c.document_title = Some(title.to_string()));
    }

    /// Replace the download extension alternation, e.g. `"zip|pdf"`
    pub fn set_download_extensions(&self, extensions: &str) {
        self.with_config(|c| c.download_extensions = extensions.to_string());
    }

    pub fn add_download_extensions(&self, extensions: &str) {
        self.with_config(|c| {
            c.download_extensions.push('|');
            c.download_extensions.push_str(extensions);
        });
    }

    /// Hosts treated as the site; the page host always stays one of them
    pub fn set_domains(&self, domains: Vec<String>) {
        self.with_config(|c| c.domains = domains);
    }

    pub fn set_ignore_classes(&self, classes: Vec<String>) {
        self.with_config(|c| c.ignore_classes = classes);
    }

    pub fn set_download_classes(&self, classes: Vec<String>) {
        self.with_config(|c| c.download_classes = classes);
    }

    pub fn set_link_classes(&self, classes: Vec<String>) {
        self.with_config(|c| c.link_classes = classes);
    }

    pub fn set_campaign_name_key(&self, keys: Vec<String>) {
        self.with_config(|c| c.campaign_name_parameters = keys);
    }

    pub fn set_campaign_keyword_key(&self, keys: Vec<String>) {
        self.with_config(|c| c.campaign_keyword_parameters = keys);
    }

    pub fn discard_hash_tag(&self, enable: bool) {
        self.with_config(|c| c.discard_hash_tag = enable);
    }

    pub fn set_cookie_name_prefix(&self, prefix: &str) {
        self.state.borrow_mut().builder.set_cookie_name_prefix(prefix);
    }

    pub fn set_cookie_domain(&self, domain: &str) {
        self.state.borrow_mut().builder.set_cookie_domain(domain);
    }

    pub fn set_cookie_path(&self, path: &str) {
        self.state.borrow_mut().builder.set_cookie_path(path);
    }

    pub fn set_visitor_cookie_timeout(&self, secs: i64) {
        self.with_config(|c| c.visitor_cookie_timeout_secs = secs);
    }

    pub fn set_session_cookie_timeout(&self, secs: i64) {
        self.with_config(|c| c.session_cookie_timeout_secs = secs);
    }

    pub fn set_referral_cookie_timeout(&self, secs: i64) {
        self.with_config(|c| c.referral_cookie_timeout_secs = secs);
    }

    pub fn set_conversion_attribution_first_referrer(&self, enable: bool) {
        self.with_config(|c| c.first_referrer_attribution = enable);
    }

    pub fn disable_cookies(&self) {
        self.state.borrow_mut().builder.disable_cookies();
    }

    pub fn delete_cookies(&self) {
        self.state.borrow().builder.delete_cookies();
    }

    pub fn set_do_not_track(&self, enable: bool) {
        self.state.borrow_mut().builder.set_do_not_track(enable);
    }

    /// `"POST"` (any case) selects POST; anything else the pixel GET
    pub fn set_request_method(&self, method: &str) {
        self.with_config(|c| c.request_method = RequestMethod::parse(method));
    }

    pub fn set_request_content_type(&self, content_type: &str) {
        self.with_config(|c| c.request_content_type = content_type.to_string());
    }

    /// Delay the page unload waits for after a tracked request
    pub fn set_link_tracking_timer(&self, pause_ms: u64) {
        self.with_config(|c| c.tracker_pause_ms = pause_ms);
    }

    pub fn set_generation_time_ms(&self, generation_time_ms: u64) {
        self.with_config(|c| c.generation_time_ms = Some(generation_time_ms));
    }

    pub fn disable_performance_tracking(&self) {
        self.with_config(|c| c.performance_tracking = false);
    }

    pub fn set_count_pre_rendered(&self, enable: bool) {
        self.with_config(|c| c.count_pre_rendered = enable);
    }
}

impl fmt::Debug for Tracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("builder", &self.state.borrow().builder)
            .field("pending_calls", &self.gate.pending())
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

fn minimum_visit_at(now_ms: i64, minimum_visit_secs: u64) -> i64 {
    let offset = i64::try_from(minimum_visit_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
    now_ms.saturating_add(offset)
}

/// Run plugin hooks and the request processor on an assembled beacon. Both
/// are caller code that may call back into the tracker, so no state is
/// borrowed here.
fn finish(mut beacon: Beacon, finisher: RequestFinisher, hook: Hook) -> Beacon {
    beacon.body = finisher.finish(beacon.body, Some(hook));
    beacon
}

fn beacon_for(config: &TrackerConfig, body: String) -> Beacon {
    Beacon {
        kind: match config.request_method {
            RequestMethod::Get => TransportKind::Pixel,
            RequestMethod::Post => TransportKind::Post,
        },
        endpoint: config.tracker_url.clone(),
        body,
        content_type: config.request_content_type.clone(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use beacon_core::{FnPlugin, MemoryCookieJar, MockClock, MockTimerBackend, StaticEnvironment};

    use super::*;
    use crate::transport::RecordingTransport;

    struct Fixture {
        clock: MockClock,
        transport: RecordingTransport,
        timers: Rc<MockTimerBackend>,
        lifecycle: Rc<PageLifecycle>,
        plugins: Rc<PluginRegistry>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                clock: MockClock::default(),
                transport: RecordingTransport::new(),
                timers: Rc::new(MockTimerBackend::new()),
                lifecycle: Rc::new(PageLifecycle::new()),
                plugins: Rc::new(PluginRegistry::new()),
            }
        }

        fn tracker(&self, config: TrackerConfig) -> Tracker {
            let host = Host {
                env: Rc::new(StaticEnvironment::for_page("http://example.com/shop").with_title("Shop")),
                clock: Rc::new(self.clock.clone()),
                cookies: Rc::new(MemoryCookieJar::new(Rc::new(self.clock.clone()))),
                transport: Rc::new(self.transport.clone()),
                timers: self.timers.clone(),
            };
            Tracker::new(config, host, self.plugins.clone(), self.lifecycle.clone())
        }
    }

    fn config() -> TrackerConfig {
        TrackerConfig::new("https://t.example/piwik.php", "1")
    }

    #[tokio::test]
    async fn test_page_view_uses_document_title() {
        let fx = Fixture::new();
        let tracker = fx.tracker(config());
        tracker.track_page_view(None, None).await;
        tracker.track_page_view(Some("Custom Title"), None).await;

        let bodies = fx.transport.bodies();
        assert!(bodies[0].starts_with("action_name=Shop&idsite=1"));
        assert!(bodies[1].starts_with("action_name=Custom%20Title&"));
    }

    #[tokio::test]
    async fn test_event_requires_category_and_action() {
        let fx = Fixture::new();
        let tracker = fx.tracker(config());
        tracker.track_event("", "play", None, None).await;
        tracker.track_event("Video", "", None, None).await;
        assert!(fx.transport.is_empty());

        tracker.track_event("Video", "play", Some("intro"), Some(2.5)).await;
        assert!(fx.transport.bodies()[0].starts_with("e_c=Video&e_a=play&e_n=intro&e_v=2.5&idsite="));
    }

    #[tokio::test]
    async fn test_goal_revenue_only_when_non_zero() {
        let fx = Fixture::new();
        let tracker = fx.tracker(config());
        tracker.track_goal("3", Some(0.0), None).await;
        tracker.track_goal("3", Some(12.0), None).await;

        let bodies = fx.transport.bodies();
        assert!(bodies[0].starts_with("idgoal=3&idsite="));
        assert!(bodies[1].starts_with("idgoal=3&revenue=12&idsite="));
    }

    #[tokio::test]
    async fn test_error_event_action() {
        let fx = Fixture::new();
        let tracker = fx.tracker(config());
        tracker.on_script_error("boom", "app.js", 10, Some(4)).await;
        assert!(fx.transport.is_empty());

        assert!(tracker.enable_js_error_tracking());
        assert!(!tracker.enable_js_error_tracking());
        tracker.on_script_error("boom", "app.js", 10, Some(4)).await;
        tracker.on_script_error("boom", "app.js", 11, Some(0)).await;

        let bodies = fx.transport.bodies();
        assert!(bodies[0].starts_with("e_c=JavaScript%20Errors&e_a=app.js%3A10%3A4&e_n=boom&"));
        assert!(bodies[1].starts_with("e_c=JavaScript%20Errors&e_a=app.js%3A11&e_n=boom&"));
    }

    #[tokio::test]
    async fn test_heartbeat_installed_once_after_page_view() {
        let fx = Fixture::new();
        let tracker = fx.tracker(config());
        tracker.set_heartbeat_timer(0, 15);

        tracker.track_event("a", "b", None, None).await;
        assert_eq!(fx.timers.active_count(), 0);

        tracker.track_page_view(None, None).await;
        tracker.track_page_view(None, None).await;
        assert_eq!(fx.timers.scheduled_count(), 1);
        let timer = fx.timers.get_timer(heartbeat::TIMER_ID).unwrap();
        assert_eq!(timer.delay, Duration::from_secs(15));
        assert!(tracker.heartbeat_running());
    }

    #[tokio::test]
    async fn test_hooks_may_read_the_tracker() {
        let fx = Fixture::new();
        let tracker = Rc::new(fx.tracker(config()));

        let weak = Rc::downgrade(&tracker);
        fx.plugins.add(
            "vid",
            Rc::new(FnPlugin::new().on(Hook::Log, move || Some(format!("&vid={}", weak.upgrade()?.visitor_id())))),
        );
        let weak = Rc::downgrade(&tracker);
        tracker.set_custom_request_processing(Some(Rc::new(move |request: &str| {
            let url = weak.upgrade().map(|t| t.current_url()).unwrap_or_default();
            format!("{request}&seen={}", encode(&url))
        })));

        tracker.track_page_view(Some("Home"), None).await;
        let id = tracker.visitor_id();
        let body = &fx.transport.bodies()[0];
        assert!(body.contains(&format!("&vid={id}")));
        assert!(body.ends_with("&seen=http%3A%2F%2Fexample.com%2Fshop"));

        let request = tracker.get_request("ping=1");
        assert!(request.ends_with("&seen=http%3A%2F%2Fexample.com%2Fshop"));
    }

    #[tokio::test]
    async fn test_heartbeat_ping_runs_ping_hook() {
        let fx = Fixture::new();
        let tracker = Rc::new(fx.tracker(config()));
        let weak = Rc::downgrade(&tracker);
        fx.plugins.add(
            "ping",
            Rc::new(FnPlugin::new().on(Hook::Ping, move || Some(format!("&hb={}", weak.upgrade()?.heartbeat_running())))),
        );
        tracker.set_heartbeat_timer(0, 15);
        tracker.track_page_view(None, None).await;
        fx.clock.advance(Duration::from_secs(10));
        tracker.record_activity();
        fx.clock.advance(Duration::from_secs(5));
        tracker.on_timer(TimerEvent::Heartbeat).await;

        let bodies = fx.transport.bodies();
        assert_eq!(bodies.len(), 2);
        assert!(bodies[1].starts_with("ping=1&"));
        assert!(bodies[1].contains("&hb=true"));
    }

    #[tokio::test]
    async fn test_custom_timer_is_ignored() {
        let fx = Fixture::new();
        let tracker = fx.tracker(config());
        tracker
            .on_timer(TimerEvent::Custom {
                name: "other".to_string(),
            })
            .await;
        assert!(fx.transport.is_empty());
    }

    #[tokio::test]
    async fn test_custom_data_key_value() {
        let fx = Fixture::new();
        let tracker = fx.tracker(config());
        tracker.set_custom_data_value("plan", Value::from("pro"));
        tracker.set_custom_data_value("seats", Value::from(3));
        assert_eq!(tracker.custom_data(), Some(serde_json::json!({"plan": "pro", "seats": 3})));

        tracker.set_custom_data(serde_json::json!(["x"]));
        tracker.set_custom_data_value("k", Value::from(1));
        assert_eq!(tracker.custom_data(), Some(serde_json::json!({"k": 1})));
    }

    #[tokio::test]
    async fn test_request_method_selects_transport() {
        let fx = Fixture::new();
        let tracker = fx.tracker(config());
        tracker.set_request_method("post");
        tracker.set_request_content_type("text/plain");
        tracker.track_page_view(None, None).await;

        let sent = fx.transport.sent();
        assert_eq!(sent[0].kind, TransportKind::Post);
        assert_eq!(sent[0].content_type, "text/plain");
        assert_eq!(sent[0].endpoint, "https://t.example/piwik.php");
    }
}
