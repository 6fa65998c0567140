//! # Request Builder
//!
//! Turns the tracker's persisted and in-memory state into one outbound query
//! string. Building is where the session machine runs and where the identity
//! and session cookies are refreshed; nothing else moves that state.
//!
//! Field order of a built request:
//!
//! ```text
//! <action params>
//! &idsite &rec=1 &r &h &m &s            required markers
//! &url [&urlref] [&uid]                 page, referrer, user
//! &_id &_idts &_idvc &_idn              visitor identity
//! [&_rcn] [&_rck]                       campaign
//! &_refts &_viewts [&_ects] [&_ref] [&cs]
//! &pdf ... &cookie &res                 browser features
//! [&data]                               custom data
//! [&cvar] [&e_cvar] [&_cvar]            custom variables
//! [&gt_ms]                              generation time
//! <plugin fragments> [&<appended>]
//! ```
//!
//! The result then goes through the custom request processor, if any.

use std::fmt;
use std::rc::Rc;

use chrono::{TimeDelta, Timelike};
use rand::Rng;
use serde_json::Value;

use crate::attribution::{self, AttributionPolicy, AttributionRecord};
use crate::config::TrackerConfig;
use crate::cookie::{CookieBase, CookieJar, CookieScope, CookieStore};
use crate::custom_vars::{CustomVariables, Scope};
use crate::env::Environment;
use crate::features::BrowserFeatures;
use crate::identity::{self, timestamp_field, VisitorIdentity};
use crate::plugin::{Hook, PluginRegistry};
use crate::timing::Clock;
use crate::url::{self, encode, PageLocation};

/// Value of the session marker cookie
pub const SESSION_MARKER: &str = "*";

/// Caller-supplied rewrite of the finished request
pub type RequestProcessor = Rc<dyn Fn(&str) -> String>;

/// Render a number the way a browser prints it: integral values without a
/// fractional part
pub fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// JSON number, integral when the value is
pub fn number_value(value: f64) -> Value {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        Value::from(value as i64)
    } else {
        serde_json::Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

/// Longest cookie lifetime honoured; expiry dates past it are not representable
const MAX_COOKIE_TTL_SECS: i64 = 1000 * 365 * 86_400;

/// A cookie lifetime of 0 seconds means a session cookie
fn ttl(secs: i64) -> Option<TimeDelta> {
    (secs != 0).then(|| TimeDelta::seconds(secs.clamp(-MAX_COOKIE_TTL_SECS, MAX_COOKIE_TTL_SECS)))
}

/// Per-tracker state and the request assembly over it
pub struct RequestBuilder {
    config: TrackerConfig,
    location: PageLocation,
    page_title: String,
    cookies: CookieStore,
    features: BrowserFeatures,
    page_variables: CustomVariables,
    event_variables: CustomVariables,
    /// Loaded from the cookie on first use
    visit_variables: Option<CustomVariables>,
    visitor_uuid: Option<String>,
    do_not_track: bool,
    request_processor: Option<RequestProcessor>,
    env: Rc<dyn Environment>,
    clock: Rc<dyn Clock>,
    plugins: Rc<PluginRegistry>,
}

impl RequestBuilder {
    pub fn new(
        mut config: TrackerConfig,
        env: Rc<dyn Environment>,
        clock: Rc<dyn Clock>,
        jar: Rc<dyn CookieJar>,
        plugins: Rc<PluginRegistry>,
    ) -> Self {
        let first_link = env.first_link();
        let location = PageLocation::fixup(&env.host(), &env.href(), &env.referrer(), first_link.as_deref());

        config.cookie_domain = config.cookie_domain.as_deref().map(url::domain_fixup);
        if let Some(custom) = config.custom_url.take() {
            config.custom_url = Some(url::resolve_relative_reference(
                &location.href,
                &custom,
                config.discard_hash_tag,
            ));
        }

        let scope = scope_for(&config, &location.host);
        let mut cookies = CookieStore::new(jar, clock.clone(), scope);

        let do_not_track = config.do_not_track && browser_requests_no_tracking(env.as_ref());
        if config.cookies_disabled || do_not_track {
            config.cookies_disabled = true;
            cookies.disable();
        }

        let features = BrowserFeatures::detect(env.as_ref(), || cookies.supports_cookies(env.cookies_enabled()));

        tracing::debug!(
            site_id = %config.site_id,
            host = %location.host,
            domain_hash = %cookies.scope().domain_hash(),
            do_not_track,
            "request builder ready"
        );

        Self {
            page_title: env.title(),
            config,
            location,
            cookies,
            features,
            page_variables: CustomVariables::new(),
            event_variables: CustomVariables::new(),
            visit_variables: None,
            visitor_uuid: None,
            do_not_track,
            request_processor: None,
            env,
            clock,
            plugins,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Building
    // ─────────────────────────────────────────────────────────────────────

    /// Build a complete request for `action` (already-encoded leading
    /// parameters): [`assemble`](Self::assemble) then the
    /// [`finisher`](Self::finisher).
    ///
    /// Plugins and the request processor run while `self` is borrowed. A
    /// caller whose hooks may reach back into the builder runs the two steps
    /// itself and releases the builder in between.
    pub fn build(
        &mut self,
        action: &str,
        custom_data: Option<&Value>,
        hook: Option<Hook>,
        ecommerce_order_ts: Option<i64>,
    ) -> String {
        let request = self.assemble(action, custom_data, ecommerce_order_ts);
        self.finisher().finish(request, hook)
    }

    /// Run the session transition, refresh cookies and assemble every field
    /// up to the plugin fragments.
    ///
    /// Returns an empty string, without touching any cookie, when
    /// Do-Not-Track is in effect.
    pub fn assemble(&mut self, action: &str, custom_data: Option<&Value>, ecommerce_order_ts: Option<i64>) -> String {
        if self.do_not_track {
            tracing::debug!("do not track in effect, request dropped");
            return String::new();
        }

        if self.cookies.is_disabled() {
            self.cookies.delete_all();
        }

        let now = self.clock.now();
        let now_ts = now.timestamp();

        let stored = self.load_identity();
        let fresh_uuid = match stored {
            Some(_) => None,
            None => Some(self.visitor_uuid(now.timestamp_millis())),
        };
        let session_marker = self
            .cookies
            .get(CookieBase::Session)
            .is_some_and(|v| !v.is_empty());
        let mut attribution = self.load_attribution();
        let current_url = self.current_url();
        let referrer_url = self.referrer_url();

        let outcome = identity::advance(
            stored,
            session_marker,
            now_ts,
            self.config.session_cookie_timeout_secs,
            move || fresh_uuid.unwrap_or_default(),
        );
        let mut visitor = outcome.identity;

        if outcome.new_session {
            let site_hosts = self.site_hosts();
            let policy = AttributionPolicy {
                first_referrer: self.config.first_referrer_attribution,
                campaign_name_parameters: &self.config.campaign_name_parameters,
                campaign_keyword_parameters: &self.config.campaign_keyword_parameters,
                site_hosts: &site_hosts,
                discard_hash: self.config.discard_hash_tag,
            };
            let update = attribution::recompute(attribution, &current_url, &referrer_url, now_ts, &policy);
            if update.persist {
                self.cookies.set(
                    CookieBase::Referral,
                    &update.record.to_cookie_value(),
                    ttl(self.config.referral_cookie_timeout_secs),
                );
            }
            attribution = update.record;
        }

        let discard = self.config.discard_hash_tag;
        let mut request = String::from(action);

        let mut rng = rand::thread_rng();
        request.push_str(&format!(
            "&idsite={}&rec=1&r={:06}&h={}&m={}&s={}",
            self.config.site_id,
            rng.gen_range(0..1_000_000u32),
            now.hour(),
            now.minute(),
            now.second()
        ));

        request.push_str("&url=");
        request.push_str(&encode(&url::purify(&current_url, discard)));
        if !referrer_url.is_empty() {
            request.push_str("&urlref=");
            request.push_str(&encode(&url::purify(&referrer_url, discard)));
        }
        if !self.config.user_id.is_empty() {
            request.push_str("&uid=");
            request.push_str(&encode(&self.config.user_id));
        }

        request.push_str(&format!(
            "&_id={}&_idts={}&_idvc={}&_idn={}",
            visitor.uuid,
            visitor.created_at,
            visitor.visit_count,
            if visitor.is_new_visitor { 1 } else { 0 }
        ));

        if !attribution.campaign_name.is_empty() {
            request.push_str("&_rcn=");
            request.push_str(&encode(&attribution.campaign_name));
        }
        if !attribution.campaign_keyword.is_empty() {
            request.push_str("&_rck=");
            request.push_str(&encode(&attribution.campaign_keyword));
        }

        request.push_str(&format!(
            "&_refts={}&_viewts={}",
            attribution.referral_ts,
            timestamp_field(visitor.last_visit_at)
        ));
        if let Some(ects) = visitor.last_ecommerce_order_at {
            request.push_str(&format!("&_ects={ects}"));
        }
        if !attribution.referral_url.is_empty() {
            request.push_str("&_ref=");
            request.push_str(&encode(&attribution::normalize_referral_url(
                &attribution.referral_url,
                discard,
            )));
        }
        if let Some(charset) = self.charset() {
            request.push_str("&cs=");
            request.push_str(&encode(&charset));
        }

        request.push_str(&self.features.to_query());

        if let Some(data) = custom_data.or(self.config.custom_data.as_ref()) {
            request.push_str("&data=");
            request.push_str(&encode(&data.to_string()));
        }

        for (name, vars) in [("cvar", &self.page_variables), ("e_cvar", &self.event_variables)] {
            if let Some(json) = vars.to_query_json() {
                request.push_str(&format!("&{name}={}", encode(&json)));
            }
        }

        if let Some(visit) = self.visit_variables.as_mut() {
            if let Some(json) = visit.to_query_json() {
                request.push_str("&_cvar=");
                request.push_str(&encode(&json));
            }
            visit.prune_empty();
            if self.config.store_custom_variables_in_cookie {
                self.cookies.set(
                    CookieBase::CustomVariables,
                    &visit.to_json(),
                    ttl(self.config.session_cookie_timeout_secs),
                );
            }
        }

        if let Some(generation_time) = self.generation_time_ms() {
            request.push_str(&format!("&gt_ms={generation_time}"));
        }

        if ecommerce_order_ts.is_some() {
            visitor.last_ecommerce_order_at = ecommerce_order_ts;
        }
        self.cookies.set(
            CookieBase::Id,
            &visitor.to_cookie_value(),
            ttl(self.config.visitor_cookie_timeout_secs),
        );
        self.cookies.set(
            CookieBase::Session,
            SESSION_MARKER,
            ttl(self.config.session_cookie_timeout_secs),
        );

        tracing::debug!(
            visit_count = visitor.visit_count,
            new_session = outcome.new_session,
            "request assembled"
        );

        request
    }

    /// The steps that follow [`assemble`](Self::assemble), detached from the
    /// builder
    pub fn finisher(&self) -> RequestFinisher {
        RequestFinisher {
            plugins: self.plugins.clone(),
            append: self.config.append_to_tracking_url.clone(),
            processor: self.request_processor.clone(),
        }
    }

    fn generation_time_ms(&self) -> Option<i64> {
        if !self.config.performance_tracking {
            return None;
        }
        match self.config.generation_time_ms.filter(|ms| *ms > 0) {
            Some(ms) => i64::try_from(ms).ok(),
            None => self
                .env
                .navigation_timing()
                .and_then(|timing| timing.generation_time_ms()),
        }
    }

    fn charset(&self) -> Option<String> {
        self.env
            .charset()
            .filter(|c| !c.is_empty() && !c.eq_ignore_ascii_case("utf-8"))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Persisted state
    // ─────────────────────────────────────────────────────────────────────

    fn load_identity(&self) -> Option<VisitorIdentity> {
        let raw = self.cookies.get(CookieBase::Id).filter(|v| !v.is_empty())?;
        match VisitorIdentity::parse(&raw) {
            Ok(identity) => Some(identity),
            Err(err) => {
                tracing::warn!(error = %err, "ignoring unreadable visitor cookie");
                None
            }
        }
    }

    fn load_attribution(&self) -> AttributionRecord {
        let Some(raw) = self.cookies.get(CookieBase::Referral).filter(|v| !v.is_empty()) else {
            return AttributionRecord::default();
        };
        AttributionRecord::parse(&raw).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "ignoring unreadable attribution cookie");
            AttributionRecord::default()
        })
    }

    fn read_visit_variables(&self) -> CustomVariables {
        let Some(raw) = self
            .cookies
            .get(CookieBase::CustomVariables)
            .filter(|v| !v.is_empty())
        else {
            return CustomVariables::new();
        };
        CustomVariables::parse(&raw).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "ignoring unreadable custom variable cookie");
            CustomVariables::new()
        })
    }

    fn visit_variables(&mut self) -> &mut CustomVariables {
        if self.visit_variables.is_none() {
            self.visit_variables = Some(self.read_visit_variables());
        }
        self.visit_variables.get_or_insert_with(CustomVariables::new)
    }

    /// Visitor id for this page; generated once and reused
    fn visitor_uuid(&mut self, now_millis: i64) -> String {
        if let Some(uuid) = &self.visitor_uuid {
            return uuid.clone();
        }
        let uuid = identity::generate_visitor_id(
            &self.env.user_agent(),
            &self.env.platform(),
            &self.features.to_json(),
            now_millis,
            rand::random::<f64>(),
        );
        self.visitor_uuid = Some(uuid.clone());
        uuid
    }

    /// Identity as persisted, or the one a first request would create
    pub fn visitor_info(&mut self) -> VisitorIdentity {
        match self.load_identity() {
            Some(identity) => identity,
            None => {
                let now = self.clock.now();
                let uuid = self.visitor_uuid(now.timestamp_millis());
                VisitorIdentity::first_visit(uuid, now.timestamp())
            }
        }
    }

    pub fn visitor_id(&mut self) -> String {
        self.visitor_info().uuid
    }

    pub fn attribution_info(&self) -> AttributionRecord {
        self.load_attribution()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Custom variables
    // ─────────────────────────────────────────────────────────────────────

    pub fn set_custom_variable(&mut self, index: i64, name: &str, value: &str, scope: Scope) {
        if index <= 0 {
            return;
        }
        match scope {
            Scope::Visit => self.visit_variables().set(index, name, value),
            Scope::Page => self.page_variables.set(index, name, value),
            Scope::Event => self.event_variables.set(index, name, value),
        }
    }

    pub fn custom_variable(&mut self, index: i64, scope: Scope) -> Option<(String, String)> {
        match scope {
            Scope::Visit => self.visit_variables().get(index).cloned(),
            Scope::Page => self.page_variables.get(index).cloned(),
            Scope::Event => self.event_variables.get(index).cloned(),
        }
    }

    pub fn delete_custom_variable(&mut self, index: i64, scope: Scope) {
        match scope {
            Scope::Visit => self.visit_variables().delete(index),
            Scope::Page => self.page_variables.delete(index),
            Scope::Event => self.event_variables.delete(index),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Configuration
    // ─────────────────────────────────────────────────────────────────────

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Settings that do not affect cookie naming
    pub fn config_mut(&mut self) -> &mut TrackerConfig {
        &mut self.config
    }

    pub fn set_site_id(&mut self, site_id: &str) {
        self.config.site_id = site_id.to_string();
        self.rescope();
    }

    /// Change the cookie prefix and reload visit-scope variables under it
    pub fn set_cookie_name_prefix(&mut self, prefix: &str) {
        self.config.cookie_name_prefix = prefix.to_string();
        self.rescope();
        self.visit_variables = Some(self.read_visit_variables());
    }

    pub fn set_cookie_domain(&mut self, domain: &str) {
        self.config.cookie_domain = Some(url::domain_fixup(domain));
        self.rescope();
    }

    pub fn set_cookie_path(&mut self, path: &str) {
        self.config.cookie_path = Some(path.to_string());
        self.rescope();
    }

    fn rescope(&mut self) {
        let scope = scope_for(&self.config, &self.location.host);
        self.cookies.rescope(scope);
    }

    /// Stop reading and writing cookies; existing ones go on the next request
    pub fn disable_cookies(&mut self) {
        self.config.cookies_disabled = true;
        self.cookies.disable();
        self.features.set("cookie", "0");
    }

    pub fn delete_cookies(&self) {
        self.cookies.delete_all();
    }

    /// Honour Do-Not-Track when the browser asks for it; doing so also
    /// disables cookies
    pub fn set_do_not_track(&mut self, enable: bool) {
        self.config.do_not_track = enable;
        self.do_not_track = enable && browser_requests_no_tracking(self.env.as_ref());
        if self.do_not_track {
            self.disable_cookies();
        }
    }

    pub fn do_not_track(&self) -> bool {
        self.do_not_track
    }

    /// Override the page URL; relative values resolve against the real one
    pub fn set_custom_url(&mut self, custom_url: &str) {
        self.config.custom_url = Some(url::resolve_relative_reference(
            &self.location.href,
            custom_url,
            self.config.discard_hash_tag,
        ));
    }

    pub fn set_request_processor(&mut self, processor: Option<RequestProcessor>) {
        self.request_processor = processor;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────

    pub fn current_url(&self) -> String {
        self.config
            .custom_url
            .clone()
            .unwrap_or_else(|| self.location.href.clone())
    }

    pub fn referrer_url(&self) -> String {
        self.config
            .referrer_url
            .clone()
            .unwrap_or_else(|| self.location.referrer.clone())
    }

    pub fn title(&self) -> String {
        self.config
            .document_title
            .clone()
            .unwrap_or_else(|| self.page_title.clone())
    }

    pub fn location(&self) -> &PageLocation {
        &self.location
    }

    pub fn site_hosts(&self) -> Vec<String> {
        self.config.site_hosts(&self.location.host)
    }

    pub fn features(&self) -> &BrowserFeatures {
        &self.features
    }

    pub fn cookies(&self) -> &CookieStore {
        &self.cookies
    }

    pub fn environment(&self) -> &Rc<dyn Environment> {
        &self.env
    }

    pub fn clock(&self) -> &Rc<dyn Clock> {
        &self.clock
    }

    pub fn plugins(&self) -> &Rc<PluginRegistry> {
        &self.plugins
    }
}

/// Appends plugin fragments and the configured suffix to an assembled
/// request, then applies the request processor
pub struct RequestFinisher {
    plugins: Rc<PluginRegistry>,
    append: String,
    processor: Option<RequestProcessor>,
}

impl RequestFinisher {
    /// An empty (Do-Not-Track) request stays empty and runs no hook
    pub fn finish(self, mut request: String, hook: Option<Hook>) -> String {
        if request.is_empty() {
            return request;
        }

        if let Some(hook) = hook {
            request.push_str(&self.plugins.execute(hook));
        }

        if !self.append.is_empty() {
            request.push('&');
            request.push_str(&self.append);
        }

        if let Some(processor) = &self.processor {
            request = processor(&request);
        }

        tracing::debug!(
            hook = hook.map(|h| h.as_str()).unwrap_or("none"),
            len = request.len(),
            "request built"
        );

        request
    }
}

impl fmt::Debug for RequestBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBuilder")
            .field("site_id", &self.config.site_id)
            .field("location", &self.location)
            .field("cookies", &self.cookies)
            .field("do_not_track", &self.do_not_track)
            .finish()
    }
}

fn scope_for(config: &TrackerConfig, page_host: &str) -> CookieScope {
    CookieScope::new(
        &config.cookie_name_prefix,
        &config.site_id,
        config.cookie_domain.as_deref(),
        config.cookie_path.as_deref(),
        page_host,
    )
}

fn browser_requests_no_tracking(env: &dyn Environment) -> bool {
    matches!(env.do_not_track().as_deref(), Some("1") | Some("yes"))
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::cookie::MemoryCookieJar;
    use crate::env::{NavigationTiming, StaticEnvironment};
    use crate::plugin::FnPlugin;
    use crate::timing::MockClock;

    struct Fixture {
        clock: MockClock,
        jar: Rc<MemoryCookieJar>,
        plugins: Rc<PluginRegistry>,
    }

    impl Fixture {
        fn new() -> Self {
            let clock = MockClock::default();
            let jar = Rc::new(MemoryCookieJar::new(Rc::new(clock.clone())));
            Self {
                clock,
                jar,
                plugins: Rc::new(PluginRegistry::new()),
            }
        }

        fn builder(&self, config: TrackerConfig, env: StaticEnvironment) -> RequestBuilder {
            RequestBuilder::new(
                config,
                Rc::new(env),
                Rc::new(self.clock.clone()),
                self.jar.clone(),
                self.plugins.clone(),
            )
        }
    }

    fn param<'a>(request: &'a str, name: &str) -> Option<&'a str> {
        request
            .split('&')
            .find_map(|pair| pair.strip_prefix(name).and_then(|rest| rest.strip_prefix('=')))
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(10.0), "10");
        assert_eq!(format_number(-3.0), "-3");
        assert_eq!(format_number(10.25), "10.25");
        assert_eq!(number_value(1.0).to_string(), "1");
        assert_eq!(number_value(1.5).to_string(), "1.5");
    }

    #[test]
    fn test_required_markers_lead() {
        let fx = Fixture::new();
        let mut builder = fx.builder(
            TrackerConfig::new("https://t.example/piwik.php", "5"),
            StaticEnvironment::for_page("http://example.com/a?b=1"),
        );
        let request = builder.build("action_name=Home", None, Some(Hook::Log), None);

        assert!(request.starts_with("action_name=Home&idsite=5&rec=1&r="));
        assert_eq!(param(&request, "r").unwrap().len(), 6);
        assert_eq!(param(&request, "h"), Some("12"));
        assert_eq!(param(&request, "url"), Some("http%3A%2F%2Fexample.com%2Fa%3Fb%3D1"));
        assert!(param(&request, "urlref").is_none());
    }

    #[test]
    fn test_generation_time_precedence() {
        let fx = Fixture::new();
        let mut env = StaticEnvironment::for_page("http://example.com/");
        env.navigation_timing = Some(NavigationTiming { request_start: 1_000, response_end: 1_240 });

        let mut builder = fx.builder(TrackerConfig::new("", "1"), env);
        let request = builder.build("", None, None, None);
        assert_eq!(param(&request, "gt_ms"), Some("240"));

        builder.config_mut().generation_time_ms = Some(75);
        let request = builder.build("", None, None, None);
        assert_eq!(param(&request, "gt_ms"), Some("75"));

        builder.config_mut().performance_tracking = false;
        let request = builder.build("", None, None, None);
        assert!(param(&request, "gt_ms").is_none());
    }

    #[test]
    fn test_charset_only_when_not_utf8() {
        let fx = Fixture::new();
        let mut env = StaticEnvironment::for_page("http://example.com/");
        env.charset = Some("UTF-8".to_string());
        let mut builder = fx.builder(TrackerConfig::new("", "1"), env.clone());
        assert!(param(&builder.build("", None, None, None), "cs").is_none());

        env.charset = Some("ISO-8859-1".to_string());
        let mut builder = fx.builder(TrackerConfig::new("", "1"), env);
        assert_eq!(param(&builder.build("", None, None, None), "cs"), Some("ISO-8859-1"));
    }

    #[test]
    fn test_plugin_fragments_then_append_then_processor() {
        let fx = Fixture::new();
        fx.plugins.add(
            "geo",
            Rc::new(FnPlugin::new().on(Hook::Log, || Some("&geo=1".to_string()))),
        );
        let mut config = TrackerConfig::new("", "1");
        config.append_to_tracking_url = "lat=1&long=2".to_string();
        let mut builder = fx.builder(config, StaticEnvironment::for_page("http://example.com/"));

        let request = builder.build("", None, Some(Hook::Log), None);
        assert!(request.ends_with("&geo=1&lat=1&long=2"));

        let request = builder.build("", None, Some(Hook::Goal), None);
        assert!(!request.contains("geo=1"));

        builder.set_request_processor(Some(Rc::new(|r: &str| format!("wrapped({})", r.len()))));
        assert!(builder.build("", None, None, None).starts_with("wrapped("));
    }

    #[test]
    fn test_finisher_runs_after_builder_is_released() {
        let fx = Fixture::new();
        let mut builder = fx.builder(TrackerConfig::new("", "1"), StaticEnvironment::for_page("http://example.com/"));
        let shared = Rc::new(RefCell::new(None::<String>));
        let seen = shared.clone();
        builder.set_request_processor(Some(Rc::new(move |r: &str| {
            *seen.borrow_mut() = Some(r.to_string());
            r.to_string()
        })));

        let request = builder.assemble("action_name=Home", None, None);
        let finisher = builder.finisher();
        drop(builder);
        let request = finisher.finish(request, Some(Hook::Log));
        assert_eq!(shared.borrow().as_deref(), Some(request.as_str()));
    }

    #[test]
    fn test_oversized_cookie_lifetime_is_clamped() {
        let fx = Fixture::new();
        let mut config = TrackerConfig::new("", "1");
        config.visitor_cookie_timeout_secs = i64::MAX;
        config.session_cookie_timeout_secs = i64::MIN;
        let mut builder = fx.builder(config, StaticEnvironment::for_page("http://example.com/"));
        assert!(!builder.build("", None, None, None).is_empty());
        assert!(fx.jar.get(&builder.cookies().name(CookieBase::Id)).is_some());
    }

    #[test]
    fn test_custom_data_per_call_wins() {
        let fx = Fixture::new();
        let mut config = TrackerConfig::new("", "1");
        config.custom_data = Some(serde_json::json!({"tier": "free"}));
        let mut builder = fx.builder(config, StaticEnvironment::for_page("http://example.com/"));

        let request = builder.build("", None, None, None);
        assert_eq!(param(&request, "data"), Some("%7B%22tier%22%3A%22free%22%7D"));

        let call = serde_json::json!({"tier": "pro"});
        let request = builder.build("", Some(&call), None, None);
        assert_eq!(param(&request, "data"), Some("%7B%22tier%22%3A%22pro%22%7D"));
    }

    #[test]
    fn test_visit_variables_persist_only_when_asked() {
        let fx = Fixture::new();
        let mut builder = fx.builder(TrackerConfig::new("", "1"), StaticEnvironment::for_page("http://example.com/"));
        builder.set_custom_variable(1, "Member", "gold", Scope::Visit);
        builder.build("", None, None, None);
        let cvar_cookie = builder.cookies().name(CookieBase::CustomVariables);
        assert!(fx.jar.get(&cvar_cookie).is_none());

        builder.config_mut().store_custom_variables_in_cookie = true;
        let request = builder.build("", None, None, None);
        assert_eq!(param(&request, "_cvar"), Some("%7B%221%22%3A%5B%22Member%22%2C%22gold%22%5D%7D"));
        assert_eq!(fx.jar.get(&cvar_cookie).as_deref(), Some(r#"{"1":["Member","gold"]}"#));
    }

    #[test]
    fn test_deleted_visit_variable_is_sent_once_then_dropped() {
        let fx = Fixture::new();
        let mut builder = fx.builder(TrackerConfig::new("", "1"), StaticEnvironment::for_page("http://example.com/"));
        builder.set_custom_variable(2, "Plan", "trial", Scope::Visit);
        builder.delete_custom_variable(2, Scope::Visit);

        let first = builder.build("", None, None, None);
        assert_eq!(param(&first, "_cvar"), Some("%7B%222%22%3A%5B%22%22%2C%22%22%5D%7D"));

        let second = builder.build("", None, None, None);
        assert!(param(&second, "_cvar").is_none());
    }

    #[test]
    fn test_prefix_change_reloads_visit_variables() {
        let fx = Fixture::new();
        let mut builder = fx.builder(TrackerConfig::new("", "1"), StaticEnvironment::for_page("http://example.com/"));
        let scope = CookieScope::new("_other_", "1", None, None, "example.com");
        fx.jar.seed(&scope.cookie_name(CookieBase::CustomVariables), r#"{"4":["Lang","fr"]}"#);

        builder.set_cookie_name_prefix("_other_");
        assert_eq!(
            builder.custom_variable(4, Scope::Visit),
            Some(("Lang".to_string(), "fr".to_string()))
        );
    }

    #[test]
    fn test_custom_url_resolves_relative() {
        let fx = Fixture::new();
        let mut builder = fx.builder(
            TrackerConfig::new("", "1"),
            StaticEnvironment::for_page("http://example.com/shop/cart.html"),
        );
        builder.set_custom_url("checkout.html");
        assert_eq!(builder.current_url(), "http://example.com/shop/checkout.html");
    }

    #[test]
    fn test_disable_cookies_forces_feature_flag() {
        let fx = Fixture::new();
        let mut builder = fx.builder(TrackerConfig::new("", "1"), StaticEnvironment::for_page("http://example.com/"));
        assert_eq!(builder.features().get("cookie"), Some("1"));
        builder.disable_cookies();
        assert_eq!(builder.features().get("cookie"), Some("0"));
        assert!(param(&builder.build("", None, None, None), "cookie").is_some_and(|v| v == "0"));
        assert!(fx.jar.is_empty());
    }

    #[test]
    fn test_do_not_track_needs_browser_signal() {
        let fx = Fixture::new();
        let mut builder = fx.builder(TrackerConfig::new("", "1"), StaticEnvironment::for_page("http://example.com/"));
        builder.set_do_not_track(true);
        assert!(!builder.do_not_track());
        assert!(!builder.build("", None, None, None).is_empty());

        let mut builder = fx.builder(
            TrackerConfig::new("", "1"),
            StaticEnvironment::for_page("http://example.com/").with_do_not_track("yes"),
        );
        builder.set_do_not_track(true);
        assert!(builder.do_not_track());
        assert!(builder.cookies().is_disabled());
    }

    #[test]
    fn test_visitor_id_is_stable_before_first_request() {
        let fx = Fixture::new();
        let mut builder = fx.builder(TrackerConfig::new("", "1"), StaticEnvironment::for_page("http://example.com/"));
        let id = builder.visitor_id();
        assert_eq!(id.len(), 16);
        assert_eq!(builder.visitor_id(), id);

        let request = builder.build("", None, None, None);
        assert_eq!(param(&request, "_id"), Some(id.as_str()));
    }
}
