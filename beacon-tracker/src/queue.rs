//! Pre-initialisation command queue
//!
//! Pages queue `[methodName, ...args]` commands before the tracker exists.
//! Replay applies the configuration commands that pick the endpoint, site and
//! cookie mode first, then everything else in queue order. Afterwards the
//! queue stays usable: pushed commands go straight to the live tracker.
//!
//! ```json
//! [
//!   ["trackPageView"],
//!   ["setSiteId", "3"],
//!   ["setTrackerUrl", "https://stats.example.com/piwik.php"],
//!   ["setCustomVariable", 1, "Type", "Article", "page"]
//! ]
//! ```

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use serde_json::Value;

use beacon_core::{Category, EcommerceItem, EcommerceOrder, Scope};

use crate::error::{TrackerError, TrackerResult};
use crate::events::LinkKind;
use crate::tracker::Tracker;

/// Commands applied before the rest of the queue, in queue order
pub const APPLY_FIRST: [&str; 4] = ["setTrackerUrl", "setAPIUrl", "setSiteId", "disableCookies"];

/// One queued method call
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub method: String,
    pub args: Vec<Value>,
}

impl Command {
    pub fn new(method: &str, args: Vec<Value>) -> Self {
        Self {
            method: method.to_string(),
            args,
        }
    }

    /// Parse `["methodName", arg, ...]`
    pub fn from_value(value: &Value) -> TrackerResult<Self> {
        let Some(items) = value.as_array() else {
            return Err(TrackerError::arguments("queue", format!("expected an array, got {value}")));
        };
        match items.split_first() {
            Some((Value::String(method), args)) => Ok(Self {
                method: method.clone(),
                args: args.to_vec(),
            }),
            _ => Err(TrackerError::arguments("queue", "first element must be a method name")),
        }
    }
}

/// Parse a JSON array of queued commands
pub fn parse_queue(json: &str) -> TrackerResult<Vec<Command>> {
    let value: Value = serde_json::from_str(json)?;
    let Some(items) = value.as_array() else {
        return Err(TrackerError::arguments("queue", "expected an array of commands"));
    };
    items.iter().map(Command::from_value).collect()
}

/// A queued method call, or a function run against the tracker
pub enum QueueItem {
    Command(Command),
    Callback(Box<dyn FnOnce(&Tracker)>),
}

impl From<Command> for QueueItem {
    fn from(command: Command) -> Self {
        QueueItem::Command(command)
    }
}

impl fmt::Debug for QueueItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueItem::Command(command) => f.debug_tuple("Command").field(&command.method).finish(),
            QueueItem::Callback(_) => f.write_str("Callback"),
        }
    }
}

/// The queue after replay, forwarding pushes to the live tracker
#[derive(Debug)]
pub struct CommandQueue {
    tracker: Rc<Tracker>,
}

impl CommandQueue {
    /// Replay `items` against `tracker`. Failing commands are logged and
    /// skipped.
    pub async fn replay(tracker: Rc<Tracker>, items: Vec<QueueItem>) -> Self {
        let mut items: Vec<Option<QueueItem>> = items.into_iter().map(Some).collect();
        let mut seen: HashMap<String, usize> = HashMap::new();

        for slot in items.iter_mut() {
            let first = matches!(slot, Some(QueueItem::Command(c)) if APPLY_FIRST.contains(&c.method.as_str()));
            if !first {
                continue;
            }
            let Some(QueueItem::Command(command)) = slot.take() else {
                continue;
            };
            let count = seen.entry(command.method.clone()).or_default();
            *count += 1;
            if *count > 1 {
                tracing::warn!(
                    method = %command.method,
                    "method queued more than once, only the last call has an effect"
                );
            }
            log_failure(apply(&tracker, &command).await, &command.method);
        }

        let mut replayed = seen.values().sum::<usize>();
        for item in items.into_iter().flatten() {
            replayed += 1;
            match item {
                QueueItem::Command(command) => log_failure(apply(&tracker, &command).await, &command.method),
                QueueItem::Callback(callback) => callback(&tracker),
            }
        }
        tracing::debug!(replayed, "command queue replayed");

        Self { tracker }
    }

    /// Apply one more item immediately
    pub async fn push(&self, item: QueueItem) -> TrackerResult<()> {
        match item {
            QueueItem::Command(command) => apply(&self.tracker, &command).await,
            QueueItem::Callback(callback) => {
                callback(&self.tracker);
                Ok(())
            }
        }
    }

    pub fn tracker(&self) -> &Rc<Tracker> {
        &self.tracker
    }
}

fn log_failure(result: TrackerResult<()>, method: &str) {
    if let Err(err) = result {
        tracing::warn!(method, error = %err, "queued command failed");
    }
}

/// Positional arguments of one command, with the loose coercions pages rely on
struct Args<'a> {
    method: &'a str,
    values: &'a [Value],
}

impl<'a> Args<'a> {
    fn value(&self, index: usize) -> Option<&'a Value> {
        self.values.get(index).filter(|v| !v.is_null())
    }

    fn opt_string(&self, index: usize) -> Option<String> {
        match self.value(index)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            other => Some(other.to_string()),
        }
    }

    fn string(&self, index: usize) -> TrackerResult<String> {
        self.opt_string(index)
            .ok_or_else(|| TrackerError::arguments(self.method, format!("argument {index} is required")))
    }

    fn opt_f64(&self, index: usize) -> TrackerResult<Option<f64>> {
        match self.value(index) {
            None => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_f64()),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| TrackerError::arguments(self.method, format!("'{s}' is not a number"))),
            Some(other) => Err(TrackerError::arguments(self.method, format!("{other} is not a number"))),
        }
    }

    fn f64(&self, index: usize) -> TrackerResult<f64> {
        self.opt_f64(index)?
            .ok_or_else(|| TrackerError::arguments(self.method, format!("argument {index} is required")))
    }

    fn opt_u64(&self, index: usize) -> TrackerResult<Option<u64>> {
        Ok(self.opt_f64(index)?.filter(|n| *n >= 0.0).map(|n| n as u64))
    }

    fn i64(&self, index: usize) -> TrackerResult<i64> {
        Ok(self.f64(index)? as i64)
    }

    /// Loose truthiness; a missing argument counts as `default`
    fn flag(&self, index: usize, default: bool) -> bool {
        match self.value(index) {
            None => default,
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
            Some(Value::String(s)) => !s.is_empty(),
            Some(_) => true,
        }
    }

    /// A single string or an array of strings
    fn strings(&self, index: usize) -> TrackerResult<Vec<String>> {
        match self.value(index) {
            None => Ok(Vec::new()),
            Some(Value::String(s)) => Ok(vec![s.clone()]),
            Some(Value::Array(items)) => Ok(items
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect()),
            Some(other) => Err(TrackerError::arguments(self.method, format!("{other} is not a list of strings"))),
        }
    }

    fn category(&self, index: usize) -> TrackerResult<Option<Category>> {
        match self.value(index) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|_| TrackerError::arguments(self.method, format!("{value} is not a category"))),
        }
    }

    fn data(&self, index: usize) -> Option<Value> {
        self.value(index).cloned()
    }
}

/// Apply one command to `tracker`
pub async fn apply(tracker: &Tracker, command: &Command) -> TrackerResult<()> {
    let args = Args {
        method: &command.method,
        values: &command.args,
    };

    match command.method.as_str() {
        // configuration
        "setTrackerUrl" => tracker.set_tracker_url(&args.string(0)?),
        "setAPIUrl" => tracker.set_api_url(&args.string(0)?),
        "setSiteId" => tracker.set_site_id(&args.string(0)?),
        "setUserId" => tracker.set_user_id(&args.string(0)?),
        "setCustomData" => match args.value(0) {
            Some(data @ Value::Object(_)) => tracker.set_custom_data(data.clone()),
            _ => tracker.set_custom_data_value(&args.string(0)?, args.data(1).unwrap_or(Value::Null)),
        },
        "appendToTrackingUrl" => tracker.append_to_tracking_url(&args.string(0)?),
        "setLinkTrackingTimer" => tracker.set_link_tracking_timer(args.opt_u64(0)?.unwrap_or(0)),
        "setDownloadExtensions" => tracker.set_download_extensions(&args.string(0)?),
        "addDownloadExtensions" => tracker.add_download_extensions(&args.string(0)?),
        "setDomains" => tracker.set_domains(args.strings(0)?),
        "setIgnoreClasses" => tracker.set_ignore_classes(args.strings(0)?),
        "setDownloadClasses" => tracker.set_download_classes(args.strings(0)?),
        "setLinkClasses" => tracker.set_link_classes(args.strings(0)?),
        "setRequestMethod" => tracker.set_request_method(&args.opt_string(0).unwrap_or_default()),
        "setRequestContentType" => tracker.set_request_content_type(&args.string(0)?),
        "setReferrerUrl" => tracker.set_referrer_url(&args.string(0)?),
        "setCustomUrl" => tracker.set_custom_url(&args.string(0)?),
        "setDocumentTitle" => tracker.set_document_title(&args.string(0)?),
        "setCampaignNameKey" => tracker.set_campaign_name_key(args.strings(0)?),
        "setCampaignKeywordKey" => tracker.set_campaign_keyword_key(args.strings(0)?),
        "discardHashTag" => tracker.discard_hash_tag(args.flag(0, false)),
        "setCookieNamePrefix" => tracker.set_cookie_name_prefix(&args.string(0)?),
        "setCookieDomain" => tracker.set_cookie_domain(&args.string(0)?),
        "setCookiePath" => tracker.set_cookie_path(&args.string(0)?),
        "setVisitorCookieTimeout" => tracker.set_visitor_cookie_timeout(args.i64(0)?),
        "setSessionCookieTimeout" => tracker.set_session_cookie_timeout(args.i64(0)?),
        "setReferralCookieTimeout" => tracker.set_referral_cookie_timeout(args.i64(0)?),
        "setConversionAttributionFirstReferrer" => {
            tracker.set_conversion_attribution_first_referrer(args.flag(0, false))
        }
        "disableCookies" => tracker.disable_cookies(),
        "deleteCookies" => tracker.delete_cookies(),
        "setDoNotTrack" => tracker.set_do_not_track(args.flag(0, false)),
        "setCountPreRendered" => tracker.set_count_pre_rendered(args.flag(0, false)),
        "disablePerformanceTracking" => tracker.disable_performance_tracking(),
        "setGenerationTimeMs" => tracker.set_generation_time_ms(args.opt_u64(0)?.unwrap_or(0)),
        "setHeartBeatTimer" => tracker.set_heartbeat_timer(
            args.opt_u64(0)?.unwrap_or(0),
            args.opt_u64(1)?.unwrap_or(0),
        ),
        "enableLinkTracking" => tracker.enable_link_tracking(args.flag(0, false)),
        "enableJSErrorTracking" => {
            tracker.enable_js_error_tracking();
        }

        // custom variables
        "setCustomVariable" => tracker.set_custom_variable(
            args.i64(0)?,
            &args.opt_string(1).unwrap_or_default(),
            &args.opt_string(2).unwrap_or_default(),
            Scope::from_json(args.value(3))?,
        ),
        "deleteCustomVariable" => tracker.delete_custom_variable(args.i64(0)?, Scope::from_json(args.value(1))?),
        "storeCustomVariablesInCookie" => tracker.store_custom_variables_in_cookie(),

        // ecommerce
        "setEcommerceView" => tracker.set_ecommerce_view(
            args.opt_string(0).as_deref(),
            args.opt_string(1).as_deref(),
            args.category(2)?.as_ref(),
            args.opt_f64(3)?,
        ),
        "addEcommerceItem" => tracker.add_ecommerce_item(EcommerceItem {
            sku: args.opt_string(0).unwrap_or_default(),
            name: args.opt_string(1),
            category: args.category(2)?,
            price: args.opt_f64(3)?,
            quantity: args.opt_f64(4)?,
        }),
        "trackEcommerceOrder" => {
            tracker
                .track_ecommerce_order(EcommerceOrder {
                    id: args.opt_string(0).unwrap_or_default(),
                    grand_total: args.f64(1)?,
                    sub_total: args.opt_f64(2)?,
                    tax: args.opt_f64(3)?,
                    shipping: args.opt_f64(4)?,
                    discount: args.opt_f64(5)?,
                })
                .await
        }
        "trackEcommerceCartUpdate" => tracker.track_ecommerce_cart_update(args.f64(0)?).await,

        // tracking
        "trackPageView" => {
            tracker
                .track_page_view(args.opt_string(0).as_deref(), args.data(1))
                .await
        }
        "trackEvent" => {
            tracker
                .track_event(
                    &args.opt_string(0).unwrap_or_default(),
                    &args.opt_string(1).unwrap_or_default(),
                    args.opt_string(2).as_deref(),
                    args.opt_f64(3)?,
                )
                .await
        }
        "trackSiteSearch" => {
            tracker
                .track_site_search(
                    &args.opt_string(0).unwrap_or_default(),
                    args.opt_string(1).as_deref(),
                    args.opt_u64(2)?,
                )
                .await
        }
        "trackGoal" => {
            tracker
                .track_goal(&args.string(0)?, args.opt_f64(1)?, args.data(2))
                .await
        }
        "trackLink" => {
            let kind_name = args.string(1)?;
            let kind = LinkKind::parse(&kind_name)
                .ok_or_else(|| TrackerError::arguments(&command.method, format!("unknown link type '{kind_name}'")))?;
            tracker
                .track_link(&args.string(0)?, kind, args.data(2), None)
                .await
        }

        other => return Err(TrackerError::UnknownMethod(other.to_string())),
    }

    Ok(())
}
