//! JS-facing tracker handle
//!
//! Tracking methods return a `Promise` that settles once the request has
//! been handed to the transport (or held back while the page is
//! pre-rendered). Structured results come back as JSON strings.

use std::future::Future;
use std::rc::Rc;

use js_sys::{Array, Function, Promise, JSON};
use serde_json::Value;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::future_to_promise;

use beacon_core::{RequestProcessor, Scope};
use beacon_tracker::queue::apply;
use beacon_tracker::{Command, LinkKind, Tracker, TrackerError, TrackerResult};

pub(crate) fn js_error(err: impl std::fmt::Display) -> JsError {
    JsError::new(&err.to_string())
}

/// Convert a plain JS value to JSON; `undefined` and `null` mean absent
pub(crate) fn json_value(value: &JsValue) -> TrackerResult<Option<Value>> {
    if value.is_undefined() || value.is_null() {
        return Ok(None);
    }
    let text = JSON::stringify(value).map_err(|_| TrackerError::InvalidArguments {
        method: "json".to_string(),
        reason: "value is not JSON-serializable".to_string(),
    })?;
    Ok(Some(serde_json::from_str(&String::from(text))?))
}

fn to_json(value: &JsValue) -> Result<Option<Value>, JsError> {
    json_value(value).map_err(js_error)
}

fn settle<F>(future: F) -> Promise
where
    F: Future<Output = ()> + 'static,
{
    future_to_promise(async move {
        future.await;
        Ok(JsValue::UNDEFINED)
    })
}

/// Tracker bound to one site and collection endpoint
#[wasm_bindgen(js_name = Tracker)]
pub struct JsTracker {
    inner: Rc<Tracker>,
}

impl JsTracker {
    pub(crate) fn new(inner: Rc<Tracker>) -> Self {
        Self { inner }
    }
}

#[wasm_bindgen(js_class = Tracker)]
impl JsTracker {
    #[wasm_bindgen(js_name = trackPageView)]
    pub fn track_page_view(&self, title: Option<String>, custom_data: JsValue) -> Result<Promise, JsError> {
        let tracker = self.inner.clone();
        let custom_data = to_json(&custom_data)?;
        Ok(settle(async move {
            tracker.track_page_view(title.as_deref(), custom_data).await;
        }))
    }

    #[wasm_bindgen(js_name = trackEvent)]
    pub fn track_event(&self, category: String, action: String, name: Option<String>, value: Option<f64>) -> Promise {
        let tracker = self.inner.clone();
        settle(async move {
            tracker.track_event(&category, &action, name.as_deref(), value).await;
        })
    }

    #[wasm_bindgen(js_name = trackSiteSearch)]
    pub fn track_site_search(&self, keyword: String, category: Option<String>, count: Option<u32>) -> Promise {
        let tracker = self.inner.clone();
        settle(async move {
            tracker
                .track_site_search(&keyword, category.as_deref(), count.map(u64::from))
                .await;
        })
    }

    #[wasm_bindgen(js_name = trackGoal)]
    pub fn track_goal(&self, id: String, revenue: Option<f64>, custom_data: JsValue) -> Result<Promise, JsError> {
        let tracker = self.inner.clone();
        let custom_data = to_json(&custom_data)?;
        Ok(settle(async move {
            tracker.track_goal(&id, revenue, custom_data).await;
        }))
    }

    /// `kind` is `"link"` or `"download"`. The callback runs once the
    /// request has been delivered or has failed.
    #[wasm_bindgen(js_name = trackLink)]
    pub fn track_link(
        &self,
        url: String,
        kind: String,
        custom_data: JsValue,
        callback: Option<Function>,
    ) -> Result<Promise, JsError> {
        let kind = LinkKind::parse(&kind).ok_or_else(|| JsError::new(&format!("unknown link type: {}", kind)))?;
        let custom_data = to_json(&custom_data)?;
        let callback = callback.map(|callback| -> beacon_tracker::Completion {
            Box::new(move || {
                if let Err(err) = callback.call0(&JsValue::NULL) {
                    tracing::warn!(error = ?err, "link callback threw");
                }
            })
        });

        let tracker = self.inner.clone();
        Ok(settle(async move {
            tracker.track_link(&url, kind, custom_data, callback).await;
        }))
    }

    /// Invoke any tracker method by its queue name, e.g.
    /// `tracker.call("setCustomVariable", [1, "Plan", "pro", "visit"])`
    pub fn call(&self, method: String, args: JsValue) -> Result<Promise, JsError> {
        let args = match to_json(&args)? {
            None => Vec::new(),
            Some(Value::Array(args)) => args,
            Some(single) => vec![single],
        };
        let command = Command::new(&method, args);
        let tracker = self.inner.clone();
        Ok(future_to_promise(async move {
            apply(&tracker, &command)
                .await
                .map(|()| JsValue::UNDEFINED)
                .map_err(|err: TrackerError| JsValue::from(js_error(err)))
        }))
    }

    #[wasm_bindgen(js_name = enableLinkTracking)]
    pub fn enable_link_tracking(&self, pseudo_click: Option<bool>) {
        self.inner.enable_link_tracking(pseudo_click.unwrap_or(false));
    }

    #[wasm_bindgen(js_name = enableJSErrorTracking)]
    pub fn enable_js_error_tracking(&self) -> bool {
        self.inner.enable_js_error_tracking()
    }

    #[wasm_bindgen(js_name = setHeartbeatTimer)]
    pub fn set_heartbeat_timer(&self, minimum_visit_secs: u32, interval_secs: u32) {
        self.inner
            .set_heartbeat_timer(u64::from(minimum_visit_secs), u64::from(interval_secs));
    }

    /// `processor(request)` returns the request to send instead
    #[wasm_bindgen(js_name = setCustomRequestProcessing)]
    pub fn set_custom_request_processing(&self, processor: Option<Function>) {
        let processor = processor.map(|processor| -> RequestProcessor {
            Rc::new(move |request: &str| {
                processor
                    .call1(&JsValue::NULL, &JsValue::from_str(request))
                    .ok()
                    .and_then(|result| result.as_string())
                    .unwrap_or_else(|| request.to_string())
            })
        });
        self.inner.set_custom_request_processing(processor);
    }

    #[wasm_bindgen(js_name = getVisitorId)]
    pub fn visitor_id(&self) -> String {
        self.inner.visitor_id()
    }

    #[wasm_bindgen(js_name = getVisitorInfo)]
    pub fn visitor_info(&self) -> Result<String, JsError> {
        serde_json::to_string(&self.inner.visitor_info()).map_err(js_error)
    }

    #[wasm_bindgen(js_name = getAttributionInfo)]
    pub fn attribution_info(&self) -> Result<String, JsError> {
        serde_json::to_string(&self.inner.attribution_info()).map_err(js_error)
    }

    /// `[name, value]`, or `null` when the slot is empty
    #[wasm_bindgen(js_name = getCustomVariable)]
    pub fn custom_variable(&self, index: i32, scope: Option<String>) -> Result<JsValue, JsError> {
        let scope: Scope = match scope {
            Some(scope) => scope.parse().map_err(js_error)?,
            None => Scope::Visit,
        };
        Ok(match self.inner.custom_variable(i64::from(index), scope) {
            Some((name, value)) => Array::of2(&name.into(), &value.into()).into(),
            None => JsValue::NULL,
        })
    }

    #[wasm_bindgen(js_name = getRequest)]
    pub fn request(&self, params: String) -> String {
        self.inner.get_request(&params)
    }

    #[wasm_bindgen(js_name = getCurrentUrl)]
    pub fn current_url(&self) -> String {
        self.inner.current_url()
    }

    #[wasm_bindgen(js_name = isDoNotTrack)]
    pub fn do_not_track(&self) -> bool {
        self.inner.do_not_track()
    }
}
