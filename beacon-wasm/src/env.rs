//! Browser-backed [`Environment`]
//!
//! Every probe goes through `Reflect` so that a missing API or a
//! cross-origin frame yields the trait default instead of a thrown exception.

use js_sys::{Function, Reflect};
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{Document, Window};

use beacon_core::{Environment, NavigationTiming, VisibilityState};

/// Read a property, treating `undefined` and `null` as absent
pub(crate) fn prop(target: &JsValue, key: &str) -> Option<JsValue> {
    Reflect::get(target, &JsValue::from_str(key))
        .ok()
        .filter(|value| !value.is_undefined() && !value.is_null())
}

pub(crate) fn prop_string(target: &JsValue, key: &str) -> Option<String> {
    prop(target, key).and_then(|value| value.as_string())
}

fn prop_f64(target: &JsValue, key: &str) -> Option<f64> {
    prop(target, key).and_then(|value| value.as_f64())
}

/// The page the module was loaded into
#[derive(Debug, Clone)]
pub struct BrowserEnvironment {
    window: Window,
    document: Document,
}

impl BrowserEnvironment {
    /// `None` outside a window context (workers, Node)
    pub fn new() -> Option<Self> {
        let window = web_sys::window()?;
        let document = window.document()?;
        Some(Self { window, document })
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Referrer seen by an enclosing frame; reading it throws when the frame
    /// is cross-origin, which `Reflect` turns into `None`
    fn frame_referrer(&self, frame: &str) -> Option<String> {
        let frame = prop(&self.window, frame)?;
        let document = prop(&frame, "document")?;
        prop_string(&document, "referrer")
    }
}

impl Environment for BrowserEnvironment {
    fn user_agent(&self) -> String {
        self.window.navigator().user_agent().unwrap_or_default()
    }

    fn platform(&self) -> String {
        self.window.navigator().platform().unwrap_or_default()
    }

    fn href(&self) -> String {
        self.window.location().href().unwrap_or_default()
    }

    fn host(&self) -> String {
        prop_string(&self.document, "domain").unwrap_or_default()
    }

    fn referrer(&self) -> String {
        let framed = self
            .frame_referrer("top")
            .or_else(|| self.frame_referrer("parent"))
            .unwrap_or_default();
        if framed.is_empty() {
            self.document.referrer()
        } else {
            framed
        }
    }

    fn title(&self) -> String {
        self.document.title()
    }

    fn charset(&self) -> Option<String> {
        prop_string(&self.document, "characterSet").or_else(|| prop_string(&self.document, "charset"))
    }

    fn visibility_state(&self) -> Option<VisibilityState> {
        prop_string(&self.document, "visibilityState")
            .or_else(|| prop_string(&self.document, "webkitVisibilityState"))
            .and_then(|state| VisibilityState::parse(&state))
    }

    fn navigation_timing(&self) -> Option<NavigationTiming> {
        let performance = prop(&self.window, "performance")?;
        let timing = prop(&performance, "timing")?;
        Some(NavigationTiming {
            request_start: prop_f64(&timing, "requestStart").unwrap_or(0.0) as i64,
            response_end: prop_f64(&timing, "responseEnd").unwrap_or(0.0) as i64,
        })
    }

    fn screen_size(&self) -> (u32, u32) {
        match self.window.screen() {
            Ok(screen) => (
                screen.width().unwrap_or(0).max(0) as u32,
                screen.height().unwrap_or(0).max(0) as u32,
            ),
            Err(_) => (0, 0),
        }
    }

    fn device_pixel_ratio(&self) -> f64 {
        self.window.device_pixel_ratio()
    }

    fn cookies_enabled(&self) -> Option<bool> {
        prop(&self.window.navigator(), "cookieEnabled").and_then(|value| value.as_bool())
    }

    fn do_not_track(&self) -> Option<String> {
        let navigator = self.window.navigator();
        prop_string(&navigator, "doNotTrack")
            .or_else(|| prop_string(&self.window, "doNotTrack"))
            .or_else(|| prop_string(&navigator, "msDoNotTrack"))
    }

    fn plugin_mime_types(&self) -> Option<Vec<String>> {
        let mime_types = prop(&self.window.navigator(), "mimeTypes")?;
        let length = prop_f64(&mime_types, "length").unwrap_or(0.0) as u32;
        let types = (0..length)
            .filter_map(|index| Reflect::get_u32(&mime_types, index).ok())
            .filter(|mime| prop(mime, "enabledPlugin").is_some())
            .filter_map(|mime| prop_string(&mime, "type"))
            .collect();
        Some(types)
    }

    fn java_enabled(&self) -> bool {
        let navigator = self.window.navigator();
        prop(&navigator, "javaEnabled")
            .and_then(|probe| probe.dyn_into::<Function>().ok())
            .and_then(|probe| probe.call0(&navigator).ok())
            .and_then(|enabled| enabled.as_bool())
            .unwrap_or(false)
    }

    fn first_link(&self) -> Option<String> {
        let link = self.document.links().item(0)?;
        prop_string(&link, "href")
    }
}
