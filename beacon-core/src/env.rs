//! # Browser capability surface
//!
//! The tracker never touches a DOM directly. Everything it learns about the
//! page comes through [`Environment`], and every method has a default that
//! applies when the host cannot answer (an API missing, a probe throwing):
//!
//! | capability            | default            |
//! |-----------------------|--------------------|
//! | user agent, platform  | empty string       |
//! | href, host, referrer  | empty string       |
//! | title                 | empty string       |
//! | charset               | `None` (UTF-8)     |
//! | visibility state      | `None` (no API)    |
//! | navigation timing     | `None` (no API)    |
//! | screen size           | `0x0`              |
//! | device pixel ratio    | `1.0`              |
//! | cookie support        | `None` (probe)     |
//! | Do-Not-Track          | `None`             |
//! | plugin MIME types     | `None` (no registry) |
//! | Java                  | `false`            |
//! | first document link   | `None`             |

use serde::{Deserialize, Serialize};

/// Page Visibility API state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisibilityState {
    Visible,
    Hidden,
    Prerender,
    Unloaded,
}

impl VisibilityState {
    /// Parse the DOM's `visibilityState` string
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "visible" => Some(Self::Visible),
            "hidden" => Some(Self::Hidden),
            "prerender" => Some(Self::Prerender),
            "unloaded" => Some(Self::Unloaded),
            _ => None,
        }
    }
}

/// The two navigation timing marks used for generation time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationTiming {
    pub request_start: i64,
    pub response_end: i64,
}

impl NavigationTiming {
    /// `responseEnd - requestStart`, when both marks were recorded
    pub fn generation_time_ms(&self) -> Option<i64> {
        if self.request_start > 0 && self.response_end > 0 {
            Some(self.response_end - self.request_start)
        } else {
            None
        }
    }
}

/// Read-only view of the hosting page and browser
pub trait Environment {
    fn user_agent(&self) -> String {
        String::new()
    }

    fn platform(&self) -> String {
        String::new()
    }

    /// `window.location.href`
    fn href(&self) -> String {
        String::new()
    }

    /// `document.domain`
    fn host(&self) -> String {
        String::new()
    }

    /// Referrer of the top frame, falling back to the document's own
    fn referrer(&self) -> String {
        String::new()
    }

    fn title(&self) -> String {
        String::new()
    }

    /// Document character set
    fn charset(&self) -> Option<String> {
        None
    }

    fn visibility_state(&self) -> Option<VisibilityState> {
        None
    }

    fn navigation_timing(&self) -> Option<NavigationTiming> {
        None
    }

    /// Screen width and height in CSS pixels
    fn screen_size(&self) -> (u32, u32) {
        (0, 0)
    }

    fn device_pixel_ratio(&self) -> f64 {
        1.0
    }

    /// `navigator.cookieEnabled`; `None` asks the tracker to probe with a test cookie
    fn cookies_enabled(&self) -> Option<bool> {
        None
    }

    /// Raw `navigator.doNotTrack` value
    fn do_not_track(&self) -> Option<String> {
        None
    }

    /// MIME types that have an enabled plugin; `None` when the registry is missing
    fn plugin_mime_types(&self) -> Option<Vec<String>> {
        None
    }

    fn java_enabled(&self) -> bool {
        false
    }

    /// Address of the first link in the document
    fn first_link(&self) -> Option<String> {
        None
    }
}

/// Plain-data environment for tests and the CLI
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticEnvironment {
    pub user_agent: String,
    pub platform: String,
    pub href: String,
    pub host: String,
    pub referrer: String,
    pub title: String,
    pub charset: Option<String>,
    pub visibility_state: Option<VisibilityState>,
    pub navigation_timing: Option<NavigationTiming>,
    pub screen_width: u32,
    pub screen_height: u32,
    pub device_pixel_ratio: Option<f64>,
    pub cookies_enabled: Option<bool>,
    pub do_not_track: Option<String>,
    pub plugin_mime_types: Option<Vec<String>>,
    pub java_enabled: bool,
    pub first_link: Option<String>,
}

impl StaticEnvironment {
    /// Environment for a page at `href`; the host is derived from it
    pub fn for_page(href: &str) -> Self {
        Self {
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) Gecko/20100101 Firefox/125.0".to_string(),
            platform: "Linux x86_64".to_string(),
            href: href.to_string(),
            host: crate::url::host_name(href),
            cookies_enabled: Some(true),
            screen_width: 1920,
            screen_height: 1080,
            ..Self::default()
        }
    }

    pub fn with_referrer(mut self, referrer: &str) -> Self {
        self.referrer = referrer.to_string();
        self
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub fn with_do_not_track(mut self, value: &str) -> Self {
        self.do_not_track = Some(value.to_string());
        self
    }

    pub fn with_visibility(mut self, state: VisibilityState) -> Self {
        self.visibility_state = Some(state);
        self
    }
}

impl Environment for StaticEnvironment {
    fn user_agent(&self) -> String {
        self.user_agent.clone()
    }

    fn platform(&self) -> String {
        self.platform.clone()
    }

    fn href(&self) -> String {
        self.href.clone()
    }

    fn host(&self) -> String {
        self.host.clone()
    }

    fn referrer(&self) -> String {
        self.referrer.clone()
    }

    fn title(&self) -> String {
        self.title.clone()
    }

    fn charset(&self) -> Option<String> {
        self.charset.clone()
    }

    fn visibility_state(&self) -> Option<VisibilityState> {
        self.visibility_state
    }

    fn navigation_timing(&self) -> Option<NavigationTiming> {
        self.navigation_timing
    }

    fn screen_size(&self) -> (u32, u32) {
        (self.screen_width, self.screen_height)
    }

    fn device_pixel_ratio(&self) -> f64 {
        self.device_pixel_ratio.unwrap_or(1.0)
    }

    fn cookies_enabled(&self) -> Option<bool> {
        self.cookies_enabled
    }

    fn do_not_track(&self) -> Option<String> {
        self.do_not_track.clone()
    }

    fn plugin_mime_types(&self) -> Option<Vec<String>> {
        self.plugin_mime_types.clone()
    }

    fn java_enabled(&self) -> bool {
        self.java_enabled
    }

    fn first_link(&self) -> Option<String> {
        self.first_link.clone()
    }
}
