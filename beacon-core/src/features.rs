//! Browser feature detection
//!
//! Computed once per tracker and attached to every request as
//! `&pdf=1&qt=0&...&cookie=1&res=1920x1080`.

use std::sync::LazyLock;

use regex::Regex;
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::env::Environment;
use crate::request::format_number;

/// Plugin flags and the MIME type that reveals each of them
pub const PLUGIN_MIME_TYPES: [(&str, &str); 9] = [
    ("pdf", "application/pdf"),
    ("qt", "video/quicktime"),
    ("realp", "audio/x-pn-realaudio-plugin"),
    ("wma", "application/x-mplayer2"),
    ("dir", "application/x-director"),
    ("fla", "application/x-shockwave-flash"),
    ("java", "application/x-java-vm"),
    ("gears", "application/x-googlegears"),
    ("ag", "application/x-silverlight"),
];

// Only Safari on macOS reports screen size in device-independent pixels.
static MAC_SAFARI: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"Mac OS X.*Safari/").ok());

/// Ordered capability flags
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrowserFeatures {
    entries: Vec<(String, String)>,
}

impl BrowserFeatures {
    /// Probe the environment. `cookie_support` is only consulted outside
    /// Internet Explorer, as are the plugin probes.
    pub fn detect(env: &dyn Environment, cookie_support: impl FnOnce() -> bool) -> Self {
        let mut features = Self::default();
        let user_agent = env.user_agent();

        if !user_agent.contains("MSIE") {
            if let Some(mime_types) = env.plugin_mime_types().filter(|types| !types.is_empty()) {
                for (flag, mime) in PLUGIN_MIME_TYPES {
                    let enabled = mime_types.iter().any(|m| m == mime);
                    features.set(flag, if enabled { "1" } else { "0" });
                }
            }

            if env.java_enabled() {
                features.set("java", "1");
            }

            features.set("cookie", if cookie_support() { "1" } else { "0" });
        }

        let ratio = match MAC_SAFARI.as_ref() {
            Some(re) if re.is_match(&user_agent) => env.device_pixel_ratio(),
            _ => 1.0,
        };
        let (width, height) = env.screen_size();
        features.set(
            "res",
            &format!(
                "{}x{}",
                format_number(f64::from(width) * ratio),
                format_number(f64::from(height) * ratio)
            ),
        );

        features
    }

    /// Set a flag, keeping its original position when it already exists
    pub fn set(&mut self, name: &str, value: &str) {
        match self.entries.iter_mut().find(|(k, _)| k == name) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.entries.push((name.to_string(), value.to_string())),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `&name=value` pairs in detection order
    pub fn to_query(&self) -> String {
        self.iter().map(|(k, v)| format!("&{k}={v}")).collect()
    }

    /// JSON object in detection order, as fed into the visitor id
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

impl Serialize for BrowserFeatures {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}
