//! Tracker configuration
//!
//! Every setting has a default, so a configuration document only needs the
//! fields it changes:
//!
//! ```rust
//! use beacon_core::config::{RequestMethod, TrackerConfig};
//!
//! let config = TrackerConfig::from_json(r#"{
//!     "tracker_url": "https://stats.example.com/piwik.php",
//!     "site_id": "3",
//!     "request_method": "POST"
//! }"#).unwrap();
//!
//! assert_eq!(config.request_method, RequestMethod::Post);
//! assert_eq!(config.cookie_name_prefix, "_pk_");
//! assert_eq!(config.session_cookie_timeout_secs, 1800);
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BeaconError, Result};

pub const DEFAULT_REQUEST_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=UTF-8";

pub const DEFAULT_DOWNLOAD_EXTENSIONS: &str = "7z|aac|apk|ar[cj]|as[fx]|avi|azw3|bin|csv|deb|dmg|docx?|epub|exe|flv|gif|gz|gzip|hqx|jar|jpe?g|js|mobi|mp(2|3|4|e?g)|mov(ie)?|ms[ip]|od[bfgpst]|og[gv]|pdf|phps|png|pptx?|qtm?|ra[mr]?|rpm|sea|sit|tar|t?bz2?|tgz|torrent|txt|wav|wm[av]|wpd||xlsx?|xml|z|zip";

/// 2 years
pub const DEFAULT_VISITOR_COOKIE_TIMEOUT_SECS: i64 = 63_072_000;
/// 30 minutes
pub const DEFAULT_SESSION_COOKIE_TIMEOUT_SECS: i64 = 1_800;
/// 6 months
pub const DEFAULT_REFERRAL_COOKIE_TIMEOUT_SECS: i64 = 15_768_000;

pub const DEFAULT_TRACKER_PAUSE_MS: u64 = 500;

/// How beacons travel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestMethod {
    /// 1x1 image request
    #[default]
    Get,
    /// Form-encoded XMLHttpRequest, falling back to GET
    Post,
}

impl RequestMethod {
    /// Anything other than `POST` (case-insensitive) means GET
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("post") {
            RequestMethod::Post
        } else {
            RequestMethod::Get
        }
    }
}

/// Heartbeat timer settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Time after the page view before the first ping may be sent
    pub minimum_visit_secs: u64,
    /// Period of the activity check
    pub interval_secs: u64,
}

/// Every tracker setting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub tracker_url: String,
    pub api_url: String,
    pub site_id: String,
    pub user_id: String,

    pub request_method: RequestMethod,
    pub request_content_type: String,
    /// Delay before navigation continues after a tracked request
    pub tracker_pause_ms: u64,
    pub append_to_tracking_url: String,

    pub custom_url: Option<String>,
    pub referrer_url: Option<String>,
    pub document_title: Option<String>,
    pub discard_hash_tag: bool,
    pub custom_data: Option<Value>,

    pub download_extensions: String,
    /// Hosts treated as the site; the page host is always added
    pub domains: Vec<String>,
    pub ignore_classes: Vec<String>,
    pub download_classes: Vec<String>,
    pub link_classes: Vec<String>,

    pub campaign_name_parameters: Vec<String>,
    pub campaign_keyword_parameters: Vec<String>,
    pub first_referrer_attribution: bool,

    pub cookie_name_prefix: String,
    pub cookie_domain: Option<String>,
    pub cookie_path: Option<String>,
    pub cookies_disabled: bool,
    pub visitor_cookie_timeout_secs: i64,
    pub session_cookie_timeout_secs: i64,
    pub referral_cookie_timeout_secs: i64,
    pub store_custom_variables_in_cookie: bool,

    /// Honour the browser's Do-Not-Track setting
    pub do_not_track: bool,
    pub count_pre_rendered: bool,

    pub performance_tracking: bool,
    /// Server-measured generation time; overrides navigation timing
    pub generation_time_ms: Option<u64>,
    pub heartbeat: Option<HeartbeatConfig>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            tracker_url: String::new(),
            api_url: String::new(),
            site_id: String::new(),
            user_id: String::new(),
            request_method: RequestMethod::Get,
            request_content_type: DEFAULT_REQUEST_CONTENT_TYPE.to_string(),
            tracker_pause_ms: DEFAULT_TRACKER_PAUSE_MS,
            append_to_tracking_url: String::new(),
            custom_url: None,
            referrer_url: None,
            document_title: None,
            discard_hash_tag: false,
            custom_data: None,
            download_extensions: DEFAULT_DOWNLOAD_EXTENSIONS.to_string(),
            domains: Vec::new(),
            ignore_classes: Vec::new(),
            download_classes: Vec::new(),
            link_classes: Vec::new(),
            campaign_name_parameters: strings(&[
                "pk_campaign",
                "piwik_campaign",
                "utm_campaign",
                "utm_source",
                "utm_medium",
            ]),
            campaign_keyword_parameters: strings(&["pk_kwd", "piwik_kwd", "utm_term"]),
            first_referrer_attribution: false,
            cookie_name_prefix: "_pk_".to_string(),
            cookie_domain: None,
            cookie_path: None,
            cookies_disabled: false,
            visitor_cookie_timeout_secs: DEFAULT_VISITOR_COOKIE_TIMEOUT_SECS,
            session_cookie_timeout_secs: DEFAULT_SESSION_COOKIE_TIMEOUT_SECS,
            referral_cookie_timeout_secs: DEFAULT_REFERRAL_COOKIE_TIMEOUT_SECS,
            store_custom_variables_in_cookie: false,
            do_not_track: false,
            count_pre_rendered: false,
            performance_tracking: true,
            generation_time_ms: None,
            heartbeat: None,
        }
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

impl TrackerConfig {
    pub fn new(tracker_url: &str, site_id: &str) -> Self {
        Self {
            tracker_url: tracker_url.to_string(),
            site_id: site_id.to_string(),
            ..Self::default()
        }
    }

    /// Parse and validate a configuration document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| BeaconError::InvalidConfig {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.session_cookie_timeout_secs <= 0 {
            return Err(BeaconError::InvalidConfig {
                reason: "session_cookie_timeout_secs must be positive".to_string(),
            });
        }
        if self.visitor_cookie_timeout_secs < 0 || self.referral_cookie_timeout_secs < 0 {
            return Err(BeaconError::InvalidConfig {
                reason: "cookie timeouts cannot be negative".to_string(),
            });
        }
        if let Some(heartbeat) = self.heartbeat {
            if heartbeat.interval_secs == 0 {
                return Err(BeaconError::InvalidConfig {
                    reason: "heartbeat interval must be positive".to_string(),
                });
            }
        }
        if !self.site_id.is_empty() && self.site_id.contains(|c: char| matches!(c, '.' | ';' | '=')) {
            return Err(BeaconError::InvalidConfig {
                reason: format!("site id '{}' cannot appear in a cookie name", self.site_id),
            });
        }
        Ok(())
    }

    /// Configured site hosts plus the page host
    pub fn site_hosts(&self, page_host: &str) -> Vec<String> {
        let mut hosts = self.domains.clone();
        hosts.push(page_host.to_string());
        hosts
    }
}
