//! # Beacon Core - first-party analytics state
//!
//! Beacon Core holds everything a tracking client knows about the visitor and
//! turns it into tracking requests:
//!
//! - **Identity**: a 16-hex visitor id, visit counter and visit timestamps
//!   persisted in a first-party cookie
//! - **Sessions**: a short-lived marker cookie decides when a new visit starts
//! - **Attribution**: campaign and referrer of the visit, kept across visits
//! - **Requests**: query strings assembled in a fixed field order
//!
//! The host supplies the page ([`env::Environment`]), the cookie jar
//! ([`cookie::CookieJar`]) and the time ([`timing::Clock`]); the crate never
//! touches a browser directly.
//!
//! ## Example
//!
//! ```rust
//! use std::rc::Rc;
//! use beacon_core::{
//!     Hook, MemoryCookieJar, MockClock, PluginRegistry, RequestBuilder,
//!     StaticEnvironment, TrackerConfig,
//! };
//!
//! let clock = MockClock::default();
//! let jar = Rc::new(MemoryCookieJar::new(Rc::new(clock.clone())));
//! let mut builder = RequestBuilder::new(
//!     TrackerConfig::new("https://stats.example.com/piwik.php", "1"),
//!     Rc::new(StaticEnvironment::for_page("https://example.com/pricing")),
//!     Rc::new(clock),
//!     jar,
//!     Rc::new(PluginRegistry::new()),
//! );
//!
//! let request = builder.build("action_name=Pricing", None, Some(Hook::Log), None);
//! assert!(request.starts_with("action_name=Pricing&idsite=1&rec=1"));
//! assert!(request.contains("&_idn=1"));
//! ```

pub mod attribution;
pub mod config;
pub mod cookie;
pub mod custom_vars;
pub mod ecommerce;
pub mod env;
pub mod error;
pub mod features;
pub mod hash;
pub mod identity;
pub mod plugin;
pub mod request;
pub mod timing;
pub mod url;

// Re-export main types
pub use attribution::{AttributionPolicy, AttributionRecord, AttributionUpdate};
pub use config::{HeartbeatConfig, RequestMethod, TrackerConfig};
pub use cookie::{Cookie, CookieBase, CookieJar, CookieScope, CookieStore, MemoryCookieJar};
pub use custom_vars::{CustomVariables, Scope};
pub use ecommerce::{Cart, Category, EcommerceItem, EcommerceOrder};
pub use env::{Environment, NavigationTiming, StaticEnvironment, VisibilityState};
pub use error::{BeaconError, ErrorCategory, Result};
pub use features::BrowserFeatures;
pub use identity::{SessionOutcome, SessionState, VisitorIdentity};
pub use plugin::{FnPlugin, Hook, Plugin, PluginRegistry};
pub use request::{RequestBuilder, RequestFinisher, RequestProcessor};
pub use timing::{
    Clock, MockClock, MockTimerBackend, NullTimerBackend, RecordedTimer, SystemClock,
    TimerBackend, TimerEvent,
};
pub use url::PageLocation;
