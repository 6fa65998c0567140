//! Beacon WebAssembly bindings via wasm-bindgen
//!
//! Runs the tracker inside the page it measures: the environment is read
//! from `window`/`document`/`navigator`, cookies live in `document.cookie`,
//! requests leave as image pixels or `XMLHttpRequest` POSTs, and the
//! heartbeat runs on `setTimeout`.
//!
//! ## Example
//!
//! ```javascript
//! import init, { BeaconPage, enableLogging } from '@beacon/wasm';
//!
//! window._paq = window._paq || [];
//! _paq.push(['setTrackerUrl', 'https://stats.example.com/piwik.php']);
//! _paq.push(['setSiteId', '1']);
//! _paq.push(['enableLinkTracking']);
//! _paq.push(['trackPageView']);
//!
//! async function main() {
//!   await init();
//!   enableLogging('beacon_tracker=debug');
//!
//!   const page = new BeaconPage();
//!
//!   // Replays window._paq; later pushes apply immediately
//!   await page.installQueue();
//!
//!   // A second tracker reporting to another site
//!   const rollup = page.getTracker('https://stats.example.com/piwik.php', '7');
//!   await rollup.trackEvent('Video', 'play', 'intro', 1);
//!   console.log(rollup.getVisitorId(), JSON.parse(rollup.getVisitorInfo()));
//! }
//!
//! main();
//! ```

use wasm_bindgen::prelude::*;

pub mod bindings;
pub mod cookies;
pub mod env;
pub mod logging;
pub mod page;
pub mod timers;
pub mod transport;

pub use bindings::JsTracker;
pub use cookies::DocumentCookieJar;
pub use env::BrowserEnvironment;
pub use page::BeaconPage;
pub use timers::TimeoutTimers;
pub use transport::BrowserTransport;

// Set up panic hook for better error messages
#[cfg(feature = "console_error_panic_hook")]
#[wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();
}

/// Send the tracker's `tracing` output to the console, filtered by
/// `directives` (e.g. `"beacon_tracker=debug,beacon_core=info"`)
#[wasm_bindgen(js_name = enableLogging)]
pub fn enable_logging(directives: &str) -> bool {
    logging::init(directives)
}

/// Get the Beacon version
#[wasm_bindgen]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// 40-hex digest used for cookie domain hashes and visitor ids
#[wasm_bindgen]
pub fn digest(text: &str) -> String {
    beacon_core::hash::digest(text)
}
