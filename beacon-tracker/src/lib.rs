//! # Beacon Tracker - tracking façade and delivery
//!
//! Builds on [`beacon_core`] to provide what a page actually calls:
//!
//! - **Tracker**: page views, events, site searches, goals, links,
//!   ecommerce orders and script errors
//! - **Dispatcher**: POST or pixel delivery, falling back to the pixel when a
//!   POST fails
//! - **Events**: link click classification, the pre-render gate and the
//!   activity heartbeat
//! - **Registry**: plugins, the load/unload lifecycle and the default tracker
//!   shared by every tracker on a page
//! - **Queue**: replay of commands queued before the tracker existed
//!
//! ```text
//!            ┌──────────── Registry ────────────┐
//!            │ plugins · lifecycle · Host       │
//!            └──────┬───────────────────┬───────┘
//!                   ▼                   ▼
//! CommandQueue ──▶ Tracker ──▶ RequestBuilder (beacon-core)
//!                   │
//!                   ▼
//!              Dispatcher ──▶ Transport (recording · reqwest · browser)
//! ```
//!
//! Everything is single-threaded: state is shared with `Rc` and mutated
//! through `RefCell`, and transports are `?Send` futures.
//!
//! ## Example
//!
//! ```rust
//! use std::rc::Rc;
//! use beacon_core::{MemoryCookieJar, MockClock, MockTimerBackend, StaticEnvironment};
//! use beacon_tracker::{Host, RecordingTransport, Registry};
//!
//! # tokio_test_block(async {
//! let clock = MockClock::default();
//! let transport = RecordingTransport::new();
//! let registry = Registry::new(Host {
//!     env: Rc::new(StaticEnvironment::for_page("https://example.com/")),
//!     clock: Rc::new(clock.clone()),
//!     cookies: Rc::new(MemoryCookieJar::new(Rc::new(clock))),
//!     transport: Rc::new(transport.clone()),
//!     timers: Rc::new(MockTimerBackend::new()),
//! });
//!
//! let tracker = registry.tracker("https://stats.example.com/piwik.php", "1");
//! tracker.track_page_view(Some("Home"), None).await;
//! assert!(transport.bodies()[0].starts_with("action_name=Home&idsite=1"));
//! # });
//! # fn tokio_test_block(f: impl std::future::Future<Output = ()>) {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

pub mod dispatch;
pub mod error;
pub mod events;
pub mod queue;
pub mod registry;
pub mod tracker;
pub mod transport;

// Re-export main types
pub use dispatch::{Completion, Dispatcher};
pub use error::{TrackerError, TrackerResult};
pub use events::{Anchor, ClickCapture, Heartbeat, LinkClassifier, LinkKind, PointerEventKind, PrerenderGate};
pub use queue::{parse_queue, Command, CommandQueue, QueueItem};
pub use registry::{Host, PageLifecycle, Registry};
pub use tracker::{Tracker, TrackingCall};
pub use transport::{Beacon, Delivery, FailureMode, RecordingTransport, Transport, TransportKind};

#[cfg(feature = "http")]
pub use transport::HttpTransport;
