//! Event source adapters
//!
//! Turn page signals (clicks, visibility changes, user activity) into
//! tracking calls. None of these touch the DOM; the host forwards events.

pub mod heartbeat;
pub mod links;
pub mod visibility;

pub use heartbeat::{Heartbeat, HeartbeatStep};
pub use links::{Anchor, ClickCapture, LinkClassifier, LinkKind, PointerEventKind};
pub use visibility::PrerenderGate;
