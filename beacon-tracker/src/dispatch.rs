//! Transport dispatcher
//!
//! Sends a built request with the configured transport and falls back to a
//! pixel GET when a POST cannot be started or gets a non-2xx answer.
//!
//! ```text
//! Post ──ok 2xx──────────────────────────▶ Delivered
//!   │
//!   └─Err / non-2xx ─▶ Pixel (same body) ─▶ Delivered | Failed
//! ```
//!
//! Each dispatch also pushes the shared unload deadline to `now + delay`,
//! which the page-unload handler waits for.

use std::fmt;
use std::rc::Rc;

use beacon_core::Clock;

use crate::registry::PageLifecycle;
use crate::transport::{Beacon, Delivery, Transport, TransportKind};

/// Called once when a dispatch has finished, whatever the outcome
pub type Completion = Box<dyn FnOnce()>;

pub struct Dispatcher {
    transport: Rc<dyn Transport>,
    clock: Rc<dyn Clock>,
    lifecycle: Rc<PageLifecycle>,
}

impl Dispatcher {
    pub fn new(transport: Rc<dyn Transport>, clock: Rc<dyn Clock>, lifecycle: Rc<PageLifecycle>) -> Self {
        Self {
            transport,
            clock,
            lifecycle,
        }
    }

    /// Deliver `beacon`, falling back to a pixel request when a POST fails.
    ///
    /// `on_complete` runs exactly once after the last attempt.
    pub async fn send(&self, beacon: Beacon, delay_ms: u64, on_complete: Option<Completion>) -> Delivery {
        let delay = i64::try_from(delay_ms).unwrap_or(i64::MAX);
        self.lifecycle
            .set_unload_deadline(self.clock.now_millis().saturating_add(delay));

        let outcome = match beacon.kind {
            TransportKind::Pixel => self.attempt(&beacon).await,
            TransportKind::Post => match self.attempt(&beacon).await {
                Delivery::Delivered => Delivery::Delivered,
                Delivery::Failed(reason) => {
                    tracing::warn!(
                        transport = self.transport.name(),
                        %reason,
                        "POST failed, falling back to pixel"
                    );
                    self.attempt(&beacon.as_pixel()).await
                }
            },
        };

        tracing::debug!(
            kind = ?beacon.kind,
            delivered = outcome.is_delivered(),
            len = beacon.body.len(),
            "beacon dispatched"
        );

        if let Some(callback) = on_complete {
            callback();
        }
        outcome
    }

    async fn attempt(&self, beacon: &Beacon) -> Delivery {
        match self.transport.deliver(beacon).await {
            Ok(delivery) => delivery,
            Err(err) => Delivery::Failed(err.to_string()),
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("transport", &self.transport.name())
            .finish()
    }
}
