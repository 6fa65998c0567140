//! Transport backends for tracking requests
//!
//! A transport delivers one [`Beacon`] and reports a [`Delivery`]. Returning
//! `Err` means the request could not even be started (the equivalent of a
//! synchronous throw); the dispatcher treats both that and
//! [`Delivery::Failed`] as a reason to fall back.

use std::cell::RefCell;
use std::rc::Rc;

use async_trait::async_trait;

use crate::error::{TrackerError, TrackerResult};

/// How a beacon travels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// 1x1 image GET with the request as query string
    Pixel,
    /// Form-encoded POST with the request as body
    Post,
}

/// Outcome of a delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Failed(String),
}

impl Delivery {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Delivery::Delivered)
    }
}

/// One outbound tracking request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Beacon {
    pub kind: TransportKind,
    /// Collection endpoint
    pub endpoint: String,
    /// Built request query string
    pub body: String,
    /// Content type of a POST body
    pub content_type: String,
}

impl Beacon {
    /// Address a pixel request is loaded from
    pub fn pixel_url(&self) -> String {
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        format!("{}{}{}", self.endpoint, separator, self.body)
    }

    /// The same request re-sent as a pixel
    pub fn as_pixel(&self) -> Self {
        Self {
            kind: TransportKind::Pixel,
            ..self.clone()
        }
    }
}

/// Transport backend interface
#[async_trait(?Send)]
pub trait Transport {
    /// Backend name
    fn name(&self) -> &str;

    /// Deliver `beacon` using its own [`TransportKind`]
    async fn deliver(&self, beacon: &Beacon) -> TrackerResult<Delivery>;
}

/// Scripted failure of one transport kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureMode {
    /// The request cannot be started
    Error(String),
    /// The server answers with this status
    Status(u16),
}

#[derive(Debug, Default)]
struct Recorded {
    sent: Vec<Beacon>,
    failures: Vec<(TransportKind, FailureMode)>,
}

/// Transport that records every beacon instead of sending it.
///
/// Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    inner: Rc<RefCell<Recorded>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every delivery of `kind` fail with `mode`
    pub fn fail(&self, kind: TransportKind, mode: FailureMode) {
        let mut inner = self.inner.borrow_mut();
        inner.failures.retain(|(k, _)| *k != kind);
        inner.failures.push((kind, mode));
    }

    /// Every attempted beacon, failed ones included
    pub fn sent(&self) -> Vec<Beacon> {
        self.inner.borrow().sent.clone()
    }

    /// Bodies of attempted beacons, in order
    pub fn bodies(&self) -> Vec<String> {
        self.inner.borrow().sent.iter().map(|b| b.body.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().sent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().sent.is_empty()
    }

    pub fn clear(&self) {
        self.inner.borrow_mut().sent.clear();
    }
}

#[async_trait(?Send)]
impl Transport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    async fn deliver(&self, beacon: &Beacon) -> TrackerResult<Delivery> {
        let mut inner = self.inner.borrow_mut();
        inner.sent.push(beacon.clone());
        let failure = inner
            .failures
            .iter()
            .find(|(kind, _)| *kind == beacon.kind)
            .map(|(_, mode)| mode.clone());

        match failure {
            None => Ok(Delivery::Delivered),
            Some(FailureMode::Error(reason)) => Err(TrackerError::Transport(reason)),
            Some(FailureMode::Status(status)) => Ok(Delivery::Failed(format!("status {status}"))),
        }
    }
}

/// Native HTTP transport
#[cfg(feature = "http")]
pub struct HttpTransport {
    client: reqwest::Client,
}

#[cfg(feature = "http")]
impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[cfg(feature = "http")]
impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "http")]
#[async_trait(?Send)]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn deliver(&self, beacon: &Beacon) -> TrackerResult<Delivery> {
        let request = match beacon.kind {
            TransportKind::Pixel => self.client.get(beacon.pixel_url()),
            TransportKind::Post => self
                .client
                .post(&beacon.endpoint)
                .header(reqwest::header::CONTENT_TYPE, &beacon.content_type)
                .body(beacon.body.clone()),
        };

        let response = request
            .send()
            .await
            .map_err(|e| TrackerError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(Delivery::Delivered)
        } else {
            Ok(Delivery::Failed(format!("status {}", status.as_u16())))
        }
    }
}
