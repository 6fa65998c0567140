//! Image-pixel and XMLHttpRequest delivery

use std::cell::RefCell;
use std::rc::Rc;

use async_trait::async_trait;
use js_sys::{Function, Promise};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;
use web_sys::{HtmlImageElement, XmlHttpRequest};

use beacon_tracker::{Beacon, Delivery, Transport, TrackerError, TrackerResult, TransportKind};

/// `XMLHttpRequest.DONE`
const READY_STATE_DONE: u16 = 4;

fn transport_error(err: JsValue) -> TrackerError {
    TrackerError::Transport(format!("{:?}", err))
}

/// Any 2xx counts as delivered; anything else makes the dispatcher fall
/// back to the pixel
pub(crate) fn delivery_for_status(status: u16) -> Delivery {
    if (200..300).contains(&status) {
        Delivery::Delivered
    } else {
        Delivery::Failed(format!("collector answered {}", status))
    }
}

/// Delivers through the page itself: `new Image().src` for pixels and an
/// asynchronous `XMLHttpRequest` for POSTs
#[derive(Debug, Clone, Copy, Default)]
pub struct BrowserTransport;

impl BrowserTransport {
    pub fn new() -> Self {
        Self
    }

    async fn pixel(&self, beacon: &Beacon) -> TrackerResult<Delivery> {
        let image = HtmlImageElement::new().map_err(transport_error)?;
        let loaded = Promise::new(&mut |resolve, reject| {
            image.set_onload(Some(&resolve));
            image.set_onerror(Some(&reject));
        });
        image.set_src(&beacon.pixel_url());

        Ok(match JsFuture::from(loaded).await {
            Ok(_) => Delivery::Delivered,
            Err(_) => Delivery::Failed("pixel failed to load".to_string()),
        })
    }

    async fn post(&self, beacon: &Beacon) -> TrackerResult<Delivery> {
        let request = XmlHttpRequest::new().map_err(transport_error)?;
        request
            .open_with_async("POST", &beacon.endpoint, true)
            .map_err(transport_error)?;
        request
            .set_request_header("Content-Type", &beacon.content_type)
            .map_err(transport_error)?;

        let resolver: Rc<RefCell<Option<Function>>> = Rc::new(RefCell::new(None));
        let finished = Promise::new(&mut |resolve, _reject| {
            *resolver.borrow_mut() = Some(resolve);
        });

        // Fires on every state change; only DONE settles the promise
        let watched = request.clone();
        let slot = resolver.clone();
        let on_change = Closure::<dyn FnMut()>::new(move || {
            if watched.ready_state() != READY_STATE_DONE {
                return;
            }
            if let Some(resolve) = slot.borrow_mut().take() {
                let status = watched.status().unwrap_or(0);
                let _ = resolve.call1(&JsValue::NULL, &JsValue::from(status));
            }
        });
        request.set_onreadystatechange(Some(on_change.as_ref().unchecked_ref()));

        request
            .send_with_opt_str(Some(&beacon.body))
            .map_err(transport_error)?;

        let status = JsFuture::from(finished)
            .await
            .ok()
            .and_then(|value| value.as_f64())
            .unwrap_or(0.0) as u16;
        request.set_onreadystatechange(None);
        drop(on_change);

        Ok(delivery_for_status(status))
    }
}

#[async_trait(?Send)]
impl Transport for BrowserTransport {
    fn name(&self) -> &str {
        "browser"
    }

    async fn deliver(&self, beacon: &Beacon) -> TrackerResult<Delivery> {
        match beacon.kind {
            TransportKind::Pixel => self.pixel(beacon).await,
            TransportKind::Post => self.post(beacon).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_any_success_status_is_delivered() {
        for status in [200, 202, 204, 299] {
            assert!(delivery_for_status(status).is_delivered(), "status {status}");
        }
        for status in [199, 301, 404, 500] {
            assert!(!delivery_for_status(status).is_delivered(), "status {status}");
        }
        assert_eq!(
            delivery_for_status(0),
            Delivery::Failed("collector answered 0".to_string())
        );
    }
}
