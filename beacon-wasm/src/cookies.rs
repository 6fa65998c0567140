//! `document.cookie` as a [`CookieJar`]

use wasm_bindgen::JsCast;
use web_sys::{Document, HtmlDocument};

use beacon_core::cookie::parse_cookie_header;
use beacon_core::{Cookie, CookieJar};

#[derive(Debug, Clone)]
pub struct DocumentCookieJar {
    document: HtmlDocument,
}

impl DocumentCookieJar {
    /// `None` when the document is not an HTML document
    pub fn new(document: &Document) -> Option<Self> {
        let document = document.clone().dyn_into::<HtmlDocument>().ok()?;
        Some(Self { document })
    }
}

impl CookieJar for DocumentCookieJar {
    fn get(&self, name: &str) -> Option<String> {
        let header = self.document.cookie().ok()?;
        parse_cookie_header(&header, name)
    }

    fn set(&self, cookie: &Cookie) {
        if let Err(err) = self.document.set_cookie(&cookie.to_header_string()) {
            tracing::warn!(cookie = %cookie.name, error = ?err, "document rejected cookie");
        }
    }
}
