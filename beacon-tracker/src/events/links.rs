//! Link click classification
//!
//! A clicked anchor becomes an outlink, a download, or nothing. Class names
//! decide first, then the file extension, then whether the target host
//! belongs to the site.

use std::cell::Cell;
use std::fmt;

use regex::Regex;

use beacon_core::url;
use beacon_core::TrackerConfig;

/// What a tracked click records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Link,
    Download,
}

impl LinkKind {
    /// Request parameter name
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkKind::Link => "link",
            LinkKind::Download => "download",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "link" => Some(LinkKind::Link),
            "download" => Some(LinkKind::Download),
            _ => None,
        }
    }
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The anchor a click resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    /// Identity of the element, for matching mousedown with mouseup
    pub id: u64,
    pub href: String,
    /// `hostname` of the anchor; derived from `href` when absent
    pub host: Option<String>,
    /// Raw `class` attribute
    pub class_name: String,
}

/// Class and extension patterns built from the tracker configuration
#[derive(Debug)]
pub struct LinkClassifier {
    ignore: Option<Regex>,
    link: Option<Regex>,
    download: Option<Regex>,
    extensions: Option<Regex>,
}

impl LinkClassifier {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            ignore: class_pattern("ignore", &config.ignore_classes),
            link: class_pattern("link", &config.link_classes),
            download: class_pattern("download", &config.download_classes),
            extensions: Regex::new(&format!(r"(?i)\.({})([?&#]|$)", config.download_extensions)).ok(),
        }
    }

    /// Anchors carrying an ignore class are never tracked
    pub fn is_ignored(&self, class_name: &str) -> bool {
        matches(&self.ignore, class_name)
    }

    /// Classify a link. `in_site` is whether the target host belongs to the site.
    pub fn classify(&self, class_name: &str, href: &str, in_site: bool) -> Option<LinkKind> {
        if matches(&self.link, class_name) {
            Some(LinkKind::Link)
        } else if matches(&self.download, class_name) || matches(&self.extensions, href) {
            Some(LinkKind::Download)
        } else if in_site {
            None
        } else {
            Some(LinkKind::Link)
        }
    }

    /// Resolve a clicked anchor into the kind and decoded URL to track
    pub fn resolve(&self, anchor: &Anchor, site_hosts: &[String]) -> Option<(LinkKind, String)> {
        if self.is_ignored(&anchor.class_name) || url::is_script_protocol(&anchor.href) {
            return None;
        }

        let original_host = anchor
            .host
            .clone()
            .unwrap_or_else(|| url::host_name(&anchor.href));
        let host = original_host.to_lowercase();
        let href = if original_host.is_empty() {
            anchor.href.clone()
        } else {
            anchor.href.replacen(&original_host, &host, 1)
        };

        let kind = self.classify(&anchor.class_name, &href, url::is_site_host_name(&host, site_hosts))?;
        Some((kind, url::decode(&href)))
    }
}

/// `(^| )(piwik[_-]<name>|extra...)( |$)`
fn class_pattern(name: &str, extra: &[String]) -> Option<Regex> {
    let mut alternatives = format!("piwik[_-]{name}");
    for class in extra {
        alternatives.push('|');
        alternatives.push_str(class);
    }
    Regex::new(&format!("(^| )({alternatives})( |$)")).ok()
}

fn matches(pattern: &Option<Regex>, text: &str) -> bool {
    pattern.as_ref().is_some_and(|re| re.is_match(text))
}

/// Mouse event relevant to click capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerEventKind {
    Click,
    MouseDown,
    MouseUp,
}

/// Decides which pointer events complete a click.
///
/// Native mode listens to `click`. Pseudo-click mode pairs a `mousedown`
/// with the next `mouseup` of the same button (left or middle) on the same
/// element, which also catches middle clicks.
#[derive(Debug)]
pub struct ClickCapture {
    pseudo_click: bool,
    pressed: Cell<Option<(u16, u64)>>,
}

impl ClickCapture {
    pub fn new(pseudo_click: bool) -> Self {
        Self {
            pseudo_click,
            pressed: Cell::new(None),
        }
    }

    pub fn is_pseudo_click(&self) -> bool {
        self.pseudo_click
    }

    /// Feed one event; returns whether it completes a click on `target`
    pub fn accept(&self, kind: PointerEventKind, button: u16, target: Option<u64>) -> bool {
        match (kind, self.pseudo_click) {
            (PointerEventKind::Click, false) => target.is_some(),
            (PointerEventKind::MouseDown, true) => {
                let pressed = match target {
                    Some(id) if button == 1 || button == 2 => Some((button, id)),
                    _ => None,
                };
                self.pressed.set(pressed);
                false
            }
            (PointerEventKind::MouseUp, true) => {
                let pressed = self.pressed.take();
                matches!((pressed, target), (Some((b, id)), Some(t)) if b == button && id == t)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchor(href: &str, class_name: &str) -> Anchor {
        Anchor {
            id: 1,
            href: href.to_string(),
            host: None,
            class_name: class_name.to_string(),
        }
    }

    fn hosts() -> Vec<String> {
        vec!["example.com".to_string()]
    }

    #[test]
    fn test_classify_precedence() {
        let classifier = LinkClassifier::new(&TrackerConfig::default());

        assert_eq!(classifier.classify("nav piwik_link", "/report.pdf", true), Some(LinkKind::Link));
        assert_eq!(classifier.classify("piwik-download", "/page", true), Some(LinkKind::Download));
        assert_eq!(classifier.classify("", "/files/report.PDF?v=2", true), Some(LinkKind::Download));
        assert_eq!(classifier.classify("", "/about", true), None);
        assert_eq!(classifier.classify("", "https://other.org/", false), Some(LinkKind::Link));
    }

    #[test]
    fn test_configured_classes() {
        let mut config = TrackerConfig::default();
        config.download_classes = vec!["asset".to_string()];
        config.ignore_classes = vec!["no-track".to_string()];
        let classifier = LinkClassifier::new(&config);

        assert_eq!(classifier.classify("btn asset", "/x", true), Some(LinkKind::Download));
        assert_eq!(classifier.classify("btnasset", "/x", true), None);
        assert!(classifier.is_ignored("no-track"));
        assert!(classifier.is_ignored("a piwik_ignore b"));
    }

    #[test]
    fn test_resolve_decodes_and_skips_script_links() {
        let classifier = LinkClassifier::new(&TrackerConfig::default());

        let out = anchor("https://Partner.ORG/a%20b", "");
        assert_eq!(
            classifier.resolve(&out, &hosts()),
            Some((LinkKind::Link, "https://partner.org/a b".to_string()))
        );
        assert_eq!(classifier.resolve(&anchor("javascript:void(0)", ""), &hosts()), None);
        assert_eq!(classifier.resolve(&anchor("mailto:a@example.com", ""), &hosts()), None);
        assert_eq!(classifier.resolve(&anchor("http://example.com/about", ""), &hosts()), None);
        assert_eq!(classifier.resolve(&anchor("https://other.org/", "piwik_ignore"), &hosts()), None);
    }

    #[test]
    fn test_native_click_mode() {
        let capture = ClickCapture::new(false);
        assert!(capture.accept(PointerEventKind::Click, 1, Some(7)));
        assert!(!capture.accept(PointerEventKind::Click, 1, None));
        assert!(!capture.accept(PointerEventKind::MouseDown, 1, Some(7)));
        assert!(!capture.accept(PointerEventKind::MouseUp, 1, Some(7)));
    }

    #[test]
    fn test_pseudo_click_pairs_same_button_and_target() {
        let capture = ClickCapture::new(true);
        assert!(!capture.accept(PointerEventKind::Click, 1, Some(7)));

        assert!(!capture.accept(PointerEventKind::MouseDown, 2, Some(7)));
        assert!(capture.accept(PointerEventKind::MouseUp, 2, Some(7)));

        capture.accept(PointerEventKind::MouseDown, 1, Some(7));
        assert!(!capture.accept(PointerEventKind::MouseUp, 1, Some(8)));
        assert!(!capture.accept(PointerEventKind::MouseUp, 1, Some(7)));

        capture.accept(PointerEventKind::MouseDown, 3, Some(7));
        assert!(!capture.accept(PointerEventKind::MouseUp, 3, Some(7)));
    }
}
