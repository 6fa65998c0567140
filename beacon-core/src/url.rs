//! URL helpers
//!
//! Small string-level utilities over URLs as the page reports them. None of
//! these normalise according to RFC 3986; they reproduce what the collection
//! server expects to receive.

use std::sync::LazyLock;

use regex::Regex;

/// Longest referral URL kept in the attribution cookie and sent as `_ref`
pub const REFERRAL_URL_MAX_LENGTH: usize = 1024;

static PROTOCOL_SCHEME: LazyLock<Option<Regex>> = LazyLock::new(|| compile(r"^([a-z]+):"));

// scheme : // [username [: password] @] hostname [: port] [/ [path] [? query] [# fragment]]
static HOST_NAME: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile(r"^(?:(?:https?|ftp):)/*(?:[^@]+@)?([^:/#]+)"));

static SCRIPT_PROTOCOL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile(r"(?i)^(javascript|vbscript|jscript|mocha|livescript|ecmascript|mailto):")
});

fn compile(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(err) => {
            tracing::warn!(pattern, error = %err, "failed to compile url pattern");
            None
        }
    }
}

/// Percent-encode a query component like `encodeURIComponent`, which also
/// leaves `!'()*` unescaped
pub fn encode(value: &str) -> String {
    let encoded = urlencoding::encode(value);
    if !encoded.contains("%2") {
        return encoded.into_owned();
    }
    encoded
        .replace("%21", "!")
        .replace("%27", "'")
        .replace("%28", "(")
        .replace("%29", ")")
        .replace("%2A", "*")
}

/// Percent-decode, keeping the raw text when it is not valid UTF-8 once decoded
pub fn decode(value: &str) -> String {
    match urlencoding::decode(value) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => String::from_utf8_lossy(&urlencoding::decode_binary(value.as_bytes())).into_owned(),
    }
}

/// Lower-case scheme of `url`, if it has one
pub fn protocol_scheme(url: &str) -> Option<&str> {
    PROTOCOL_SCHEME
        .as_ref()
        .and_then(|re| re.captures(url))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Host of an http(s)/ftp URL; any other input is returned unchanged
pub fn host_name(url: &str) -> String {
    HOST_NAME
        .as_ref()
        .and_then(|re| re.captures(url))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| url.to_string())
}

/// Value of `name` in the query string or fragment, percent-decoded.
///
/// Returns an empty string when the parameter is absent.
pub fn parameter(url: &str, name: &str) -> String {
    let pattern = format!("[?&#]{}=([^&#]*)", regex::escape(name));
    let Ok(re) = Regex::new(&pattern) else {
        return String::new();
    };

    re.captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| decode(m.as_str()))
        .unwrap_or_default()
}

/// Strip the fragment when `discard_hash` is set
pub fn purify(url: &str, discard_hash: bool) -> String {
    if discard_hash {
        match url.find('#') {
            Some(at) => url[..at].to_string(),
            None => url.to_string(),
        }
    } else {
        url.to_string()
    }
}

/// Resolve `url` against `base_url`.
///
/// Absolute URLs pass through; root-relative ones keep the base scheme and
/// host; anything else replaces the last path segment of the base.
pub fn resolve_relative_reference(base_url: &str, url: &str, discard_hash: bool) -> String {
    if protocol_scheme(url).is_some() {
        return url.to_string();
    }

    if url.starts_with('/') {
        let scheme = protocol_scheme(base_url).unwrap_or_default();
        return format!("{}://{}{}", scheme, host_name(base_url), url);
    }

    let mut base = purify(base_url, discard_hash);
    if let Some(at) = base.find('?') {
        base.truncate(at);
    }
    if let Some(at) = base.rfind('/') {
        if at != base.len() - 1 {
            base.truncate(at + 1);
        }
    } else {
        base.clear();
    }

    base + url
}

/// Drop a trailing `.` and a leading `*` wildcard from a cookie domain
pub fn domain_fixup(domain: &str) -> String {
    let domain = domain.strip_suffix('.').unwrap_or(domain);
    match domain.strip_prefix("*.") {
        Some(rest) => format!(".{rest}"),
        None => domain.to_string(),
    }
}

/// Whether `host` belongs to the site.
///
/// An alias starting with `.` matches the bare domain and every subdomain.
pub fn is_site_host_name(host: &str, aliases: &[String]) -> bool {
    aliases.iter().any(|alias| {
        let alias = domain_fixup(&alias.to_lowercase());
        if host == alias {
            return true;
        }
        match alias.strip_prefix('.') {
            Some(bare) => host == bare || (host.len() > alias.len() && host.ends_with(&alias)),
            None => false,
        }
    })
}

/// Whether the link uses a script or mail pseudo-protocol
pub fn is_script_protocol(href: &str) -> bool {
    SCRIPT_PROTOCOL
        .as_ref()
        .map(|re| re.is_match(href))
        .unwrap_or(false)
}

/// Host, address and referrer of the page as the tracker should see them
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PageLocation {
    pub host: String,
    pub href: String,
    pub referrer: String,
}

impl PageLocation {
    /// Undo search-engine caches and translation proxies.
    ///
    /// Translated pages carry the real address in the `u` parameter and keep
    /// the proxy as referrer when there is none. Cached copies fall back to
    /// the first link in the document, which points at the original page.
    pub fn fixup(host: &str, href: &str, referrer: &str, first_link: Option<&str>) -> Self {
        let mut location = Self {
            host: host.to_string(),
            href: href.to_string(),
            referrer: referrer.to_string(),
        };

        if host == "translate.googleusercontent.com" {
            if location.referrer.is_empty() {
                location.referrer = href.to_string();
            }
            location.href = parameter(href, "u");
            location.host = host_name(&location.href);
        } else if host == "cc.bingj.com"
            || host == "webcache.googleusercontent.com"
            || host.starts_with("74.6.")
        {
            if let Some(link) = first_link {
                location.href = link.to_string();
                location.host = host_name(link);
            }
        }

        location.host = domain_fixup(&location.host);
        location
    }
}
