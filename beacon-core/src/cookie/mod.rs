//! # Cookie Store
//!
//! First-party cookies are partitioned by site and by cookie scope. Every
//! name has the shape
//!
//! ```text
//! <prefix><base>.<site id>.<domain hash>
//! ```
//!
//! where the domain hash is the first four hex characters of
//! `digest(cookie domain or page host + cookie path or "/")`. Changing the
//! cookie domain or path therefore starts from fresh state.
//!
//! The store sits on a [`CookieJar`], which is whatever actually keeps the
//! cookies: `document.cookie` in a browser, [`MemoryCookieJar`] elsewhere.
//!
//! ```rust
//! use std::rc::Rc;
//! use beacon_core::cookie::{CookieBase, CookieScope, CookieStore, MemoryCookieJar};
//! use beacon_core::timing::MockClock;
//!
//! let clock = Rc::new(MockClock::default());
//! let jar = Rc::new(MemoryCookieJar::new(clock.clone()));
//! let scope = CookieScope::new("_pk_", "1", None, None, "example.com");
//! let store = CookieStore::new(jar, clock, scope);
//!
//! store.set(CookieBase::Session, "*", Some(chrono::TimeDelta::minutes(30)));
//! assert_eq!(store.get(CookieBase::Session).as_deref(), Some("*"));
//! ```

pub mod memory;

use std::fmt;
use std::rc::Rc;

use chrono::{DateTime, FixedOffset, TimeDelta, Utc};
use regex::Regex;

use crate::hash::digest;
use crate::timing::Clock;

pub use memory::MemoryCookieJar;

/// Expiry offset used to delete a cookie
const DELETE_TTL_MS: i64 = -86_400;

/// A cookie to be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// `None` for a session-lifetime cookie
    pub expires: Option<DateTime<FixedOffset>>,
    pub path: String,
    pub domain: Option<String>,
    pub secure: bool,
}

impl Cookie {
    pub fn is_expired_at(&self, now: DateTime<FixedOffset>) -> bool {
        self.expires.map(|at| at <= now).unwrap_or(false)
    }

    /// Assignment string for `document.cookie`
    pub fn to_header_string(&self) -> String {
        let mut header = format!("{}={}", self.name, crate::url::encode(&self.value));
        if let Some(expires) = self.expires {
            header.push_str(";expires=");
            header.push_str(
                &expires
                    .with_timezone(&Utc)
                    .format("%a, %d %b %Y %H:%M:%S GMT")
                    .to_string(),
            );
        }
        header.push_str(";path=");
        header.push_str(&self.path);
        if let Some(domain) = &self.domain {
            header.push_str(";domain=");
            header.push_str(domain);
        }
        if self.secure {
            header.push_str(";secure");
        }
        header
    }
}

/// Find and decode one cookie in a `document.cookie` string
pub fn parse_cookie_header(header: &str, name: &str) -> Option<String> {
    let pattern = format!("(^|;)[ ]*{}=([^;]*)", regex::escape(name));
    let re = Regex::new(&pattern).ok()?;
    re.captures(header)
        .and_then(|caps| caps.get(2))
        .map(|m| crate::url::decode(m.as_str()))
}

/// Backing storage for cookies
pub trait CookieJar {
    /// Current value, `None` when unset or expired
    fn get(&self, name: &str) -> Option<String>;

    /// Write (or, with a past expiry, remove) a cookie
    fn set(&self, cookie: &Cookie);
}

/// The cookies the tracker owns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CookieBase {
    /// Visitor identity tuple
    Id,
    /// Session marker
    Session,
    /// Visit-scope custom variables
    CustomVariables,
    /// Attribution record
    Referral,
    /// Probe used when the browser does not say whether cookies work
    Test,
}

impl CookieBase {
    /// Cookies removed by [`CookieStore::delete_all`]
    pub const PERSISTED: [CookieBase; 4] = [
        CookieBase::Id,
        CookieBase::Session,
        CookieBase::CustomVariables,
        CookieBase::Referral,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CookieBase::Id => "id",
            CookieBase::Session => "ses",
            CookieBase::CustomVariables => "cvar",
            CookieBase::Referral => "ref",
            CookieBase::Test => "testcookie",
        }
    }
}

impl fmt::Display for CookieBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Naming and placement of the tracker's cookies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieScope {
    prefix: String,
    site_id: String,
    domain: Option<String>,
    path: Option<String>,
    domain_hash: String,
}

impl CookieScope {
    pub fn new(
        prefix: &str,
        site_id: &str,
        domain: Option<&str>,
        path: Option<&str>,
        page_host: &str,
    ) -> Self {
        let domain = domain.filter(|d| !d.is_empty()).map(str::to_string);
        let path = path.filter(|p| !p.is_empty()).map(str::to_string);
        let domain_hash = domain_hash(domain.as_deref().unwrap_or(page_host), path.as_deref());

        Self {
            prefix: prefix.to_string(),
            site_id: site_id.to_string(),
            domain,
            path,
            domain_hash,
        }
    }

    /// Full cookie name for `base`
    pub fn cookie_name(&self, base: CookieBase) -> String {
        format!("{}{}.{}.{}", self.prefix, base, self.site_id, self.domain_hash)
    }

    pub fn domain_hash(&self) -> &str {
        &self.domain_hash
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }
}

/// First four hex characters of `digest(domain + path)`
pub fn domain_hash(domain: &str, path: Option<&str>) -> String {
    let mut hash = digest(format!("{}{}", domain, path.unwrap_or("/")));
    hash.truncate(4);
    hash
}

/// Scoped cookie access for one tracker
pub struct CookieStore {
    jar: Rc<dyn CookieJar>,
    clock: Rc<dyn Clock>,
    scope: CookieScope,
    disabled: bool,
}

impl CookieStore {
    pub fn new(jar: Rc<dyn CookieJar>, clock: Rc<dyn Clock>, scope: CookieScope) -> Self {
        Self {
            jar,
            clock,
            scope,
            disabled: false,
        }
    }

    pub fn scope(&self) -> &CookieScope {
        &self.scope
    }

    /// Switch to a new naming scope; cookies under the old names are left alone
    pub fn rescope(&mut self, scope: CookieScope) {
        if scope.domain_hash != self.scope.domain_hash {
            tracing::debug!(
                old = %self.scope.domain_hash,
                new = %scope.domain_hash,
                "cookie domain hash changed"
            );
        }
        self.scope = scope;
    }

    pub fn name(&self, base: CookieBase) -> String {
        self.scope.cookie_name(base)
    }

    pub fn disable(&mut self) {
        self.disabled = true;
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Write a cookie by full name. No-op while cookies are disabled.
    ///
    /// A `ttl` of `None` writes a session-lifetime cookie.
    pub fn set_cookie(
        &self,
        name: &str,
        value: &str,
        ttl: Option<TimeDelta>,
        path: Option<&str>,
        domain: Option<&str>,
        secure: bool,
    ) {
        if self.disabled {
            return;
        }
        self.write(name, value, ttl, path, domain, secure);
    }

    /// Read a cookie by full name; always `None` while cookies are disabled
    pub fn get_cookie(&self, name: &str) -> Option<String> {
        if self.disabled {
            return None;
        }
        self.jar.get(name)
    }

    /// Write one of the tracker's cookies within the current scope
    pub fn set(&self, base: CookieBase, value: &str, ttl: Option<TimeDelta>) {
        self.set_cookie(
            &self.name(base),
            value,
            ttl,
            self.scope.path(),
            self.scope.domain(),
            false,
        );
    }

    pub fn get(&self, base: CookieBase) -> Option<String> {
        self.get_cookie(&self.name(base))
    }

    /// Expire every tracker cookie, even while cookies are disabled
    pub fn delete_all(&self) {
        for base in CookieBase::PERSISTED {
            self.write(
                &self.name(base),
                "",
                Some(TimeDelta::milliseconds(DELETE_TTL_MS)),
                self.scope.path(),
                self.scope.domain(),
                false,
            );
        }
        tracing::debug!(hash = %self.scope.domain_hash, "deleted tracker cookies");
    }

    /// Whether cookies work here: the browser's own flag when it has one,
    /// otherwise a round trip through a test cookie
    pub fn supports_cookies(&self, reported: Option<bool>) -> bool {
        if self.disabled {
            return false;
        }
        match reported {
            Some(enabled) => enabled,
            None => {
                self.set(CookieBase::Test, "1", None);
                self.get(CookieBase::Test).as_deref() == Some("1")
            }
        }
    }

    fn write(
        &self,
        name: &str,
        value: &str,
        ttl: Option<TimeDelta>,
        path: Option<&str>,
        domain: Option<&str>,
        secure: bool,
    ) {
        let cookie = Cookie {
            name: name.to_string(),
            value: value.to_string(),
            expires: ttl.map(|ttl| self.clock.now() + ttl),
            path: path.unwrap_or("/").to_string(),
            domain: domain.map(str::to_string),
            secure,
        };
        self.jar.set(&cookie);
    }
}

impl fmt::Debug for CookieStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieStore")
            .field("scope", &self.scope)
            .field("disabled", &self.disabled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::MockClock;

    fn store() -> (Rc<MemoryCookieJar>, CookieStore) {
        let clock = Rc::new(MockClock::default());
        let jar = Rc::new(MemoryCookieJar::new(clock.clone()));
        let scope = CookieScope::new("_pk_", "1", None, None, "example.com");
        (jar.clone(), CookieStore::new(jar, clock, scope))
    }

    #[test]
    fn test_cookie_name_layout() {
        let scope = CookieScope::new("_pk_", "7", None, None, "example.com");
        let expected_hash = &digest("example.com/")[..4];
        assert_eq!(scope.cookie_name(CookieBase::Id), format!("_pk_id.7.{expected_hash}"));
        assert_eq!(scope.domain_hash().len(), 4);
    }

    #[test]
    fn test_domain_and_path_change_the_hash() {
        let host_only = CookieScope::new("_pk_", "1", None, None, "example.com");
        let with_domain = CookieScope::new("_pk_", "1", Some(".example.com"), None, "example.com");
        let with_path = CookieScope::new("_pk_", "1", None, Some("/shop"), "example.com");
        let empty_domain = CookieScope::new("_pk_", "1", Some(""), Some(""), "example.com");

        assert_ne!(host_only.domain_hash(), with_domain.domain_hash());
        assert_ne!(host_only.domain_hash(), with_path.domain_hash());
        assert_eq!(host_only.domain_hash(), empty_domain.domain_hash());
    }

    #[test]
    fn test_disabled_store_neither_reads_nor_writes() {
        let (jar, mut store) = store();
        store.set(CookieBase::Id, "abc", None);
        store.disable();

        assert!(store.get(CookieBase::Id).is_none());
        store.set(CookieBase::Session, "*", None);
        assert_eq!(jar.write_count(), 1);
    }

    #[test]
    fn test_delete_all_works_while_disabled() {
        let (jar, mut store) = store();
        store.set(CookieBase::Id, "abc", Some(TimeDelta::days(1)));
        store.set(CookieBase::Referral, "[]", Some(TimeDelta::days(1)));
        store.disable();

        store.delete_all();

        assert!(jar.get(&store.name(CookieBase::Id)).is_none());
        assert!(jar.get(&store.name(CookieBase::Referral)).is_none());
        assert!(jar.is_empty());
    }

    #[test]
    fn test_supports_cookies_probe() {
        let (_jar, mut store) = store();
        assert!(store.supports_cookies(None));
        assert!(!store.supports_cookies(Some(false)));
        store.disable();
        assert!(!store.supports_cookies(Some(true)));
    }

    #[test]
    fn test_header_string_and_parse() {
        let cookie = Cookie {
            name: "_pk_ref.1.abcd".to_string(),
            value: r#"["","",0,"http://a.com/"]"#.to_string(),
            expires: DateTime::parse_from_rfc3339("2024-03-01T12:00:00+00:00").ok(),
            path: "/".to_string(),
            domain: Some(".example.com".to_string()),
            secure: true,
        };
        let header = cookie.to_header_string();
        assert!(header.contains(";expires=Fri, 01 Mar 2024 12:00:00 GMT"));
        assert!(header.ends_with(";path=/;domain=.example.com;secure"));

        let document_cookie = format!("other=1; {}", header.split(';').next().unwrap());
        assert_eq!(
            parse_cookie_header(&document_cookie, "_pk_ref.1.abcd").as_deref(),
            Some(r#"["","",0,"http://a.com/"]"#)
        );
        assert!(parse_cookie_header(&document_cookie, "_pk_ref").is_none());
    }
}
