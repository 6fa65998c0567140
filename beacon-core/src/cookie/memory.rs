//! In-memory cookie jar
//!
//! Behaves like a browser jar for a single origin: cookies expire against the
//! injected clock, and writing an already-expired cookie removes it.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::cookie::{Cookie, CookieJar};
use crate::timing::Clock;

/// Cookie jar backed by a HashMap
pub struct MemoryCookieJar {
    cookies: RefCell<HashMap<String, Cookie>>,
    clock: Rc<dyn Clock>,
    writes: Cell<usize>,
}

impl MemoryCookieJar {
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        Self {
            cookies: RefCell::new(HashMap::new()),
            clock,
            writes: Cell::new(0),
        }
    }

    /// Place a session cookie without counting it as a write
    pub fn seed(&self, name: &str, value: &str) {
        self.cookies.borrow_mut().insert(
            name.to_string(),
            Cookie {
                name: name.to_string(),
                value: value.to_string(),
                expires: None,
                path: "/".to_string(),
                domain: None,
                secure: false,
            },
        );
    }

    /// Remove a cookie without counting it as a write
    pub fn remove(&self, name: &str) -> Option<Cookie> {
        self.cookies.borrow_mut().remove(name)
    }

    /// The stored cookie, attributes included, if still live
    pub fn cookie(&self, name: &str) -> Option<Cookie> {
        let now = self.clock.now();
        self.cookies
            .borrow()
            .get(name)
            .filter(|c| !c.is_expired_at(now))
            .cloned()
    }

    /// Names of the live cookies, sorted
    pub fn names(&self) -> Vec<String> {
        let now = self.clock.now();
        let mut names: Vec<String> = self
            .cookies
            .borrow()
            .values()
            .filter(|c| !c.is_expired_at(now))
            .map(|c| c.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.names().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of [`CookieJar::set`] calls so far
    pub fn write_count(&self) -> usize {
        self.writes.get()
    }

    pub fn clear(&self) {
        self.cookies.borrow_mut().clear();
    }
}

impl CookieJar for MemoryCookieJar {
    fn get(&self, name: &str) -> Option<String> {
        self.cookie(name).map(|c| c.value)
    }

    fn set(&self, cookie: &Cookie) {
        self.writes.set(self.writes.get() + 1);

        let mut cookies = self.cookies.borrow_mut();
        if cookie.is_expired_at(self.clock.now()) {
            cookies.remove(&cookie.name);
        } else {
            cookies.insert(cookie.name.clone(), cookie.clone());
        }
    }
}

impl std::fmt::Debug for MemoryCookieJar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCookieJar")
            .field("cookies", &self.cookies.borrow().len())
            .field("writes", &self.writes.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::MockClock;
    use chrono::TimeDelta;
    use std::time::Duration;

    fn cookie(name: &str, value: &str, expires_in: Option<TimeDelta>, clock: &MockClock) -> Cookie {
        Cookie {
            name: name.to_string(),
            value: value.to_string(),
            expires: expires_in.map(|d| clock.now() + d),
            path: "/".to_string(),
            domain: None,
            secure: false,
        }
    }

    #[test]
    fn test_expiry_follows_clock() {
        let clock = MockClock::default();
        let jar = MemoryCookieJar::new(Rc::new(clock.clone()));
        jar.set(&cookie("ses", "*", Some(TimeDelta::minutes(30)), &clock));

        clock.advance(Duration::from_secs(29 * 60));
        assert_eq!(jar.get("ses").as_deref(), Some("*"));

        clock.advance(Duration::from_secs(60));
        assert!(jar.get("ses").is_none());
    }

    #[test]
    fn test_past_expiry_removes() {
        let clock = MockClock::default();
        let jar = MemoryCookieJar::new(Rc::new(clock.clone()));
        jar.set(&cookie("id", "x", None, &clock));
        jar.set(&cookie("id", "", Some(TimeDelta::seconds(-1)), &clock));

        assert!(jar.get("id").is_none());
        assert!(jar.is_empty());
        assert_eq!(jar.write_count(), 2);
    }

    #[test]
    fn test_seed_is_not_a_write() {
        let clock = MockClock::default();
        let jar = MemoryCookieJar::new(Rc::new(clock));
        jar.seed("b", "2");
        jar.seed("a", "1");

        assert_eq!(jar.names(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(jar.write_count(), 0);
    }
}
