//! # Identity & Session State Machine
//!
//! The visitor identity cookie holds six dot-separated fields:
//!
//! ```text
//! uuid . created_at . visit_count . current_visit_at . last_visit_at . last_ecommerce_order_at
//! ```
//!
//! Timestamps are Unix seconds; the last two may be empty. The session
//! marker is a separate cookie whose presence alone means "inside the
//! session window".
//!
//! ```text
//!                    first request
//!  NoIdentityCookie ───────────────► HasIdentityInSession
//!                                        ▲        │ marker expires
//!          marker absent: new session    │        ▼
//!                                  HasIdentityNoSession
//! ```
//!
//! Transitions happen only while a request is being built, via [`advance`].

use serde::{Deserialize, Serialize};

use crate::error::{BeaconError, Result};
use crate::hash::digest;

/// Length of the visitor id in hex characters (64 bits)
pub const VISITOR_ID_LENGTH: usize = 16;

/// Persisted visitor identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitorIdentity {
    /// True until the identity has been read back from its cookie
    pub is_new_visitor: bool,
    pub uuid: String,
    pub created_at: i64,
    pub visit_count: u64,
    pub current_visit_at: i64,
    pub last_visit_at: Option<i64>,
    pub last_ecommerce_order_at: Option<i64>,
}

impl VisitorIdentity {
    /// Identity for a browser seen for the first time at `now`
    pub fn first_visit(uuid: String, now: i64) -> Self {
        Self {
            is_new_visitor: true,
            uuid,
            created_at: now,
            visit_count: 0,
            current_visit_at: now,
            last_visit_at: Some(now),
            last_ecommerce_order_at: None,
        }
    }

    /// Parse the identity cookie of a returning visitor.
    ///
    /// Cookies written before the ecommerce field existed have five fields.
    pub fn parse(value: &str) -> Result<Self> {
        let fields: Vec<&str> = value.split('.').collect();
        if fields.len() < 5 {
            return Err(malformed(format!("expected at least 5 fields, found {}", fields.len())));
        }
        if fields[0].is_empty() {
            return Err(malformed("empty visitor id".to_string()));
        }

        Ok(Self {
            is_new_visitor: false,
            uuid: fields[0].to_string(),
            created_at: required(fields[1], "created_at")?,
            visit_count: fields[2]
                .parse()
                .map_err(|_| malformed(format!("visit count '{}' is not a number", fields[2])))?,
            current_visit_at: required(fields[3], "current_visit_at")?,
            last_visit_at: optional(fields[4], "last_visit_at")?,
            last_ecommerce_order_at: optional(fields.get(5).copied().unwrap_or(""), "last_ecommerce_order_at")?,
        })
    }

    /// Cookie value in field order
    pub fn to_cookie_value(&self) -> String {
        format!(
            "{}.{}.{}.{}.{}.{}",
            self.uuid,
            self.created_at,
            self.visit_count,
            self.current_visit_at,
            timestamp_field(self.last_visit_at),
            timestamp_field(self.last_ecommerce_order_at),
        )
    }
}

/// Render an optional timestamp the way the cookie and the request do
pub fn timestamp_field(ts: Option<i64>) -> String {
    ts.map(|ts| ts.to_string()).unwrap_or_default()
}

fn malformed(reason: String) -> BeaconError {
    BeaconError::MalformedCookie {
        name: "id".to_string(),
        reason,
    }
}

fn required(field: &str, what: &str) -> Result<i64> {
    field
        .parse()
        .map_err(|_| malformed(format!("{what} '{field}' is not a timestamp")))
}

fn optional(field: &str, what: &str) -> Result<Option<i64>> {
    if field.is_empty() {
        Ok(None)
    } else {
        required(field, what).map(Some)
    }
}

/// Derive a visitor id from the browser fingerprint, the time and a random
/// value. Not an RFC 4122 UUID.
pub fn generate_visitor_id(
    user_agent: &str,
    platform: &str,
    features_json: &str,
    now_millis: i64,
    random: f64,
) -> String {
    let mut id = digest(format!("{user_agent}{platform}{features_json}{now_millis}{random}"));
    id.truncate(VISITOR_ID_LENGTH);
    id
}

/// Where the visitor stands before a request is built
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoIdentityCookie,
    HasIdentityNoSession,
    HasIdentityInSession,
}

impl SessionState {
    pub fn classify(identity: Option<&VisitorIdentity>, session_marker: bool) -> Self {
        match (identity, session_marker) {
            (None, _) => SessionState::NoIdentityCookie,
            (Some(_), false) => SessionState::HasIdentityNoSession,
            (Some(_), true) => SessionState::HasIdentityInSession,
        }
    }
}

/// Result of one transition check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub identity: VisitorIdentity,
    /// The session marker was absent, so attribution must be recomputed
    pub new_session: bool,
    /// Whether the visit counter moved
    pub incremented: bool,
}

/// Run the session transition for a request built at `now`.
///
/// `new_uuid` is only called when there is no identity cookie.
pub fn advance(
    stored: Option<VisitorIdentity>,
    session_marker: bool,
    now: i64,
    session_timeout_secs: i64,
    new_uuid: impl FnOnce() -> String,
) -> SessionOutcome {
    let state = SessionState::classify(stored.as_ref(), session_marker);

    let mut identity = match stored {
        Some(identity) => identity,
        None => VisitorIdentity::first_visit(new_uuid(), now),
    };

    let mut incremented = false;
    let new_session = state != SessionState::HasIdentityInSession;

    if new_session {
        // A marker cleared by other scripts mid-visit must not count twice.
        let window_elapsed = match identity.last_visit_at {
            None => true,
            Some(last) => now.saturating_sub(last) >= session_timeout_secs,
        };
        if window_elapsed {
            identity.visit_count = identity.visit_count.saturating_add(1);
            identity.last_visit_at = Some(identity.current_visit_at);
            incremented = true;
        }
    }

    identity.current_visit_at = now;

    tracing::debug!(
        ?state,
        visit_count = identity.visit_count,
        new_session,
        incremented,
        "session transition"
    );

    SessionOutcome {
        identity,
        new_session,
        incremented,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_709_294_400;
    const TIMEOUT: i64 = 1800;

    fn returning(visit_count: u64, last_visit_at: i64) -> VisitorIdentity {
        VisitorIdentity {
            is_new_visitor: false,
            uuid: "0123456789abcdef".to_string(),
            created_at: NOW - 86_400,
            visit_count,
            current_visit_at: last_visit_at,
            last_visit_at: Some(last_visit_at),
            last_ecommerce_order_at: None,
        }
    }

    #[test]
    fn test_cookie_value_layout() {
        let mut identity = returning(3, NOW - 60);
        identity.last_ecommerce_order_at = Some(NOW - 30);
        let value = identity.to_cookie_value();
        assert_eq!(
            value,
            format!("0123456789abcdef.{}.3.{}.{}.{}", NOW - 86_400, NOW - 60, NOW - 60, NOW - 30)
        );
        assert_eq!(VisitorIdentity::parse(&value).unwrap(), identity);
    }

    #[test]
    fn test_parse_five_field_cookie() {
        let identity = VisitorIdentity::parse("abcdef0123456789.100.2.200.").unwrap();
        assert_eq!(identity.visit_count, 2);
        assert_eq!(identity.last_visit_at, None);
        assert_eq!(identity.last_ecommerce_order_at, None);
        assert!(!identity.is_new_visitor);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "abc", "abc.x.1.2.3", "abc.1.-1.2.3", ".1.1.2.3"] {
            let err = VisitorIdentity::parse(bad).unwrap_err();
            assert_eq!(err.error_code(), "MALFORMED_COOKIE", "input {bad:?}");
        }
    }

    #[test]
    fn test_first_request_creates_identity_without_counting() {
        let outcome = advance(None, false, NOW, TIMEOUT, || "feedfacecafebeef".to_string());
        let identity = outcome.identity;

        assert!(identity.is_new_visitor);
        assert_eq!(identity.visit_count, 0);
        assert_eq!(identity.created_at, NOW);
        assert_eq!(identity.current_visit_at, NOW);
        assert_eq!(identity.last_visit_at, Some(NOW));
        assert!(outcome.new_session);
        assert!(!outcome.incremented);
    }

    #[test]
    fn test_in_session_only_slides_current_visit() {
        let outcome = advance(Some(returning(3, NOW - 300)), true, NOW, TIMEOUT, || unreachable!());
        assert_eq!(outcome.identity.visit_count, 3);
        assert_eq!(outcome.identity.current_visit_at, NOW);
        assert_eq!(outcome.identity.last_visit_at, Some(NOW - 300));
        assert!(!outcome.new_session);
    }

    #[test]
    fn test_expired_session_increments_once() {
        let outcome = advance(Some(returning(3, NOW - 40 * 60)), false, NOW, TIMEOUT, || unreachable!());
        assert_eq!(outcome.identity.visit_count, 4);
        assert_eq!(outcome.identity.last_visit_at, Some(NOW - 40 * 60));
        assert!(outcome.incremented);
    }

    #[test]
    fn test_timeout_boundary() {
        let exactly = advance(Some(returning(1, NOW - TIMEOUT)), false, NOW, TIMEOUT, || unreachable!());
        assert_eq!(exactly.identity.visit_count, 2);

        let cleared_early = advance(Some(returning(1, NOW - TIMEOUT + 1)), false, NOW, TIMEOUT, || unreachable!());
        assert_eq!(cleared_early.identity.visit_count, 1);
        assert!(cleared_early.new_session);
    }

    #[test]
    fn test_extreme_cookie_values_do_not_overflow() {
        let stored = VisitorIdentity::parse("abcdef0123456789.1.1.1.-9223372036854775808.").unwrap();
        let outcome = advance(Some(stored), false, NOW, TIMEOUT, || unreachable!());
        assert_eq!(outcome.identity.visit_count, 2);
        assert!(outcome.incremented);

        let stored = VisitorIdentity::parse(&format!("abcdef0123456789.1.{}.1.{}.", u64::MAX, i64::MAX)).unwrap();
        let outcome = advance(Some(stored), false, NOW, TIMEOUT, || unreachable!());
        assert_eq!(outcome.identity.visit_count, u64::MAX);
        assert!(!outcome.incremented);

        let mut stored = returning(u64::MAX, NOW - 40 * 60);
        stored.last_visit_at = Some(i64::MIN);
        let outcome = advance(Some(stored), false, NOW, TIMEOUT, || unreachable!());
        assert_eq!(outcome.identity.visit_count, u64::MAX);
    }

    #[test]
    fn test_visitor_id_shape() {
        let a = generate_visitor_id("UA", "Linux", "{}", 1_000, 0.25);
        let b = generate_visitor_id("UA", "Linux", "{}", 1_000, 0.5);
        assert_eq!(a.len(), VISITOR_ID_LENGTH);
        assert_ne!(a, b);
        assert_eq!(a, generate_visitor_id("UA", "Linux", "{}", 1_000, 0.25));
    }
}
