//! Custom variables
//!
//! Three independent slot maps keyed by a small positive index. Each slot is
//! a `(name, value)` pair and serialises as `{"1":["Type","Article"]}` with
//! keys in ascending order.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BeaconError, Result};

/// Longest name or value kept in a slot
pub const MAX_LENGTH: usize = 200;

/// Custom variable scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Sent with every request of the visit, optionally kept in a cookie
    Visit,
    /// Sent as `cvar`
    Page,
    /// Sent as `e_cvar`
    Event,
}

impl Scope {
    /// Accepts `"visit"`, `"page"`, `"event"` and the legacy numeric scopes
    /// `2` (visit) and `3` (page). A missing scope means visit.
    pub fn from_json(value: Option<&Value>) -> Result<Self> {
        match value {
            None | Some(Value::Null) => Ok(Scope::Visit),
            Some(Value::String(s)) => s.parse(),
            Some(Value::Number(n)) => match n.as_i64() {
                Some(2) => Ok(Scope::Visit),
                Some(3) => Ok(Scope::Page),
                _ => Err(BeaconError::UnknownScope { scope: n.to_string() }),
            },
            Some(other) => Err(BeaconError::UnknownScope {
                scope: other.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Visit => "visit",
            Scope::Page => "page",
            Scope::Event => "event",
        }
    }
}

impl FromStr for Scope {
    type Err = BeaconError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "visit" => Ok(Scope::Visit),
            "page" => Ok(Scope::Page),
            "event" => Ok(Scope::Event),
            other => Err(BeaconError::UnknownScope {
                scope: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn truncate(value: &str) -> String {
    value.chars().take(MAX_LENGTH).collect()
}

/// One scope's slots
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomVariables(BTreeMap<u32, (String, String)>);

impl CustomVariables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the visit-scope cookie
    pub fn parse(value: &str) -> Result<Self> {
        Ok(serde_json::from_str(value)?)
    }

    /// Store a truncated pair. Indexes below 1 are ignored.
    pub fn set(&mut self, index: i64, name: &str, value: &str) {
        let Ok(index) = u32::try_from(index) else {
            return;
        };
        if index == 0 {
            return;
        }
        self.0.insert(index, (truncate(name), truncate(value)));
    }

    /// The pair at `index`, unless absent or cleared
    pub fn get(&self, index: i64) -> Option<&(String, String)> {
        let index = u32::try_from(index).ok()?;
        self.0.get(&index).filter(|(name, _)| !name.is_empty())
    }

    /// Clear a present slot by writing an empty pair
    pub fn delete(&mut self, index: i64) {
        if self.get(index).is_some() {
            self.set(index, "", "");
        }
    }

    /// Drop slots whose name or value is empty
    pub fn prune_empty(&mut self) {
        self.0.retain(|_, (name, value)| !name.is_empty() && !value.is_empty());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }

    /// JSON for a query parameter, `None` when there is nothing to send
    pub fn to_query_json(&self) -> Option<String> {
        let json = self.to_json();
        (json.len() > 2).then_some(json)
    }
}
