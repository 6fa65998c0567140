//! Referral attribution
//!
//! The attribution cookie is a JSON array
//! `[campaign_name, campaign_keyword, referral_ts, referral_url]`. It is only
//! recomputed when a new session starts.

use serde_json::Value;

use crate::error::{BeaconError, Result};
use crate::url::{self, REFERRAL_URL_MAX_LENGTH};

/// Campaign and referrer credited with the visit
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct AttributionRecord {
    pub campaign_name: String,
    pub campaign_keyword: String,
    /// Unix seconds; 0 when nothing was ever credited
    pub referral_ts: i64,
    pub referral_url: String,
}

impl AttributionRecord {
    /// Parse the cookie value. Values from before the JSON format fail here
    /// and are meant to be treated as an empty record.
    pub fn parse(value: &str) -> Result<Self> {
        let parts: Vec<Value> = serde_json::from_str(value)?;
        if parts.len() < 4 {
            return Err(BeaconError::MalformedCookie {
                name: "ref".to_string(),
                reason: format!("expected 4 elements, found {}", parts.len()),
            });
        }

        Ok(Self {
            campaign_name: as_text(&parts[0]),
            campaign_keyword: as_text(&parts[1]),
            referral_ts: match &parts[2] {
                Value::Number(n) => n.as_i64().unwrap_or_default(),
                Value::String(s) => s.parse().unwrap_or_default(),
                _ => 0,
            },
            referral_url: as_text(&parts[3]),
        })
    }

    pub fn to_cookie_value(&self) -> String {
        Value::Array(vec![
            Value::String(self.campaign_name.clone()),
            Value::String(self.campaign_keyword.clone()),
            Value::from(self.referral_ts),
            Value::String(self.referral_url.clone()),
        ])
        .to_string()
    }

    pub fn is_empty(&self) -> bool {
        self.campaign_name.is_empty() && self.referral_url.is_empty()
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

/// Truncate to the cookie limit, then strip the fragment if configured
pub fn normalize_referral_url(referral_url: &str, discard_hash: bool) -> String {
    let truncated: String = referral_url.chars().take(REFERRAL_URL_MAX_LENGTH).collect();
    url::purify(&truncated, discard_hash)
}

/// Inputs that decide which campaign and referrer get credit
#[derive(Debug, Clone, Copy)]
pub struct AttributionPolicy<'a> {
    /// Keep the first referrer instead of the most recent one
    pub first_referrer: bool,
    pub campaign_name_parameters: &'a [String],
    pub campaign_keyword_parameters: &'a [String],
    /// Hosts that count as the site itself
    pub site_hosts: &'a [String],
    pub discard_hash: bool,
}

/// Outcome of a new-session attribution pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributionUpdate {
    /// Values to send with the request
    pub record: AttributionRecord,
    /// Whether `record` should be written back to the cookie
    pub persist: bool,
}

/// Recompute attribution at session start.
///
/// Campaign parameters are read from the unpurified page URL so that
/// campaigns passed in the fragment are found. With first-referrer mode on,
/// campaign detection still runs when no campaign was captured earlier.
pub fn recompute(
    stored: AttributionRecord,
    current_url: &str,
    referrer_url: &str,
    now: i64,
    policy: &AttributionPolicy<'_>,
) -> AttributionUpdate {
    let mut record = stored;

    if !policy.first_referrer || record.campaign_name.is_empty() {
        record.campaign_name = first_parameter(current_url, policy.campaign_name_parameters);
        record.campaign_keyword = first_parameter(current_url, policy.campaign_keyword_parameters);
    }

    let referrer_host = url::host_name(referrer_url);
    let stored_host = if record.referral_url.is_empty() {
        String::new()
    } else {
        url::host_name(&record.referral_url)
    };

    let external_referrer =
        !referrer_host.is_empty() && !url::is_site_host_name(&referrer_host, policy.site_hosts);
    let replaceable = !policy.first_referrer
        || stored_host.is_empty()
        || url::is_site_host_name(&stored_host, policy.site_hosts);

    if external_referrer && replaceable {
        record.referral_url = referrer_url.to_string();
    }

    let persist = !record.referral_url.is_empty() || !record.campaign_name.is_empty();
    if persist {
        record.referral_ts = now;
        record.referral_url = normalize_referral_url(&record.referral_url, policy.discard_hash);
    }

    tracing::debug!(
        campaign = %record.campaign_name,
        referrer_host = %referrer_host,
        persist,
        "attribution recomputed"
    );

    AttributionUpdate { record, persist }
}

/// First non-empty value among `names`
fn first_parameter(current_url: &str, names: &[String]) -> String {
    names
        .iter()
        .map(|name| url::parameter(current_url, name))
        .find(|value| !value.is_empty())
        .unwrap_or_default()
}
