//! Capability resolution from the loosely-typed payload stored with a user.
//!
//! The stored payload has taken several shapes over time: a JSON object of
//! token → flag, a JSON list of tokens (newer records list module codes such
//! as `"M1"`), a set of boolean columns on the user row, or nothing at all.
//! [`classify`] decodes the boundary type into [`CapabilityPayload`] once and
//! [`resolve`] matches on it exhaustively.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::authz::synonyms;
use crate::authz::types::{Capability, CapabilitySet};

/// Payload exactly as the user store hands it over.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum RawPayload {
    #[default]
    Absent,
    /// JSON text, typically a TEXT column.
    Text(String),
    /// An already-decoded JSON document.
    Json(Value),
    /// Boolean columns of older user rows.
    Legacy(LegacyFlags),
}

/// Boolean capability columns carried by older user records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LegacyFlags {
    pub can_send: bool,
    pub can_asset: bool,
    pub can_insights: bool,
    pub can_users: bool,
    pub can_fulfillment_staff: bool,
    pub can_fulfillment_customer: bool,
    pub is_admin: bool,
    pub is_sysadmin: bool,
}

impl LegacyFlags {
    pub fn any(&self) -> bool {
        self.tokens().next().is_some()
    }

    fn tokens(&self) -> impl Iterator<Item = &'static str> {
        [
            (self.can_send, "can_send"),
            (self.can_asset, "can_asset"),
            (self.can_insights, "can_insights"),
            (self.can_users, "can_users"),
            (self.can_fulfillment_staff, "can_fulfillment_staff"),
            (self.can_fulfillment_customer, "can_fulfillment_customer"),
            (self.is_admin, "is_admin"),
            (self.is_sysadmin, "is_sysadmin"),
        ]
        .into_iter()
        .filter_map(|(set, name)| set.then_some(name))
    }
}

/// Classified payload.
#[derive(Debug, Clone, PartialEq)]
pub enum CapabilityPayload {
    Flags(BTreeMap<String, bool>),
    Tokens(Vec<String>),
    Legacy(LegacyFlags),
    Absent,
}

#[derive(Debug, Error)]
#[error("malformed capability payload: {0}")]
pub struct MalformedPayload(String);

/// JSON shapes accepted for stored payloads.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonPayload {
    Flags(BTreeMap<String, Value>),
    Tokens(Vec<String>),
    Single(String),
}

impl From<JsonPayload> for CapabilityPayload {
    fn from(value: JsonPayload) -> Self {
        match value {
            JsonPayload::Flags(map) => CapabilityPayload::Flags(
                map.into_iter().map(|(k, v)| (k, truthy(&v))).collect(),
            ),
            JsonPayload::Tokens(tokens) => CapabilityPayload::Tokens(tokens),
            JsonPayload::Single(token) => CapabilityPayload::Tokens(vec![token]),
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "y" | "on"
        ),
        Value::Null | Value::Array(_) | Value::Object(_) => false,
    }
}

fn classify_text(text: &str) -> Result<CapabilityPayload, MalformedPayload> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(CapabilityPayload::Absent);
    }
    serde_json::from_str::<JsonPayload>(text)
        .map(CapabilityPayload::from)
        .map_err(|e| MalformedPayload(e.to_string()))
}

/// Decodes the boundary type into its classified shape.
pub fn classify(raw: &RawPayload) -> Result<CapabilityPayload, MalformedPayload> {
    match raw {
        RawPayload::Absent => Ok(CapabilityPayload::Absent),
        RawPayload::Text(text) => classify_text(text),
        RawPayload::Json(Value::Null) => Ok(CapabilityPayload::Absent),
        // JSON text stored inside a JSON string column.
        RawPayload::Json(Value::String(text)) => classify_text(text),
        RawPayload::Json(value) => JsonPayload::deserialize(value)
            .map(CapabilityPayload::from)
            .map_err(|e| MalformedPayload(e.to_string())),
        RawPayload::Legacy(flags) => Ok(CapabilityPayload::Legacy(*flags)),
    }
}

/// Resolves a raw payload into canonical capability tokens.
///
/// Total: malformed input is logged and yields the empty set.
pub fn resolve(raw: &RawPayload) -> CapabilitySet {
    match classify(raw) {
        Ok(payload) => resolve_classified(&payload),
        Err(e) => {
            tracing::debug!(error = %e, "substituting empty capability set");
            CapabilitySet::new()
        }
    }
}

pub fn resolve_classified(payload: &CapabilityPayload) -> CapabilitySet {
    let tokens: Vec<&str> = match payload {
        CapabilityPayload::Flags(map) => map
            .iter()
            .filter(|(_, on)| **on)
            .map(|(k, _)| k.as_str())
            .collect(),
        CapabilityPayload::Tokens(list) => list.iter().map(String::as_str).collect(),
        CapabilityPayload::Legacy(flags) => flags.tokens().collect(),
        CapabilityPayload::Absent => Vec::new(),
    };

    let mut set: BTreeSet<Capability> = tokens
        .into_iter()
        .filter_map(synonyms::canonicalize)
        .collect();
    synonyms::expand_derived(&mut set);

    let mut out = CapabilitySet::new();
    out.inner_mut().extend(set);
    out
}
