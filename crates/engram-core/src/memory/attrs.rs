//! Attribute bags
//!
//! `metadata` and `access_pattern` arrive as free-form nested JSON. Rather
//! than threading `serde_json::Value` through the engine, both are parsed
//! into a closed recursive sum type at ingest and validated at each
//! structured read. Unknown keys are preserved round-trip so future fields
//! survive older readers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// A scalar, list, or map attribute value
///
/// Maps are ordered (`BTreeMap`) so canonical serializations are stable,
/// which pattern identity keys rely on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<AttrValue>),
    Map(BTreeMap<String, AttrValue>),
}

impl Default for AttrValue {
    fn default() -> Self {
        AttrValue::Map(BTreeMap::new())
    }
}

impl AttrValue {
    /// Empty map value
    pub fn empty_map() -> Self {
        AttrValue::Map(BTreeMap::new())
    }

    pub fn is_map(&self) -> bool {
        matches!(self, AttrValue::Map(_))
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, AttrValue>> {
        match self {
            AttrValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view; floats with integral values qualify
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(n) => Some(*n),
            AttrValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            AttrValue::Float(f) => Some(*f),
            AttrValue::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[AttrValue]> {
        match self {
            AttrValue::List(l) => Some(l),
            _ => None,
        }
    }

    /// Fetch a nested value by key path
    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Parse from a JSON string, rejecting non-map roots
    pub fn map_from_json(raw: &str) -> Result<Self> {
        let value: AttrValue = serde_json::from_str(raw)?;
        if !value.is_map() {
            return Err(Error::InvalidInput(
                "attribute bag must be a JSON object".to_string(),
            ));
        }
        Ok(value)
    }

    /// Serialize to a canonical JSON string (map keys sorted)
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "null".to_string())
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Text(s.to_string())
    }
}

impl From<i64> for AttrValue {
    fn from(n: i64) -> Self {
        AttrValue::Int(n)
    }
}

impl From<f64> for AttrValue {
    fn from(f: f64) -> Self {
        AttrValue::Float(f)
    }
}

impl From<Vec<AttrValue>> for AttrValue {
    fn from(l: Vec<AttrValue>) -> Self {
        AttrValue::List(l)
    }
}

/// Build a map value from key/value pairs
pub fn attr_map<I>(pairs: I) -> AttrValue
where
    I: IntoIterator<Item = (&'static str, AttrValue)>,
{
    AttrValue::Map(
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
    )
}
