//! JSON shape of a model spec: `{ "name": str, "sequence": [Stage, ...] }`.
//!
//! A `Stage`'s payload fields vary by `type`, so they're kept as a loose
//! JSON map rather than an enum — unknown keys in a stage object are
//! forward-compatible by construction, and [`super::lower`] is the only
//! place that interprets `fields` against a specific stage type.

use serde::Deserialize;
use serde_json::Map;

#[derive(Debug, Clone, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub sequence: Vec<Stage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Stage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub deps: Vec<usize>,
    #[serde(flatten)]
    pub fields: Map<String, serde_json::Value>,
}

impl Stage {
    pub fn i32_field(&self, name: &str, default: i32) -> i64 {
        self.fields
            .get(name)
            .and_then(|v| v.as_i64())
            .unwrap_or(default as i64)
    }

    pub fn i64_field(&self, name: &str, default: i64) -> i64 {
        self.fields.get(name).and_then(|v| v.as_i64()).unwrap_or(default)
    }

    pub fn str_field<'a>(&'a self, name: &str) -> Option<&'a str> {
        self.fields.get(name).and_then(|v| v.as_str())
    }

    pub fn array_field<'a>(&'a self, name: &str) -> Option<&'a Vec<serde_json::Value>> {
        self.fields.get(name).and_then(|v| v.as_array())
    }

    pub fn bool_field(&self, name: &str, default: bool) -> bool {
        self.fields.get(name).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    /// Raw present-but-possibly-wrong-typed value, used to distinguish "the
    /// field was never given" (fall back to a default/oracle estimate) from
    /// "the field was given" when looking up optional latency overrides.
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }
}
