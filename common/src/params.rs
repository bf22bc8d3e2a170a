use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A single typed parameter value as persisted and sent over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<ParamValue>),
    Object(BTreeMap<String, ParamValue>),
}

impl ParamValue {
    pub const fn kind(&self) -> ParamKind {
        match self {
            Self::Bool(_) => ParamKind::Bool,
            Self::Number(_) => ParamKind::Number,
            Self::String(_) => ParamKind::String,
            Self::List(_) => ParamKind::List,
            Self::Object(_) => ParamKind::Object,
        }
    }

    /// Visits every string value, descending into lists and objects.
    pub fn visit_strings<'a>(&'a self, visit: &mut impl FnMut(&'a str)) {
        match self {
            Self::String(s) => visit(s),
            Self::List(items) => {
                for item in items {
                    item.visit_strings(visit);
                }
            }
            Self::Object(map) => {
                for value in map.values() {
                    value.visit_strings(visit);
                }
            }
            Self::Bool(_) | Self::Number(_) => {}
        }
    }
}

/// Declared type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    String,
    Number,
    Bool,
    List,
    Object,
}

/// One entry of a tool's declared parameter schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
        }
    }
}

/// String-keyed parameter bundle used for tool I/O and persisted payloads.
///
/// The map is ordered so hashing and serialization are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypedParams(pub BTreeMap<String, ParamValue>);

impl TypedParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: ParamValue) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Validates the bundle against a declared schema. Unknown keys are
    /// rejected; required keys must be present; kinds must match.
    pub fn validate(&self, schema: &[ParamSpec]) -> Result<(), String> {
        for spec in schema {
            match self.0.get(&spec.name) {
                Some(value) if value.kind() == spec.kind => {}
                Some(value) => {
                    return Err(format!(
                        "parameter '{}' has kind {:?}, expected {:?}",
                        spec.name,
                        value.kind(),
                        spec.kind
                    ))
                }
                None if spec.required => {
                    return Err(format!("missing required parameter '{}'", spec.name))
                }
                None => {}
            }
        }

        for key in self.0.keys() {
            if !schema.iter().any(|spec| spec.name == *key) {
                return Err(format!("unknown parameter '{key}'"));
            }
        }

        Ok(())
    }

    /// Collects every string value in the bundle, including nested ones.
    pub fn string_values(&self) -> Vec<&str> {
        let mut strings = Vec::new();
        for value in self.0.values() {
            value.visit_strings(&mut |s| strings.push(s));
        }
        strings
    }

    /// Stable SHA-256 over the canonical JSON rendering, for call logs.
    pub fn content_hash(&self) -> String {
        let canonical = serde_json::to_string(&self.0).unwrap_or_default();
        let digest = Sha256::digest(canonical.as_bytes());
        let mut hex = String::with_capacity(64);
        for byte in digest {
            let _ = write!(hex, "{byte:02x}");
        }
        hex
    }
}
