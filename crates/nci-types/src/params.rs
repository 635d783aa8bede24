//! Concrete parameter values and ordered parameter assignments.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A concrete parameter value produced by a search strategy.
///
/// Integers are tried before floats so that `3` stays an integer after a
/// serialize/deserialize round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Json(serde_json::Value),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Json(v) => v.as_f64(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(_) => None,
            Self::Json(v) => v.as_i64(),
        }
    }

    /// JSON form used when overlaying the value onto a configuration tree.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Int(v) => serde_json::Value::from(*v),
            // Non-finite floats have no JSON form; they are rejected by
            // config validation afterwards.
            Self::Float(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::Json(v) => v.clone(),
        }
    }

    /// Filesystem-safe rendering used in artifact names.
    pub fn slug(&self) -> String {
        let raw = match self {
            Self::Json(serde_json::Value::String(s)) => s.clone(),
            Self::Json(serde_json::Value::Array(items)) => items
                .iter()
                .map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join("x"),
            Self::Float(v) => short_float(*v),
            other => other.to_string(),
        };
        raw.chars()
            .map(|c| match c {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '+' => c,
                _ => '_',
            })
            .collect()
    }
}

/// `v` rounded to four significant digits. Artifact names only need to be
/// readable; the point index keeps them unique.
fn short_float(v: f64) -> String {
    if !v.is_finite() || v == 0.0 {
        return v.to_string();
    }
    format!("{v:.3e}")
        .parse::<f64>()
        .map_or_else(|_| v.to_string(), |rounded| rounded.to_string())
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Json(serde_json::Value::String(v.to_string()))
    }
}

impl From<serde_json::Value> for ParamValue {
    fn from(v: serde_json::Value) -> Self {
        if let Some(i) = v.as_i64() {
            return Self::Int(i);
        }
        match v.as_f64() {
            Some(f) if v.is_f64() => Self::Float(f),
            _ => Self::Json(v),
        }
    }
}

/// An ordered mapping of parameter name to value.
///
/// Order is the order in which parameters were declared in the search
/// space; it drives artifact naming and report layout.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assignment {
    entries: Vec<(String, ParamValue)>,
}

impl Assignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name`, replacing an existing value in place.
    pub fn insert(&mut self, name: impl Into<String>, value: ParamValue) {
        let name = name.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(name, value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `self` overlaid with `other`; `other` wins on conflicts.
    pub fn merged(&self, other: &Assignment) -> Assignment {
        let mut out = self.clone();
        for (name, value) in other.iter() {
            out.insert(name, value.clone());
        }
        out
    }

    /// Compact `name-value` rendering for artifact names.
    pub fn slug(&self) -> String {
        self.entries
            .iter()
            .map(|(k, v)| {
                let short = k.rsplit('.').next().unwrap_or(k);
                format!("{short}-{}", v.slug())
            })
            .collect::<Vec<_>>()
            .join("_")
    }
}

impl FromIterator<(String, ParamValue)> for Assignment {
    fn from_iter<I: IntoIterator<Item = (String, ParamValue)>>(iter: I) -> Self {
        let mut out = Assignment::new();
        for (k, v) in iter {
            out.insert(k, v);
        }
        out
    }
}

impl Serialize for Assignment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

struct AssignmentVisitor;

impl<'de> Visitor<'de> for AssignmentVisitor {
    type Value = Assignment;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a mapping of parameter names to values")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Assignment, A::Error> {
        let mut out = Assignment::new();
        while let Some((k, v)) = access.next_entry::<String, ParamValue>()? {
            out.insert(k, v);
        }
        Ok(out)
    }

    fn visit_unit<E: serde::de::Error>(self) -> Result<Assignment, E> {
        Ok(Assignment::new())
    }
}

impl<'de> Deserialize<'de> for Assignment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(AssignmentVisitor)
    }
}
