//! Serde helpers for named loss and metric values.
//!
//! A diverged run reports NaN or infinite losses. JSON has no literal for
//! those, so non-finite values are written as the strings `"NaN"`, `"inf"`
//! and `"-inf"` and read back from either form. `null`, as older JSON
//! results hold it, reads as NaN.

use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum Score {
    Number(f64),
    Text(String),
    Missing,
}

impl Score {
    fn from_f64(value: f64) -> Self {
        if value.is_finite() {
            Self::Number(value)
        } else if value.is_nan() {
            Self::Text("NaN".into())
        } else if value > 0.0 {
            Self::Text("inf".into())
        } else {
            Self::Text("-inf".into())
        }
    }

    fn into_f64<E: serde::de::Error>(self) -> Result<f64, E> {
        match self {
            Self::Number(v) => Ok(v),
            Self::Missing => Ok(f64::NAN),
            Self::Text(s) => s
                .parse::<f64>()
                .map_err(|_| E::custom(format!("expected a number, got '{s}'"))),
        }
    }
}

pub fn serialize<S: Serializer>(values: &BTreeMap<String, f64>, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(values.len()))?;
    for (name, value) in values {
        map.serialize_entry(name, &Score::from_f64(*value))?;
    }
    map.end()
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BTreeMap<String, f64>, D::Error> {
    BTreeMap::<String, Score>::deserialize(deserializer)?
        .into_iter()
        .map(|(name, score)| Ok((name, score.into_f64::<D::Error>()?)))
        .collect()
}
