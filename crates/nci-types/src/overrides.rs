//! Overlaying parameter assignments onto a base configuration.
//!
//! The base [`SessionConfig`] is flattened to a JSON tree, each override is
//! written to the unique leaf it names, and the tree is read back and
//! validated. A name is either a full dotted path
//! (`train_config.batch_size`) or any dotted suffix of one that matches a
//! single leaf (`batch_size`, `encoder_config.n_layers`).

use serde_json::Value;

use crate::config::SessionConfig;
use crate::errors::ConfigError;
use crate::params::{Assignment, ParamValue};

/// Per-layer list parameters and the count they must match.
const LAYER_LISTS: [(&str, &str); 5] = [
    ("n_filters", "n_layers"),
    ("filter_size", "n_layers"),
    ("reg_weight", "n_layers"),
    ("init_dim", "n_layers"),
    ("dim_hidden", "n_hidden"),
];

/// Build a new validated configuration from `base` and `overrides`.
pub fn apply_overrides(base: &SessionConfig, overrides: &Assignment) -> Result<SessionConfig, ConfigError> {
    let mut tree = serde_json::to_value(base).map_err(|e| ConfigError::Other(e.to_string()))?;
    let leaves = leaf_paths(&tree);

    for (name, value) in overrides.iter() {
        let path = resolve(&leaves, name)?;
        set_path(&mut tree, &path, value)?;
        tracing::debug!("override {} -> {}", path.join("."), value);
    }

    broadcast_layer_lists(&mut tree);

    let config: SessionConfig = serde_json::from_value(tree).map_err(|e| ConfigError::InvalidValue {
        name: overrides.names().collect::<Vec<_>>().join(", "),
        value: overrides.slug(),
        message: e.to_string(),
    })?;
    config.validate()?;
    Ok(config)
}

/// Every overridable leaf of the tree, as a list of path segments.
fn leaf_paths(tree: &Value) -> Vec<Vec<String>> {
    fn walk(node: &Value, prefix: &mut Vec<String>, out: &mut Vec<Vec<String>>) {
        if let Value::Object(map) = node {
            for (key, child) in map {
                prefix.push(key.clone());
                match child {
                    Value::Object(_) => walk(child, prefix, out),
                    _ => out.push(prefix.clone()),
                }
                prefix.pop();
            }
        }
    }

    let mut out = Vec::new();
    walk(tree, &mut Vec::new(), &mut out);
    out
}

fn resolve(leaves: &[Vec<String>], name: &str) -> Result<Vec<String>, ConfigError> {
    let wanted: Vec<&str> = name.split('.').collect();
    let matches: Vec<&Vec<String>> = leaves
        .iter()
        .filter(|path| {
            path.len() >= wanted.len()
                && path[path.len() - wanted.len()..]
                    .iter()
                    .zip(&wanted)
                    .all(|(a, b)| a == b)
        })
        .collect();

    match matches.as_slice() {
        [] => Err(ConfigError::UnknownParameter { name: name.to_string() }),
        [only] => Ok((*only).clone()),
        many => Err(ConfigError::AmbiguousParameter {
            name: name.to_string(),
            candidates: many.iter().map(|p| p.join(".")).collect(),
        }),
    }
}

fn set_path(tree: &mut Value, path: &[String], value: &ParamValue) -> Result<(), ConfigError> {
    let mut node = tree;
    for segment in path {
        node = node
            .get_mut(segment)
            .ok_or_else(|| ConfigError::UnknownParameter { name: path.join(".") })?;
    }
    *node = value.to_json();
    Ok(())
}

/// Expand scalar per-layer values to one entry per layer.
fn broadcast_layer_lists(node: &mut Value) {
    if let Value::Object(map) = node {
        for (list, count) in LAYER_LISTS {
            let n = match map.get(count).and_then(Value::as_u64) {
                Some(n) => n as usize,
                None => continue,
            };
            if let Some(entry) = map.get_mut(list) {
                if !entry.is_array() {
                    *entry = Value::Array(vec![entry.clone(); n]);
                }
            }
        }
        for child in map.values_mut() {
            broadcast_layer_lists(child);
        }
    }
}
