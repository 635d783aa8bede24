//! Loading search spaces from YAML files.
//!
//! A grid file is either a flat mapping of parameter name to candidate list,
//! or a `grid:` mapping next to an optional `base:` mapping of overrides
//! shared by every point:
//!
//! ```yaml
//! base:
//!   num_epochs: 10
//! grid:
//!   initial_learning_rate: [0.01, 0.1]
//!   n_layers: [2, 3, 4]
//! ```
//!
//! A random-search file has `fixed_params` and `var_params`. Each variable
//! parameter is a rule mapping with a `dist` key, or a plain list which is
//! read as a uniform choice:
//!
//! ```yaml
//! fixed_params:
//!   num_epochs: 10
//! var_params:
//!   initial_learning_rate: {dist: log_uniform, low: 0.0001, high: 0.1}
//!   n_hidden: {dist: int_uniform, low: 1, high: 3}
//!   batch_size: [16, 32, 64]
//! ```
//!
//! Nested mappings in `base` and `fixed_params` are flattened into dotted
//! parameter names.

use nci_types::{Assignment, NciError, NciResult, ParamValue, SearchSpaceError};
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::search::{ParameterKind, SearchSpace};

/// Contents of a grid-search file.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSpec {
    pub base: Assignment,
    pub space: SearchSpace,
}

/// Contents of a random-search file.
#[derive(Debug, Clone, PartialEq)]
pub struct RandomSpec {
    pub fixed_params: Assignment,
    pub var_params: SearchSpace,
}

pub fn load_grid_spec(path: &Path) -> NciResult<GridSpec> {
    let text = fs::read_to_string(path).map_err(|e| NciError::io(path, e))?;
    let spec = parse_grid_spec(&text)?;
    debug!("loaded {} grid parameters from {}", spec.space.parameters.len(), path.display());
    Ok(spec)
}

pub fn load_random_spec(path: &Path) -> NciResult<RandomSpec> {
    let text = fs::read_to_string(path).map_err(|e| NciError::io(path, e))?;
    let spec = parse_random_spec(&text)?;
    debug!(
        "loaded {} fixed and {} variable parameters from {}",
        spec.fixed_params.len(),
        spec.var_params.parameters.len(),
        path.display()
    );
    Ok(spec)
}

pub fn parse_grid_spec(text: &str) -> NciResult<GridSpec> {
    let doc = parse_document(text)?;

    let (base, grid) = match doc.get("grid") {
        Some(Value::Mapping(grid)) => {
            let base = match doc.get("base") {
                None | Some(Value::Null) => Assignment::new(),
                Some(value) => assignment_from(as_mapping(value, "base")?)?,
            };
            if let Some(extra) = doc.keys().find(|k| !matches!(k.as_str(), Some("grid") | Some("base"))) {
                return Err(SearchSpaceError::Malformed(format!(
                    "unexpected top-level key {} next to grid",
                    key_name(extra)?
                ))
                .into());
            }
            (base, grid)
        }
        Some(_) => return Err(SearchSpaceError::Malformed("grid must be a mapping".into()).into()),
        None => (Assignment::new(), &doc),
    };

    let mut space = SearchSpace::new();
    for (key, value) in grid {
        let name = key_name(key)?;
        let Value::Sequence(items) = value else {
            return Err(SearchSpaceError::Malformed(format!("{name}: expected a list of candidates")).into());
        };
        let values = items.iter().map(param_value).collect::<NciResult<Vec<_>>>()?;
        space = space.add(name, ParameterKind::Choice { values });
    }

    space.validate()?;
    Ok(GridSpec { base, space })
}

pub fn parse_random_spec(text: &str) -> NciResult<RandomSpec> {
    let doc = parse_document(text)?;

    let fixed_params = match doc.get("fixed_params") {
        None | Some(Value::Null) => Assignment::new(),
        Some(value) => assignment_from(as_mapping(value, "fixed_params")?)?,
    };
    let var = match doc.get("var_params") {
        Some(value) => as_mapping(value, "var_params")?,
        None => return Err(SearchSpaceError::MissingSection("var_params".into()).into()),
    };

    let mut var_params = SearchSpace::new();
    for (key, value) in var {
        let name = key_name(key)?;
        let kind = parse_rule(&name, value)?;
        var_params = var_params.add(name, kind);
    }

    var_params.validate()?;
    Ok(RandomSpec {
        fixed_params,
        var_params,
    })
}

pub(crate) fn parse_document(text: &str) -> NciResult<Mapping> {
    match serde_yaml::from_str::<Value>(text)? {
        Value::Mapping(map) => Ok(map),
        Value::Null => Err(SearchSpaceError::Empty.into()),
        _ => Err(SearchSpaceError::Malformed("expected a mapping at the top level".into()).into()),
    }
}

fn as_mapping<'a>(value: &'a Value, section: &str) -> Result<&'a Mapping, SearchSpaceError> {
    match value {
        Value::Mapping(map) => Ok(map),
        _ => Err(SearchSpaceError::Malformed(format!("{section} must be a mapping"))),
    }
}

fn key_name(key: &Value) -> Result<String, SearchSpaceError> {
    match key {
        Value::String(s) => Ok(s.clone()),
        other => Err(SearchSpaceError::Malformed(format!(
            "parameter names must be strings, got {other:?}"
        ))),
    }
}

fn param_value(value: &Value) -> NciResult<ParamValue> {
    let json: serde_json::Value = serde_yaml::from_value(value.clone())?;
    Ok(ParamValue::from(json))
}

pub(crate) fn assignment_from(map: &Mapping) -> NciResult<Assignment> {
    fn walk(map: &Mapping, prefix: &str, out: &mut Assignment) -> NciResult<()> {
        for (key, value) in map {
            let key = key_name(key)?;
            let name = if prefix.is_empty() { key } else { format!("{prefix}.{key}") };
            match value {
                Value::Mapping(inner) => walk(inner, &name, out)?,
                _ => out.insert(name, param_value(value)?),
            }
        }
        Ok(())
    }

    let mut out = Assignment::new();
    walk(map, "", &mut out)?;
    Ok(out)
}

fn parse_rule(name: &str, value: &Value) -> NciResult<ParameterKind> {
    let rule = match value {
        Value::Sequence(items) => {
            let values = items.iter().map(param_value).collect::<NciResult<Vec<_>>>()?;
            return Ok(ParameterKind::Choice { values });
        }
        Value::Mapping(rule) => rule,
        _ => {
            return Err(SearchSpaceError::Malformed(format!(
                "{name}: expected a sampling rule or a list of choices"
            ))
            .into())
        }
    };

    let dist = match rule.get("dist") {
        Some(Value::String(dist)) => dist.as_str(),
        Some(_) => return Err(SearchSpaceError::Malformed(format!("{name}: dist must be a string")).into()),
        None => {
            return Err(SearchSpaceError::MissingField {
                param: name.to_string(),
                field: "dist".into(),
            }
            .into())
        }
    };

    let kind = match dist {
        "uniform" => ParameterKind::Uniform {
            low: float_field(name, rule, "low")?,
            high: float_field(name, rule, "high")?,
        },
        "log_uniform" | "loguniform" | "log-uniform" => ParameterKind::LogUniform {
            low: float_field(name, rule, "low")?,
            high: float_field(name, rule, "high")?,
        },
        "int_uniform" | "randint" => ParameterKind::IntUniform {
            low: int_field(name, rule, "low")?,
            high: int_field(name, rule, "high")?,
        },
        "choice" => match rule.get("values") {
            Some(Value::Sequence(items)) => ParameterKind::Choice {
                values: items.iter().map(param_value).collect::<NciResult<Vec<_>>>()?,
            },
            Some(_) => return Err(SearchSpaceError::Malformed(format!("{name}: values must be a list")).into()),
            None => {
                return Err(SearchSpaceError::MissingField {
                    param: name.to_string(),
                    field: "values".into(),
                }
                .into())
            }
        },
        other => {
            return Err(SearchSpaceError::UnknownRule {
                param: name.to_string(),
                rule: other.to_string(),
            }
            .into())
        }
    };
    Ok(kind)
}

fn field<'a>(name: &str, rule: &'a Mapping, field: &str) -> Result<&'a Value, SearchSpaceError> {
    rule.get(field).ok_or_else(|| SearchSpaceError::MissingField {
        param: name.to_string(),
        field: field.to_string(),
    })
}

fn float_field(name: &str, rule: &Mapping, key: &str) -> Result<f64, SearchSpaceError> {
    field(name, rule, key)?
        .as_f64()
        .ok_or_else(|| SearchSpaceError::Malformed(format!("{name}: {key} must be a number")))
}

fn int_field(name: &str, rule: &Mapping, key: &str) -> Result<i64, SearchSpaceError> {
    field(name, rule, key)?
        .as_i64()
        .ok_or_else(|| SearchSpaceError::Malformed(format!("{name}: {key} must be an integer")))
}
