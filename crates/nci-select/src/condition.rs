//! Condition files.
//!
//! A condition names a model kind, optionally a basename, and overrides on
//! top of that model's built-in defaults:
//!
//! ```yaml
//! model: topo
//! basename: wide
//! dim_hidden: [256]
//! train_config:
//!   num_epochs: 50
//! ```

use nci_types::{apply_overrides, config_error, Assignment, ModelKind, NciError, NciResult, SessionConfig};
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::Path;

use crate::space_file::{assignment_from, parse_document};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionSpec {
    pub model: Option<ModelKind>,
    pub basename: Option<String>,
    pub overrides: Assignment,
}

impl ConditionSpec {
    /// A condition with no file behind it: built-in defaults for `model`.
    pub fn standard(model: ModelKind) -> Self {
        Self {
            model: Some(model),
            ..Default::default()
        }
    }

    /// Basename spelled out from the overrides, for a condition file that
    /// names none. `None` if there are no overrides.
    pub fn derived_basename(&self) -> Option<String> {
        (!self.overrides.is_empty()).then(|| self.overrides.slug())
    }

    /// Resolve into a validated configuration rooted at `work_dir`.
    ///
    /// `basename` wins over the one in the file; `default_basename` is used
    /// when neither is given.
    pub fn build(&self, basename: Option<&str>, default_basename: &str, work_dir: &Path) -> NciResult<SessionConfig> {
        let model = self
            .model
            .ok_or_else(|| config_error!("condition does not name a model (encoder, topo or sign)"))?;
        let basename = basename
            .or(self.basename.as_deref())
            .unwrap_or(default_basename);

        let base = SessionConfig::standard(model, basename, work_dir);
        Ok(apply_overrides(&base, &self.overrides)?)
    }
}

pub fn load_condition(path: &Path) -> NciResult<ConditionSpec> {
    let text = fs::read_to_string(path).map_err(|e| NciError::io(path, e))?;
    parse_condition(&text)
}

pub fn parse_condition(text: &str) -> NciResult<ConditionSpec> {
    let doc = parse_document(text)?;

    let model = match doc.get("model") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.parse::<ModelKind>()?),
        Some(other) => return Err(config_error!("model must be a string, got {other:?}").into()),
    };
    let basename = match doc.get("basename") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => return Err(config_error!("basename must be a string, got {other:?}").into()),
    };

    let rest: Mapping = doc
        .into_iter()
        .filter(|(key, _)| !matches!(key.as_str(), Some("model") | Some("basename")))
        .collect();

    Ok(ConditionSpec {
        model,
        basename,
        overrides: assignment_from(&rest)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nci_types::{ConfigError, ModelConfig, ParamValue};

    #[test]
    fn parses_model_basename_and_overrides() {
        let spec = parse_condition("model: topo\nbasename: wide\ndim_hidden: [256]\ntrain_config:\n  num_epochs: 50\n")
            .unwrap();
        assert_eq!(spec.model, Some(ModelKind::Topo));
        assert_eq!(spec.basename.as_deref(), Some("wide"));
        assert_eq!(spec.overrides.len(), 2);
        assert_eq!(spec.overrides.get("train_config.num_epochs"), Some(&ParamValue::Int(50)));

        let config = spec.build(None, "main", Path::new("/tmp/w")).unwrap();
        assert_eq!(config.artifact_name(), "inf_topo_wide");
        assert_eq!(config.train_config.num_epochs, 50);
        match &config.model_config {
            ModelConfig::Inference(inf) => assert_eq!(inf.dim_hidden, vec![256]),
            other => panic!("expected classifier config, got {other:?}"),
        }
    }

    #[test]
    fn command_line_basename_wins() {
        let spec = parse_condition("model: encoder\nbasename: from_file\n").unwrap();
        let config = spec.build(Some("cli"), "main", Path::new("/tmp/w")).unwrap();
        assert_eq!(config.basename, "cli");

        let config = ConditionSpec::standard(ModelKind::Sign)
            .build(None, "main", Path::new("/tmp/w"))
            .unwrap();
        assert_eq!(config.artifact_name(), "inf_sign_main");
    }

    #[test]
    fn basename_derived_from_overrides() {
        let spec = parse_condition("model: encoder\ninitial_learning_rate: 0.0031234\nn_layers: 3\n").unwrap();
        assert_eq!(
            spec.derived_basename().as_deref(),
            Some("initial_learning_rate-0.003123_n_layers-3")
        );
        assert!(ConditionSpec::standard(ModelKind::Topo).derived_basename().is_none());
    }

    #[test]
    fn missing_or_unknown_model() {
        let spec = parse_condition("num_epochs: 5\n").unwrap();
        assert!(spec.model.is_none());
        let err = spec.build(None, "main", Path::new("/tmp/w")).unwrap_err();
        assert!(matches!(err, NciError::Config(ConfigError::Other(_))));

        let err = parse_condition("model: resnet\n").unwrap_err();
        assert!(matches!(err, NciError::Config(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn bad_override_fails_to_build() {
        let spec = parse_condition("model: encoder\nnot_a_field: 1\n").unwrap();
        let err = spec.build(None, "main", Path::new("/tmp/w")).unwrap_err();
        assert!(matches!(err, NciError::Config(ConfigError::UnknownParameter { .. })));
    }
}
