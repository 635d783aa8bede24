//! Persisting search and cross-validation results.
//!
//! Results are written as YAML unless the output path ends in `.json`.
//! Writes go to a hidden sibling file that is renamed into place, so an
//! interrupted run never leaves a truncated result behind.

use nci_types::{NciError, NciResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Yaml,
    Json,
}

impl OutputFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Yaml,
        }
    }
}

pub fn to_string<T: Serialize>(value: &T, format: OutputFormat) -> NciResult<String> {
    Ok(match format {
        OutputFormat::Yaml => serde_yaml::to_string(value)?,
        OutputFormat::Json => serde_json::to_string_pretty(value)?,
    })
}

pub fn from_str<T: DeserializeOwned>(text: &str, format: OutputFormat) -> NciResult<T> {
    Ok(match format {
        OutputFormat::Yaml => serde_yaml::from_str(text)?,
        OutputFormat::Json => serde_json::from_str(text)?,
    })
}

fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    path.with_file_name(format!(".{name}.partial"))
}

/// Serialize `value` and atomically replace `path` with it.
pub fn write_output<T: Serialize>(path: &Path, value: &T) -> NciResult<()> {
    let text = to_string(value, OutputFormat::from_path(path))?;
    let staging = staging_path(path);

    fs::write(&staging, text).map_err(|e| NciError::io(path, e))?;
    if let Err(e) = fs::rename(&staging, path) {
        let _ = fs::remove_file(&staging);
        return Err(NciError::io(path, e));
    }

    info!("results written to {}", path.display());
    Ok(())
}

pub fn read_output<T: DeserializeOwned>(path: &Path) -> NciResult<T> {
    let text = fs::read_to_string(path).map_err(|e| NciError::io(path, e))?;
    from_str(&text, OutputFormat::from_path(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{EvalOutcome, RunContext};
    use crate::trial::{FailurePolicy, SearchKind, SearchRecord, SearchReport};
    use crate::xval::{CrossValResult, FoldOutcome};
    use chrono::Utc;
    use nci_types::{Assignment, ModelKind, ObjectiveDirection, TrainingError};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn sample_report() -> SearchReport {
        let mut report = SearchReport::new(SearchKind::Random, ModelKind::Sign, FailurePolicy::Record).with_seed(42);
        report.fixed_params = Assignment::new().with("num_epochs", 10i64);

        let mut ok = SearchRecord::new(
            0,
            Assignment::new().with("initial_learning_rate", 0.0031).with("n_hidden", 2i64),
            "inf_sign_main_000".into(),
        );
        let mut ctx = RunContext::new();
        ctx.add_loss("cross_entropy", 0.42);
        ok.mark_completed(EvalOutcome::new(0.875).with_metric("precision_at_1", 0.875), &ctx);
        report.push(ok);

        let mut bad = SearchRecord::new(
            1,
            Assignment::new().with("initial_learning_rate", 0.09).with("n_hidden", 1i64),
            "inf_sign_main_001".into(),
        );
        bad.mark_failed(
            &TrainingError::RunnerFault {
                message: "trainer exited with status 1".into(),
            },
            &RunContext::new(),
        );
        report.push(bad);
        report.mark_finished();
        report
    }

    #[test]
    fn yaml_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rand.yml");
        let report = sample_report();

        write_output(&path, &report).unwrap();
        let back: SearchReport = read_output(&path).unwrap();
        assert_eq!(back, report);
        assert_eq!(back.best().unwrap().index, 0);
        assert!(!staging_path(&path).exists());
    }

    #[test]
    fn json_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rand.json");
        let report = sample_report();

        write_output(&path, &report).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.trim_start().starts_with('{'));

        let back: SearchReport = read_output(&path).unwrap();
        assert_eq!(back.records.len(), 2);
        assert_eq!(back.records[0].parameters, report.records[0].parameters);
        assert_eq!(back.records[1].error, report.records[1].error);
    }

    #[test]
    fn diverged_losses_reload_from_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("grid.json");

        let mut report = SearchReport::new(SearchKind::Grid, ModelKind::Encoder, FailurePolicy::Record);
        let parameters = Assignment::new().with("initial_learning_rate", 0.5);
        let mut record = SearchRecord::new(0, parameters, "encoder_main_000".into());
        let mut ctx = RunContext::new();
        ctx.add_loss("cross_entropy", f64::NAN);
        ctx.add_loss("weight_decay", f64::INFINITY);
        record.mark_failed(
            &TrainingError::NonConvergence {
                message: "loss is NaN".into(),
            },
            &ctx,
        );
        report.push(record);

        write_output(&path, &report).unwrap();
        let back: SearchReport = read_output(&path).unwrap();
        let losses = &back.records[0].losses;
        assert!(losses["cross_entropy"].is_nan());
        assert!(losses["total_loss"].is_nan());
        assert_eq!(losses["weight_decay"], f64::INFINITY);
    }

    #[test]
    fn yaml_is_human_readable() {
        let text = to_string(&sample_report(), OutputFormat::Yaml).unwrap();
        assert!(text.contains("kind: random"));
        assert!(text.contains("initial_learning_rate: 0.0031"));
        assert!(text.contains("status: failed"));
    }

    #[test]
    fn cross_val_round_trip() {
        let result = CrossValResult {
            condition: "encoder_main".into(),
            model: ModelKind::Encoder,
            direction: ObjectiveDirection::Minimize,
            n_folds: 2,
            n_completed: 2,
            folds: (0..2)
                .map(|i| FoldOutcome {
                    index: i,
                    held_out_size: 5,
                    artifact: format!("encoder_main_fold{i}"),
                    status: crate::trial::TrialStatus::Completed,
                    objective: Some(0.01 * (i + 1) as f64),
                    metrics: BTreeMap::new(),
                    losses: BTreeMap::new(),
                    error: None,
                })
                .collect(),
            mean: 0.015,
            std_dev: 0.005,
            best_fold: 0,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };

        let text = to_string(&result, OutputFormat::Yaml).unwrap();
        let back: CrossValResult = from_str(&text, OutputFormat::Yaml).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn unwritable_path_is_reported() {
        let path = Path::new("/nonexistent/dir/out.yml");
        let err = write_output(path, &sample_report()).unwrap_err();
        assert!(matches!(err, NciError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/dir/out.yml"));
    }

    #[test]
    fn missing_file_is_reported() {
        let err = read_output::<SearchReport>(Path::new("/nonexistent/out.yml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/out.yml"));
    }
}
