//! Training task descriptors and the external-process session runner.
//!
//! [`CommandRunner`] hands each phase of a run to a trainer program. For
//! every call it writes a [`TrainingTask`] as JSON into the artifact
//! directory and runs
//!
//! ```text
//! <program> <args...> <phase> <task.json>
//! ```
//!
//! The program reports back on stdout with a JSON [`PhaseReport`]. Either
//! the whole of stdout is that document or its last non-empty line is, so
//! the trainer is free to log above it. A non-zero exit status is a
//! training failure.
//!
//! Exporting a trained network (`serialize`) and running one over new data
//! (`predict`) go through the same protocol with their own phase names.

use nci_types::{
    config_error, CrossEntropy, FoldSpec, InferenceType, ModelKind, NciError, NciResult, SessionConfig, TrainingError,
    FINGERPRINT_DIM,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};
use uuid::Uuid;

use crate::session::{EvalOutcome, RunContext, SessionRunner};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Train,
    Eval,
    Serialize,
    Predict,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Eval => "eval",
            Self::Serialize => "serialize",
            Self::Predict => "predict",
        }
    }
}

/// What a classifier trainer needs to know about its labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceMeta {
    pub inference_type: InferenceType,
    pub n_classes: usize,
    pub cross_entropy: CrossEntropy,
}

/// Describes one phase of one run, as dispatched to the trainer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingTask {
    /// Unique per dispatched phase.
    pub task_id: Uuid,

    /// Run context this phase belongs to; train and eval of one run share it.
    pub run_id: Uuid,

    pub phase: Phase,

    pub model: ModelKind,

    /// Dataset columns the trainer has to load.
    pub data_types: Vec<String>,

    /// Side of the square fingerprint input.
    pub fingerprint_dim: usize,

    /// Absent for the autoencoder.
    pub inference: Option<InferenceMeta>,

    /// Fully resolved configuration.
    pub config: SessionConfig,

    /// Cross-validation split, if this run is one fold of a condition.
    pub fold: Option<FoldSpec>,

    /// Export directory of a serialize phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
}

impl TrainingTask {
    pub fn new(phase: Phase, config: &SessionConfig, ctx: &RunContext) -> Self {
        let model = config.model;
        Self {
            task_id: Uuid::new_v4(),
            run_id: ctx.run_id,
            phase,
            model,
            data_types: model.data_types().iter().map(|s| s.to_string()).collect(),
            fingerprint_dim: FINGERPRINT_DIM,
            inference: model.inference_type().map(|inference_type| InferenceMeta {
                inference_type,
                n_classes: inference_type.n_classes(),
                cross_entropy: model.cross_entropy(),
            }),
            config: config.clone(),
            fold: config.data_config.fold.clone(),
            output: None,
        }
    }

    /// Where the descriptor is written: the train or eval directory, or
    /// the export directory when there is one.
    pub fn dir(&self) -> &Path {
        match (self.phase, &self.output) {
            (Phase::Train, _) => &self.config.train_config.train_dir,
            (_, Some(output)) => output,
            _ => &self.config.eval_config.eval_dir,
        }
    }
}

/// Describes a prediction run of a trained network over new fingerprints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictTask {
    pub task_id: Uuid,
    pub phase: Phase,
    /// Checkpoint or export directory of the trained network.
    pub model_dir: PathBuf,
    pub fingerprint_dim: usize,
    /// Ingest configuration, passed through as written.
    pub ingest: serde_json::Value,
    /// File the predictions are written to.
    pub output: PathBuf,
}

impl PredictTask {
    pub fn new(model_dir: impl Into<PathBuf>, ingest: serde_json::Value, output: impl Into<PathBuf>) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            phase: Phase::Predict,
            model_dir: model_dir.into(),
            fingerprint_dim: FINGERPRINT_DIM,
            ingest,
            output: output.into(),
        }
    }

    /// The predictions file's directory.
    pub fn dir(&self) -> &Path {
        self.output.parent().unwrap_or_else(|| Path::new(""))
    }
}

/// Read an ingest configuration: a YAML mapping describing where the
/// fingerprints to predict on live.
pub fn load_ingest_config(path: &Path) -> NciResult<serde_json::Value> {
    let text = fs::read_to_string(path).map_err(|e| NciError::io(path, e))?;
    let value: serde_json::Value = serde_yaml::from_str(&text)?;
    if !value.is_object() {
        return Err(config_error!("ingest configuration {} is not a mapping", path.display()).into());
    }
    Ok(value)
}

/// JSON document the trainer prints when a phase finishes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseReport {
    /// Required from the eval phase.
    #[serde(default)]
    pub objective: Option<f64>,
    #[serde(default, with = "crate::scores")]
    pub metrics: BTreeMap<String, f64>,
    /// Final values of the loss terms. Train-phase losses go to the run
    /// context; eval-phase losses become `eval/<name>` metrics.
    #[serde(default, with = "crate::scores")]
    pub losses: BTreeMap<String, f64>,
}

/// Runs each phase as a child process of `program`.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRunner {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandRunner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Export the trained network of `config` into `output`.
    pub fn serialize(&self, config: &SessionConfig, output: &Path) -> Result<PathBuf, TrainingError> {
        let mut task = TrainingTask::new(Phase::Serialize, config, &RunContext::new());
        task.output = Some(output.to_path_buf());
        info!("serializing {} into {}", config.artifact_name(), output.display());
        self.dispatch(task.phase, task.dir(), &config.artifact_name(), &task)?;
        Ok(output.to_path_buf())
    }

    /// Run a trained network over the data described by `task`.
    pub fn predict(&self, task: &PredictTask) -> Result<PhaseReport, TrainingError> {
        let label = task.model_dir.display().to_string();
        info!("predicting with {} into {}", label, task.output.display());
        self.dispatch(task.phase, task.dir(), &label, task)
    }

    /// Write the descriptor, run the trainer and parse what it reports.
    fn dispatch<T: Serialize>(
        &self,
        phase: Phase,
        dir: &Path,
        label: &str,
        task: &T,
    ) -> Result<PhaseReport, TrainingError> {
        fs::create_dir_all(dir).map_err(|e| TrainingError::RunnerFault {
            message: format!("cannot create {}: {e}", dir.display()),
        })?;

        let task_path = dir.join(format!("task_{}.json", phase.as_str()));
        let descriptor = serde_json::to_string_pretty(task).map_err(|e| TrainingError::RunnerFault {
            message: format!("cannot serialize task: {e}"),
        })?;
        fs::write(&task_path, descriptor).map_err(|e| TrainingError::RunnerFault {
            message: format!("cannot write {}: {e}", task_path.display()),
        })?;

        debug!("dispatching {} of {} to {}", phase.as_str(), label, self.program.display());
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(phase.as_str())
            .arg(&task_path)
            .output()
            .map_err(|e| TrainingError::RunnerFault {
                message: format!("cannot start {}: {e}", self.program.display()),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            let tail: Vec<&str> = tail.into_iter().rev().collect();
            return Err(TrainingError::RunnerFault {
                message: format!(
                    "{} {} exited with {}: {}",
                    self.program.display(),
                    phase.as_str(),
                    output.status,
                    tail.join(" | ")
                ),
            });
        }

        parse_report(&String::from_utf8_lossy(&output.stdout))
    }
}

fn parse_report(stdout: &str) -> Result<PhaseReport, TrainingError> {
    let text = stdout.trim();
    if text.is_empty() {
        return Ok(PhaseReport::default());
    }
    if let Ok(report) = serde_json::from_str(text) {
        return Ok(report);
    }

    let last = text.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or_default();
    serde_json::from_str(last.trim()).map_err(|e| TrainingError::BadOutput {
        message: format!("{e} in {last:?}"),
    })
}

impl SessionRunner for CommandRunner {
    /// The train directory holding the checkpoints.
    type Artifact = PathBuf;

    fn train(&mut self, config: &SessionConfig, ctx: &mut RunContext) -> Result<PathBuf, TrainingError> {
        let task = TrainingTask::new(Phase::Train, config, ctx);
        info!("training {} (task {})", config.artifact_name(), task.task_id);
        let report = self.dispatch(task.phase, task.dir(), &config.artifact_name(), &task)?;
        for (name, value) in report.losses {
            ctx.add_loss(name, value);
        }
        Ok(config.train_config.train_dir.clone())
    }

    fn evaluate(
        &mut self,
        artifact: &PathBuf,
        config: &SessionConfig,
        ctx: &mut RunContext,
    ) -> Result<EvalOutcome, TrainingError> {
        let mut task = TrainingTask::new(Phase::Eval, config, ctx);
        task.config.train_config.train_dir = artifact.clone();

        let report = self.dispatch(task.phase, task.dir(), &config.artifact_name(), &task)?;
        let objective = report.objective.ok_or_else(|| TrainingError::BadOutput {
            message: "eval phase reported no objective".into(),
        })?;
        let mut metrics = report.metrics;
        metrics.extend(report.losses.into_iter().map(|(name, value)| (format!("eval/{name}"), value)));
        Ok(EvalOutcome { objective, metrics })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::run_session;
    use tempfile::TempDir;

    /// A trainer written as a shell script; `$1` is the phase, `$2` the task.
    fn script_runner(script: &str) -> CommandRunner {
        CommandRunner::new("sh").arg("-c").arg(script).arg("trainer")
    }

    const WELL_BEHAVED: &str = r#"
        test -f "$2" || exit 9
        if [ "$1" = train ]; then
            echo "epoch 1 done"
            echo '{"losses": {"cross_entropy": 0.5, "weight_decay": 0.25}}'
        else
            echo '{"objective": 0.8, "metrics": {"precision_at_1": 0.8}, "losses": {"cross_entropy": 0.5}}'
        fi
    "#;

    #[test]
    fn task_descriptor_for_classifier() {
        let config = SessionConfig::standard(ModelKind::Topo, "main", Path::new("/tmp/w"));
        let task = TrainingTask::new(Phase::Train, &config, &RunContext::new());

        let meta = task.inference.unwrap();
        assert_eq!(meta.n_classes, 4);
        assert_eq!(meta.cross_entropy, CrossEntropy::Softmax);
        assert_eq!(task.data_types, vec!["fingerprints", "topologies"]);
        assert_eq!(task.fingerprint_dim, 100);
        assert_eq!(task.dir(), config.train_config.train_dir.as_path());

        let json = serde_json::to_string(&task).unwrap();
        let back: TrainingTask = serde_json::from_str(&json).unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn encoder_task_has_no_inference_meta() {
        let config = SessionConfig::standard(ModelKind::Encoder, "main", Path::new("/tmp/w"));
        let task = TrainingTask::new(Phase::Eval, &config, &RunContext::new());
        assert!(task.inference.is_none());
        assert_eq!(task.dir(), config.eval_config.eval_dir.as_path());
    }

    #[test]
    fn parse_report_takes_last_line() {
        let report = parse_report("step 100 loss 0.3\n{\"objective\": 0.25}\n").unwrap();
        assert_eq!(report.objective, Some(0.25));
        assert!(parse_report("").unwrap().objective.is_none());
        assert!(matches!(parse_report("done"), Err(TrainingError::BadOutput { .. })));
    }

    #[test]
    fn runs_both_phases_through_the_program() {
        let dir = TempDir::new().unwrap();
        let config = SessionConfig::standard(ModelKind::Sign, "main", dir.path());
        let mut runner = script_runner(WELL_BEHAVED);

        let (result, ctx) = run_session(&mut runner, &config);
        let output = result.unwrap();
        assert_eq!(output.artifact, config.train_config.train_dir);
        assert_eq!(output.outcome.objective, 0.8);
        assert_eq!(output.outcome.metrics["precision_at_1"], 0.8);
        assert_eq!(ctx.summary()["total_loss"], 0.75);
        assert_eq!(ctx.losses().len(), 2);
        assert_eq!(output.outcome.metrics["eval/cross_entropy"], 0.5);

        let written = fs::read_to_string(config.train_config.train_dir.join("task_train.json")).unwrap();
        let task: TrainingTask = serde_json::from_str(&written).unwrap();
        assert_eq!(task.run_id, ctx.run_id);
        assert!(config.eval_config.eval_dir.join("task_eval.json").exists());
    }

    #[test]
    fn non_zero_exit_is_a_runner_fault() {
        let dir = TempDir::new().unwrap();
        let config = SessionConfig::standard(ModelKind::Encoder, "main", dir.path());
        let mut runner = script_runner("echo 'out of memory' >&2; exit 3");

        let (result, _) = run_session(&mut runner, &config);
        match result {
            Err(TrainingError::RunnerFault { message }) => assert!(message.contains("out of memory")),
            other => panic!("expected runner fault, got {other:?}"),
        }
    }

    #[test]
    fn eval_without_objective_is_bad_output() {
        let dir = TempDir::new().unwrap();
        let config = SessionConfig::standard(ModelKind::Encoder, "main", dir.path());
        let mut runner = script_runner("echo '{}'");

        let (result, _) = run_session(&mut runner, &config);
        assert!(matches!(result, Err(TrainingError::BadOutput { .. })));
    }

    #[test]
    fn serialize_writes_into_the_export_dir() {
        let dir = TempDir::new().unwrap();
        let config = SessionConfig::standard(ModelKind::Topo, "main", dir.path());
        let output = config.serialized_dir();
        let runner = script_runner(r#"test "$1" = serialize || exit 4; echo '{}'"#);

        let exported = runner.serialize(&config, &output).unwrap();
        assert_eq!(exported, output);

        let written = fs::read_to_string(output.join("task_serialize.json")).unwrap();
        let task: TrainingTask = serde_json::from_str(&written).unwrap();
        assert_eq!(task.phase, Phase::Serialize);
        assert_eq!(task.output.as_deref(), Some(output.as_path()));
        assert_eq!(task.config.train_config.train_dir, config.train_config.train_dir);
    }

    #[test]
    fn predict_passes_the_ingest_config_through() {
        let dir = TempDir::new().unwrap();
        let ingest_path = dir.path().join("ingest.yml");
        fs::write(&ingest_path, "data_dir: /data/new\nbatch_size: 64\n").unwrap();
        let ingest = load_ingest_config(&ingest_path).unwrap();

        let output = dir.path().join("out").join("predictions.npz");
        let task = PredictTask::new(dir.path().join("inf_topo_main_serialized"), ingest, &output);
        let runner = script_runner(
            r#"test "$1" = predict || exit 4; echo '{"metrics": {"n_predicted": 12}}'"#,
        );

        let report = runner.predict(&task).unwrap();
        assert_eq!(report.metrics["n_predicted"], 12.0);

        let written = fs::read_to_string(dir.path().join("out").join("task_predict.json")).unwrap();
        let back: PredictTask = serde_json::from_str(&written).unwrap();
        assert_eq!(back, task);
        assert_eq!(back.ingest["batch_size"], 64);
    }

    #[test]
    fn ingest_config_must_be_a_mapping() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ingest.yml");
        fs::write(&path, "- a\n- b\n").unwrap();
        assert!(matches!(load_ingest_config(&path), Err(NciError::Config(_))));
        assert!(matches!(
            load_ingest_config(&dir.path().join("missing.yml")),
            Err(NciError::Io { .. })
        ));
    }

    #[test]
    fn missing_program_is_a_runner_fault() {
        let dir = TempDir::new().unwrap();
        let config = SessionConfig::standard(ModelKind::Encoder, "main", dir.path());
        let mut runner = CommandRunner::new("/nonexistent/ncinet-trainer");

        let (result, _) = run_session(&mut runner, &config);
        assert!(matches!(result, Err(TrainingError::RunnerFault { .. })));
    }
}
