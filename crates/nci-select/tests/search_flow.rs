use nci_select::{
    grid_search, load_grid_spec, load_random_spec, random_search, read_output, write_output, xval_condition,
    CrossValResult, EvalOutcome, RunContext, SearchOptions, SearchReport, SessionRunner, TrialStatus, XvalOptions,
};
use nci_types::{ModelKind, ParamValue, SessionConfig, TrainingError};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Scores a classifier by hidden width and learning rate without training.
struct ScoringRunner {
    runs: usize,
}

impl SessionRunner for ScoringRunner {
    type Artifact = String;

    fn train(&mut self, config: &SessionConfig, ctx: &mut RunContext) -> Result<String, TrainingError> {
        self.runs += 1;
        ctx.add_loss("cross_entropy", config.train_config.initial_learning_rate * 10.0);
        Ok(config.artifact_name())
    }

    fn evaluate(&mut self, _: &String, config: &SessionConfig, _: &mut RunContext) -> Result<EvalOutcome, TrainingError> {
        let nci_types::ModelConfig::Inference(inf) = &config.model_config else {
            return Err(TrainingError::RunnerFault {
                message: "expected a classifier".into(),
            });
        };
        let width = inf.dim_hidden[0] as f64;
        let score = width / 256.0 - config.train_config.initial_learning_rate;
        Ok(EvalOutcome::new(score).with_metric("precision_at_1", score))
    }
}

fn write(dir: &Path, name: &str, text: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, text).unwrap();
    path
}

#[test]
fn grid_file_to_result_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let grid_path = write(
        dir.path(),
        "grid.yml",
        "base:\n  num_epochs: 2\ngrid:\n  dim_hidden: [64, 128, 256]\n  initial_learning_rate: [0.01, 0.001]\n",
    );

    let spec = load_grid_spec(&grid_path).unwrap();
    let base = SessionConfig::standard(ModelKind::Topo, "sweep", dir.path());
    let mut runner = ScoringRunner { runs: 0 };
    let report = grid_search(&mut runner, &base, &spec.base, &spec.space, &SearchOptions::default()).unwrap();
    assert_eq!(runner.runs, 6);

    let out = dir.path().join("grid_results.yml");
    write_output(&out, &report).unwrap();
    let back: SearchReport = read_output(&out).unwrap();

    assert_eq!(back.records.len(), 6);
    for (read, written) in back.records.iter().zip(&report.records) {
        assert_eq!(read.parameters, written.parameters);
        assert_eq!(read.status, TrialStatus::Completed);
        let (a, b) = (read.objective.unwrap(), written.objective.unwrap());
        assert!((a - b).abs() < 1e-12);
    }
    assert_eq!(back.fixed_params.get("num_epochs"), Some(&ParamValue::Int(2)));

    // widest layer with the smaller learning rate wins
    let best = back.best().unwrap();
    assert_eq!(best.parameters.get("dim_hidden"), Some(&ParamValue::Int(256)));
    assert_eq!(best.parameters.get("initial_learning_rate"), Some(&ParamValue::Float(0.001)));
}

#[test]
fn random_file_is_reproducible_with_a_seed() {
    let dir = TempDir::new().unwrap();
    let space_path = write(
        dir.path(),
        "rand.yml",
        "fixed_params:\n  dim_hidden: [128]\nvar_params:\n  initial_learning_rate: {dist: log_uniform, low: 0.0001, high: 0.1}\n",
    );
    let spec = load_random_spec(&space_path).unwrap();
    let base = SessionConfig::standard(ModelKind::Sign, "rand", dir.path());

    let run = |seed| {
        let mut runner = ScoringRunner { runs: 0 };
        random_search(
            &mut runner,
            &base,
            &spec.fixed_params,
            &spec.var_params,
            5,
            Some(seed),
            &SearchOptions::default(),
        )
        .unwrap()
    };

    let first = run(42);
    let second = run(42);
    assert_eq!(first.records.len(), 5);
    for (a, b) in first.records.iter().zip(&second.records) {
        assert_eq!(a.parameters, b.parameters);
        let lr = a.parameters.get("initial_learning_rate").and_then(ParamValue::as_f64).unwrap();
        assert!((1e-4..=1e-1).contains(&lr));
    }

    let out = dir.path().join("rand_results.json");
    write_output(&out, &first).unwrap();
    let back: SearchReport = read_output(&out).unwrap();
    assert_eq!(back.seed, Some(42));
    assert_eq!(back.records.len(), 5);
}

#[test]
fn cross_validation_result_file() {
    let dir = TempDir::new().unwrap();
    let mut config = SessionConfig::standard(ModelKind::Topo, "main", dir.path());
    config.data_config.n_examples = 10;

    let mut runner = ScoringRunner { runs: 0 };
    let (artifact, result) = xval_condition(&mut runner, &config, 3, &XvalOptions::default()).unwrap();
    assert_eq!(runner.runs, 3);
    assert_eq!(artifact, "inf_topo_main_fold0");

    let sizes: Vec<usize> = result.folds.iter().map(|f| f.held_out_size).collect();
    assert_eq!(sizes, vec![4, 3, 3]);
    assert_eq!(result.n_completed, 3);
    assert!(result.std_dev.abs() < 1e-12);

    let out = dir.path().join("xval.yml");
    write_output(&out, &result).unwrap();
    let back: CrossValResult = read_output(&out).unwrap();
    assert_eq!(back.n_folds, 3);
    assert_eq!(back.objectives().len(), 3);
    assert!((back.mean - result.mean).abs() < 1e-12);
}
