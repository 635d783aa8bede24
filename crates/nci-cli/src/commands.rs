//! Subcommand handlers.

use anyhow::{bail, Context};
use nci_select::{
    ensure_absent, grid_search, load_condition, load_grid_spec, load_ingest_config, load_random_spec, random_search,
    write_output, xval_condition, CommandRunner, ConditionSpec, FailurePolicy, PredictTask, RunContext, SearchOptions,
    SessionRunner, XvalOptions,
};
use nci_types::SessionConfig;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::{Cli, Command, ConditionArgs, ModelArg};

/// Basename used when neither the command line nor a condition file names one.
const DEFAULT_BASENAME: &str = "main";

pub fn run(cli: Cli) -> anyhow::Result<()> {
    let policy = if cli.abort_on_failure {
        FailurePolicy::Abort
    } else {
        FailurePolicy::Record
    };
    let work_dir = cli.work_dir.as_path();

    match &cli.command {
        Command::Grid {
            space,
            output,
            float_steps,
            condition,
        } => {
            let config = build_condition(condition, work_dir)?;
            let spec = load_grid_spec(space)?;
            let options = SearchOptions {
                failure_policy: policy,
                overwrite: cli.overwrite,
                float_steps: *float_steps,
            };

            let mut runner = runner(&cli)?;
            let report = grid_search(&mut runner, &config, &spec.base, &spec.space, &options)?;
            write_output(output, &report)?;
        }
        Command::Rand {
            space,
            n_iter,
            seed,
            output,
            condition,
        } => {
            let config = build_condition(condition, work_dir)?;
            let spec = load_random_spec(space)?;
            let options = SearchOptions {
                failure_policy: policy,
                overwrite: cli.overwrite,
                ..Default::default()
            };

            let mut runner = runner(&cli)?;
            let report = random_search(
                &mut runner,
                &config,
                &spec.fixed_params,
                &spec.var_params,
                *n_iter,
                *seed,
                &options,
            )?;
            write_output(output, &report)?;
        }
        Command::Xval {
            folds,
            shuffle_seed,
            output,
            condition,
        } => {
            let config = build_condition(condition, work_dir)?;
            let options = XvalOptions {
                failure_policy: policy,
                overwrite: cli.overwrite,
                shuffle_seed: *shuffle_seed,
            };

            let mut runner = runner(&cli)?;
            let (best, result) = xval_condition(&mut runner, &config, *folds, &options)?;
            info!("best fold checkpoints in {}", best.display());
            if result.is_partial() {
                warn!(
                    "{} of {} folds failed; the aggregate covers the rest",
                    result.n_folds - result.n_completed,
                    result.n_folds
                );
            }
            write_output(output, &result)?;
        }
        Command::Train { condition } => {
            let config = build_condition(condition, work_dir)?;
            ensure_absent([config.train_config.train_dir.as_path()], cli.overwrite)?;
            let mut runner = runner(&cli)?;
            let mut ctx = RunContext::new();

            let artifact = runner.train(&config, &mut ctx)?;
            for (name, value) in ctx.summary() {
                info!("{name}: {value}");
            }
            info!("trained {} into {}", config.artifact_name(), artifact.display());
        }
        Command::Eval { output, condition } => {
            let config = build_condition(condition, work_dir)?;
            let checkpoints = require_trained(&config)?;
            ensure_absent([config.eval_config.eval_dir.as_path()], cli.overwrite)?;
            let mut runner = runner(&cli)?;
            let mut ctx = RunContext::new();

            let outcome = runner.evaluate(&checkpoints, &config, &mut ctx)?;
            match output {
                Some(path) => write_output(path, &outcome)?,
                None => print!("{}", serde_yaml::to_string(&outcome)?),
            }
        }
        Command::Serialize { output, condition } => {
            let config = build_condition(condition, work_dir)?;
            require_trained(&config)?;
            let target = match output {
                Some(path) => work_dir.join(path),
                None => config.serialized_dir(),
            };
            ensure_absent([target.as_path()], cli.overwrite)?;

            let exported = runner(&cli)?.serialize(&config, &target)?;
            info!("serialized {} into {}", config.artifact_name(), exported.display());
        }
        Command::Predict {
            model_dir,
            data_conf,
            output,
        } => {
            if !model_dir.exists() {
                bail!("no trained network at {}", model_dir.display());
            }
            let ingest = load_ingest_config(data_conf)
                .with_context(|| format!("loading ingest configuration {}", data_conf.display()))?;
            ensure_absent([output.as_path()], cli.overwrite)?;

            let task = PredictTask::new(model_dir.as_path(), ingest, output.as_path());
            let report = runner(&cli)?.predict(&task)?;
            for (name, value) in &report.metrics {
                info!("{name}: {value}");
            }
            info!("predictions written to {}", output.display());
        }
    }

    Ok(())
}

fn runner(cli: &Cli) -> anyhow::Result<CommandRunner> {
    let program = cli
        .trainer
        .clone()
        .context("no trainer program: pass --trainer or set NCINET_TRAINER")?;
    Ok(CommandRunner {
        program,
        args: cli.trainer_args.clone(),
    })
}

/// Checkpoint directory of `config`, which must already exist.
fn require_trained(config: &SessionConfig) -> anyhow::Result<PathBuf> {
    let checkpoints = config.train_config.train_dir.clone();
    if !checkpoints.exists() {
        bail!("{} has not been trained: {} is missing", config.artifact_name(), checkpoints.display());
    }
    Ok(checkpoints)
}

/// Resolve the starting configuration from built-in defaults or a
/// condition file.
fn build_condition(args: &ConditionArgs, work_dir: &Path) -> anyhow::Result<SessionConfig> {
    let spec = match (&args.conf, args.model) {
        (Some(path), model) => {
            let mut spec =
                load_condition(path).with_context(|| format!("loading condition file {}", path.display()))?;
            if spec.model.is_none() {
                spec.model = model.kind();
            }
            spec
        }
        (None, ModelArg::Conf) => bail!("--model conf needs --conf <FILE>"),
        (None, model) => ConditionSpec {
            model: model.kind(),
            ..Default::default()
        },
    };

    // A conf condition without a basename is named after its overrides
    let fallback = match args.model {
        ModelArg::Conf => spec.derived_basename(),
        _ => None,
    }
    .unwrap_or_else(|| DEFAULT_BASENAME.to_string());

    let mut config = spec.build(args.basename.as_deref(), &fallback, work_dir)?;
    if let Some(dir) = &args.encoder_dir {
        if config.model.is_autoencoder() {
            warn!("--encoder-dir ignored for the autoencoder");
        } else {
            config.train_config.encoder_dir = Some(dir.clone());
        }
    }
    Ok(config)
}
