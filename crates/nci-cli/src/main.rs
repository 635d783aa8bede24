//! ncinet: train, evaluate and select fingerprint autoencoders and
//! classifiers.

mod commands;

use clap::{Args, Parser, Subcommand, ValueEnum};
use nci_types::ModelKind;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Training and model selection driver for ncinet
#[derive(Parser, Debug)]
#[command(name = "ncinet", version, about, long_about = None)]
struct Cli {
    /// Directory holding data and artifacts
    #[arg(long, env = "NCINET_WORK_DIR", default_value = ".", global = true)]
    work_dir: PathBuf,

    /// Trainer program every train/eval phase is dispatched to
    #[arg(long, env = "NCINET_TRAINER", global = true)]
    trainer: Option<PathBuf>,

    /// Argument passed to the trainer ahead of the phase (repeatable)
    #[arg(long = "trainer-arg", global = true, allow_hyphen_values = true)]
    trainer_args: Vec<String>,

    /// Abort on the first failed search point or fold instead of recording it
    #[arg(long, global = true)]
    abort_on_failure: bool,

    /// Replace artifact directories left by an earlier run
    #[arg(long, global = true)]
    overwrite: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Grid search over every combination in a search-space file
    Grid {
        /// YAML file mapping parameter names to candidate lists
        space: PathBuf,

        /// Where to write the results (YAML, or JSON for .json)
        #[arg(short, long)]
        output: PathBuf,

        /// Points per continuous range
        #[arg(long, default_value_t = 5)]
        float_steps: usize,

        #[command(flatten)]
        condition: ConditionArgs,
    },
    /// Random search: draw N points from a search-space file
    Rand {
        /// YAML file with fixed_params and var_params
        space: PathBuf,

        /// Number of points to draw
        n_iter: usize,

        /// RNG seed; a fresh one is drawn and recorded if omitted
        #[arg(long)]
        seed: Option<u64>,

        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        condition: ConditionArgs,
    },
    /// K-fold cross-validation of one condition
    Xval {
        #[arg(long, default_value_t = 3)]
        folds: usize,

        /// Shuffle dataset indices with this seed before splitting
        #[arg(long)]
        shuffle_seed: Option<u64>,

        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        condition: ConditionArgs,
    },
    /// Train one network
    Train {
        #[command(flatten)]
        condition: ConditionArgs,
    },
    /// Evaluate a trained network
    Eval {
        /// Write the evaluation outcome here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        condition: ConditionArgs,
    },
    /// Export a trained network for prediction
    Serialize {
        /// Export directory, relative to --work-dir [default: <artifact>_serialized]
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        condition: ConditionArgs,
    },
    /// Run a trained network over new fingerprints
    Predict {
        /// Checkpoint or export directory of the trained network
        model_dir: PathBuf,

        /// YAML ingest configuration describing the data
        data_conf: PathBuf,

        /// Predictions file
        #[arg(short, long)]
        output: PathBuf,
    },
}

/// Which configuration to start from.
#[derive(Args, Debug, Clone)]
struct ConditionArgs {
    /// Built-in model defaults, or `conf` to read them from --conf
    #[arg(long, value_enum, default_value_t = ModelArg::Encoder)]
    model: ModelArg,

    /// Condition file: model, basename and configuration overrides
    #[arg(long)]
    conf: Option<PathBuf>,

    /// Name the artifacts are stored under
    #[arg(long)]
    basename: Option<String>,

    /// Trained autoencoder a classifier starts from
    #[arg(long)]
    encoder_dir: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum ModelArg {
    Encoder,
    Topo,
    Sign,
    Conf,
}

impl ModelArg {
    fn kind(self) -> Option<ModelKind> {
        match self {
            Self::Encoder => Some(ModelKind::Encoder),
            Self::Topo => Some(ModelKind::Topo),
            Self::Sign => Some(ModelKind::Sign),
            Self::Conf => None,
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ncinet={level},nci_select={level},nci_types={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    commands::run(cli)
}
