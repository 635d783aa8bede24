//! # nci-select
//!
//! Model selection for ncinet: grid and random hyperparameter search,
//! k-fold cross-validation of a condition, and persistence of the results.
//!
//! Training and evaluation happen behind the [`SessionRunner`] trait;
//! [`CommandRunner`] dispatches them to an external trainer program.

mod condition;
mod orchestrator;
mod report;
mod scores;
mod search;
mod session;
mod space_file;
mod task;
mod trial;
mod xval;

pub use condition::{load_condition, parse_condition, ConditionSpec};
pub use orchestrator::{
    ensure_absent, grid_search, prepare_points, random_search, run_points, SearchOptions, SearchPoint,
};
pub use report::{read_output, write_output, OutputFormat};
pub use search::{GridSearch, ParameterDef, ParameterKind, RandomSearch, SearchSpace, SearchStrategy};
pub use session::{run_session, EvalOutcome, RunContext, SessionOutput, SessionRunner, TOTAL_LOSS};
pub use space_file::{load_grid_spec, load_random_spec, parse_grid_spec, parse_random_spec, GridSpec, RandomSpec};
pub use task::{load_ingest_config, CommandRunner, InferenceMeta, Phase, PhaseReport, PredictTask, TrainingTask};
pub use trial::{FailurePolicy, SearchId, SearchKind, SearchRecord, SearchReport, TrialStatus};
pub use xval::{fold_configs, xval_condition, CrossValResult, Fold, FoldOutcome, KFold, XvalOptions};
