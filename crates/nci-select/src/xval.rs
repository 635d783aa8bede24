//! K-fold cross-validation of a single condition.

use chrono::{DateTime, Utc};
use nci_types::{
    internal_error, ConfigError, FoldSpec, ModelKind, NciResult, ObjectiveDirection, SessionConfig, TrainingError,
};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{error, info, warn};

use crate::orchestrator::ensure_absent;
use crate::session::{run_session, SessionRunner};
use crate::trial::{FailurePolicy, TrialStatus};

/// One train/held-out split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub index: usize,
    pub train: Vec<usize>,
    pub held_out: Vec<usize>,
}

/// K-fold splitter over dataset indices `0..n`.
///
/// Held-out partitions are contiguous blocks; the first `n % k` folds hold
/// one extra item. The split depends only on `n`, `k` and the optional
/// shuffle seed, so repeated calls always agree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KFold {
    n_splits: usize,
    shuffle_seed: Option<u64>,
}

impl KFold {
    pub fn new(n_splits: usize) -> Self {
        Self {
            n_splits,
            shuffle_seed: None,
        }
    }

    /// Permute indices with a seeded RNG before blocking them into folds.
    pub fn with_shuffle(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self
    }

    pub fn n_splits(&self) -> usize {
        self.n_splits
    }

    pub fn split(&self, n_samples: usize) -> Result<Vec<Fold>, ConfigError> {
        if self.n_splits < 2 || self.n_splits > n_samples {
            return Err(ConfigError::InvalidValue {
                name: "n_folds".into(),
                value: self.n_splits.to_string(),
                message: format!("need 2 <= k <= {n_samples} (dataset size)"),
            });
        }

        let mut indices: Vec<usize> = (0..n_samples).collect();
        if let Some(seed) = self.shuffle_seed {
            indices.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));
        }

        let fold_size = n_samples / self.n_splits;
        let remainder = n_samples % self.n_splits;

        let mut folds = Vec::with_capacity(self.n_splits);
        let mut start = 0;

        for index in 0..self.n_splits {
            let end = start + fold_size + usize::from(index < remainder);
            let held_out = indices[start..end].to_vec();
            let train = indices[..start]
                .iter()
                .chain(indices[end..].iter())
                .copied()
                .collect();
            folds.push(Fold {
                index,
                train,
                held_out,
            });
            start = end;
        }

        Ok(folds)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct XvalOptions {
    pub failure_policy: FailurePolicy,
    pub overwrite: bool,
    pub shuffle_seed: Option<u64>,
}

impl Default for XvalOptions {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::Record,
            overwrite: false,
            shuffle_seed: None,
        }
    }
}

/// Outcome of one fold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldOutcome {
    pub index: usize,
    pub held_out_size: usize,
    pub artifact: String,
    pub status: TrialStatus,
    pub objective: Option<f64>,
    #[serde(default, with = "crate::scores")]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default, with = "crate::scores")]
    pub losses: BTreeMap<String, f64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Per-fold metrics of one condition and their aggregate.
///
/// Failed folds are listed but excluded from `mean`/`std_dev`;
/// `n_completed` says how many folds the aggregate covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossValResult {
    pub condition: String,
    pub model: ModelKind,
    pub direction: ObjectiveDirection,
    pub n_folds: usize,
    pub n_completed: usize,
    pub folds: Vec<FoldOutcome>,
    pub mean: f64,
    /// Population standard deviation over completed folds.
    pub std_dev: f64,
    pub best_fold: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CrossValResult {
    pub fn objectives(&self) -> Vec<f64> {
        self.folds.iter().filter_map(|f| f.objective).collect()
    }

    pub fn is_partial(&self) -> bool {
        self.n_completed < self.n_folds
    }

    pub fn summary(&self) -> String {
        format!(
            "{}: {:.6} ± {:.6} over {}/{} folds",
            self.condition, self.mean, self.std_dev, self.n_completed, self.n_folds
        )
    }
}

/// Configuration for each fold of `config`, with its own artifact name and
/// held-out partition.
pub fn fold_configs(config: &SessionConfig, kfold: &KFold) -> NciResult<Vec<SessionConfig>> {
    config.validate()?;
    let folds = kfold.split(config.data_config.n_examples)?;

    folds
        .into_iter()
        .map(|fold| -> NciResult<SessionConfig> {
            let mut fold_config = config.with_basename(&format!("{}_fold{}", config.basename, fold.index));
            fold_config.data_config.fold = Some(FoldSpec {
                index: fold.index,
                n_folds: kfold.n_splits(),
                held_out: fold.held_out,
            });
            fold_config.validate()?;
            Ok(fold_config)
        })
        .collect()
}

/// Cross-validate one condition over `n_folds` folds.
///
/// Returns the artifact of the best fold together with the per-fold
/// results. Under [`FailurePolicy::Record`] failed folds are excluded from
/// the aggregate; if no fold completes the condition fails.
pub fn xval_condition<R: SessionRunner>(
    runner: &mut R,
    config: &SessionConfig,
    n_folds: usize,
    options: &XvalOptions,
) -> NciResult<(R::Artifact, CrossValResult)> {
    let started_at = Utc::now();
    let mut kfold = KFold::new(n_folds);
    if let Some(seed) = options.shuffle_seed {
        kfold = kfold.with_shuffle(seed);
    }

    let configs = fold_configs(config, &kfold)?;
    ensure_absent(
        configs
            .iter()
            .flat_map(|c| [c.train_config.train_dir.as_path(), c.eval_config.eval_dir.as_path()]),
        options.overwrite,
    )?;

    let condition = config.artifact_name();
    let direction = config.model.objective_direction();
    info!("cross-validating {} over {} folds", condition, n_folds);

    let mut folds = Vec::with_capacity(configs.len());
    let mut best: Option<(usize, f64, R::Artifact)> = None;

    for fold_config in &configs {
        let spec = fold_config
            .data_config
            .fold
            .as_ref()
            .ok_or_else(|| internal_error!("fold configuration without fold spec"))?;
        let artifact = fold_config.artifact_name();
        info!("[fold {}/{}] running {}", spec.index + 1, n_folds, artifact);

        let (result, ctx) = run_session(runner, fold_config);
        let mut outcome = FoldOutcome {
            index: spec.index,
            held_out_size: spec.held_out.len(),
            artifact: artifact.clone(),
            status: TrialStatus::Completed,
            objective: None,
            metrics: BTreeMap::new(),
            losses: ctx.summary(),
            error: None,
        };

        match result {
            Ok(output) => {
                let objective = output.outcome.objective;
                info!("[fold {}/{}] objective {}", spec.index + 1, n_folds, objective);
                let improves = best
                    .as_ref()
                    .map_or(true, |(_, current, _)| direction.improves(objective, *current));
                if improves {
                    best = Some((spec.index, objective, output.artifact));
                }
                outcome.objective = Some(objective);
                outcome.metrics = output.outcome.metrics;
            }
            Err(e) => match options.failure_policy {
                FailurePolicy::Abort => {
                    error!("{} failed, aborting cross-validation: {}", artifact, e);
                    return Err(e.into());
                }
                FailurePolicy::Record => {
                    warn!("{} failed, excluding fold from the aggregate: {}", artifact, e);
                    outcome.status = TrialStatus::Failed;
                    outcome.error = Some(e.to_string());
                }
            },
        }
        folds.push(outcome);
    }

    let (best_fold, _, best_artifact) = best.ok_or_else(|| TrainingError::NoFoldCompleted {
        condition: condition.clone(),
    })?;

    let objectives: Vec<f64> = folds.iter().filter_map(|f| f.objective).collect();
    let (mean, std_dev) = mean_std(&objectives);

    let result = CrossValResult {
        condition,
        model: config.model,
        direction,
        n_folds,
        n_completed: objectives.len(),
        folds,
        mean,
        std_dev,
        best_fold,
        started_at,
        finished_at: Utc::now(),
    };
    info!("{}", result.summary());
    Ok((best_artifact, result))
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}
