//! Sequential grid and random search over session configurations.
//!
//! Every point is turned into a validated configuration before the first
//! training run starts, so configuration errors and artifact collisions
//! abort the search before any work is done. Points then run one at a
//! time, in enumeration order, each inside a fresh run context.

use nci_types::{apply_overrides, internal_error, Assignment, NciError, NciResult, SearchSpaceError, SessionConfig};
use std::collections::HashSet;
use std::path::Path;
use tracing::{error, info, warn};

use crate::search::{GridSearch, RandomSearch, SearchSpace, SearchStrategy};
use crate::session::{run_session, SessionRunner};
use crate::trial::{FailurePolicy, SearchKind, SearchRecord, SearchReport};

/// Knobs shared by grid and random search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    pub failure_policy: FailurePolicy,
    /// Replace artifacts left behind by an earlier run.
    pub overwrite: bool,
    /// Points per continuous dimension when a grid contains ranges.
    pub float_steps: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::Record,
            overwrite: false,
            float_steps: 5,
        }
    }
}

/// One concrete point, ready to hand to the session runner.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPoint {
    pub index: usize,
    /// The point's own parameter values, without the fixed ones.
    pub parameters: Assignment,
    pub config: SessionConfig,
}

/// Fail with [`NciError::ArtifactExists`] on the first of `paths` already
/// on disk. A no-op when `overwrite` is set.
pub fn ensure_absent<'a>(paths: impl IntoIterator<Item = &'a Path>, overwrite: bool) -> NciResult<()> {
    if overwrite {
        return Ok(());
    }
    match paths.into_iter().find(|p| p.exists()) {
        Some(path) => Err(NciError::ArtifactExists {
            path: path.to_path_buf(),
        }),
        None => Ok(()),
    }
}

/// Overlay each assignment on `base` and give it a unique artifact name.
///
/// Artifact names carry the point index and its parameter values. Unless
/// `overwrite` is set, an existing train or eval directory is an error.
pub fn prepare_points(
    base: &SessionConfig,
    assignments: Vec<Assignment>,
    overwrite: bool,
) -> NciResult<Vec<SearchPoint>> {
    let mut seen = HashSet::new();
    let mut points = Vec::with_capacity(assignments.len());

    for (index, parameters) in assignments.into_iter().enumerate() {
        let basename = format!("{}_{index:03}_{}", base.basename, parameters.slug());
        let config = apply_overrides(base, &parameters)?.with_basename(&basename);

        let artifact = config.artifact_name();
        if !seen.insert(artifact.clone()) {
            return Err(internal_error!("two search points share artifact {artifact}"));
        }
        let dirs = [config.train_config.train_dir.as_path(), config.eval_config.eval_dir.as_path()];
        ensure_absent(dirs, overwrite)?;

        points.push(SearchPoint {
            index,
            parameters,
            config,
        });
    }

    Ok(points)
}

/// Train and evaluate each point in order, collecting a record per point.
pub fn run_points<R: SessionRunner>(
    runner: &mut R,
    points: &[SearchPoint],
    mut report: SearchReport,
) -> NciResult<SearchReport> {
    let total = points.len();

    for point in points {
        let artifact = point.config.artifact_name();
        let mut record = SearchRecord::new(point.index, point.parameters.clone(), artifact.clone());
        record.mark_running();
        info!("[{}/{}] running {} ({})", point.index + 1, total, artifact, point.parameters.slug());

        let (result, ctx) = run_session(runner, &point.config);
        match result {
            Ok(output) => {
                info!("[{}/{}] {} objective {}", point.index + 1, total, artifact, output.outcome.objective);
                record.mark_completed(output.outcome, &ctx);
            }
            Err(e) => match report.failure_policy {
                FailurePolicy::Abort => {
                    error!("{} failed, aborting search: {}", artifact, e);
                    return Err(e.into());
                }
                FailurePolicy::Record => {
                    warn!("{} failed, recording and continuing: {}", artifact, e);
                    record.mark_failed(&e, &ctx);
                }
            },
        }
        report.push(record);
    }

    report.mark_finished();
    if let Some(best) = report.best() {
        info!(
            "{:?} search finished: {} completed, {} failed, best {} ({:?})",
            report.kind,
            report.completed(),
            report.failed(),
            best.artifact,
            best.objective
        );
    } else {
        warn!("{:?} search finished without a completed point", report.kind);
    }
    Ok(report)
}

/// Exhaustive search over the cartesian product of `space`.
///
/// `base_overrides` are applied to `base` once, before any point.
pub fn grid_search<R: SessionRunner>(
    runner: &mut R,
    base: &SessionConfig,
    base_overrides: &Assignment,
    space: &SearchSpace,
    options: &SearchOptions,
) -> NciResult<SearchReport> {
    space.validate()?;
    let base = apply_overrides(base, base_overrides)?;

    let mut grid = GridSearch::new(space, options.float_steps);
    info!("grid search over {} points for {}", grid.len(), base.artifact_name());
    let assignments = grid.suggest(grid.len());
    let points = prepare_points(&base, assignments, options.overwrite)?;

    let mut report = SearchReport::new(SearchKind::Grid, base.model, options.failure_policy);
    report.fixed_params = base_overrides.clone();
    run_points(runner, &points, report)
}

/// `n_iter` independent draws from `var_params`, merged over `fixed_params`.
///
/// With `seed: None` a seed is drawn from OS entropy. The run is then not
/// reproducible unless the seed recorded in the report is replayed.
pub fn random_search<R: SessionRunner>(
    runner: &mut R,
    base: &SessionConfig,
    fixed_params: &Assignment,
    var_params: &SearchSpace,
    n_iter: usize,
    seed: Option<u64>,
    options: &SearchOptions,
) -> NciResult<SearchReport> {
    var_params.validate()?;
    if n_iter == 0 {
        return Err(SearchSpaceError::Malformed("random search needs at least one iteration".into()).into());
    }
    if let Some(name) = fixed_params.names().find(|n| var_params.get(n).is_some()) {
        return Err(SearchSpaceError::Malformed(format!("{name} is both fixed and variable")).into());
    }
    let base = apply_overrides(base, fixed_params)?;

    let mut sampler = RandomSearch::new(var_params.clone(), seed);
    info!(
        "random search: {} draws for {} (seed {})",
        n_iter,
        base.artifact_name(),
        sampler.seed()
    );
    let assignments = sampler.suggest(n_iter);
    let points = prepare_points(&base, assignments, options.overwrite)?;

    let mut report =
        SearchReport::new(SearchKind::Random, base.model, options.failure_policy).with_seed(sampler.seed());
    report.fixed_params = fixed_params.clone();
    run_points(runner, &points, report)
}
