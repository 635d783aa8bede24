//! The session-runner boundary.
//!
//! Training and evaluation are delegated to a [`SessionRunner`]. Every run
//! gets its own [`RunContext`]; nothing a runner records in one context is
//! visible to the next run.

use nci_types::{SessionConfig, TrainingError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Name under which the sum of all recorded losses is reported.
pub const TOTAL_LOSS: &str = "total_loss";

/// Per-run accumulation state handed to the runner.
///
/// Replaces a process-wide loss collection: the orchestrator creates a
/// fresh context for each search point or fold and keeps the summary with
/// that point's record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    pub run_id: Uuid,
    losses: Vec<(String, f64)>,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            losses: Vec::new(),
        }
    }

    /// Record a loss term (cross entropy, a layer's weight decay, ...).
    pub fn add_loss(&mut self, name: impl Into<String>, value: f64) {
        self.losses.push((name.into(), value));
    }

    pub fn losses(&self) -> &[(String, f64)] {
        &self.losses
    }

    pub fn is_empty(&self) -> bool {
        self.losses.is_empty()
    }

    pub fn total_loss(&self) -> f64 {
        self.losses.iter().map(|(_, v)| v).sum()
    }

    /// Loss terms summed by name, plus [`TOTAL_LOSS`]. Empty if nothing
    /// was recorded.
    pub fn summary(&self) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::new();
        if self.losses.is_empty() {
            return out;
        }
        for (name, value) in &self.losses {
            *out.entry(name.clone()).or_insert(0.0) += value;
        }
        out.insert(TOTAL_LOSS.to_string(), self.total_loss());
        out
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

/// What one evaluation pass reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalOutcome {
    /// The scalar the search ranks points by.
    pub objective: f64,
    #[serde(default, with = "crate::scores")]
    pub metrics: BTreeMap<String, f64>,
}

impl EvalOutcome {
    pub fn new(objective: f64) -> Self {
        Self {
            objective,
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }
}

/// Opaque collaborator that trains and evaluates one configuration.
///
/// Both calls block until the work is done. A distinguishable
/// [`TrainingError`] signals non-convergence or an internal fault.
pub trait SessionRunner {
    /// Handle to whatever training produced (checkpoint directory, weights).
    type Artifact;

    fn train(&mut self, config: &SessionConfig, ctx: &mut RunContext) -> Result<Self::Artifact, TrainingError>;

    fn evaluate(
        &mut self,
        artifact: &Self::Artifact,
        config: &SessionConfig,
        ctx: &mut RunContext,
    ) -> Result<EvalOutcome, TrainingError>;
}

/// A finished train+evaluate pass.
#[derive(Debug)]
pub struct SessionOutput<A> {
    pub artifact: A,
    pub outcome: EvalOutcome,
}

/// Train then evaluate `config` inside a fresh [`RunContext`].
///
/// The context is returned whether or not the run succeeded. A non-finite
/// objective counts as non-convergence.
pub fn run_session<R: SessionRunner>(
    runner: &mut R,
    config: &SessionConfig,
) -> (Result<SessionOutput<R::Artifact>, TrainingError>, RunContext) {
    let mut ctx = RunContext::new();
    let result = runner.train(config, &mut ctx).and_then(|artifact| {
        let outcome = runner.evaluate(&artifact, config, &mut ctx)?;
        if !outcome.objective.is_finite() {
            return Err(TrainingError::NonConvergence {
                message: format!("objective is {}", outcome.objective),
            });
        }
        Ok(SessionOutput { artifact, outcome })
    });
    (result, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nci_types::ModelKind;
    use std::path::Path;

    /// Records a loss in train and reads it back in evaluate.
    struct LossEcho {
        objective: f64,
    }

    impl SessionRunner for LossEcho {
        type Artifact = String;

        fn train(&mut self, config: &SessionConfig, ctx: &mut RunContext) -> Result<String, TrainingError> {
            ctx.add_loss("cross_entropy", 0.5);
            ctx.add_loss("weight_decay", 0.25);
            ctx.add_loss("weight_decay", 0.25);
            Ok(config.artifact_name())
        }

        fn evaluate(&mut self, _: &String, _: &SessionConfig, ctx: &mut RunContext) -> Result<EvalOutcome, TrainingError> {
            Ok(EvalOutcome::new(self.objective).with_metric("total_loss", ctx.total_loss()))
        }
    }

    #[test]
    fn contexts_are_fresh_per_session() {
        let config = SessionConfig::standard(ModelKind::Encoder, "main", Path::new("/tmp/w"));
        let mut runner = LossEcho { objective: 0.1 };

        let (first, ctx_a) = run_session(&mut runner, &config);
        let (second, ctx_b) = run_session(&mut runner, &config);

        assert_eq!(first.unwrap().outcome.metrics["total_loss"], 1.0);
        assert_eq!(second.unwrap().outcome.metrics["total_loss"], 1.0);
        assert_ne!(ctx_a.run_id, ctx_b.run_id);
        assert_eq!(ctx_b.losses().len(), 3);
    }

    #[test]
    fn summary_groups_losses_by_name() {
        let mut ctx = RunContext::new();
        assert!(ctx.summary().is_empty());
        ctx.add_loss("weight_decay", 0.1);
        ctx.add_loss("cross_entropy", 0.7);
        ctx.add_loss("weight_decay", 0.2);

        let summary = ctx.summary();
        assert!((summary["weight_decay"] - 0.3).abs() < 1e-12);
        assert!((summary[TOTAL_LOSS] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn nan_objective_is_non_convergence() {
        let config = SessionConfig::standard(ModelKind::Encoder, "main", Path::new("/tmp/w"));
        let mut runner = LossEcho { objective: f64::NAN };
        let (result, ctx) = run_session(&mut runner, &config);
        assert!(matches!(result, Err(TrainingError::NonConvergence { .. })));
        assert!(!ctx.is_empty());
    }
}
