//! Trial records and search result tracking.

use chrono::{DateTime, Utc};
use nci_types::{Assignment, ModelKind, ObjectiveDirection, TrainingError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::session::{EvalOutcome, RunContext};

/// Unique search run identifier.
pub type SearchId = Uuid;

/// What happens when the session runner reports a training failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Keep going. A failed search point is recorded with `status: failed`
    /// and no objective; a failed fold is left out of the aggregate.
    Record,
    /// The first failure aborts the whole invocation.
    Abort,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::Record
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchKind {
    Grid,
    Random,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// One evaluated search point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRecord {
    /// Position in enumeration/sampling order.
    pub index: usize,
    pub parameters: Assignment,
    /// Artifact name the point's checkpoints and logs are stored under.
    pub artifact: String,
    pub status: TrialStatus,
    pub objective: Option<f64>,
    #[serde(default, with = "crate::scores")]
    pub metrics: BTreeMap<String, f64>,
    /// Loss summary taken from the point's run context.
    #[serde(default, with = "crate::scores")]
    pub losses: BTreeMap<String, f64>,
    #[serde(default)]
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SearchRecord {
    pub fn new(index: usize, parameters: Assignment, artifact: String) -> Self {
        Self {
            index,
            parameters,
            artifact,
            status: TrialStatus::Pending,
            objective: None,
            metrics: BTreeMap::new(),
            losses: BTreeMap::new(),
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = TrialStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self, outcome: EvalOutcome, ctx: &RunContext) {
        self.status = TrialStatus::Completed;
        self.finished_at = Some(Utc::now());
        self.objective = Some(outcome.objective);
        self.metrics = outcome.metrics;
        self.losses = ctx.summary();
    }

    pub fn mark_failed(&mut self, error: &TrainingError, ctx: &RunContext) {
        self.status = TrialStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.objective = None;
        self.error = Some(error.to_string());
        self.losses = ctx.summary();
    }

    pub fn is_completed(&self) -> bool {
        self.status == TrialStatus::Completed
    }
}

/// All records of one grid or random search, in evaluation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchReport {
    pub id: SearchId,
    pub kind: SearchKind,
    pub model: ModelKind,
    pub direction: ObjectiveDirection,
    /// RNG seed of a random search; replaying it reproduces the points.
    pub seed: Option<u64>,
    pub failure_policy: FailurePolicy,
    /// Overrides applied to every point.
    #[serde(default)]
    pub fixed_params: Assignment,
    pub records: Vec<SearchRecord>,
    /// Index into `records` of the best completed point.
    pub best_index: Option<usize>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SearchReport {
    pub fn new(kind: SearchKind, model: ModelKind, failure_policy: FailurePolicy) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            model,
            direction: model.objective_direction(),
            seed: None,
            failure_policy,
            fixed_params: Assignment::new(),
            records: Vec::new(),
            best_index: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Append a finished record, updating the best point if it improves on
    /// the current best. Failed records never become best.
    pub fn push(&mut self, record: SearchRecord) {
        if let Some(objective) = record.objective.filter(|_| record.is_completed()) {
            let improves = match self.best() {
                None => true,
                Some(best) => best
                    .objective
                    .map_or(true, |current| self.direction.improves(objective, current)),
            };
            if improves {
                self.best_index = Some(self.records.len());
            }
        }
        self.records.push(record);
    }

    pub fn mark_finished(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn best(&self) -> Option<&SearchRecord> {
        self.best_index.and_then(|i| self.records.get(i))
    }

    pub fn completed(&self) -> usize {
        self.records.iter().filter(|r| r.is_completed()).count()
    }

    pub fn failed(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.status == TrialStatus::Failed)
            .count()
    }

    /// Completed records, best first.
    pub fn ranked(&self) -> Vec<&SearchRecord> {
        let mut ranked: Vec<&SearchRecord> = self.records.iter().filter(|r| r.is_completed()).collect();
        ranked.sort_by(|a, b| {
            let (x, y) = (a.objective.unwrap_or(f64::NAN), b.objective.unwrap_or(f64::NAN));
            let ord = x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal);
            match self.direction {
                ObjectiveDirection::Minimize => ord,
                ObjectiveDirection::Maximize => ord.reverse(),
            }
        });
        ranked
    }

    pub fn top_n(&self, n: usize) -> Vec<&SearchRecord> {
        self.ranked().into_iter().take(n).collect()
    }
}
