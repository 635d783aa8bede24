//! Search space definitions and parameter sweep strategies.

use nci_types::{Assignment, ParamValue, SearchSpaceError};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// A single parameter dimension in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Configuration parameter name (e.g. "initial_learning_rate").
    pub name: String,
    /// The kind of search range.
    pub kind: ParameterKind,
}

/// Describes how a parameter is enumerated or sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dist", rename_all = "snake_case")]
pub enum ParameterKind {
    /// Continuous uniform range [low, high].
    Uniform { low: f64, high: f64 },
    /// Integer range [low, high] inclusive.
    IntUniform { low: i64, high: i64 },
    /// Log-uniform range (sampled in log-space then exponentiated).
    LogUniform { low: f64, high: f64 },
    /// Ordered candidates; the grid axis, or a uniform choice when sampled.
    Choice { values: Vec<ParamValue> },
}

impl ParameterKind {
    fn check(&self, name: &str) -> Result<(), SearchSpaceError> {
        let range_err = |low: f64, high: f64| SearchSpaceError::InvalidRange {
            param: name.to_string(),
            low,
            high,
        };
        match self {
            Self::Uniform { low, high } => {
                if !low.is_finite() || !high.is_finite() || low > high {
                    return Err(range_err(*low, *high));
                }
            }
            Self::IntUniform { low, high } => {
                if low > high {
                    return Err(range_err(*low as f64, *high as f64));
                }
            }
            Self::LogUniform { low, high } => {
                if !low.is_finite() || !high.is_finite() || *low <= 0.0 || low > high {
                    return Err(range_err(*low, *high));
                }
            }
            Self::Choice { values } => {
                if values.is_empty() {
                    return Err(SearchSpaceError::EmptyCandidates {
                        param: name.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// True if `value` could have been produced by this rule.
    pub fn contains(&self, value: &ParamValue) -> bool {
        match (self, value) {
            (Self::Uniform { low, high }, v) | (Self::LogUniform { low, high }, v) => {
                v.as_f64().map_or(false, |x| x >= *low && x <= *high)
            }
            (Self::IntUniform { low, high }, v) => v.as_i64().map_or(false, |x| x >= *low && x <= *high),
            (Self::Choice { values }, v) => values.contains(v),
        }
    }
}

/// The full search space: an ordered list of parameter definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    pub fn add(mut self, name: impl Into<String>, kind: ParameterKind) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind,
        });
        self
    }

    pub fn add_float(self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.add(name, ParameterKind::Uniform { low, high })
    }

    pub fn add_int(self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.add(name, ParameterKind::IntUniform { low, high })
    }

    pub fn add_log_uniform(self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.add(name, ParameterKind::LogUniform { low, high })
    }

    pub fn add_choice<V: Into<ParamValue>>(self, name: impl Into<String>, values: Vec<V>) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.add(name, ParameterKind::Choice { values })
    }

    pub fn get(&self, name: &str) -> Option<&ParameterDef> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Reject empty spaces, duplicate names, empty candidate lists and
    /// inverted or non-positive (log) ranges.
    pub fn validate(&self) -> Result<(), SearchSpaceError> {
        if self.parameters.is_empty() {
            return Err(SearchSpaceError::Empty);
        }
        for (i, param) in self.parameters.iter().enumerate() {
            if self.parameters[..i].iter().any(|p| p.name == param.name) {
                return Err(SearchSpaceError::Malformed(format!(
                    "parameter {} declared twice",
                    param.name
                )));
            }
            param.kind.check(&param.name)?;
        }
        Ok(())
    }

    /// Total number of grid points (returns `None` if any parameter is
    /// continuous without a natural grid).
    pub fn grid_size(&self) -> Option<usize> {
        let mut total: usize = 1;
        for param in &self.parameters {
            let dim_size = match &param.kind {
                ParameterKind::IntUniform { low, high } => (high - low + 1) as usize,
                ParameterKind::Choice { values } => values.len(),
                // Continuous dimensions need an explicit step count.
                _ => return None,
            };
            total = total.checked_mul(dim_size)?;
        }
        Some(total)
    }
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Search strategies
// ---------------------------------------------------------------------------

/// Common trait for all search strategies.
pub trait SearchStrategy: Send + Sync {
    /// Generate the next batch of parameter assignments to evaluate.
    fn suggest(&mut self, count: usize) -> Vec<Assignment>;

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

// ---- Grid search ----

/// Exhaustive grid search over discrete parameter combinations.
///
/// Points are enumerated in lexicographic order: the first declared
/// parameter varies slowest.
#[derive(Debug, Clone)]
pub struct GridSearch {
    cursor: usize,
    combos: Vec<Assignment>,
}

impl GridSearch {
    /// `float_steps` is the number of evenly spaced points used for
    /// continuous dimensions.
    pub fn new(space: &SearchSpace, float_steps: usize) -> Self {
        Self {
            cursor: 0,
            combos: Self::build_grid(space, float_steps),
        }
    }

    pub fn len(&self) -> usize {
        self.combos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.combos.is_empty()
    }

    fn build_grid(space: &SearchSpace, float_steps: usize) -> Vec<Assignment> {
        let mut axes: Vec<Vec<(&str, ParamValue)>> = Vec::new();

        for param in &space.parameters {
            let values: Vec<ParamValue> = match &param.kind {
                ParameterKind::Uniform { low, high } => {
                    let steps = float_steps.max(2);
                    (0..steps)
                        .map(|i| {
                            let t = i as f64 / (steps - 1) as f64;
                            ParamValue::Float(low + t * (high - low))
                        })
                        .collect()
                }
                ParameterKind::IntUniform { low, high } => {
                    (*low..=*high).map(ParamValue::Int).collect()
                }
                ParameterKind::LogUniform { low, high } => {
                    let steps = float_steps.max(2);
                    let log_low = low.ln();
                    let log_high = high.ln();
                    (0..steps)
                        .map(|i| {
                            let t = i as f64 / (steps - 1) as f64;
                            let v = (log_low + t * (log_high - log_low)).exp();
                            ParamValue::Float(v.clamp(*low, *high))
                        })
                        .collect()
                }
                ParameterKind::Choice { values } => values.clone(),
            };
            axes.push(
                values
                    .into_iter()
                    .map(|v| (param.name.as_str(), v))
                    .collect(),
            );
        }

        // Cartesian product
        let mut result: Vec<Assignment> = vec![Assignment::new()];
        for axis in &axes {
            let mut next = Vec::with_capacity(result.len() * axis.len());
            for existing in &result {
                for (name, value) in axis {
                    let mut combo = existing.clone();
                    combo.insert(*name, value.clone());
                    next.push(combo);
                }
            }
            result = next;
        }

        result
    }
}

impl SearchStrategy for GridSearch {
    fn suggest(&mut self, count: usize) -> Vec<Assignment> {
        let end = self.cursor.saturating_add(count).min(self.combos.len());
        let batch = self.combos[self.cursor..end].to_vec();
        self.cursor = end;
        batch
    }

    fn name(&self) -> &str {
        "grid"
    }
}

// ---- Random search ----

/// Independent random sampling across the search space.
///
/// Driven by a ChaCha RNG: two searches over the same space with the same
/// seed produce identical assignment sequences.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    space: SearchSpace,
    seed: u64,
    rng: ChaCha8Rng,
}

impl RandomSearch {
    /// Without a seed one is drawn from OS entropy; call [`Self::seed`] to
    /// recover it.
    pub fn new(space: SearchSpace, seed: Option<u64>) -> Self {
        let seed = seed.unwrap_or_else(rand::random::<u64>);
        Self {
            space,
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    fn sample_one(&mut self) -> Assignment {
        let mut params = Assignment::new();

        for param in &self.space.parameters {
            let value = match &param.kind {
                ParameterKind::Uniform { low, high } => {
                    ParamValue::Float(self.rng.gen_range(*low..=*high))
                }
                ParameterKind::IntUniform { low, high } => {
                    ParamValue::Int(self.rng.gen_range(*low..=*high))
                }
                ParameterKind::LogUniform { low, high } => {
                    let log_low = low.ln();
                    let log_high = high.ln();
                    let log_val: f64 = self.rng.gen_range(log_low..=log_high);
                    // exp(ln(x)) can land one ulp outside the range
                    ParamValue::Float(log_val.exp().clamp(*low, *high))
                }
                ParameterKind::Choice { values } => {
                    let idx = self.rng.gen_range(0..values.len());
                    values[idx].clone()
                }
            };
            params.insert(param.name.clone(), value);
        }

        params
    }
}

impl SearchStrategy for RandomSearch {
    fn suggest(&mut self, count: usize) -> Vec<Assignment> {
        (0..count).map(|_| self.sample_one()).collect()
    }

    fn name(&self) -> &str {
        "random"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_space() -> SearchSpace {
        SearchSpace::new()
            .add_int("n_layers", 2, 5)
            .add_float("data_fraction", 0.5, 1.0)
            .add_log_uniform("initial_learning_rate", 1e-4, 1e-1)
    }

    #[test]
    fn grid_search_produces_correct_count() {
        let space = SearchSpace::new()
            .add_int("a", 1, 3) // 3 values
            .add_int("b", 10, 11); // 2 values
        assert_eq!(space.grid_size(), Some(6));

        let mut gs = GridSearch::new(&space, 5);
        let batch = gs.suggest(100);
        assert_eq!(batch.len(), 6);
    }

    #[test]
    fn grid_search_orders_first_parameter_outermost() {
        let space = SearchSpace::new()
            .add_choice("lr", vec![0.01, 0.1])
            .add_choice("layers", vec![2i64, 3, 4]);
        let mut gs = GridSearch::new(&space, 2);
        let points: Vec<(f64, i64)> = gs
            .suggest(usize::MAX)
            .iter()
            .map(|a| {
                (
                    a.get("lr").and_then(ParamValue::as_f64).unwrap(),
                    a.get("layers").and_then(ParamValue::as_i64).unwrap(),
                )
            })
            .collect();
        assert_eq!(
            points,
            vec![(0.01, 2), (0.01, 3), (0.01, 4), (0.1, 2), (0.1, 3), (0.1, 4)]
        );
    }

    #[test]
    fn grid_search_cursor_advances() {
        let space = SearchSpace::new().add_int("x", 1, 5); // 5 values
        let mut gs = GridSearch::new(&space, 5);
        let first = gs.suggest(3);
        assert_eq!(first.len(), 3);
        let second = gs.suggest(10);
        assert_eq!(second.len(), 2); // only 2 remain
    }

    #[test]
    fn grid_search_spaces_continuous_dimensions() {
        let space = SearchSpace::new().add_log_uniform("lr", 1e-3, 1e-1);
        let mut gs = GridSearch::new(&space, 3);
        let lrs: Vec<f64> = gs
            .suggest(10)
            .iter()
            .map(|a| a.get("lr").and_then(ParamValue::as_f64).unwrap())
            .collect();
        assert_eq!(lrs.len(), 3);
        assert!((lrs[1] - 1e-2).abs() < 1e-12);
        assert!((lrs[0] - 1e-3).abs() < 1e-15);
        assert!((lrs[2] - 1e-1).abs() < 1e-15);
    }

    #[test]
    fn random_search_respects_bounds() {
        let space = sample_space();
        let mut rs = RandomSearch::new(space.clone(), Some(7));
        let suggestions = rs.suggest(50);
        assert_eq!(suggestions.len(), 50);

        for params in &suggestions {
            for def in &space.parameters {
                let value = params.get(&def.name).unwrap();
                assert!(def.kind.contains(value), "{} out of range: {value}", def.name);
            }
            match params.get("n_layers") {
                Some(ParamValue::Int(v)) => assert!(*v >= 2 && *v <= 5),
                other => panic!("unexpected n_layers value: {other:?}"),
            }
        }
    }

    #[test]
    fn seeded_random_search_is_reproducible() {
        let space = sample_space();
        let first = RandomSearch::new(space.clone(), Some(42)).suggest(20);
        let second = RandomSearch::new(space.clone(), Some(42)).suggest(20);
        let other = RandomSearch::new(space, Some(43)).suggest(20);
        assert_eq!(first, second);
        assert_ne!(first, other);
    }

    #[test]
    fn unseeded_search_reports_its_seed() {
        let space = sample_space();
        let mut rs = RandomSearch::new(space.clone(), None);
        let drawn = rs.suggest(5);
        let replay = RandomSearch::new(space, Some(rs.seed())).suggest(5);
        assert_eq!(drawn, replay);
    }

    #[test]
    fn choice_parameter_works() {
        let space = SearchSpace::new().add_choice("model", vec!["encoder", "topo", "sign"]);
        let mut rs = RandomSearch::new(space, Some(1));
        let suggestions = rs.suggest(30);
        assert_eq!(suggestions.len(), 30);
        for params in &suggestions {
            match params.get("model") {
                Some(ParamValue::Json(v)) => {
                    let s = v.as_str().unwrap();
                    assert!(["encoder", "topo", "sign"].contains(&s));
                }
                other => panic!("unexpected model value: {other:?}"),
            }
        }
    }

    #[test]
    fn log_uniform_stays_in_bounds() {
        let space = SearchSpace::new().add_log_uniform("lr", 1e-5, 1e-1);
        let mut rs = RandomSearch::new(space, Some(3));
        for params in &rs.suggest(200) {
            match params.get("lr") {
                Some(ParamValue::Float(v)) => {
                    assert!(*v >= 1e-5 && *v <= 1e-1, "lr out of bounds: {v}");
                }
                other => panic!("unexpected lr value: {other:?}"),
            }
        }
    }

    #[test]
    fn validate_rejects_bad_spaces() {
        assert_eq!(SearchSpace::new().validate(), Err(SearchSpaceError::Empty));

        let empty_choice = SearchSpace::new().add_choice::<i64>("n_layers", vec![]);
        assert!(matches!(
            empty_choice.validate(),
            Err(SearchSpaceError::EmptyCandidates { .. })
        ));

        let inverted = SearchSpace::new().add_float("x", 1.0, 0.0);
        assert!(matches!(inverted.validate(), Err(SearchSpaceError::InvalidRange { .. })));

        let zero_log = SearchSpace::new().add_log_uniform("lr", 0.0, 1.0);
        assert!(matches!(zero_log.validate(), Err(SearchSpaceError::InvalidRange { .. })));

        let dup = SearchSpace::new().add_int("a", 1, 2).add_int("a", 1, 2);
        assert!(matches!(dup.validate(), Err(SearchSpaceError::Malformed(_))));
    }

    #[test]
    fn grid_size_none_for_float_only() {
        let space = SearchSpace::new().add_float("x", 0.0, 1.0);
        assert_eq!(space.grid_size(), None);
    }
}
