//! Session configuration: model hyperparameters plus training, evaluation
//! and data settings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::errors::ConfigError;

/// Side length of the square fingerprint array.
pub const FINGERPRINT_DIM: usize = 100;

/// Which network a session trains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Convolutional autoencoder reconstructing fingerprints.
    Encoder,
    /// Classifier predicting the topology class.
    Topo,
    /// Classifier predicting the sign of the stability score.
    Sign,
}

impl ModelKind {
    pub const ALL: [ModelKind; 3] = [ModelKind::Encoder, ModelKind::Topo, ModelKind::Sign];

    pub fn is_autoencoder(self) -> bool {
        matches!(self, Self::Encoder)
    }

    pub fn inference_type(self) -> Option<InferenceType> {
        match self {
            Self::Encoder => None,
            Self::Topo => Some(InferenceType::Topo),
            Self::Sign => Some(InferenceType::Sign),
        }
    }

    /// Prefix of every artifact produced for this model kind.
    pub fn artifact_prefix(self) -> &'static str {
        match self {
            Self::Encoder => "encoder",
            Self::Topo => "inf_topo",
            Self::Sign => "inf_sign",
        }
    }

    /// Dataset columns the batch generator has to supply.
    pub fn data_types(self) -> &'static [&'static str] {
        match self {
            Self::Encoder => &["fingerprints"],
            Self::Topo => &["fingerprints", "topologies"],
            Self::Sign => &["fingerprints", "scores"],
        }
    }

    pub fn cross_entropy(self) -> CrossEntropy {
        match self {
            Self::Encoder => CrossEntropy::Sigmoid,
            Self::Topo | Self::Sign => CrossEntropy::Softmax,
        }
    }

    /// The autoencoder reports reconstruction error, the classifiers
    /// report precision@1.
    pub fn objective_direction(self) -> ObjectiveDirection {
        match self {
            Self::Encoder => ObjectiveDirection::Minimize,
            Self::Topo | Self::Sign => ObjectiveDirection::Maximize,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Encoder => "encoder",
            Self::Topo => "topo",
            Self::Sign => "sign",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "encoder" => Ok(Self::Encoder),
            "topo" => Ok(Self::Topo),
            "sign" => Ok(Self::Sign),
            other => Err(ConfigError::InvalidValue {
                name: "model".into(),
                value: other.into(),
                message: "expected one of encoder, topo, sign".into(),
            }),
        }
    }
}

/// Label preprocessing for the classifier networks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceType {
    Topo,
    Sign,
}

impl InferenceType {
    pub fn n_classes(self) -> usize {
        match self {
            Self::Topo => 4,
            Self::Sign => 2,
        }
    }

    /// Class index for a raw label.
    ///
    /// Topology labels are class ids already. Stability scores map to
    /// `floor((sign(x) + 1) / 2)`: positive scores are class 1, zero and
    /// negative scores class 0.
    pub fn label_class(self, raw: f64) -> Option<usize> {
        match self {
            Self::Topo => {
                if raw.fract() != 0.0 || raw < 0.0 || raw >= self.n_classes() as f64 {
                    None
                } else {
                    Some(raw as usize)
                }
            }
            Self::Sign => {
                if raw.is_nan() {
                    None
                } else if raw > 0.0 {
                    Some(1)
                } else {
                    Some(0)
                }
            }
        }
    }

    /// One-hot training target for a raw label.
    pub fn one_hot(self, raw: f64) -> Option<Vec<f32>> {
        let class = self.label_class(raw)?;
        let mut target = vec![0.0; self.n_classes()];
        target[class] = 1.0;
        Some(target)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossEntropy {
    Sigmoid,
    Softmax,
}

/// Whether we are maximizing or minimizing the objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveDirection {
    Maximize,
    Minimize,
}

impl ObjectiveDirection {
    /// True when `candidate` beats `incumbent`.
    pub fn improves(self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Self::Maximize => candidate > incumbent,
            Self::Minimize => candidate < incumbent,
        }
    }
}

impl Default for ObjectiveDirection {
    fn default() -> Self {
        Self::Maximize
    }
}

/// One half of the autoencoder.
///
/// Per-layer lists run from farthest to closest to the latent space, so
/// the same record describes both the encoder and the mirrored decoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncoderConfig {
    /// Number of layers before the latent space.
    pub n_layers: usize,
    /// Convolution kernels per layer.
    pub n_filters: Vec<usize>,
    /// Side of the (square) kernels per layer.
    pub filter_size: Vec<usize>,
    /// Regularization weight per layer; `None` disables it for that layer.
    pub reg_weight: Vec<Option<f64>>,
    /// Side of each layer's input, farthest from the latent space first.
    pub init_dim: Vec<usize>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            n_layers: 3,
            n_filters: vec![32, 32, 16],
            filter_size: vec![5, 5, 5],
            reg_weight: vec![Some(0.001); 3],
            init_dim: vec![100, 50, 25],
        }
    }
}

impl EncoderConfig {
    pub fn validate(&self, prefix: &str) -> Result<(), ConfigError> {
        positive(&format!("{prefix}n_layers"), self.n_layers)?;
        let count_field = format!("{prefix}n_layers");
        check_len(&format!("{prefix}n_filters"), &count_field, self.n_layers, self.n_filters.len())?;
        check_len(&format!("{prefix}filter_size"), &count_field, self.n_layers, self.filter_size.len())?;
        check_len(&format!("{prefix}reg_weight"), &count_field, self.n_layers, self.reg_weight.len())?;
        check_len(&format!("{prefix}init_dim"), &count_field, self.n_layers, self.init_dim.len())?;

        for &n in &self.n_filters {
            positive(&format!("{prefix}n_filters"), n)?;
        }
        for &n in &self.filter_size {
            positive(&format!("{prefix}filter_size"), n)?;
        }
        for &n in &self.init_dim {
            positive(&format!("{prefix}init_dim"), n)?;
        }
        for w in self.reg_weight.iter().flatten() {
            if !w.is_finite() || *w < 0.0 {
                return Err(ConfigError::InvalidValue {
                    name: format!("{prefix}reg_weight"),
                    value: w.to_string(),
                    message: "must be a finite, non-negative weight".into(),
                });
            }
        }
        Ok(())
    }
}

/// Classifier head on top of the latent space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InfConfig {
    pub n_hidden: usize,
    pub dim_hidden: Vec<usize>,
    pub n_logits: usize,
    pub encoder_config: EncoderConfig,
}

impl InfConfig {
    pub fn for_type(inference: InferenceType) -> Self {
        Self {
            n_hidden: 1,
            dim_hidden: vec![128],
            n_logits: inference.n_classes(),
            encoder_config: EncoderConfig::default(),
        }
    }

    pub fn validate(&self, inference: InferenceType) -> Result<(), ConfigError> {
        check_len("dim_hidden", "n_hidden", self.n_hidden, self.dim_hidden.len())?;
        for &d in &self.dim_hidden {
            positive("dim_hidden", d)?;
        }
        if self.n_logits != inference.n_classes() {
            return Err(ConfigError::LogitMismatch {
                model: format!("{inference:?}").to_lowercase(),
                expected: inference.n_classes(),
                actual: self.n_logits,
            });
        }
        self.encoder_config.validate("encoder_config.")
    }
}

/// Network hyperparameters, one variant per network family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelConfig {
    Encoder(EncoderConfig),
    Inference(InfConfig),
}

impl ModelConfig {
    pub fn for_kind(kind: ModelKind) -> Self {
        match kind.inference_type() {
            None => Self::Encoder(EncoderConfig::default()),
            Some(inference) => Self::Inference(InfConfig::for_type(inference)),
        }
    }

    pub fn encoder(&self) -> &EncoderConfig {
        match self {
            Self::Encoder(e) => e,
            Self::Inference(i) => &i.encoder_config,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainConfig {
    /// Checkpoint and summary directory for this session.
    pub train_dir: PathBuf,
    /// Trained encoder to restore before training a classifier.
    pub encoder_dir: Option<PathBuf>,
    pub batch_size: usize,
    pub num_epochs: usize,
    pub max_steps: usize,
    pub initial_learning_rate: f64,
    pub log_frequency: usize,
    pub save_checkpoint_secs: u64,
    pub summary_steps: usize,
}

impl TrainConfig {
    fn new(train_dir: PathBuf) -> Self {
        Self {
            train_dir,
            encoder_dir: None,
            batch_size: 32,
            num_epochs: 30,
            max_steps: 100_000,
            initial_learning_rate: 0.005,
            log_frequency: 100,
            save_checkpoint_secs: 600,
            summary_steps: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvalConfig {
    pub eval_dir: PathBuf,
    pub batch_size: usize,
    /// Evaluate on the training partition instead of the held-out one.
    pub use_train_data: bool,
    pub run_once: bool,
    pub eval_interval_secs: u64,
    /// Fraction of the evaluation data to use, in (0, 1].
    pub data_fraction: f64,
}

impl EvalConfig {
    fn new(eval_dir: PathBuf) -> Self {
        Self {
            eval_dir,
            batch_size: 100,
            use_train_data: false,
            run_once: true,
            eval_interval_secs: 60,
            data_fraction: 1.0,
        }
    }
}

/// Train/held-out split assigned to one cross-validation fold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FoldSpec {
    pub index: usize,
    pub n_folds: usize,
    /// Dataset indices evaluated in this fold; training uses the rest.
    pub held_out: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataConfig {
    pub data_dir: PathBuf,
    /// Number of fingerprints available for training and evaluation.
    pub n_examples: usize,
    pub fold: Option<FoldSpec>,
}

/// Everything a session runner needs to train or evaluate one network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    pub model: ModelKind,
    pub basename: String,
    pub model_config: ModelConfig,
    pub train_config: TrainConfig,
    pub eval_config: EvalConfig,
    pub data_config: DataConfig,
}

impl SessionConfig {
    /// Built-in defaults for `model`, with artifacts rooted at `work_dir`.
    pub fn standard(model: ModelKind, basename: &str, work_dir: &Path) -> Self {
        let artifact = format!("{}_{basename}", model.artifact_prefix());
        let mut train_config = TrainConfig::new(work_dir.join(format!("{artifact}_train")));
        if !model.is_autoencoder() {
            train_config.encoder_dir = Some(work_dir.join("encoder_train"));
        }

        Self {
            model,
            basename: basename.to_string(),
            model_config: ModelConfig::for_kind(model),
            train_config,
            eval_config: EvalConfig::new(work_dir.join(format!("{artifact}_eval"))),
            data_config: DataConfig {
                data_dir: work_dir.join("data"),
                n_examples: 12_000,
                fold: None,
            },
        }
    }

    /// Artifact name, derived from the model kind and basename.
    pub fn artifact_name(&self) -> String {
        format!("{}_{}", self.model.artifact_prefix(), self.basename)
    }

    /// Directory that holds this configuration's artifacts.
    pub fn work_dir(&self) -> PathBuf {
        self.train_config
            .train_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }

    /// Where an exported network goes unless told otherwise: next to the
    /// eval directory, with `_eval` swapped for `_serialized`.
    pub fn serialized_dir(&self) -> PathBuf {
        let name = self
            .eval_config
            .eval_dir
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_suffix("_eval"))
            .map_or_else(|| self.artifact_name(), str::to_string);
        self.work_dir().join(format!("{name}_serialized"))
    }

    /// Copy with a new basename; train and eval directories follow it.
    pub fn with_basename(&self, basename: &str) -> Self {
        let work_dir = self.work_dir();
        let mut out = self.clone();
        out.basename = basename.to_string();
        let artifact = out.artifact_name();
        out.train_config.train_dir = work_dir.join(format!("{artifact}_train"));
        out.eval_config.eval_dir = work_dir.join(format!("{artifact}_eval"));
        out
    }

    /// Check internal consistency. Called whenever a configuration is
    /// built, before anything reaches a session runner.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.basename.trim().is_empty() {
            return Err(ConfigError::Other("basename must not be empty".into()));
        }

        match (&self.model_config, self.model.inference_type()) {
            (ModelConfig::Encoder(enc), None) => enc.validate("")?,
            (ModelConfig::Inference(inf), Some(inference)) => inf.validate(inference)?,
            (config, _) => {
                let family = match config {
                    ModelConfig::Encoder(_) => "encoder",
                    ModelConfig::Inference(_) => "inference",
                };
                return Err(ConfigError::Other(format!(
                    "{} model cannot use an {family} configuration",
                    self.model
                )));
            }
        }

        let train = &self.train_config;
        positive("batch_size", train.batch_size)?;
        positive("num_epochs", train.num_epochs)?;
        positive("max_steps", train.max_steps)?;
        positive("log_frequency", train.log_frequency)?;
        if !train.initial_learning_rate.is_finite() || train.initial_learning_rate <= 0.0 {
            return Err(ConfigError::NonPositive {
                field: "initial_learning_rate".into(),
                value: train.initial_learning_rate.to_string(),
            });
        }

        let eval = &self.eval_config;
        positive("eval_config.batch_size", eval.batch_size)?;
        if !(eval.data_fraction > 0.0 && eval.data_fraction <= 1.0) {
            return Err(ConfigError::InvalidValue {
                name: "data_fraction".into(),
                value: eval.data_fraction.to_string(),
                message: "must lie in (0, 1]".into(),
            });
        }

        let data = &self.data_config;
        positive("n_examples", data.n_examples)?;
        if let Some(fold) = &data.fold {
            if fold.index >= fold.n_folds {
                return Err(ConfigError::Other(format!(
                    "fold index {} out of range for {} folds",
                    fold.index, fold.n_folds
                )));
            }
            if let Some(bad) = fold.held_out.iter().find(|&&i| i >= data.n_examples) {
                return Err(ConfigError::Other(format!(
                    "held-out index {bad} exceeds dataset size {}",
                    data.n_examples
                )));
            }
        }

        Ok(())
    }
}

fn positive(field: &str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::NonPositive {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
    Ok(())
}

fn check_len(field: &str, count_field: &str, expected: usize, actual: usize) -> Result<(), ConfigError> {
    if expected != actual {
        return Err(ConfigError::LengthMismatch {
            field: field.to_string(),
            count_field: count_field.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}
