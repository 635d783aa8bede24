use std::path::PathBuf;
use thiserror::Error;

/// Main error type for ncinet model selection
#[derive(Error, Debug)]
pub enum NciError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Search space error: {0}")]
    SearchSpace(#[from] SearchSpaceError),

    #[error("Training failed: {0}")]
    Training(#[from] TrainingError),

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Artifact already exists: {} (pass overwrite to replace it)", path.display())]
    ArtifactExists { path: PathBuf },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl NciError {
    /// Wrap an IO error together with the path that caused it.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for errors raised by the session runner rather than by the
    /// orchestrator itself.
    pub fn is_training_failure(&self) -> bool {
        matches!(self, Self::Training(_))
    }
}

impl From<serde_json::Error> for NciError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for NciError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Malformed or inconsistent model/training configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{field} has {actual} entries but {count_field} is {expected}")]
    LengthMismatch {
        field: String,
        count_field: String,
        expected: usize,
        actual: usize,
    },

    #[error("{field} must be positive, got {value}")]
    NonPositive { field: String, value: String },

    #[error("Unknown parameter: {name}")]
    UnknownParameter { name: String },

    #[error("Parameter {name} is ambiguous, candidates: {}", candidates.join(", "))]
    AmbiguousParameter {
        name: String,
        candidates: Vec<String>,
    },

    #[error("Parameter {name} cannot be set to {value}: {message}")]
    InvalidValue {
        name: String,
        value: String,
        message: String,
    },

    #[error("{model} model expects {expected} logits, got {actual}")]
    LogitMismatch {
        model: String,
        expected: usize,
        actual: usize,
    },

    #[error("{0}")]
    Other(String),
}

/// Problems found while loading a search-space description
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SearchSpaceError {
    #[error("Unknown sampling rule '{rule}' for parameter {param}")]
    UnknownRule { param: String, rule: String },

    #[error("Parameter {param} has an empty candidate list")]
    EmptyCandidates { param: String },

    #[error("Invalid range for {param}: low {low}, high {high}")]
    InvalidRange { param: String, low: f64, high: f64 },

    #[error("Missing field '{field}' for parameter {param}")]
    MissingField { param: String, field: String },

    #[error("Search space has no section '{0}'")]
    MissingSection(String),

    #[error("Search space is empty")]
    Empty,

    #[error("Malformed search space: {0}")]
    Malformed(String),
}

/// Failure signalled by the session runner for one point or fold
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrainingError {
    #[error("Training did not converge: {message}")]
    NonConvergence { message: String },

    #[error("Session runner fault: {message}")]
    RunnerFault { message: String },

    #[error("Runner produced unreadable output: {message}")]
    BadOutput { message: String },

    #[error("No fold of condition {condition} completed")]
    NoFoldCompleted { condition: String },
}

/// Result type alias for ncinet operations
pub type NciResult<T> = Result<T, NciError>;

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::ConfigError::Other(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::NciError::Internal(format!($($arg)*))
    };
}
