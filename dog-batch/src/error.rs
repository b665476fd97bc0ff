use thiserror::Error;

/// Result type for fail-fast batch runs
pub type BatchResult<T, E> = Result<T, BatchError<E>>;

/// Configuration errors, detected before any work item is scheduled
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("maxConcurrency ({max}) should be greater than or equal to minConcurrency ({min})")]
    InvalidBounds { min: usize, max: usize },

    #[error("Target for metric '{metric}' must be a positive finite number, got {value}")]
    InvalidTarget { metric: String, value: f64 },

    #[error("Custom metric registered more than once: {0}")]
    DuplicateMetric(String),

    #[error("Invalid tuning parameter '{name}': {value}")]
    InvalidTuning { name: &'static str, value: f64 },

    #[error("Invalid environment override {key}={value}")]
    InvalidEnv { key: String, value: String },
}

/// Failure of a fail-fast run
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BatchError<E> {
    #[error("Invalid configuration: {0}")]
    Configuration(#[from] ConfigError),

    /// First item failure of the aborted batch, in submission order
    #[error("Work item failed: {0}")]
    Item(E),
}

impl<E> BatchError<E> {
    /// Check if this error came from a work item
    pub fn is_item_failure(&self) -> bool {
        matches!(self, Self::Item(_))
    }

    /// Get the work item error, if any
    pub fn into_item_error(self) -> Option<E> {
        match self {
            Self::Item(err) => Some(err),
            Self::Configuration(_) => None,
        }
    }
}
