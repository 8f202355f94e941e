//! Error type for aggregation requests.

use step_providers::ProviderError;
use thiserror::Error;

/// Aggregation errors. `Display` is the user-facing description.
#[derive(Debug, Error)]
pub enum StepsError {
    /// A provider failure, passed through unchanged.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("no step source is available; enable motion tracking or allow health data access")]
    NoProviderAvailable,

    #[error("invalid date: {0}")]
    InvalidDate(String),
}

impl StepsError {
    pub fn provider(&self) -> Option<&ProviderError> {
        match self {
            StepsError::Provider(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StepsError> for String {
    fn from(err: StepsError) -> Self {
        err.to_string()
    }
}

/// Result type alias for aggregation operations.
pub type StepsResult<T> = Result<T, StepsError>;
