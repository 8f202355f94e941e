//! Unified step counts from a short-range pedometer and a long-range health
//! store.
//!
//! [`StepAggregator`] decides per request which source to ask, merges the
//! answers and falls back when a source fails. Providers are injected, so the
//! same service runs against real adapters or test doubles.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub mod cli;
pub mod error;
pub mod hybrid;
pub mod middleware;
pub mod service;
pub mod state;
mod test_utils;

pub use error::{StepsError, StepsResult};
pub use service::StepAggregator;
pub use state::PermissionStatus;

/// Which source produced a reading.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StepSource {
    ShortRange,
    LongRange,
    /// Both sources answered; the larger count was kept.
    Combined,
}

/// A step count for one interval.
///
/// `count` is either a provider's literal value or, for
/// [`StepSource::Combined`], the larger of the two providers' values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StepReading {
    count: u64,
    source: StepSource,
    timestamp: DateTime<Utc>,
}

impl StepReading {
    pub fn new(count: u64, source: StepSource, timestamp: DateTime<Utc>) -> Self {
        Self {
            count,
            source,
            timestamp,
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn source(&self) -> StepSource {
        self.source
    }

    /// End of the measured interval.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reading_serializes_with_snake_case_source() {
        let at = DateTime::parse_from_rfc3339("2025-03-12T15:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let r = StepReading::new(4200, StepSource::Combined, at);
        let v = serde_json::to_value(r).expect("serialize");
        assert_eq!(v["count"], 4200);
        assert_eq!(v["source"], "combined");
        assert_eq!(v["timestamp"], "2025-03-12T15:00:00Z");
    }
}
