//! Step-count provider contracts and the adapters that implement them.
//!
//! Two kinds of source exist: a short-range pedometer that only knows about the
//! last few days, and a long-range health-record store that needs explicit
//! consent. Both are exposed as async traits so the aggregation layer can be
//! handed real adapters or test doubles.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

pub mod config;
pub mod health_store;
pub mod memory_pedometer;
pub mod pedometer;
pub mod retry;
pub mod window;

pub use window::{BucketGranularity, Clock, FixedClock, SystemClock, TimeWindow};

/// Native error reported by the pedometer subsystem.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message} (code {code})")]
pub struct SensorError {
    pub code: i64,
    pub message: String,
}

impl SensorError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("step source is not available on this device")]
    NotAvailable,
    #[error("access to step records is not authorized")]
    Unauthorized,
    #[error("no step data is available for the requested period")]
    DataNotAvailable,
    #[error("pedometer error: {0}")]
    Sensor(#[from] SensorError),
    #[error("pedometer callback was dropped without a result")]
    CallbackDropped,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("health store returned status {status}: {body}")]
    Store { status: u16, body: String },
    #[error("configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ProviderError::Store { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Callback receiving the cumulative step count of a live subscription.
pub type StepUpdateHandler = Arc<dyn Fn(u64) + Send + Sync>;

/// Cumulative counts keyed by bucket start.
pub type BucketCounts = BTreeMap<DateTime<Utc>, u64>;

/// Sensor-backed source, authoritative only for the recent retention horizon.
#[async_trait]
pub trait ShortRangeProvider: Send + Sync + 'static {
    fn is_available(&self) -> bool;

    /// There is no consent step for the sensor; this only checks capability.
    async fn request_permission(&self) -> Result<(), ProviderError>;

    /// Cumulative step count over the half-open `window`.
    async fn query(&self, window: TimeWindow) -> Result<u64, ProviderError>;

    /// Step count for a local calendar day. Days older than the retention
    /// horizon fail with [`ProviderError::DataNotAvailable`].
    async fn query_for_day(&self, date: NaiveDate) -> Result<u64, ProviderError>;

    /// Start pushing cumulative counts since `start`. Replaces any active
    /// subscription.
    fn subscribe(&self, start: DateTime<Utc>, on_update: StepUpdateHandler)
    -> Result<(), ProviderError>;

    /// Stop the active subscription, if any.
    fn unsubscribe(&self);
}

/// Consent-gated historical store.
#[async_trait]
pub trait LongRangeProvider: Send + Sync + 'static {
    fn is_available(&self) -> bool;

    /// Current consent state. Consent can be revoked at any time, so callers
    /// check this before every query.
    async fn is_authorized(&self) -> bool;

    /// Ask for read consent. A denial is not an error here; it shows up as
    /// `is_authorized()` returning false afterwards.
    async fn request_permission(&self) -> Result<(), ProviderError>;

    /// Cumulative step count over the half-open `window`; 0 when the store
    /// holds no samples in range.
    async fn query(&self, window: TimeWindow) -> Result<u64, ProviderError>;

    async fn query_for_day(&self, date: NaiveDate) -> Result<u64, ProviderError> {
        self.query(TimeWindow::day(date)).await
    }

    /// Per-bucket sums for every bucket overlapping `window`. Buckets without
    /// any samples are omitted.
    async fn query_buckets(
        &self,
        window: TimeWindow,
        granularity: BucketGranularity,
    ) -> Result<BucketCounts, ProviderError>;
}
