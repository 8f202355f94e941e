//! Logging and metrics wrappers around step providers.
//!
//! Each wrapper implements the same provider trait as the adapter it holds,
//! so the aggregator never knows whether it is talking to a wrapped source.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use step_providers::{
    BucketCounts, BucketGranularity, LongRangeProvider, ProviderError, ShortRangeProvider,
    StepUpdateHandler, TimeWindow,
};
use tracing::debug;

/// Run one provider call, logging its outcome and recording call metrics.
async fn observe<Fut, T>(
    provider: &'static str,
    operation: &'static str,
    fut: Fut,
) -> Result<T, ProviderError>
where
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let start = Instant::now();
    debug!(provider, operation, "starting provider call");

    let result = fut.await;

    let elapsed = start.elapsed();
    let outcome = if result.is_ok() { "ok" } else { "error" };
    match &result {
        Ok(_) => debug!(provider, operation, ?elapsed, "provider call completed"),
        Err(e) => debug!(provider, operation, ?elapsed, error = %e, "provider call failed"),
    }

    metrics::counter!(
        "step_provider_calls_total",
        "provider" => provider,
        "operation" => operation,
        "outcome" => outcome
    )
    .increment(1);
    metrics::histogram!(
        "step_provider_call_duration_seconds",
        "provider" => provider,
        "operation" => operation
    )
    .record(elapsed.as_secs_f64());

    result
}

pub struct LoggingShortRange<P: ?Sized> {
    inner: Arc<P>,
}

impl<P: ?Sized> LoggingShortRange<P> {
    pub fn new(inner: Arc<P>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<P: ShortRangeProvider + ?Sized> ShortRangeProvider for LoggingShortRange<P> {
    fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    async fn request_permission(&self) -> Result<(), ProviderError> {
        observe("pedometer", "request_permission", self.inner.request_permission()).await
    }

    async fn query(&self, window: TimeWindow) -> Result<u64, ProviderError> {
        observe("pedometer", "query", self.inner.query(window)).await
    }

    async fn query_for_day(&self, date: NaiveDate) -> Result<u64, ProviderError> {
        observe("pedometer", "query_for_day", self.inner.query_for_day(date)).await
    }

    fn subscribe(
        &self,
        start: DateTime<Utc>,
        on_update: StepUpdateHandler,
    ) -> Result<(), ProviderError> {
        debug!(provider = "pedometer", %start, "subscribing to live updates");
        self.inner.subscribe(start, on_update)
    }

    fn unsubscribe(&self) {
        debug!(provider = "pedometer", "unsubscribing from live updates");
        self.inner.unsubscribe();
    }
}

pub struct LoggingLongRange<P: ?Sized> {
    inner: Arc<P>,
}

impl<P: ?Sized> LoggingLongRange<P> {
    pub fn new(inner: Arc<P>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<P: LongRangeProvider + ?Sized> LongRangeProvider for LoggingLongRange<P> {
    fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    async fn is_authorized(&self) -> bool {
        self.inner.is_authorized().await
    }

    async fn request_permission(&self) -> Result<(), ProviderError> {
        observe("health_store", "request_permission", self.inner.request_permission()).await
    }

    async fn query(&self, window: TimeWindow) -> Result<u64, ProviderError> {
        observe("health_store", "query", self.inner.query(window)).await
    }

    async fn query_for_day(&self, date: NaiveDate) -> Result<u64, ProviderError> {
        observe("health_store", "query_for_day", self.inner.query_for_day(date)).await
    }

    async fn query_buckets(
        &self,
        window: TimeWindow,
        granularity: BucketGranularity,
    ) -> Result<BucketCounts, ProviderError> {
        observe(
            "health_store",
            "query_buckets",
            self.inner.query_buckets(window, granularity),
        )
        .await
    }
}
