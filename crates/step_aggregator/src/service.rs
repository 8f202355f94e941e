//! The aggregation service: source selection, merging and fallback.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Days, NaiveDate, Utc};
use step_providers::window::{SHORT_RANGE_HORIZON_DAYS, days_before, local_date};
use step_providers::{
    BucketGranularity, Clock, LongRangeProvider, ProviderError, ShortRangeProvider,
    StepUpdateHandler, SystemClock, TimeWindow,
};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::hybrid::max_with_fallback;
use crate::{PermissionStatus, StepReading, StepSource, StepsError, StepsResult};

/// Which sources a request is answered from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Route {
    Hybrid,
    ShortOnly,
    LongOnly,
}

impl Route {
    fn as_str(self) -> &'static str {
        match self {
            Route::Hybrid => "hybrid",
            Route::ShortOnly => "short_range",
            Route::LongOnly => "long_range",
        }
    }
}

/// Uniform step-count surface over the two providers.
#[derive(Clone)]
pub struct StepAggregator {
    short: Arc<dyn ShortRangeProvider>,
    long: Arc<dyn LongRangeProvider>,
    clock: Arc<dyn Clock>,
    permission: Arc<RwLock<PermissionStatus>>,
}

impl StepAggregator {
    pub fn new(short: Arc<dyn ShortRangeProvider>, long: Arc<dyn LongRangeProvider>) -> Self {
        Self::with_clock(short, long, Arc::new(SystemClock))
    }

    pub fn with_clock(
        short: Arc<dyn ShortRangeProvider>,
        long: Arc<dyn LongRangeProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            short,
            long,
            clock,
            permission: Arc::new(RwLock::new(PermissionStatus::NotRequested)),
        }
    }

    pub async fn permission_status(&self) -> PermissionStatus {
        *self.permission.read().await
    }

    async fn set_permission(&self, status: PermissionStatus) {
        *self.permission.write().await = status;
    }

    async fn long_usable(&self) -> bool {
        self.long.is_available() && self.long.is_authorized().await
    }

    /// Ask every available provider for access.
    ///
    /// Individual provider failures are tolerated. Fails only when afterwards
    /// neither provider can be used.
    pub async fn request_permissions(&self) -> StepsResult<()> {
        self.set_permission(PermissionStatus::Requesting).await;

        if self.short.is_available() {
            if let Err(e) = self.short.request_permission().await {
                warn!(error = %e, "pedometer permission request failed");
            }
        }
        if self.long.is_available() {
            if let Err(e) = self.long.request_permission().await {
                warn!(error = %e, "health store permission request failed");
            }
        }

        let usable = self.short.is_available() || self.long_usable().await;
        let status = if usable {
            PermissionStatus::Granted
        } else {
            PermissionStatus::Denied
        };
        self.set_permission(status).await;
        debug!(?status, "permission request finished");

        if usable {
            Ok(())
        } else {
            Err(StepsError::NoProviderAvailable)
        }
    }

    /// Pick the sources for a request whose data starts on `date`.
    async fn route(&self, date: NaiveDate) -> StepsResult<Route> {
        let days_from_today = days_before(date, self.clock.today());
        let long_usable = self.long_usable().await;

        let route = if days_from_today <= SHORT_RANGE_HORIZON_DAYS && self.short.is_available() {
            if long_usable {
                Route::Hybrid
            } else {
                Route::ShortOnly
            }
        } else if long_usable {
            Route::LongOnly
        } else {
            metrics::counter!("step_fetch_path_total", "path" => "none").increment(1);
            debug!(%date, days_from_today, "no usable step provider");
            return Err(StepsError::NoProviderAvailable);
        };

        metrics::counter!("step_fetch_path_total", "path" => route.as_str()).increment(1);
        debug!(%date, days_from_today, route = route.as_str(), "routing step request");
        Ok(route)
    }

    async fn fetch_routed<S, SFut, L, LFut>(
        &self,
        route: Route,
        timestamp: DateTime<Utc>,
        short: S,
        long: L,
    ) -> StepsResult<StepReading>
    where
        S: Fn() -> SFut,
        SFut: Future<Output = Result<u64, ProviderError>>,
        L: Fn() -> LFut,
        LFut: Future<Output = Result<u64, ProviderError>>,
    {
        let reading = match route {
            Route::Hybrid => max_with_fallback(short, long, timestamp).await?,
            Route::ShortOnly => StepReading::new(short().await?, StepSource::ShortRange, timestamp),
            Route::LongOnly => StepReading::new(long().await?, StepSource::LongRange, timestamp),
        };
        Ok(reading)
    }

    /// Step count over `window`.
    ///
    /// Windows starting within the pedometer horizon use the pedometer,
    /// combined with the health store when it is authorized. Older windows
    /// use the health store alone.
    pub async fn fetch_steps(&self, window: TimeWindow) -> StepsResult<StepReading> {
        let route = self.route(window.start_date()).await?;
        self.fetch_routed(
            route,
            window.end,
            || self.short.query(window),
            || self.long.query(window),
        )
        .await
    }

    /// Steps since local midnight.
    pub async fn fetch_today(&self) -> StepsResult<StepReading> {
        self.fetch_steps(TimeWindow::today(self.clock.now())).await
    }

    /// Steps for one calendar day, through the providers' per-day queries.
    pub async fn fetch_for_date(&self, date: NaiveDate) -> StepsResult<StepReading> {
        let route = self.route(date).await?;
        let day = TimeWindow::day(date);
        let timestamp = day.clamp_end(self.clock.now()).max(day.start);
        self.fetch_routed(
            route,
            timestamp,
            || self.short.query_for_day(date),
            || self.long.query_for_day(date),
        )
        .await
    }

    /// Readings for today and the `n - 1` days before it, keyed by date.
    ///
    /// Days are fetched one after another. Days whose fetch fails are left out.
    pub async fn fetch_last_n_days(&self, n: u32) -> BTreeMap<NaiveDate, StepReading> {
        let now = self.clock.now();
        let today = local_date(now);

        let mut readings = BTreeMap::new();
        for back in 0..u64::from(n) {
            let Some(date) = today.checked_sub_days(Days::new(back)) else {
                break;
            };
            let window = if back == 0 {
                TimeWindow::today(now)
            } else {
                TimeWindow::day(date)
            };
            match self.fetch_steps(window).await {
                Ok(reading) => {
                    readings.insert(date, reading);
                }
                Err(e) => debug!(%date, error = %e, "skipping day without step data"),
            }
        }
        readings
    }

    async fn fetch_buckets(
        &self,
        window: TimeWindow,
        granularity: BucketGranularity,
    ) -> StepsResult<BTreeMap<DateTime<Utc>, StepReading>> {
        if !self.long_usable().await {
            debug!(?granularity, "bucket query needs the health store");
            return Err(StepsError::NoProviderAvailable);
        }
        metrics::counter!("step_fetch_path_total", "path" => "buckets").increment(1);

        let buckets = self.long.query_buckets(window, granularity).await?;
        Ok(buckets
            .into_iter()
            .map(|(start, count)| {
                let end = granularity.bucket_window(local_date(start)).end;
                let reading =
                    StepReading::new(count, StepSource::LongRange, window.clamp_end(end));
                (start, reading)
            })
            .collect())
    }

    /// Daily readings across `window`, from the health store only.
    pub async fn fetch_date_range(
        &self,
        window: TimeWindow,
    ) -> StepsResult<BTreeMap<DateTime<Utc>, StepReading>> {
        self.fetch_buckets(window, BucketGranularity::Day).await
    }

    /// Daily readings for the Monday-start week containing `date`.
    pub async fn fetch_weekly(
        &self,
        date: NaiveDate,
    ) -> StepsResult<BTreeMap<DateTime<Utc>, StepReading>> {
        let week = BucketGranularity::Week;
        let window = week.bucket_window(week.bucket_start(date));
        self.fetch_buckets(window, BucketGranularity::Day).await
    }

    /// Daily readings for the calendar month containing `date`.
    pub async fn fetch_monthly(
        &self,
        date: NaiveDate,
    ) -> StepsResult<BTreeMap<DateTime<Utc>, StepReading>> {
        let month = BucketGranularity::Month;
        let window = month.bucket_window(month.bucket_start(date));
        self.fetch_buckets(window, BucketGranularity::Day).await
    }

    /// Monthly readings for calendar `year`.
    pub async fn fetch_yearly(
        &self,
        year: i32,
    ) -> StepsResult<BTreeMap<DateTime<Utc>, StepReading>> {
        let first = NaiveDate::from_ymd_opt(year, 1, 1)
            .ok_or_else(|| StepsError::InvalidDate(format!("year {year} is out of range")))?;
        let window = BucketGranularity::Year.bucket_window(first);
        self.fetch_buckets(window, BucketGranularity::Month).await
    }

    /// Push live pedometer counts to `on_update`, counted from now.
    ///
    /// Does nothing when the pedometer is unavailable. Replaces any earlier
    /// subscription. Pushes lower than one already delivered are dropped.
    pub fn subscribe_realtime<F>(&self, on_update: F) -> StepsResult<()>
    where
        F: Fn(StepReading) + Send + Sync + 'static,
    {
        if !self.short.is_available() {
            debug!("pedometer unavailable; realtime updates disabled");
            return Ok(());
        }

        let clock = self.clock.clone();
        let highest = AtomicU64::new(0);
        let handler: StepUpdateHandler = Arc::new(move |count| {
            let prev = highest.fetch_max(count, Ordering::SeqCst);
            if count < prev {
                debug!(count, prev, "dropping out-of-order pedometer update");
                return;
            }
            on_update(StepReading::new(count, StepSource::ShortRange, clock.now()));
        });

        let start = self.clock.now();
        self.short.subscribe(start, handler)?;
        debug!(%start, "realtime step updates started");
        Ok(())
    }

    pub fn unsubscribe_realtime(&self) {
        self.short.unsubscribe();
    }
}
