//! Scripted provider doubles shared by the unit tests.
#![cfg(test)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use step_providers::window::start_of_day;
use step_providers::{
    BucketCounts, BucketGranularity, LongRangeProvider, ProviderError, SensorError,
    ShortRangeProvider, StepUpdateHandler, TimeWindow,
};

/// Names of provider calls in the order they happened.
pub type CallLog = Arc<Mutex<Vec<&'static str>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// A clonable stand-in for a provider result.
#[derive(Clone, Copy, Debug)]
pub enum Outcome {
    Steps(u64),
    DataNotAvailable,
    Unauthorized,
    SensorFailure,
}

impl Outcome {
    fn into_result(self) -> Result<u64, ProviderError> {
        match self {
            Outcome::Steps(n) => Ok(n),
            Outcome::DataNotAvailable => Err(ProviderError::DataNotAvailable),
            Outcome::Unauthorized => Err(ProviderError::Unauthorized),
            Outcome::SensorFailure => Err(ProviderError::Sensor(SensorError::new(
                500,
                "sensor failure",
            ))),
        }
    }
}

/// 15:00 local time on 2025-03-12.
pub fn now() -> DateTime<Utc> {
    start_of_day(today()) + TimeDelta::hours(15)
}

pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 12).unwrap()
}

pub fn days_ago(n: i64) -> NaiveDate {
    today() - TimeDelta::days(n)
}

/// Answers queries from a script, then from a default outcome. Windows that
/// start on a date listed in `failing` always fail.
struct Script {
    queue: Mutex<VecDeque<Outcome>>,
    default: Outcome,
    failing: Mutex<HashSet<NaiveDate>>,
}

impl Script {
    fn new(default: Outcome) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            default,
            failing: Mutex::new(HashSet::new()),
        }
    }

    fn next(&self, date: NaiveDate) -> Result<u64, ProviderError> {
        if self.failing.lock().unwrap().contains(&date) {
            return Outcome::SensorFailure.into_result();
        }
        self.queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.default)
            .into_result()
    }
}

pub struct FakeShortRange {
    available: bool,
    script: Script,
    log: CallLog,
    handler: Mutex<Option<StepUpdateHandler>>,
    subscribed_at: Mutex<Option<DateTime<Utc>>>,
    pub permission_requests: AtomicUsize,
}

impl FakeShortRange {
    pub fn new(available: bool, default: Outcome, log: CallLog) -> Self {
        Self {
            available,
            script: Script::new(default),
            log,
            handler: Mutex::new(None),
            subscribed_at: Mutex::new(None),
            permission_requests: AtomicUsize::new(0),
        }
    }

    pub fn steps(steps: u64, log: CallLog) -> Self {
        Self::new(true, Outcome::Steps(steps), log)
    }

    pub fn unavailable(log: CallLog) -> Self {
        Self::new(false, Outcome::DataNotAvailable, log)
    }

    pub fn then(self, outcomes: &[Outcome]) -> Self {
        self.script.queue.lock().unwrap().extend(outcomes);
        self
    }

    pub fn failing_on(self, date: NaiveDate) -> Self {
        self.script.failing.lock().unwrap().insert(date);
        self
    }

    /// Deliver a live update to the current subscriber.
    pub fn push(&self, steps: u64) {
        let handler = self.handler.lock().unwrap().clone();
        if let Some(h) = handler {
            h(steps);
        }
    }

    pub fn subscribed_at(&self) -> Option<DateTime<Utc>> {
        *self.subscribed_at.lock().unwrap()
    }
}

#[async_trait]
impl ShortRangeProvider for FakeShortRange {
    fn is_available(&self) -> bool {
        self.available
    }

    async fn request_permission(&self) -> Result<(), ProviderError> {
        self.permission_requests.fetch_add(1, Ordering::SeqCst);
        if self.available {
            Ok(())
        } else {
            Err(ProviderError::NotAvailable)
        }
    }

    async fn query(&self, window: TimeWindow) -> Result<u64, ProviderError> {
        self.log.lock().unwrap().push("short.query");
        self.script.next(window.start_date())
    }

    async fn query_for_day(&self, date: NaiveDate) -> Result<u64, ProviderError> {
        self.log.lock().unwrap().push("short.day");
        self.script.next(date)
    }

    fn subscribe(
        &self,
        start: DateTime<Utc>,
        on_update: StepUpdateHandler,
    ) -> Result<(), ProviderError> {
        self.log.lock().unwrap().push("short.subscribe");
        *self.handler.lock().unwrap() = Some(on_update);
        *self.subscribed_at.lock().unwrap() = Some(start);
        Ok(())
    }

    fn unsubscribe(&self) {
        self.log.lock().unwrap().push("short.unsubscribe");
        *self.handler.lock().unwrap() = None;
        *self.subscribed_at.lock().unwrap() = None;
    }
}

pub struct FakeLongRange {
    available: bool,
    authorized: AtomicBool,
    grants_on_request: bool,
    fails_permission: bool,
    script: Script,
    buckets: BucketCounts,
    log: CallLog,
    delay: Duration,
    in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
    pub last_bucket_query: Mutex<Option<(TimeWindow, BucketGranularity)>>,
    pub permission_requests: AtomicUsize,
}

impl FakeLongRange {
    pub fn new(available: bool, authorized: bool, default: Outcome, log: CallLog) -> Self {
        Self {
            available,
            authorized: AtomicBool::new(authorized),
            grants_on_request: authorized,
            fails_permission: false,
            script: Script::new(default),
            buckets: BucketCounts::new(),
            log,
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            last_bucket_query: Mutex::new(None),
            permission_requests: AtomicUsize::new(0),
        }
    }

    pub fn authorized(steps: u64, log: CallLog) -> Self {
        Self::new(true, true, Outcome::Steps(steps), log)
    }

    pub fn unauthorized(log: CallLog) -> Self {
        Self::new(true, false, Outcome::Unauthorized, log)
    }

    pub fn unavailable(log: CallLog) -> Self {
        Self::new(false, false, Outcome::DataNotAvailable, log)
    }

    /// Grant consent the first time it is requested.
    pub fn granting(mut self) -> Self {
        self.grants_on_request = true;
        self
    }

    /// Hold every window query open for `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_permission(mut self) -> Self {
        self.fails_permission = true;
        self
    }

    pub fn with_buckets(mut self, buckets: BucketCounts) -> Self {
        self.buckets = buckets;
        self
    }

    pub fn then(self, outcomes: &[Outcome]) -> Self {
        self.script.queue.lock().unwrap().extend(outcomes);
        self
    }

    pub fn failing_on(self, date: NaiveDate) -> Self {
        self.script.failing.lock().unwrap().insert(date);
        self
    }
}

#[async_trait]
impl LongRangeProvider for FakeLongRange {
    fn is_available(&self) -> bool {
        self.available
    }

    async fn is_authorized(&self) -> bool {
        self.authorized.load(Ordering::SeqCst)
    }

    async fn request_permission(&self) -> Result<(), ProviderError> {
        self.permission_requests.fetch_add(1, Ordering::SeqCst);
        if !self.available {
            return Err(ProviderError::NotAvailable);
        }
        if self.fails_permission {
            return Err(ProviderError::Store {
                status: 503,
                body: "unavailable".into(),
            });
        }
        if self.grants_on_request {
            self.authorized.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn query(&self, window: TimeWindow) -> Result<u64, ProviderError> {
        self.log.lock().unwrap().push("long.query");
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.script.next(window.start_date())
    }

    async fn query_for_day(&self, date: NaiveDate) -> Result<u64, ProviderError> {
        self.log.lock().unwrap().push("long.day");
        self.script.next(date)
    }

    async fn query_buckets(
        &self,
        window: TimeWindow,
        granularity: BucketGranularity,
    ) -> Result<BucketCounts, ProviderError> {
        self.log.lock().unwrap().push("long.buckets");
        *self.last_bucket_query.lock().unwrap() = Some((window, granularity));
        Ok(self.buckets.clone())
    }
}
