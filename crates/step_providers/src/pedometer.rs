//! Short-range provider over a callback-style pedometer SDK.
//!
//! The SDK reports query results and live updates through callbacks. The
//! adapter turns each query into a single awaited result and owns the one
//! live-update subscription the sensor allows.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::window::within_short_range_horizon;
use crate::{
    Clock, ProviderError, SensorError, ShortRangeProvider, StepUpdateHandler, SystemClock,
    TimeWindow,
};

/// One pedometer measurement as the sensor reports it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PedometerData {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub number_of_steps: u64,
}

/// Receives the single answer to a historical query. `Ok(None)` means the
/// sensor produced neither data nor an error.
pub type PedometerQueryHandler =
    Box<dyn FnOnce(Result<Option<PedometerData>, SensorError>) + Send>;

/// Receives every live update; counts are cumulative since the update start.
pub type PedometerUpdateHandler = Arc<dyn Fn(Result<PedometerData, SensorError>) + Send + Sync>;

/// Vendor pedometer interface.
///
/// The sensor handle serves concurrent read-only queries but only one
/// live-update stream; starting a new stream without stopping the old one is
/// undefined.
pub trait PedometerSdk: Send + Sync + 'static {
    fn is_step_counting_available(&self) -> bool;

    fn query_pedometer_data(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        handler: PedometerQueryHandler,
    );

    fn start_pedometer_updates(&self, from: DateTime<Utc>, handler: PedometerUpdateHandler);

    fn stop_pedometer_updates(&self);
}

#[derive(Debug)]
struct ActiveSubscription {
    start: DateTime<Utc>,
    generation: u64,
}

pub struct PedometerProvider<S: PedometerSdk> {
    sdk: Arc<S>,
    clock: Arc<dyn Clock>,
    subscription: Mutex<Option<ActiveSubscription>>,
    // Bumped on every subscribe/unsubscribe; pushes tagged with an older
    // generation are dropped.
    generation: Arc<AtomicU64>,
}

impl<S: PedometerSdk> PedometerProvider<S> {
    pub fn new(sdk: Arc<S>) -> Self {
        Self::with_clock(sdk, Arc::new(SystemClock))
    }

    pub fn with_clock(sdk: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self {
            sdk,
            clock,
            subscription: Mutex::new(None),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn sdk(&self) -> &Arc<S> {
        &self.sdk
    }

    /// Start instant of the live subscription, if one is running.
    pub fn active_subscription_start(&self) -> Option<DateTime<Utc>> {
        self.lock_subscription().as_ref().map(|s| s.start)
    }

    fn ensure_available(&self) -> Result<(), ProviderError> {
        if self.sdk.is_step_counting_available() {
            Ok(())
        } else {
            Err(ProviderError::NotAvailable)
        }
    }

    fn lock_subscription(&self) -> MutexGuard<'_, Option<ActiveSubscription>> {
        self.subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn stop_locked(&self, active: &mut Option<ActiveSubscription>) {
        if let Some(prev) = active.take() {
            self.generation.fetch_add(1, Ordering::SeqCst);
            self.sdk.stop_pedometer_updates();
            debug!(start = %prev.start, generation = prev.generation, "stopped pedometer updates");
        }
    }
}

#[async_trait]
impl<S: PedometerSdk> ShortRangeProvider for PedometerProvider<S> {
    fn is_available(&self) -> bool {
        self.sdk.is_step_counting_available()
    }

    async fn request_permission(&self) -> Result<(), ProviderError> {
        self.ensure_available()
    }

    async fn query(&self, window: TimeWindow) -> Result<u64, ProviderError> {
        self.ensure_available()?;

        let (tx, rx) = oneshot::channel();
        self.sdk.query_pedometer_data(
            window.start,
            window.end,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );

        match rx.await {
            Ok(Ok(Some(data))) => Ok(data.number_of_steps),
            Ok(Ok(None)) => Err(ProviderError::DataNotAvailable),
            Ok(Err(e)) => Err(ProviderError::Sensor(e)),
            Err(_) => Err(ProviderError::CallbackDropped),
        }
    }

    async fn query_for_day(&self, date: NaiveDate) -> Result<u64, ProviderError> {
        self.ensure_available()?;
        if !within_short_range_horizon(date, self.clock.today()) {
            debug!(%date, "date is outside the pedometer retention horizon");
            return Err(ProviderError::DataNotAvailable);
        }
        self.query(TimeWindow::day(date)).await
    }

    fn subscribe(
        &self,
        start: DateTime<Utc>,
        on_update: StepUpdateHandler,
    ) -> Result<(), ProviderError> {
        self.ensure_available()?;

        let mut active = self.lock_subscription();
        self.stop_locked(&mut active);

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let current = self.generation.clone();
        let handler: PedometerUpdateHandler = Arc::new(move |update| {
            if current.load(Ordering::SeqCst) != generation {
                return;
            }
            match update {
                Ok(data) => on_update(data.number_of_steps),
                Err(e) => warn!(error = %e, "pedometer update failed"),
            }
        });

        self.sdk.start_pedometer_updates(start, handler);
        *active = Some(ActiveSubscription { start, generation });
        debug!(%start, generation, "started pedometer updates");
        Ok(())
    }

    fn unsubscribe(&self) {
        let mut active = self.lock_subscription();
        self.stop_locked(&mut active);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FixedClock;
    use chrono::TimeDelta;
    use std::sync::atomic::AtomicUsize;

    /// Replies to every query with a canned answer and keeps update handlers
    /// so tests can push by hand.
    struct ScriptedSdk {
        available: bool,
        // `None` drops the callback without answering.
        reply: Mutex<Option<Result<Option<PedometerData>, SensorError>>>,
        queries: AtomicUsize,
        handlers: Mutex<Vec<PedometerUpdateHandler>>,
        stops: AtomicUsize,
    }

    impl ScriptedSdk {
        fn new(available: bool) -> Self {
            Self {
                available,
                reply: Mutex::new(None),
                queries: AtomicUsize::new(0),
                handlers: Mutex::new(Vec::new()),
                stops: AtomicUsize::new(0),
            }
        }

        fn replying(self, reply: Result<Option<PedometerData>, SensorError>) -> Self {
            *self.reply.lock().unwrap() = Some(reply);
            self
        }

        fn push(&self, index: usize, steps: u64) {
            let handler = self.handlers.lock().unwrap()[index].clone();
            let now = Utc::now();
            handler(Ok(PedometerData {
                start: now,
                end: now,
                number_of_steps: steps,
            }));
        }
    }

    impl PedometerSdk for ScriptedSdk {
        fn is_step_counting_available(&self) -> bool {
            self.available
        }

        fn query_pedometer_data(
            &self,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
            handler: PedometerQueryHandler,
        ) {
            self.queries.fetch_add(1, Ordering::SeqCst);
            if let Some(reply) = self.reply.lock().unwrap().clone() {
                handler(reply);
            }
        }

        fn start_pedometer_updates(&self, _from: DateTime<Utc>, handler: PedometerUpdateHandler) {
            self.handlers.lock().unwrap().push(handler);
        }

        fn stop_pedometer_updates(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn data(steps: u64) -> PedometerData {
        let now = Utc::now();
        PedometerData {
            start: now - TimeDelta::hours(1),
            end: now,
            number_of_steps: steps,
        }
    }

    fn collect() -> (StepUpdateHandler, Arc<Mutex<Vec<u64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (Arc::new(move |n: u64| sink.lock().unwrap().push(n)), seen)
    }

    #[tokio::test]
    async fn unavailable_sensor_rejects_every_operation() {
        let provider = PedometerProvider::new(Arc::new(ScriptedSdk::new(false)));
        let window = TimeWindow::today(Utc::now());
        assert!(!provider.is_available());
        assert!(matches!(
            provider.request_permission().await,
            Err(ProviderError::NotAvailable)
        ));
        assert!(matches!(
            provider.query(window).await,
            Err(ProviderError::NotAvailable)
        ));
        let (handler, _) = collect();
        assert!(matches!(
            provider.subscribe(Utc::now(), handler),
            Err(ProviderError::NotAvailable)
        ));
        assert_eq!(provider.sdk().queries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn query_returns_reported_count() {
        let sdk = ScriptedSdk::new(true).replying(Ok(Some(data(4321))));
        let provider = PedometerProvider::new(Arc::new(sdk));
        provider.request_permission().await.expect("permission");
        let count = provider.query(TimeWindow::today(Utc::now())).await;
        assert_eq!(count.unwrap(), 4321);
    }

    #[tokio::test]
    async fn empty_answer_is_data_not_available() {
        let sdk = ScriptedSdk::new(true).replying(Ok(None));
        let provider = PedometerProvider::new(Arc::new(sdk));
        let res = provider.query(TimeWindow::today(Utc::now())).await;
        assert!(matches!(res, Err(ProviderError::DataNotAvailable)));
    }

    #[tokio::test]
    async fn sensor_error_propagates() {
        let sdk = ScriptedSdk::new(true).replying(Err(SensorError::new(103, "not authorized")));
        let provider = PedometerProvider::new(Arc::new(sdk));
        match provider.query(TimeWindow::today(Utc::now())).await {
            Err(ProviderError::Sensor(e)) => assert_eq!(e.code, 103),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn dropped_callback_is_reported() {
        let provider = PedometerProvider::new(Arc::new(ScriptedSdk::new(true)));
        let res = provider.query(TimeWindow::today(Utc::now())).await;
        assert!(matches!(res, Err(ProviderError::CallbackDropped)));
    }

    #[tokio::test]
    async fn query_for_day_enforces_retention_horizon() {
        let now = Utc::now();
        let sdk = ScriptedSdk::new(true).replying(Ok(Some(data(10))));
        let provider = PedometerProvider::with_clock(Arc::new(sdk), Arc::new(FixedClock(now)));
        let today = crate::window::local_date(now);

        let recent = provider.query_for_day(today - TimeDelta::days(7)).await;
        assert_eq!(recent.unwrap(), 10);

        let old = provider.query_for_day(today - TimeDelta::days(8)).await;
        assert!(matches!(old, Err(ProviderError::DataNotAvailable)));
        assert_eq!(provider.sdk().queries.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn new_subscription_replaces_previous_one() {
        let provider = PedometerProvider::new(Arc::new(ScriptedSdk::new(true)));
        let (first, first_seen) = collect();
        let (second, second_seen) = collect();
        let t0 = Utc::now();

        provider.subscribe(t0, first).expect("first");
        assert_eq!(provider.sdk().stops.load(Ordering::SeqCst), 0);
        provider.sdk().push(0, 5);

        provider
            .subscribe(t0 + TimeDelta::minutes(1), second)
            .expect("second");
        assert_eq!(provider.sdk().stops.load(Ordering::SeqCst), 1);
        assert_eq!(
            provider.active_subscription_start(),
            Some(t0 + TimeDelta::minutes(1))
        );

        // a late push from the superseded stream is ignored
        provider.sdk().push(0, 50);
        provider.sdk().push(1, 7);

        assert_eq!(*first_seen.lock().unwrap(), vec![5]);
        assert_eq!(*second_seen.lock().unwrap(), vec![7]);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let provider = PedometerProvider::new(Arc::new(ScriptedSdk::new(true)));
        provider.unsubscribe();
        assert_eq!(provider.sdk().stops.load(Ordering::SeqCst), 0);

        let (handler, seen) = collect();
        provider.subscribe(Utc::now(), handler).expect("subscribe");
        provider.unsubscribe();
        provider.unsubscribe();
        assert_eq!(provider.sdk().stops.load(Ordering::SeqCst), 1);
        assert!(provider.active_subscription_start().is_none());

        provider.sdk().push(0, 99);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn update_errors_are_not_forwarded() {
        let provider = PedometerProvider::new(Arc::new(ScriptedSdk::new(true)));
        let (handler, seen) = collect();
        provider.subscribe(Utc::now(), handler).expect("subscribe");
        let h = provider.sdk().handlers.lock().unwrap()[0].clone();
        h(Err(SensorError::new(1, "transient")));
        provider.sdk().push(0, 3);
        assert_eq!(*seen.lock().unwrap(), vec![3]);
    }
}
