//! In-process pedometer SDK backed by a sample log.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};

use crate::pedometer::{PedometerData, PedometerQueryHandler, PedometerSdk, PedometerUpdateHandler};
use crate::window::SHORT_RANGE_HORIZON_DAYS;
use crate::{Clock, SystemClock};

#[derive(Default)]
struct State {
    samples: Vec<(DateTime<Utc>, u64)>,
    updates: Option<(DateTime<Utc>, PedometerUpdateHandler)>,
}

/// Keeps timestamped step samples and answers queries from them.
///
/// Samples older than the retention horizon are invisible, matching a real
/// motion coprocessor. Live updates are delivered synchronously from
/// [`MemoryPedometer::record`].
pub struct MemoryPedometer {
    available: bool,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl MemoryPedometer {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            available: true,
            clock,
            state: Mutex::new(State::default()),
        }
    }

    /// A pedometer on a host without step counting hardware.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    /// Record `steps` taken at `at` and push the new cumulative count to the
    /// live subscriber, if any.
    pub fn record(&self, at: DateTime<Utc>, steps: u64) {
        let push = {
            let mut state = self.lock();
            state.samples.push((at, steps));
            match &state.updates {
                Some((from, handler)) if at >= *from => {
                    let total = sum_between(&state.samples, *from, DateTime::<Utc>::MAX_UTC);
                    Some((handler.clone(), *from, total))
                }
                _ => None,
            }
        };

        if let Some((handler, from, total)) = push {
            handler(Ok(PedometerData {
                start: from,
                end: at,
                number_of_steps: total,
            }));
        }
    }

    pub fn has_live_updates(&self) -> bool {
        self.lock().updates.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn retention_start(&self) -> DateTime<Utc> {
        self.clock.now() - TimeDelta::days(SHORT_RANGE_HORIZON_DAYS + 1)
    }
}

impl Default for MemoryPedometer {
    fn default() -> Self {
        Self::new()
    }
}

fn sum_between(samples: &[(DateTime<Utc>, u64)], from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    samples
        .iter()
        .filter(|(at, _)| *at >= from && *at < to)
        .map(|(_, steps)| *steps)
        .fold(0u64, u64::saturating_add)
}

impl PedometerSdk for MemoryPedometer {
    fn is_step_counting_available(&self) -> bool {
        self.available
    }

    fn query_pedometer_data(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        handler: PedometerQueryHandler,
    ) {
        // Nothing is retained for windows that ended before the horizon.
        if to <= self.retention_start() {
            handler(Ok(None));
            return;
        }
        let from = from.max(self.retention_start());
        let total = sum_between(&self.lock().samples, from, to);
        handler(Ok(Some(PedometerData {
            start: from,
            end: to,
            number_of_steps: total,
        })));
    }

    fn start_pedometer_updates(&self, from: DateTime<Utc>, handler: PedometerUpdateHandler) {
        self.lock().updates = Some((from, handler));
    }

    fn stop_pedometer_updates(&self) {
        self.lock().updates = None;
    }
}
