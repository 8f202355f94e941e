//! Dual-source query with max-combine and ordered fallback.

use std::future::Future;

use chrono::{DateTime, Utc};
use step_providers::ProviderError;
use tracing::{debug, warn};

use crate::{StepReading, StepSource};

/// Query both sources concurrently and keep the larger count.
///
/// If either concurrent query fails, the long-range source is asked again on
/// its own, then the short-range source. The first success wins; if both
/// retries fail the short-range error is returned.
///
/// Both sources undercount in different situations, so the higher of the two
/// is the better estimate.
pub async fn max_with_fallback<S, SFut, L, LFut>(
    short: S,
    long: L,
    timestamp: DateTime<Utc>,
) -> Result<StepReading, ProviderError>
where
    S: Fn() -> SFut,
    SFut: Future<Output = Result<u64, ProviderError>>,
    L: Fn() -> LFut,
    LFut: Future<Output = Result<u64, ProviderError>>,
{
    let (short_res, long_res) = tokio::join!(short(), long());

    let failure = match (short_res, long_res) {
        (Ok(s), Ok(l)) => {
            debug!(short = s, long = l, "combined step counts");
            return Ok(StepReading::new(s.max(l), StepSource::Combined, timestamp));
        }
        (Err(e), _) | (Ok(_), Err(e)) => e,
    };
    warn!(error = %failure, "concurrent step query failed, falling back");

    match long().await {
        Ok(count) => return Ok(StepReading::new(count, StepSource::LongRange, timestamp)),
        Err(e) => debug!(error = %e, "long-range fallback failed"),
    }

    let count = short().await?;
    Ok(StepReading::new(count, StepSource::ShortRange, timestamp))
}
