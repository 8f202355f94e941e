//! Command-line surface of the `step-fusion` binary.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Value, json};
use step_providers::config::{Config, PedometerMode};
use step_providers::health_store::HealthStoreClient;
use step_providers::memory_pedometer::MemoryPedometer;
use step_providers::pedometer::PedometerProvider;
use step_providers::window::{local_date, next_day, start_of_day};
use step_providers::{ProviderError, TimeWindow};
use tracing_subscriber::EnvFilter;

use crate::middleware::{LoggingLongRange, LoggingShortRange};
use crate::{StepAggregator, StepReading};

pub const USAGE: &str = "usage: step-fusion <command>

commands:
  permissions              request access and print the permission status
  today                    steps since local midnight
  week                     today and the six days before it
  days <n>                 today and the n-1 days before it
  date <YYYY-MM-DD>        steps for one calendar day
  range <from> <to>        daily health-store totals, both dates inclusive
  weekly <YYYY-MM-DD>      daily totals for the Monday-start week of a date
  monthly <YYYY-MM-DD>     daily totals for the month of a date
  yearly <year>            monthly totals for a year";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Permissions,
    Today,
    LastDays(u32),
    Date(NaiveDate),
    Range { from: NaiveDate, to: NaiveDate },
    Weekly(NaiveDate),
    Monthly(NaiveDate),
    Yearly(i32),
}

fn parse_date(raw: &str) -> anyhow::Result<NaiveDate> {
    raw.parse()
        .with_context(|| format!("`{raw}` is not a date in YYYY-MM-DD form"))
}

impl Command {
    /// Parse the arguments after the program name.
    pub fn parse<S: AsRef<str>>(args: &[S]) -> anyhow::Result<Self> {
        let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
        let cmd = match args.as_slice() {
            ["permissions"] => Command::Permissions,
            ["today"] => Command::Today,
            ["week"] => Command::LastDays(7),
            ["days", n] => Command::LastDays(
                n.parse()
                    .with_context(|| format!("`{n}` is not a day count"))?,
            ),
            ["date", d] => Command::Date(parse_date(d)?),
            ["range", from, to] => {
                let (from, to) = (parse_date(from)?, parse_date(to)?);
                if to < from {
                    bail!("range end {to} is before its start {from}");
                }
                Command::Range { from, to }
            }
            ["weekly", d] => Command::Weekly(parse_date(d)?),
            ["monthly", d] => Command::Monthly(parse_date(d)?),
            ["yearly", y] => {
                Command::Yearly(y.parse().with_context(|| format!("`{y}` is not a year"))?)
            }
            [] => bail!("missing command\n\n{USAGE}"),
            _ => bail!("unrecognized command `{}`\n\n{USAGE}", args.join(" ")),
        };
        Ok(cmd)
    }

    pub async fn run(self, aggregator: &StepAggregator) -> anyhow::Result<Value> {
        let value = match self {
            Command::Permissions => {
                let status = aggregator.permission_status().await;
                json!({ "status": status })
            }
            Command::Today => serde_json::to_value(aggregator.fetch_today().await?)?,
            Command::LastDays(n) => serde_json::to_value(aggregator.fetch_last_n_days(n).await)?,
            Command::Date(date) => serde_json::to_value(aggregator.fetch_for_date(date).await?)?,
            Command::Range { from, to } => {
                let window = TimeWindow::new(start_of_day(from), start_of_day(next_day(to)));
                by_local_date(aggregator.fetch_date_range(window).await?)?
            }
            Command::Weekly(date) => by_local_date(aggregator.fetch_weekly(date).await?)?,
            Command::Monthly(date) => by_local_date(aggregator.fetch_monthly(date).await?)?,
            Command::Yearly(year) => by_local_date(aggregator.fetch_yearly(year).await?)?,
        };
        Ok(value)
    }
}

/// Key bucket readings by the local date their bucket starts on.
fn by_local_date(buckets: BTreeMap<DateTime<Utc>, StepReading>) -> serde_json::Result<Value> {
    let by_date: BTreeMap<NaiveDate, StepReading> = buckets
        .into_iter()
        .map(|(start, reading)| (local_date(start), reading))
        .collect();
    serde_json::to_value(by_date)
}

/// Log filter from `get`: `STEP_FUSION_LOG_LEVEL`, then `RUST_LOG`, then `info`.
pub fn log_filter<F>(mut get: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    get("STEP_FUSION_LOG_LEVEL")
        .or_else(|| get("RUST_LOG"))
        .unwrap_or_else(|| "info".to_string())
}

/// Tracing filter for `log_env` with HTTP connection chatter kept at `warn`.
/// An unparsable `log_env` falls back to `info`.
pub fn env_filter(log_env: &str) -> EnvFilter {
    EnvFilter::try_new(format!("{log_env},hyper_util=warn"))
        .unwrap_or_else(|_| EnvFilter::new("info,hyper_util=warn"))
}

/// Wire the configured adapters, wrapped in logging middleware.
pub fn build_aggregator(config: &Config) -> Result<StepAggregator, ProviderError> {
    let sdk = match config.pedometer {
        PedometerMode::Memory => MemoryPedometer::new(),
        PedometerMode::None => MemoryPedometer::unavailable(),
    };
    let pedometer = PedometerProvider::new(Arc::new(sdk));
    let store = HealthStoreClient::from_config(config)?;

    Ok(StepAggregator::new(
        Arc::new(LoggingShortRange::new(Arc::new(pedometer))),
        Arc::new(LoggingLongRange::new(Arc::new(store))),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use step_providers::{BucketCounts, FixedClock};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parses_every_command() {
        let cases: &[(&[&str], Command)] = &[
            (&["permissions"], Command::Permissions),
            (&["today"], Command::Today),
            (&["week"], Command::LastDays(7)),
            (&["days", "30"], Command::LastDays(30)),
            (&["date", "2025-03-01"], Command::Date(date(2025, 3, 1))),
            (
                &["range", "2025-01-01", "2025-01-31"],
                Command::Range {
                    from: date(2025, 1, 1),
                    to: date(2025, 1, 31),
                },
            ),
            (&["weekly", "2025-03-12"], Command::Weekly(date(2025, 3, 12))),
            (&["monthly", "2025-02-10"], Command::Monthly(date(2025, 2, 10))),
            (&["yearly", "2024"], Command::Yearly(2024)),
        ];
        for (args, expected) in cases {
            assert_eq!(Command::parse(*args).unwrap(), *expected, "{args:?}");
        }
    }

    #[test]
    fn rejects_bad_arguments() {
        let bad: &[&[&str]] = &[
            &[],
            &["tomorrow"],
            &["days", "-1"],
            &["date", "12/03/2025"],
            &["range", "2025-02-01", "2025-01-01"],
            &["yearly", "MMXXV"],
            &["today", "extra"],
        ];
        for args in bad {
            assert!(Command::parse(*args).is_err(), "{args:?}");
        }
        let err = Command::parse::<&str>(&[]).unwrap_err().to_string();
        assert!(err.contains("usage: step-fusion"));
    }

    #[test]
    fn log_filter_prefers_own_variable() {
        let both = |k: &str| match k {
            "STEP_FUSION_LOG_LEVEL" => Some("debug".to_string()),
            "RUST_LOG" => Some("warn".to_string()),
            _ => None,
        };
        assert_eq!(log_filter(both), "debug");
        assert_eq!(
            log_filter(|k: &str| (k == "RUST_LOG").then(|| "trace".to_string())),
            "trace"
        );
        assert_eq!(log_filter(|_: &str| None), "info");
    }

    #[test]
    fn unconfigured_store_still_builds() {
        let config = Config::from_env_with(|_| None).unwrap();
        assert!(build_aggregator(&config).is_ok());
    }

    #[tokio::test]
    async fn runs_today_and_permissions() {
        let log = call_log();
        let agg = StepAggregator::with_clock(
            Arc::new(FakeShortRange::steps(4000, log.clone())),
            Arc::new(FakeLongRange::authorized(4200, log)),
            Arc::new(FixedClock(now())),
        );

        let today = Command::Today.run(&agg).await.unwrap();
        assert_eq!(today["count"], 4200);
        assert_eq!(today["source"], "combined");

        let before = Command::Permissions.run(&agg).await.unwrap();
        assert_eq!(before["status"], "not_requested");
        agg.request_permissions().await.unwrap();
        let after = Command::Permissions.run(&agg).await.unwrap();
        assert_eq!(after["status"], "granted");
    }

    #[tokio::test]
    async fn bucket_output_is_keyed_by_local_date() {
        let log = call_log();
        let mut buckets = BucketCounts::new();
        buckets.insert(start_of_day(days_ago(1)), 8000);
        let agg = StepAggregator::with_clock(
            Arc::new(FakeShortRange::unavailable(log.clone())),
            Arc::new(FakeLongRange::authorized(0, log).with_buckets(buckets)),
            Arc::new(FixedClock(now())),
        );

        let out = Command::Weekly(today()).run(&agg).await.unwrap();
        let key = days_ago(1).to_string();
        assert_eq!(out[key.as_str()]["count"], 8000);
        assert_eq!(out[key.as_str()]["source"], "long_range");
    }

    #[tokio::test]
    async fn provider_errors_surface_as_user_text() {
        let log = call_log();
        let agg = StepAggregator::with_clock(
            Arc::new(FakeShortRange::unavailable(log.clone())),
            Arc::new(FakeLongRange::unavailable(log)),
            Arc::new(FixedClock(now())),
        );
        let err = Command::Today.run(&agg).await.unwrap_err();
        assert!(err.to_string().starts_with("no step source is available"));
    }
}
