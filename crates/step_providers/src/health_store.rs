//! Long-range provider over an HTTP health-record store.
//!
//! The store keeps one wellness record per local day (`{"id": "YYYY-MM-DD",
//! "steps": n}`), so every query is answered at day granularity: a record
//! counts toward a window when its day overlaps the window.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::NaiveDate;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use crate::config::Config;
use crate::retry::RetryPolicy;
use crate::window::start_of_day;
use crate::{BucketCounts, BucketGranularity, LongRangeProvider, ProviderError, TimeWindow};

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
struct WellnessDay {
    #[serde(rename = "id")]
    date: NaiveDate,
    #[serde(default)]
    steps: Option<u64>,
}

/// Client for the health-record store.
#[derive(Clone, Debug)]
pub struct HealthStoreClient {
    base_url: String,
    athlete_id: String,
    api_key: SecretString,
    client: reqwest::Client,
    retry: RetryPolicy,
    authorized: Arc<AtomicBool>,
}

impl HealthStoreClient {
    /// Create a client with reqwest defaults and the default retry policy.
    ///
    /// # Arguments
    /// * `base_url` - Store root, e.g. "https://intervals.icu"
    /// * `athlete_id` - Owner of the records
    /// * `api_key` - Credential sent with every request
    pub fn new(base_url: &str, athlete_id: impl Into<String>, api_key: SecretString) -> Self {
        Self::with_client(base_url, athlete_id, api_key, reqwest::Client::new())
    }

    /// Create a client honouring the configured request timeout.
    pub fn from_config(config: &Config) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self::with_client(
            &config.store_url,
            config.athlete_id.clone(),
            config.api_key.clone(),
            client,
        ))
    }

    fn with_client(
        base_url: &str,
        athlete_id: impl Into<String>,
        api_key: SecretString,
        client: reqwest::Client,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            athlete_id: athlete_id.into(),
            api_key,
            client,
            retry: RetryPolicy::default(),
            authorized: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Build an authenticated GET request.
    fn get_request(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .basic_auth("API_KEY", Some(self.api_key.expose_secret()))
    }

    /// Send a GET and turn any non-success status into an error.
    async fn send_checked(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response, ProviderError> {
        let resp = self.get_request(url).query(query).send().await?;
        if !resp.status().is_success() {
            return Err(self.error_from_response(resp).await);
        }
        Ok(resp)
    }

    /// Extract error information from a failed response. Auth failures also
    /// revoke the cached consent.
    async fn error_from_response(&self, resp: reqwest::Response) -> ProviderError {
        let status = resp.status().as_u16();
        if matches!(status, 401 | 403) {
            self.authorized.store(false, Ordering::SeqCst);
            return ProviderError::Unauthorized;
        }
        let body = resp.text().await.unwrap_or_default();
        ProviderError::Store {
            status,
            body: body.chars().take(256).collect(),
        }
    }

    async fn ensure_readable(&self) -> Result<(), ProviderError> {
        if !self.is_available() {
            return Err(ProviderError::NotAvailable);
        }
        if !self.is_authorized().await {
            return Err(ProviderError::Unauthorized);
        }
        Ok(())
    }

    /// Wellness records for every day the window overlaps.
    async fn fetch_days(&self, window: TimeWindow) -> Result<Vec<WellnessDay>, ProviderError> {
        self.ensure_readable().await?;
        if window.is_empty() {
            return Ok(Vec::new());
        }

        let oldest = window.start_date();
        let newest = window.last_date();
        let url = format!(
            "{}/api/v1/athlete/{}/wellness",
            self.base_url, self.athlete_id
        );
        let url = url.as_str();
        let query = [("oldest", oldest.to_string()), ("newest", newest.to_string())];
        let query = query.as_slice();

        let days: Vec<WellnessDay> = self
            .retry
            .retry_transient(move || async move {
                let resp = self.send_checked(url, query).await?;
                Ok::<_, ProviderError>(resp.json::<Vec<WellnessDay>>().await?)
            })
            .await?;

        debug!(%oldest, %newest, records = days.len(), "fetched wellness records");
        Ok(days
            .into_iter()
            .filter(|d| d.date >= oldest && d.date <= newest)
            .collect())
    }
}

#[async_trait]
impl LongRangeProvider for HealthStoreClient {
    fn is_available(&self) -> bool {
        !self.athlete_id.is_empty() && !self.api_key.expose_secret().is_empty()
    }

    async fn is_authorized(&self) -> bool {
        self.authorized.load(Ordering::SeqCst)
    }

    async fn request_permission(&self) -> Result<(), ProviderError> {
        if !self.is_available() {
            return Err(ProviderError::NotAvailable);
        }
        let url = format!(
            "{}/api/v1/athlete/{}/profile",
            self.base_url, self.athlete_id
        );
        let url = url.as_str();
        let outcome = self
            .retry
            .retry_transient(move || self.send_checked(url, &[]))
            .await;

        match outcome {
            Ok(_) => {
                self.authorized.store(true, Ordering::SeqCst);
                debug!("health store access granted");
                Ok(())
            }
            // Denial is reported through `is_authorized`, not as a failure.
            Err(ProviderError::Unauthorized) => {
                debug!("health store access denied");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn query(&self, window: TimeWindow) -> Result<u64, ProviderError> {
        let days = self.fetch_days(window).await?;
        Ok(days
            .iter()
            .filter_map(|d| d.steps)
            .fold(0u64, u64::saturating_add))
    }

    async fn query_buckets(
        &self,
        window: TimeWindow,
        granularity: BucketGranularity,
    ) -> Result<BucketCounts, ProviderError> {
        let days = self.fetch_days(window).await?;
        let mut buckets = BTreeMap::new();
        for day in days {
            let Some(steps) = day.steps else { continue };
            let start = start_of_day(granularity.bucket_start(day.date));
            let total: &mut u64 = buckets.entry(start).or_insert(0);
            *total = total.saturating_add(steps);
        }
        Ok(buckets)
    }
}
