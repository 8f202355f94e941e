use crate::ProviderError;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;

pub const DEFAULT_STORE_URL: &str = "https://intervals.icu";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Which pedometer backend the host offers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PedometerMode {
    /// No motion coprocessor on this host.
    None,
    /// In-process sample log.
    Memory,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub api_key: SecretString,
    pub athlete_id: String,
    pub store_url: String,
    pub request_timeout: Duration,
    pub pedometer: PedometerMode,
}

impl Config {
    pub fn from_env() -> Result<Self, ProviderError> {
        Self::from_env_with(|k| std::env::var(k).ok())
    }

    /// Read configuration through `get` instead of the process environment.
    ///
    /// Missing credentials are not an error: they leave the health store
    /// unavailable.
    pub fn from_env_with<F>(mut get: F) -> Result<Self, ProviderError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let api_key = get("STEP_FUSION_API_KEY").unwrap_or_default();
        let athlete_id = get("STEP_FUSION_ATHLETE_ID").unwrap_or_default();
        let store_url = get("STEP_FUSION_STORE_URL").unwrap_or_else(|| DEFAULT_STORE_URL.into());

        let request_timeout = match get("STEP_FUSION_TIMEOUT_SECS") {
            Some(raw) => {
                let secs: u64 = raw.trim().parse().map_err(|_| {
                    ProviderError::Config(format!("STEP_FUSION_TIMEOUT_SECS is not a number: {raw}"))
                })?;
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };

        let pedometer = match get("STEP_FUSION_PEDOMETER").as_deref().map(str::trim) {
            None | Some("") | Some("none") => PedometerMode::None,
            Some("memory") => PedometerMode::Memory,
            Some(other) => {
                return Err(ProviderError::Config(format!(
                    "STEP_FUSION_PEDOMETER must be `none` or `memory`, got `{other}`"
                )));
            }
        };

        Ok(Self {
            api_key: SecretString::new(api_key.into()),
            athlete_id,
            store_url,
            request_timeout,
            pedometer,
        })
    }

    /// Whether enough is configured to reach the health store.
    pub fn has_store_credentials(&self) -> bool {
        !self.athlete_id.is_empty() && !self.api_key.expose_secret().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_env_defaults_without_credentials() {
        let cfg = Config::from_env_with(|_| None).expect("cfg");
        assert_eq!(cfg.store_url, DEFAULT_STORE_URL);
        assert_eq!(cfg.request_timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(cfg.pedometer, PedometerMode::None);
        assert!(!cfg.has_store_credentials());
    }

    #[test]
    fn from_env_reads_values() {
        let get = |k: &str| match k {
            "STEP_FUSION_API_KEY" => Some("sekrit".into()),
            "STEP_FUSION_ATHLETE_ID" => Some("i42".into()),
            "STEP_FUSION_STORE_URL" => Some("http://localhost".into()),
            "STEP_FUSION_TIMEOUT_SECS" => Some("5".into()),
            "STEP_FUSION_PEDOMETER" => Some("memory".into()),
            _ => None,
        };
        let cfg = Config::from_env_with(get).expect("cfg");
        assert_eq!(cfg.athlete_id, "i42");
        assert_eq!(cfg.store_url, "http://localhost");
        assert_eq!(cfg.request_timeout, Duration::from_secs(5));
        assert_eq!(cfg.pedometer, PedometerMode::Memory);
        assert!(cfg.has_store_credentials());
    }

    #[test]
    fn from_env_rejects_bad_timeout() {
        let get = |k: &str| (k == "STEP_FUSION_TIMEOUT_SECS").then(|| "soon".to_string());
        assert!(matches!(
            Config::from_env_with(get),
            Err(ProviderError::Config(_))
        ));
    }

    #[test]
    fn from_env_rejects_unknown_pedometer() {
        let get = |k: &str| (k == "STEP_FUSION_PEDOMETER").then(|| "watch".to_string());
        assert!(Config::from_env_with(get).is_err());
    }
}
