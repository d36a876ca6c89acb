//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use crate::verification::VerificationConfig;

/// Service configuration.
#[derive(Debug, Clone)]
pub struct EnrollmentConfig {
    /// Base URL of the backend serving `/auth/send-sms` and `/auth/verify-sms`.
    pub api_base_url: String,
    /// Port the REST surface listens on.
    pub port: u16,
    /// libSQL file holding the hand-off entries.
    pub db_path: PathBuf,
    /// Lifetime of a dispatched verification code.
    pub code_ttl: Duration,
    /// Countdown period.
    pub tick_interval: Duration,
    /// Retry policy for SMS send and verify calls.
    pub sms_policy: RetryPolicy,
    /// Delay before the one recovery after a resource-load fault.
    pub fault_reload_delay: Duration,
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8081".to_string(),
            port: 8080,
            db_path: PathBuf::from("./data/enrollment.db"),
            code_ttl: Duration::from_secs(300), // 5 minutes
            tick_interval: Duration::from_secs(1),
            sms_policy: RetryPolicy::new(2, Duration::from_millis(500), 2.0),
            fault_reload_delay: Duration::from_millis(3000),
        }
    }
}

impl EnrollmentConfig {
    /// Read overrides from `ENROLL_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Unset keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("ENROLL_API_BASE_URL") {
            if url.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: "ENROLL_API_BASE_URL".into(),
                    message: "must not be empty".into(),
                });
            }
            config.api_base_url = url;
        }
        if let Some(port) = parse_var::<u16>(&lookup, "ENROLL_PORT")? {
            config.port = port;
        }
        if let Some(path) = lookup("ENROLL_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "ENROLL_OTP_TTL_SECS")? {
            if secs == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "ENROLL_OTP_TTL_SECS".into(),
                    message: "must be at least 1".into(),
                });
            }
            config.code_ttl = Duration::from_secs(secs);
        }
        if let Some(retries) = parse_var::<u32>(&lookup, "ENROLL_SMS_MAX_RETRIES")? {
            config.sms_policy.max_retries = retries;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "ENROLL_SMS_BASE_DELAY_MS")? {
            config.sms_policy.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "ENROLL_FAULT_RELOAD_DELAY_MS")? {
            config.fault_reload_delay = Duration::from_millis(ms);
        }

        Ok(config)
    }

    pub fn verification(&self) -> VerificationConfig {
        VerificationConfig {
            code_ttl: self.code_ttl,
            tick_interval: self.tick_interval,
            send_policy: self.sms_policy.clone(),
            verify_policy: self.sms_policy.clone(),
        }
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?}: {e}"),
            }),
    }
}
