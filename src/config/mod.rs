//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! The access token is wrapped in secrecy::SecretString to prevent log leaks.
//! Nothing here is global: each loader returns an immutable struct that is
//! handed to whatever needs it.

pub mod secrets;

use crate::error::{Error, Result};
use secrecy::SecretString;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default Xero accounts endpoint.
pub const DEFAULT_XERO_API_URL: &str = "https://api.xero.com/api.xro/2.0/Accounts";

/// Tuning for the dispatcher and its workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Number of workers, each with a single-slot inbox.
    pub worker_count: usize,
    /// Upper bound on how long the dispatcher waits for a free worker
    /// before sweeping the pool again.
    pub backoff: Duration,
    /// Attempts per record before it is abandoned as exhausted.
    pub max_attempts: u32,
    /// Fixed delay between consecutive attempts of one record.
    pub retry_delay: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            worker_count: 2,
            backoff: Duration::from_secs(1),
            max_attempts: 10,
            retry_delay: Duration::from_secs(5),
        }
    }
}

impl DispatchConfig {
    /// Read optional overrides from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            worker_count: optional_parsed("WORKER_COUNT")?.unwrap_or(defaults.worker_count),
            backoff: optional_parsed("DISPATCH_BACKOFF_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff),
            max_attempts: optional_parsed("MAX_ATTEMPTS")?.unwrap_or(defaults.max_attempts),
            retry_delay: optional_parsed("RETRY_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_delay),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings under which a batch could never finish.
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(Error::Config("worker count must be at least 1".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config("max attempts must be at least 1".to_string()));
        }
        if self.backoff.is_zero() {
            return Err(Error::Config("dispatch backoff must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Everything the `upload` action needs.
#[derive(Debug)]
pub struct UploadConfig {
    pub access_token: SecretString,
    pub tenant_id: String,
    pub api_url: String,
    /// CSV files to load, in order.
    pub files: Vec<PathBuf>,
    pub dispatch: DispatchConfig,
}

impl UploadConfig {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            access_token: SecretString::from(required_var("ACCESS_TOKEN")?),
            tenant_id: required_var("TENANT_ID")?,
            api_url: std::env::var("XERO_API_URL")
                .unwrap_or_else(|_| DEFAULT_XERO_API_URL.to_string()),
            files: split_file_list(&std::env::var("FILES").unwrap_or_default()),
            dispatch: DispatchConfig::from_env()?,
        })
    }
}

/// Parameters for synthetic chart-of-accounts generation.
#[derive(Debug, Clone)]
pub struct GenerateConfig {
    pub num_files: usize,
    pub rows_per_file: usize,
    /// Codes start at `init_code + 1`.
    pub init_code: u64,
    pub output_dir: PathBuf,
}

impl GenerateConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            num_files: required_parsed("NUM_GENERATED_FILES")?,
            rows_per_file: required_parsed("NUM_GENERATED_COA")?,
            init_code: required_parsed("INIT_COA_NUMBER")?,
            output_dir: PathBuf::from(required_var("COA_PATH")?),
        })
    }
}

/// Logging and export settings.
#[derive(Debug, Clone)]
pub struct TelemetrySettings {
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl TelemetrySettings {
    pub fn from_env() -> Self {
        Self {
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        }
    }
}

/// Split a comma-separated file list, trimming entries and dropping blanks.
pub fn split_file_list(raw: &str) -> Vec<PathBuf> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn required_parsed<T>(name: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    parse_var(name, &required_var(name)?)
}

fn optional_parsed<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => parse_var(name, &raw).map(Some),
        Err(_) => Ok(None),
    }
}

fn parse_var<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| Error::Config(format!("environment variable {name}={raw:?} is invalid: {e}")))
}
