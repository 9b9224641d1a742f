//! WeatherAPI forecast client: one request per ward with retry/backoff and outcome classification.

pub mod normalize;

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, error, warn};
use wardcast_core::{WardCoordinate, WeatherRecord, FORECAST_DAYS};

pub use normalize::normalize_forecast;

pub const CRATE_NAME: &str = "wardcast-provider";

pub const DEFAULT_BASE_URL: &str = "http://api.weatherapi.com/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusDisposition {
    Success,
    RateLimited,
    Fatal,
}

pub fn classify_status(status: StatusCode) -> StatusDisposition {
    if status == StatusCode::OK {
        StatusDisposition::Success
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        StatusDisposition::RateLimited
    } else {
        StatusDisposition::Fatal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Total attempts per ward, first try included.
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl BackoffPolicy {
    /// Wait after the failed attempt `attempt_index` (0-based): 2s, 4s, ...
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

/// Suspension point for backoff and throttle delays.
#[async_trait]
pub trait Sleeper: Send + Sync + Debug {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl ProviderConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(30),
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport failure: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("rate limited by provider")]
    RateLimited,
    #[error("provider returned http {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed forecast payload: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Anything that can turn a ward into a normalized record or a definitive failure.
#[async_trait]
pub trait ForecastProvider: Send + Sync {
    async fn fetch_ward(&self, ward: &WardCoordinate) -> Result<WeatherRecord, FetchError>;
}

enum AttemptFailure {
    Retryable(FetchError),
    Terminal(FetchError),
}

#[derive(Debug)]
pub struct ForecastClient {
    client: reqwest::Client,
    config: ProviderConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl ForecastClient {
    pub fn new(config: ProviderConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("building reqwest client")?;
        Ok(Self {
            client,
            config,
            sleeper: Arc::new(TokioSleeper),
        })
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    fn forecast_url(&self) -> String {
        format!("{}/forecast.json", self.config.base_url.trim_end_matches('/'))
    }

    async fn try_once(&self, ward: &WardCoordinate) -> Result<WeatherRecord, AttemptFailure> {
        let point = ward.query_point();
        let days = FORECAST_DAYS.to_string();

        let resp = self
            .client
            .get(self.forecast_url())
            .query(&[
                ("key", self.config.api_key.as_str()),
                ("q", point.as_str()),
                ("days", days.as_str()),
                ("alerts", "yes"),
                ("aqi", "no"),
            ])
            .send()
            .await
            .map_err(|err| AttemptFailure::Retryable(FetchError::Transport(err)))?;

        let status = resp.status();
        match classify_status(status) {
            StatusDisposition::Success => {
                let body = resp
                    .bytes()
                    .await
                    .map_err(|err| AttemptFailure::Retryable(FetchError::Transport(err)))?;
                let raw: JsonValue = serde_json::from_slice(&body)
                    .map_err(|err| AttemptFailure::Terminal(err.into()))?;
                normalize_forecast(ward, raw).map_err(|err| AttemptFailure::Terminal(err.into()))
            }
            StatusDisposition::RateLimited => Err(AttemptFailure::Retryable(FetchError::RateLimited)),
            StatusDisposition::Fatal => {
                let body = resp.text().await.unwrap_or_default();
                Err(AttemptFailure::Terminal(FetchError::Status {
                    status: status.as_u16(),
                    body: truncate_body(&body),
                }))
            }
        }
    }
}

#[async_trait]
impl ForecastProvider for ForecastClient {
    async fn fetch_ward(&self, ward: &WardCoordinate) -> Result<WeatherRecord, FetchError> {
        let max_attempts = self.config.backoff.max_attempts.max(1);
        let mut attempts = 0usize;

        loop {
            let failure = match self.try_once(ward).await {
                Ok(record) => {
                    debug!(ward_code = %ward.ward_code, attempts = attempts + 1, "forecast fetched");
                    return Ok(record);
                }
                Err(AttemptFailure::Terminal(err)) => {
                    error!(ward_code = %ward.ward_code, error = %err, "forecast request failed");
                    return Err(err);
                }
                Err(AttemptFailure::Retryable(err)) => err,
            };

            attempts += 1;
            if attempts >= max_attempts {
                error!(
                    ward_code = %ward.ward_code,
                    attempts,
                    error = %failure,
                    "forecast request failed after retries"
                );
                return Err(failure);
            }

            let wait = self.config.backoff.delay_for_attempt(attempts - 1);
            warn!(
                ward_code = %ward.ward_code,
                attempt = attempts,
                max_attempts,
                wait_secs = wait.as_secs_f64(),
                error = %failure,
                "retrying forecast request"
            );
            self.sleeper.sleep(wait).await;
        }
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}
