//! Sync pipeline orchestration: windowed, permit-bounded fetches with per-window writes.

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;
use wardcast_core::{RunSummary, WardCoordinate};
use wardcast_provider::{
    FetchError, ForecastClient, ForecastProvider, ProviderConfig, Sleeper, TokioSleeper, DEFAULT_BASE_URL,
};
use wardcast_storage::{
    load_wards, replace_alerts, upsert_weather_batch, MemoryStore, PgStore, WardSource, WeatherStore,
    DEFAULT_WRITE_CHUNK_SIZE,
};

pub const CRATE_NAME: &str = "wardcast-sync";

/// Ward cap applied when test mode is on.
pub const TEST_MODE_WARDS: usize = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} environment variable is not set")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
    #[error("batch size must be greater than zero")]
    ZeroBatchSize,
    #[error("batch size {0} exceeds the limit of {max}", max = Semaphore::MAX_PERMITS)]
    BatchSizeTooLarge(usize),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no wards found in weather_cache")]
    NoWards,
}

/// Why a ward in a window produced no record.
#[derive(Debug, Error)]
enum WardFailure {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("request permit pool closed")]
    PermitsClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunOptions {
    /// Window size and permit pool capacity.
    pub batch_size: usize,
    pub delay_ms: u64,
    /// 0 = unlimited.
    pub max_wards: usize,
    pub test_mode: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            batch_size: 50,
            delay_ms: 200,
            max_wards: 0,
            test_mode: false,
        }
    }
}

impl RunOptions {
    pub fn effective_max_wards(&self) -> usize {
        if self.test_mode {
            TEST_MODE_WARDS
        } else {
            self.max_wards
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.batch_size > Semaphore::MAX_PERMITS {
            return Err(ConfigError::BatchSizeTooLarge(self.batch_size));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub api_key: String,
    pub database_url: String,
    pub provider_base_url: String,
    pub http_timeout_secs: u64,
    pub options: RunOptions,
}

impl RunConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let present = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = present("WEATHER_API_KEY").ok_or(ConfigError::Missing("WEATHER_API_KEY"))?;
        let database_url = present("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let defaults = RunOptions::default();

        let options = RunOptions {
            batch_size: parse_or(present("WARDCAST_BATCH_SIZE"), "WARDCAST_BATCH_SIZE", defaults.batch_size)?,
            delay_ms: parse_or(present("WARDCAST_DELAY_MS"), "WARDCAST_DELAY_MS", defaults.delay_ms)?,
            max_wards: parse_or(present("WARDCAST_MAX_WARDS"), "WARDCAST_MAX_WARDS", defaults.max_wards)?,
            test_mode: present("WARDCAST_TEST_MODE")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
        };
        options.validate()?;

        Ok(Self {
            api_key,
            database_url,
            provider_base_url: present("WEATHER_API_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            http_timeout_secs: parse_or(present("WARDCAST_HTTP_TIMEOUT_SECS"), "WARDCAST_HTTP_TIMEOUT_SECS", 30)?,
            options,
        })
    }

    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig {
            base_url: self.provider_base_url.clone(),
            timeout: Duration::from_secs(self.http_timeout_secs),
            ..ProviderConfig::new(self.api_key.clone())
        }
    }
}

fn parse_or<T: FromStr>(value: Option<String>, key: &'static str, default: T) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

/// Counts for one processed window.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowOutcome {
    pub wards: usize,
    pub successful: usize,
    pub failed: usize,
    pub rows_written: usize,
    pub failed_chunks: usize,
    pub alerts_written: usize,
}

/// Accumulates window outcomes into the run's totals.
#[derive(Debug, Clone)]
pub struct RunAggregator {
    total_wards: usize,
    windows: Vec<WindowOutcome>,
}

impl RunAggregator {
    pub fn new(total_wards: usize) -> Self {
        Self {
            total_wards,
            windows: Vec::new(),
        }
    }

    pub fn record_window(&mut self, outcome: WindowOutcome) {
        self.windows.push(outcome);
    }

    pub fn successful(&self) -> usize {
        self.windows.iter().map(|w| w.successful).sum()
    }

    pub fn failed(&self) -> usize {
        self.windows.iter().map(|w| w.failed).sum()
    }

    pub fn rows_written(&self) -> usize {
        self.windows.iter().map(|w| w.rows_written).sum()
    }

    pub fn alerts_written(&self) -> usize {
        self.windows.iter().map(|w| w.alerts_written).sum()
    }

    pub fn failed_chunks(&self) -> usize {
        self.windows.iter().map(|w| w.failed_chunks).sum()
    }

    pub fn finish(self, elapsed: Duration) -> RunReport {
        let summary = RunSummary::from_counts(self.total_wards, self.successful(), self.failed(), elapsed);
        RunReport {
            rows_written: self.rows_written(),
            alerts_written: self.alerts_written(),
            failed_chunks: self.failed_chunks(),
            summary,
            windows: self.windows,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub summary: RunSummary,
    pub rows_written: usize,
    pub alerts_written: usize,
    pub failed_chunks: usize,
    pub windows: Vec<WindowOutcome>,
}

pub struct SyncPipeline {
    options: RunOptions,
    provider: Arc<dyn ForecastProvider>,
    store: Arc<dyn WeatherStore>,
    sleeper: Arc<dyn Sleeper>,
    permits: Arc<Semaphore>,
    write_chunk_size: usize,
}

impl SyncPipeline {
    pub fn new(options: RunOptions, provider: Arc<dyn ForecastProvider>, store: Arc<dyn WeatherStore>) -> Self {
        let batch_size = options.batch_size.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            options,
            provider,
            store,
            sleeper: Arc::new(TokioSleeper),
            permits: Arc::new(Semaphore::new(batch_size)),
            write_chunk_size: DEFAULT_WRITE_CHUNK_SIZE,
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_write_chunk_size(mut self, chunk_size: usize) -> Self {
        self.write_chunk_size = chunk_size.max(1);
        self
    }

    /// Loads the ward list from `source` and runs it to completion.
    pub async fn run_once(&self, source: &dyn WardSource) -> Result<RunReport> {
        let wards = load_wards(source, self.options.effective_max_wards())
            .await
            .context("loading ward coordinates")?;
        Ok(self.run(wards).await?)
    }

    pub async fn run(&self, wards: Vec<WardCoordinate>) -> Result<RunReport, SyncError> {
        if wards.is_empty() {
            return Err(SyncError::NoWards);
        }
        let run_id = Uuid::new_v4();
        self.run_windows(wards).instrument(info_span!("sync_run", %run_id)).await
    }

    async fn run_windows(&self, wards: Vec<WardCoordinate>) -> Result<RunReport, SyncError> {
        let started = Instant::now();
        let batch_size = self.options.batch_size.max(1);
        let total_wards = wards.len();
        let total_windows = total_wards.div_ceil(batch_size);
        let mut aggregator = RunAggregator::new(total_wards);

        info!(total_wards, total_windows, batch_size, "processing wards");

        for (window_index, window) in wards.chunks(batch_size).enumerate() {
            let window_no = window_index + 1;
            let first = window_index * batch_size + 1;
            info!(
                window = window_no,
                total_windows,
                first,
                last = first + window.len() - 1,
                total_wards,
                "processing window"
            );

            let outcome = self
                .process_window(window)
                .instrument(info_span!("window", window = window_no))
                .await;
            aggregator.record_window(outcome);

            if window_no < total_windows && self.options.delay_ms > 0 {
                self.sleeper.sleep(self.options.delay()).await;
            }
        }

        let report = aggregator.finish(started.elapsed());
        info!(
            successful = report.summary.successful,
            total_wards,
            failed = report.summary.failed,
            rows_written = report.rows_written,
            alerts_written = report.alerts_written,
            failed_chunks = report.failed_chunks,
            elapsed_seconds = report.summary.elapsed_seconds,
            "sync complete"
        );
        Ok(report)
    }

    async fn process_window(&self, window: &[WardCoordinate]) -> WindowOutcome {
        let mut tasks = JoinSet::new();
        for ward in window.iter().cloned() {
            let provider = Arc::clone(&self.provider);
            let permits = Arc::clone(&self.permits);
            tasks.spawn(
                async move {
                    let Ok(_permit) = permits.acquire_owned().await else {
                        return Err(WardFailure::PermitsClosed);
                    };
                    Ok(provider.fetch_ward(&ward).await?)
                }
                .in_current_span(),
            );
        }

        let mut records = Vec::with_capacity(window.len());
        let mut failed = 0usize;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(record)) => records.push(record),
                Ok(Err(err)) => {
                    debug!(error = %err, "ward excluded from window");
                    failed += 1;
                }
                Err(err) => {
                    error!(error = %err, "fetch task aborted");
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            warn!(failed, wards = window.len(), "window finished with failed wards");
        }

        let mut outcome = WindowOutcome {
            wards: window.len(),
            successful: records.len(),
            failed,
            ..Default::default()
        };

        if !records.is_empty() {
            let write = upsert_weather_batch(self.store.as_ref(), &records, self.write_chunk_size).await;
            let alerts = replace_alerts(self.store.as_ref(), &records, self.write_chunk_size).await;
            info!(rows = write.written, alerts, failed_chunks = write.errors.len(), "window persisted");
            outcome.rows_written = write.written;
            outcome.failed_chunks = write.errors.len();
            outcome.alerts_written = alerts;
        }

        outcome
    }
}

/// Runs one sync against Postgres. With `dry_run`, wards are still read from
/// Postgres but results are kept in memory instead of being written.
pub async fn run_sync(config: &RunConfig, dry_run: bool) -> Result<RunReport> {
    config.options.validate()?;

    let pg = Arc::new(PgStore::connect(&config.database_url).await?);
    let provider = Arc::new(ForecastClient::new(config.provider_config())?);
    let store: Arc<dyn WeatherStore> = if dry_run {
        info!("dry run: results are kept in memory");
        Arc::new(MemoryStore::new())
    } else {
        pg.clone()
    };

    info!(
        batch_size = config.options.batch_size,
        delay_ms = config.options.delay_ms,
        max_wards = config.options.effective_max_wards(),
        test_mode = config.options.test_mode,
        "starting sync"
    );

    SyncPipeline::new(config.options, provider, store)
        .run_once(pg.as_ref())
        .await
}

pub async fn run_sync_once_from_env() -> Result<RunReport> {
    let config = RunConfig::from_env()?;
    run_sync(&config, false).await
}
