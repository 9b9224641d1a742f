//! Ward source paging plus the chunked weather upsert and alert replace writers.

pub mod memory;
pub mod postgres;

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{error, info, warn};
use wardcast_core::{AlertRecord, WardCoordinate, WeatherRecord};

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub const CRATE_NAME: &str = "wardcast-storage";

pub const DEFAULT_WRITE_CHUNK_SIZE: usize = 500;
pub const WARD_PAGE_SIZE: usize = 1000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serializing row payload: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// One `weather_cache` row, keyed by `ward_code`.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherRow {
    pub ward_code: String,
    pub latitude: f64,
    pub longitude: f64,
    pub temperature_c: Option<f64>,
    pub condition_text: Option<String>,
    pub condition_icon: Option<String>,
    pub wind_kph: Option<f64>,
    pub humidity: Option<f64>,
    pub is_day: Option<bool>,
    pub precip_mm: Option<f64>,
    pub daily_forecast: JsonValue,
    pub alerts_summary: Option<JsonValue>,
    pub raw_response: JsonValue,
    pub fetched_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WeatherRow {
    pub fn from_record(record: &WeatherRecord, now: DateTime<Utc>) -> Result<Self, serde_json::Error> {
        let alerts_summary = record
            .alerts_summary()
            .map(serde_json::to_value)
            .transpose()?;
        Ok(Self {
            ward_code: record.ward_code.clone(),
            latitude: record.latitude,
            longitude: record.longitude,
            temperature_c: record.temperature_c,
            condition_text: record.condition_text.clone(),
            condition_icon: record.condition_icon.clone(),
            wind_kph: record.wind_kph,
            humidity: record.humidity,
            is_day: record.is_day,
            precip_mm: record.precip_mm,
            daily_forecast: serde_json::to_value(&record.forecast_days)?,
            alerts_summary,
            raw_response: record.raw.clone(),
            fetched_at: now,
            updated_at: now,
        })
    }
}

/// One `weather_alerts` row.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRow {
    pub ward_code: String,
    pub event: Option<String>,
    pub headline: Option<String>,
    pub description: Option<String>,
    pub severity: Option<String>,
    pub urgency: Option<String>,
    pub areas: Option<String>,
    pub category: Option<String>,
    pub certainty: Option<String>,
    pub instruction: Option<String>,
    pub effective: Option<String>,
    pub expires: Option<String>,
}

impl AlertRow {
    pub fn from_alert(ward_code: &str, alert: &AlertRecord) -> Self {
        Self {
            ward_code: ward_code.to_string(),
            event: alert.event.clone(),
            headline: alert.headline.clone(),
            description: alert.description.clone(),
            severity: alert.severity.clone(),
            urgency: alert.urgency.clone(),
            areas: alert.areas.clone(),
            category: alert.category.clone(),
            certainty: alert.certainty.clone(),
            instruction: alert.instruction.clone(),
            effective: alert.effective.clone(),
            expires: alert.expires.clone(),
        }
    }
}

#[async_trait]
pub trait WardSource: Send + Sync {
    async fn fetch_ward_page(&self, offset: usize, limit: usize) -> Result<Vec<WardCoordinate>, StoreError>;
}

#[async_trait]
pub trait WeatherStore: Send + Sync {
    /// Insert-or-replace every row by `ward_code`.
    async fn upsert_weather_chunk(&self, rows: &[WeatherRow]) -> Result<(), StoreError>;

    /// Delete all stored alerts for `ward_codes`, then insert `rows` in chunks.
    /// Returns the number of inserted rows.
    async fn replace_alerts(
        &self,
        ward_codes: &[String],
        rows: &[AlertRow],
        chunk_size: usize,
    ) -> Result<usize, StoreError>;
}

/// Reads the ward list. `max_wards == 0` pages through everything,
/// otherwise a single bounded page is requested.
pub async fn load_wards(source: &dyn WardSource, max_wards: usize) -> Result<Vec<WardCoordinate>, StoreError> {
    if max_wards > 0 {
        let wards = source.fetch_ward_page(0, max_wards).await?;
        info!(count = wards.len(), limit = max_wards, "fetched ward coordinates");
        return Ok(wards);
    }

    let mut wards = Vec::new();
    let mut offset = 0;
    loop {
        let page = source.fetch_ward_page(offset, WARD_PAGE_SIZE).await?;
        let page_len = page.len();
        if page_len == 0 {
            break;
        }
        wards.extend(page);
        info!(offset, page_len, total = wards.len(), "fetched ward page");
        if page_len < WARD_PAGE_SIZE {
            break;
        }
        offset += WARD_PAGE_SIZE;
    }

    info!(total = wards.len(), "fetched all ward coordinates");
    Ok(wards)
}

#[derive(Debug)]
pub struct ChunkError {
    pub chunk_index: usize,
    pub rows: usize,
    pub error: StoreError,
}

/// Outcome of a chunked write: rows from successful chunks plus every chunk failure.
#[derive(Debug, Default)]
pub struct ChunkedWrite {
    pub written: usize,
    pub errors: Vec<ChunkError>,
}

impl ChunkedWrite {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Upserts `records` as weather rows in chunks of `chunk_size`. A failed chunk
/// does not stop the remaining ones.
pub async fn upsert_weather_batch(
    store: &dyn WeatherStore,
    records: &[WeatherRecord],
    chunk_size: usize,
) -> ChunkedWrite {
    let now = Utc::now();
    let mut rows = Vec::with_capacity(records.len());
    for record in records {
        match WeatherRow::from_record(record, now) {
            Ok(row) => rows.push(row),
            Err(err) => {
                warn!(ward_code = %record.ward_code, error = %err, "skipping weather row that failed to serialize")
            }
        }
    }

    let mut outcome = ChunkedWrite::default();
    for (chunk_index, chunk) in rows.chunks(chunk_size.max(1)).enumerate() {
        match store.upsert_weather_chunk(chunk).await {
            Ok(()) => outcome.written += chunk.len(),
            Err(error) => {
                error!(chunk_index, rows = chunk.len(), error = %error, "weather upsert failed for chunk");
                outcome.errors.push(ChunkError {
                    chunk_index,
                    rows: chunk.len(),
                    error,
                });
            }
        }
    }
    outcome
}

/// Replaces the stored alert set of every ward in `records` that currently
/// reports alerts. Wards without alerts are not touched. Any failure is logged
/// and reported as zero inserted alerts.
pub async fn replace_alerts(store: &dyn WeatherStore, records: &[WeatherRecord], chunk_size: usize) -> usize {
    let mut ward_codes = BTreeSet::new();
    let mut rows = Vec::new();
    for record in records {
        if record.alerts.is_empty() {
            continue;
        }
        ward_codes.insert(record.ward_code.clone());
        rows.extend(
            record
                .alerts
                .iter()
                .map(|alert| AlertRow::from_alert(&record.ward_code, alert)),
        );
    }

    if rows.is_empty() {
        return 0;
    }

    let ward_codes = ward_codes.into_iter().collect::<Vec<_>>();
    match store.replace_alerts(&ward_codes, &rows, chunk_size.max(1)).await {
        Ok(inserted) => inserted,
        Err(err) => {
            error!(wards = ward_codes.len(), alerts = rows.len(), error = %err, "alert replace failed");
            0
        }
    }
}
