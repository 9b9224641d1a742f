//! In-process store. Backs `--dry-run` and the test suites.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use tokio::sync::Mutex;
use wardcast_core::WardCoordinate;

use crate::{AlertRow, StoreError, WardSource, WeatherRow, WeatherStore};

#[derive(Debug, Default)]
struct MemoryState {
    weather: BTreeMap<String, WeatherRow>,
    alerts: Vec<AlertRow>,
    weather_chunk_calls: usize,
    alert_replace_calls: usize,
    alert_insert_chunks: usize,
    page_requests: Vec<(usize, usize)>,
    failing_weather_chunks: BTreeSet<usize>,
    fail_alerts: bool,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    wards: Vec<WardCoordinate>,
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_wards(wards: Vec<WardCoordinate>) -> Self {
        Self {
            wards,
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Make the `call_index`-th weather chunk write (0-based, across the store's lifetime) fail.
    pub async fn fail_weather_chunk(&self, call_index: usize) {
        self.state.lock().await.failing_weather_chunks.insert(call_index);
    }

    pub async fn fail_alert_writes(&self) {
        self.state.lock().await.fail_alerts = true;
    }

    pub async fn seed_alerts(&self, rows: Vec<AlertRow>) {
        self.state.lock().await.alerts.extend(rows);
    }

    pub async fn weather_row(&self, ward_code: &str) -> Option<WeatherRow> {
        self.state.lock().await.weather.get(ward_code).cloned()
    }

    pub async fn weather_rows(&self) -> Vec<WeatherRow> {
        self.state.lock().await.weather.values().cloned().collect()
    }

    pub async fn alerts_for(&self, ward_code: &str) -> Vec<AlertRow> {
        self.state
            .lock()
            .await
            .alerts
            .iter()
            .filter(|row| row.ward_code == ward_code)
            .cloned()
            .collect()
    }

    pub async fn alert_count(&self) -> usize {
        self.state.lock().await.alerts.len()
    }

    pub async fn weather_chunk_calls(&self) -> usize {
        self.state.lock().await.weather_chunk_calls
    }

    pub async fn alert_replace_calls(&self) -> usize {
        self.state.lock().await.alert_replace_calls
    }

    pub async fn alert_insert_chunks(&self) -> usize {
        self.state.lock().await.alert_insert_chunks
    }

    pub async fn page_requests(&self) -> Vec<(usize, usize)> {
        self.state.lock().await.page_requests.clone()
    }
}

#[async_trait]
impl WardSource for MemoryStore {
    async fn fetch_ward_page(&self, offset: usize, limit: usize) -> Result<Vec<WardCoordinate>, StoreError> {
        self.state.lock().await.page_requests.push((offset, limit));
        Ok(self.wards.iter().skip(offset).take(limit).cloned().collect())
    }
}

#[async_trait]
impl WeatherStore for MemoryStore {
    async fn upsert_weather_chunk(&self, rows: &[WeatherRow]) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let call_index = state.weather_chunk_calls;
        state.weather_chunk_calls += 1;
        if state.failing_weather_chunks.contains(&call_index) {
            return Err(StoreError::Unavailable(format!("weather chunk {call_index} rejected")));
        }
        for row in rows {
            state.weather.insert(row.ward_code.clone(), row.clone());
        }
        Ok(())
    }

    async fn replace_alerts(
        &self,
        ward_codes: &[String],
        rows: &[AlertRow],
        chunk_size: usize,
    ) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        state.alert_replace_calls += 1;
        if state.fail_alerts {
            return Err(StoreError::Unavailable("alert write rejected".to_string()));
        }
        state.alerts.retain(|row| !ward_codes.contains(&row.ward_code));
        for chunk in rows.chunks(chunk_size.max(1)) {
            state.alerts.extend_from_slice(chunk);
            state.alert_insert_chunks += 1;
        }
        Ok(rows.len())
    }
}
