//! Core domain model for wardcast: ward inputs, normalized weather records, run summary.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "wardcast-core";

/// Number of forecast days requested per ward; also the cap on `forecast_days`.
pub const FORECAST_DAYS: usize = 3;

/// A ward and its single representative coordinate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WardCoordinate {
    pub ward_code: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl WardCoordinate {
    pub fn new(ward_code: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            ward_code: ward_code.into(),
            latitude,
            longitude,
        }
    }

    /// `lat,lng` pair as the provider expects it in the `q` parameter.
    pub fn query_point(&self) -> String {
        format!("{},{}", self.latitude, self.longitude)
    }
}

/// One day of the short-range forecast. Stored as-is in the `daily_forecast` document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ForecastDay {
    pub date: Option<String>,
    pub maxtemp_c: Option<f64>,
    pub mintemp_c: Option<f64>,
    pub avgtemp_c: Option<f64>,
    pub maxwind_kph: Option<f64>,
    pub totalprecip_mm: Option<f64>,
    pub avghumidity: Option<f64>,
    pub condition_text: Option<String>,
    pub condition_icon: Option<String>,
    pub daily_chance_of_rain: Option<f64>,
    pub daily_chance_of_snow: Option<f64>,
    pub uv: Option<f64>,
    pub sunrise: Option<String>,
    pub sunset: Option<String>,
}

/// An active weather alert for a ward.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AlertRecord {
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

/// Normalized provider result for one ward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
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
    pub forecast_days: Vec<ForecastDay>,
    pub alerts: Vec<AlertRecord>,
    /// Verbatim provider payload, kept for audit.
    pub raw: serde_json::Value,
}

impl WeatherRecord {
    /// `None` when the provider reported no alerts, so storage can tell
    /// "nothing collected" apart from an empty list.
    pub fn alerts_summary(&self) -> Option<&[AlertRecord]> {
        if self.alerts.is_empty() {
            None
        } else {
            Some(&self.alerts)
        }
    }
}

/// Completion artifact of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_wards: usize,
    pub successful: usize,
    pub failed: usize,
    pub elapsed_seconds: f64,
    pub wards_per_second: f64,
}

impl RunSummary {
    pub fn from_counts(total_wards: usize, successful: usize, failed: usize, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        let wards_per_second = if secs > 0.0 {
            round_tenths(total_wards as f64 / secs)
        } else {
            0.0
        };
        Self {
            total_wards,
            successful,
            failed,
            elapsed_seconds: round_tenths(secs),
            wards_per_second,
        }
    }
}

fn round_tenths(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
