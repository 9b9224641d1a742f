//! Maps a WeatherAPI `forecast.json` payload onto the wardcast record shapes.
//!
//! Every provider field is optional here. A field the provider leaves out stays
//! `None` in the record rather than turning into a zero or an empty string.
//! Numeric fields also accept numeric strings, and any other unexpected value
//! is read as absent instead of failing the whole payload.

use serde::{Deserialize, Deserializer};
use serde_json::Value as JsonValue;
use wardcast_core::{AlertRecord, ForecastDay, WardCoordinate, WeatherRecord, FORECAST_DAYS};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ForecastPayload {
    current: Option<CurrentBlock>,
    forecast: Option<ForecastBlock>,
    alerts: Option<AlertsBlock>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConditionBlock {
    text: Option<String>,
    icon: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CurrentBlock {
    #[serde(deserialize_with = "lenient_f64")]
    temp_c: Option<f64>,
    condition: Option<ConditionBlock>,
    #[serde(deserialize_with = "lenient_f64")]
    wind_kph: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    humidity: Option<f64>,
    #[serde(deserialize_with = "lenient_flag")]
    is_day: Option<bool>,
    #[serde(deserialize_with = "lenient_f64")]
    precip_mm: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ForecastBlock {
    #[serde(deserialize_with = "null_as_empty")]
    forecastday: Vec<ForecastDayBlock>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ForecastDayBlock {
    date: Option<String>,
    day: Option<DayBlock>,
    astro: Option<AstroBlock>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DayBlock {
    #[serde(deserialize_with = "lenient_f64")]
    maxtemp_c: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    mintemp_c: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    avgtemp_c: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    maxwind_kph: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    totalprecip_mm: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    avghumidity: Option<f64>,
    condition: Option<ConditionBlock>,
    #[serde(deserialize_with = "lenient_f64")]
    daily_chance_of_rain: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    daily_chance_of_snow: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    uv: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AstroBlock {
    sunrise: Option<String>,
    sunset: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AlertsBlock {
    #[serde(deserialize_with = "null_as_empty")]
    alert: Vec<AlertBlock>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AlertBlock {
    event: Option<String>,
    headline: Option<String>,
    desc: Option<String>,
    severity: Option<String>,
    urgency: Option<String>,
    areas: Option<String>,
    category: Option<String>,
    certainty: Option<String>,
    instruction: Option<String>,
    effective: Option<String>,
    expires: Option<String>,
}

fn number_from(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = JsonValue::deserialize(deserializer)?;
    Ok(number_from(&value))
}

/// `1`/`0` as sent by WeatherAPI; booleans and numeric strings are accepted too.
fn lenient_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = JsonValue::deserialize(deserializer)?;
    Ok(match value {
        JsonValue::Bool(flag) => Some(flag),
        other => number_from(&other).map(|n| n != 0.0),
    })
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Builds a [`WeatherRecord`] for `ward` from the provider's JSON body.
///
/// The payload is kept verbatim in `raw`. Only the first [`FORECAST_DAYS`]
/// forecast days are retained.
pub fn normalize_forecast(
    ward: &WardCoordinate,
    raw: JsonValue,
) -> Result<WeatherRecord, serde_json::Error> {
    let payload = ForecastPayload::deserialize(&raw)?;

    let current = payload.current.unwrap_or_default();
    let condition = current.condition.unwrap_or_default();

    let forecast_days = payload
        .forecast
        .unwrap_or_default()
        .forecastday
        .into_iter()
        .take(FORECAST_DAYS)
        .map(forecast_day)
        .collect();

    let alerts = payload
        .alerts
        .unwrap_or_default()
        .alert
        .into_iter()
        .map(alert_record)
        .collect();

    Ok(WeatherRecord {
        ward_code: ward.ward_code.clone(),
        latitude: ward.latitude,
        longitude: ward.longitude,
        temperature_c: current.temp_c,
        condition_text: condition.text,
        condition_icon: condition.icon,
        wind_kph: current.wind_kph,
        humidity: current.humidity,
        is_day: current.is_day,
        precip_mm: current.precip_mm,
        forecast_days,
        alerts,
        raw,
    })
}

fn forecast_day(block: ForecastDayBlock) -> ForecastDay {
    let day = block.day.unwrap_or_default();
    let astro = block.astro.unwrap_or_default();
    let condition = day.condition.unwrap_or_default();
    ForecastDay {
        date: block.date,
        maxtemp_c: day.maxtemp_c,
        mintemp_c: day.mintemp_c,
        avgtemp_c: day.avgtemp_c,
        maxwind_kph: day.maxwind_kph,
        totalprecip_mm: day.totalprecip_mm,
        avghumidity: day.avghumidity,
        condition_text: condition.text,
        condition_icon: condition.icon,
        daily_chance_of_rain: day.daily_chance_of_rain,
        daily_chance_of_snow: day.daily_chance_of_snow,
        uv: day.uv,
        sunrise: astro.sunrise,
        sunset: astro.sunset,
    }
}

fn alert_record(block: AlertBlock) -> AlertRecord {
    AlertRecord {
        event: block.event,
        headline: block.headline,
        description: block.desc,
        severity: block.severity,
        urgency: block.urgency,
        areas: block.areas,
        category: block.category,
        certainty: block.certainty,
        instruction: block.instruction,
        effective: block.effective,
        expires: block.expires,
    }
}
