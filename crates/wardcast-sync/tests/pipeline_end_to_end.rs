//! End-to-end runs of the sync pipeline against a mock WeatherAPI server and the in-memory store.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use wardcast_core::WardCoordinate;
use wardcast_provider::{ForecastClient, ProviderConfig, Sleeper};
use wardcast_storage::{AlertRow, MemoryStore};
use wardcast_sync::{RunOptions, SyncPipeline};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Default)]
struct RecordingSleeper {
    waits: Mutex<Vec<Duration>>,
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.waits.lock().unwrap().push(duration);
    }
}

fn wards(count: usize) -> Vec<WardCoordinate> {
    (0..count)
        .map(|i| WardCoordinate::new(format!("ZA{i:04}"), -30.0, 20.0 + i as f64))
        .collect()
}

fn forecast_body(alert_event: Option<&str>) -> serde_json::Value {
    let alerts = match alert_event {
        Some(event) => serde_json::json!([{ "event": event, "headline": "Take care", "desc": "Details" }]),
        None => serde_json::json!([]),
    };
    serde_json::json!({
        "current": {
            "temp_c": 16.0,
            "condition": { "text": "Overcast", "icon": "//cdn.weatherapi.com/122.png" },
            "wind_kph": 11.2,
            "humidity": 82,
            "is_day": 0,
            "precip_mm": 0.3
        },
        "forecast": { "forecastday": [
            { "date": "2026-10-17", "day": { "maxtemp_c": 19.0, "mintemp_c": 9.0 }, "astro": { "sunrise": "05:40 AM" } },
            { "date": "2026-10-18", "day": { "maxtemp_c": 21.0, "mintemp_c": 10.0 } },
            { "date": "2026-10-19", "day": { "maxtemp_c": 23.0, "mintemp_c": 12.0 } }
        ]},
        "alerts": { "alert": alerts }
    })
}

fn client(server: &MockServer) -> Arc<ForecastClient> {
    client_with(server, Duration::from_secs(5), Arc::new(RecordingSleeper::default()))
}

fn client_with(server: &MockServer, timeout: Duration, backoff: Arc<RecordingSleeper>) -> Arc<ForecastClient> {
    let config = ProviderConfig {
        base_url: server.uri(),
        timeout,
        ..ProviderConfig::new("e2e-key")
    };
    Arc::new(ForecastClient::new(config).unwrap().with_sleeper(backoff))
}

#[tokio::test]
async fn hundred_twenty_wards_two_permanent_failures() {
    let server = MockServer::start().await;
    for failing in ["-30,25", "-30,131"] {
        Mock::given(method("GET"))
            .and(path("/forecast.json"))
            .and(query_param("q", failing))
            .respond_with(ResponseTemplate::new(400).set_body_string("No matching location found."))
            .with_priority(1)
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/forecast.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body(None)))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let throttle = Arc::new(RecordingSleeper::default());
    let options = RunOptions {
        batch_size: 50,
        delay_ms: 200,
        ..RunOptions::default()
    };
    let pipeline = SyncPipeline::new(options, client(&server), store.clone()).with_sleeper(throttle.clone());

    let report = pipeline.run(wards(120)).await.unwrap();

    let sizes = report.windows.iter().map(|w| w.wards).collect::<Vec<_>>();
    assert_eq!(sizes, vec![50, 50, 20]);
    assert_eq!(report.summary.total_wards, 120);
    assert_eq!(report.summary.successful, 118);
    assert_eq!(report.summary.failed, 2);
    assert!(report.summary.elapsed_seconds >= 0.0);
    if report.summary.elapsed_seconds > 0.0 {
        assert!(report.summary.wards_per_second > 0.0);
    }
    assert_eq!(server.received_requests().await.unwrap().len(), 120);

    assert_eq!(store.weather_rows().await.len(), 118);
    assert!(store.weather_row("ZA0005").await.is_none());
    assert!(store.weather_row("ZA0111").await.is_none());
    assert_eq!(throttle.waits.lock().unwrap().len(), 2);

    let row = store.weather_row("ZA0000").await.unwrap();
    assert_eq!(row.latitude, -30.0);
    assert_eq!(row.longitude, 20.0);
    assert_eq!(row.temperature_c, Some(16.0));
    assert_eq!(row.condition_text.as_deref(), Some("Overcast"));
    assert_eq!(row.condition_icon.as_deref(), Some("//cdn.weatherapi.com/122.png"));
    assert_eq!(row.wind_kph, Some(11.2));
    assert_eq!(row.humidity, Some(82.0));
    assert_eq!(row.is_day, Some(false));
    assert_eq!(row.precip_mm, Some(0.3));
    assert_eq!(row.daily_forecast.as_array().unwrap().len(), 3);
    assert_eq!(row.daily_forecast[0]["sunrise"], "05:40 AM");
    assert!(row.alerts_summary.is_none());
    assert_eq!(row.raw_response, forecast_body(None));
}

#[tokio::test]
async fn alerts_replace_previous_set_and_quiet_wards_keep_theirs() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/forecast.json"))
        .and(query_param("q", "-30,20"))
        .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body(Some("Heavy Rain"))))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/forecast.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body(None)))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let stale = |ward: &str, event: &str| AlertRow {
        ward_code: ward.to_string(),
        event: Some(event.to_string()),
        headline: None,
        description: None,
        severity: None,
        urgency: None,
        areas: None,
        category: None,
        certainty: None,
        instruction: None,
        effective: None,
        expires: None,
    };
    store
        .seed_alerts(vec![stale("ZA0000", "Old Wind"), stale("ZA0001", "Old Frost")])
        .await;

    let options = RunOptions {
        batch_size: 2,
        delay_ms: 0,
        ..RunOptions::default()
    };
    let pipeline = SyncPipeline::new(options, client(&server), store.clone());

    let report = pipeline.run(wards(2)).await.unwrap();

    assert_eq!(report.alerts_written, 1);
    let replaced = store.alerts_for("ZA0000").await;
    assert_eq!(replaced.len(), 1);
    assert_eq!(replaced[0].event.as_deref(), Some("Heavy Rain"));
    assert_eq!(replaced[0].description.as_deref(), Some("Details"));

    // Staleness caveat: ZA0001 reported no alerts, so its old alert is left in place.
    let untouched = store.alerts_for("ZA0001").await;
    assert_eq!(untouched.len(), 1);
    assert_eq!(untouched[0].event.as_deref(), Some("Old Frost"));

    assert_eq!(store.alert_count().await, 2);

    let row = store.weather_row("ZA0000").await.unwrap();
    assert_eq!(row.alerts_summary.unwrap()[0]["event"], "Heavy Rain");
}

#[tokio::test]
async fn ward_timing_out_on_every_attempt_is_counted_failed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/forecast.json"))
        .and(query_param("q", "-30,22"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(forecast_body(None))
                .set_delay(Duration::from_secs(2)),
        )
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/forecast.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body(None)))
        .mount(&server)
        .await;

    let backoff = Arc::new(RecordingSleeper::default());
    let provider = client_with(&server, Duration::from_millis(200), backoff.clone());
    let store = Arc::new(MemoryStore::new());
    let options = RunOptions {
        batch_size: 4,
        delay_ms: 0,
        ..RunOptions::default()
    };
    let pipeline = SyncPipeline::new(options, provider, store.clone());

    let report = pipeline.run(wards(4)).await.unwrap();

    assert_eq!(report.summary.total_wards, 4);
    assert_eq!(report.summary.successful, 3);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.windows[0].failed, 1);
    assert!(store.weather_row("ZA0002").await.is_none());
    assert_eq!(store.weather_rows().await.len(), 3);

    let timed_out = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|request| request.url.query_pairs().any(|(k, v)| k == "q" && v == "-30,22"))
        .count();
    assert_eq!(timed_out, 3);
    assert_eq!(
        *backoff.waits.lock().unwrap(),
        vec![Duration::from_secs(2), Duration::from_secs(4)]
    );
}
