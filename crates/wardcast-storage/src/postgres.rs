//! PostgreSQL backend for the ward source and weather store.

use anyhow::Context;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use wardcast_core::WardCoordinate;

use crate::{AlertRow, StoreError, WardSource, WeatherRow, WeatherStore};

const WEATHER_COLUMNS: &str = "ward_code, latitude, longitude, temperature_c, condition_text, \
     condition_icon, wind_kph, humidity, is_day, precip_mm, daily_forecast, alerts_summary, \
     raw_response, fetched_at, updated_at";

const ALERT_COLUMNS: &str = "ward_code, event, headline, description, severity, urgency, areas, \
     category, certainty, instruction, effective, expires";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("connecting to postgres")?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .context("applying migrations")?;
        Ok(())
    }
}

#[async_trait]
impl WardSource for PgStore {
    async fn fetch_ward_page(&self, offset: usize, limit: usize) -> Result<Vec<WardCoordinate>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT ward_code, latitude, longitude
              FROM weather_cache
             ORDER BY ward_code
             LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(WardCoordinate {
                ward_code: row.try_get("ward_code")?,
                latitude: row.try_get("latitude")?,
                longitude: row.try_get("longitude")?,
            });
        }
        Ok(out)
    }
}

#[async_trait]
impl WeatherStore for PgStore {
    async fn upsert_weather_chunk(&self, rows: &[WeatherRow]) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut qb = QueryBuilder::<Postgres>::new(format!("INSERT INTO weather_cache ({WEATHER_COLUMNS}) "));
        qb.push_values(rows, |mut b, row| {
            b.push_bind(row.ward_code.clone())
                .push_bind(row.latitude)
                .push_bind(row.longitude)
                .push_bind(row.temperature_c)
                .push_bind(row.condition_text.clone())
                .push_bind(row.condition_icon.clone())
                .push_bind(row.wind_kph)
                .push_bind(row.humidity)
                .push_bind(row.is_day)
                .push_bind(row.precip_mm)
                .push_bind(row.daily_forecast.clone())
                .push_bind(row.alerts_summary.clone())
                .push_bind(row.raw_response.clone())
                .push_bind(row.fetched_at)
                .push_bind(row.updated_at);
        });
        qb.push(
            r#"
            ON CONFLICT (ward_code) DO UPDATE SET
                latitude = EXCLUDED.latitude,
                longitude = EXCLUDED.longitude,
                temperature_c = EXCLUDED.temperature_c,
                condition_text = EXCLUDED.condition_text,
                condition_icon = EXCLUDED.condition_icon,
                wind_kph = EXCLUDED.wind_kph,
                humidity = EXCLUDED.humidity,
                is_day = EXCLUDED.is_day,
                precip_mm = EXCLUDED.precip_mm,
                daily_forecast = EXCLUDED.daily_forecast,
                alerts_summary = EXCLUDED.alerts_summary,
                raw_response = EXCLUDED.raw_response,
                fetched_at = EXCLUDED.fetched_at,
                updated_at = EXCLUDED.updated_at
            "#,
        );

        qb.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn replace_alerts(
        &self,
        ward_codes: &[String],
        rows: &[AlertRow],
        chunk_size: usize,
    ) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM weather_alerts WHERE ward_code = ANY($1)")
            .bind(ward_codes.to_vec())
            .execute(&mut *tx)
            .await?;

        let mut inserted = 0usize;
        for chunk in rows.chunks(chunk_size.max(1)) {
            let mut qb = QueryBuilder::<Postgres>::new(format!("INSERT INTO weather_alerts ({ALERT_COLUMNS}) "));
            qb.push_values(chunk, |mut b, row| {
                b.push_bind(row.ward_code.clone())
                    .push_bind(row.event.clone())
                    .push_bind(row.headline.clone())
                    .push_bind(row.description.clone())
                    .push_bind(row.severity.clone())
                    .push_bind(row.urgency.clone())
                    .push_bind(row.areas.clone())
                    .push_bind(row.category.clone())
                    .push_bind(row.certainty.clone())
                    .push_bind(row.instruction.clone())
                    .push_bind(row.effective.clone())
                    .push_bind(row.expires.clone());
            });
            qb.build().execute(&mut *tx).await?;
            inserted += chunk.len();
        }

        tx.commit().await?;
        Ok(inserted)
    }
}
