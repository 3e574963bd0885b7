//! Time-series detection samples.
//!
//! Rows are produced by the external ingestion process; this crate only
//! inserts them in tests and tooling, and otherwise reads them and writes
//! `analysis_result`.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use super::{format_timestamp, Database};

/// One camera detection snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeriesSample {
    pub id: i64,
    pub timestamp: String,
    pub source_id: String,
    pub image_ref: Option<String>,
    pub people_count: Option<i64>,
    pub vehicle_count: Option<i64>,
    #[serde(rename = "detections")]
    pub detections_blob: Option<String>,
    #[serde(rename = "analysis_result")]
    pub analysis_text: Option<String>,
}

/// Fields of a sample as written by ingestion.
#[derive(Debug, Clone)]
pub struct NewSample {
    pub timestamp: DateTime<Utc>,
    pub source_id: String,
    pub image_ref: Option<String>,
    pub people_count: Option<i64>,
    pub vehicle_count: Option<i64>,
    pub detections_blob: Option<String>,
}

impl NewSample {
    pub fn new(timestamp: DateTime<Utc>, source_id: impl Into<String>) -> Self {
        Self {
            timestamp,
            source_id: source_id.into(),
            image_ref: None,
            people_count: None,
            vehicle_count: None,
            detections_blob: None,
        }
    }

    pub fn with_image(mut self, image_ref: impl Into<String>) -> Self {
        self.image_ref = Some(image_ref.into());
        self
    }

    pub fn with_counts(mut self, people: i64, vehicles: i64) -> Self {
        self.people_count = Some(people);
        self.vehicle_count = Some(vehicles);
        self
    }
}

/// Filter for already-analyzed samples.
#[derive(Debug, Clone)]
pub struct AnalyzedSampleFilter {
    pub source_id: Option<String>,
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    pub limit: u32,
}

const SAMPLE_COLUMNS: &str = "id, timestamp, source_id, output_img_path, people_ct, vehicle_ct, detections, analysis_result";

pub(crate) fn row_to_sample(row: &rusqlite::Row) -> rusqlite::Result<TimeSeriesSample> {
    Ok(TimeSeriesSample {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        source_id: row.get(2)?,
        image_ref: row.get(3)?,
        people_count: row.get(4)?,
        vehicle_count: row.get(5)?,
        detections_blob: row.get(6)?,
        analysis_text: row.get(7)?,
    })
}

impl Database {
    pub fn insert_sample(&self, sample: &NewSample) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO timeseries_analytics
                (timestamp, source_id, output_img_path, people_ct, vehicle_ct, detections)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                format_timestamp(sample.timestamp),
                sample.source_id,
                sample.image_ref,
                sample.people_count,
                sample.vehicle_count,
                sample.detections_blob,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_sample(&self, id: i64) -> Result<Option<TimeSeriesSample>> {
        let conn = self.conn()?;
        let sample = conn
            .query_row(
                &format!("SELECT {SAMPLE_COLUMNS} FROM timeseries_analytics WHERE id = ?1"),
                [id],
                row_to_sample,
            )
            .optional()?;
        Ok(sample)
    }

    /// Samples with imagery in `[start, end)`, oldest first.
    pub fn samples_with_images_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TimeSeriesSample>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {SAMPLE_COLUMNS}
            FROM timeseries_analytics
            WHERE timestamp >= ?1
              AND timestamp < ?2
              AND output_img_path IS NOT NULL
            ORDER BY timestamp ASC, id ASC
            "#
        ))?;
        let samples = stmt
            .query_map(
                params![format_timestamp(start), format_timestamp(end)],
                row_to_sample,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(samples)
    }

    pub fn latest_sample_with_image(&self, source_id: Option<&str>) -> Result<Option<TimeSeriesSample>> {
        let conn = self.conn()?;
        let sample = conn
            .query_row(
                &format!(
                    r#"
                    SELECT {SAMPLE_COLUMNS}
                    FROM timeseries_analytics
                    WHERE output_img_path IS NOT NULL AND (?1 IS NULL OR source_id = ?1)
                    ORDER BY timestamp DESC, id DESC
                    LIMIT 1
                    "#
                ),
                [source_id],
                row_to_sample,
            )
            .optional()?;
        Ok(sample)
    }

    /// Samples that carry both imagery and an analysis, newest first.
    pub fn analyzed_samples(&self, filter: &AnalyzedSampleFilter) -> Result<Vec<TimeSeriesSample>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {SAMPLE_COLUMNS}
            FROM timeseries_analytics
            WHERE timestamp >= ?1
              AND timestamp <= ?2
              AND analysis_result IS NOT NULL
              AND output_img_path IS NOT NULL
              AND (?3 IS NULL OR source_id = ?3)
            ORDER BY timestamp DESC, id DESC
            LIMIT ?4
            "#
        ))?;
        let samples = stmt
            .query_map(
                params![
                    format_timestamp(filter.since),
                    format_timestamp(filter.until),
                    filter.source_id,
                    filter.limit,
                ],
                row_to_sample,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(samples)
    }

    /// Distinct source identifiers that have produced imagery.
    pub fn traffic_sources(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT DISTINCT source_id
            FROM timeseries_analytics
            WHERE output_img_path IS NOT NULL
            ORDER BY source_id
            "#,
        )?;
        let sources = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(sources)
    }
}
