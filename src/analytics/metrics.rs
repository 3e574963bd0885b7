//! Aggregated people/vehicle metrics per location.
//!
//! Samples are joined to locations through `source_id`. Samples whose
//! source has no location (or a location without an address) never appear
//! in any result.

use anyhow::Result;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::db::Database;

pub const DEFAULT_LIMIT: u32 = 100;
pub const MAX_LIMIT: u32 = 1000;

/// Time bucketing for the metrics series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeAggregation {
    #[default]
    None,
    Hour,
    Day,
}

impl TimeAggregation {
    /// `strftime` pattern producing the bucket start, or `None` for raw rows.
    fn bucket_format(self) -> Option<&'static str> {
        match self {
            TimeAggregation::None => None,
            TimeAggregation::Hour => Some("%Y-%m-%dT%H:00:00Z"),
            TimeAggregation::Day => Some("%Y-%m-%dT00:00:00Z"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetricsQuery {
    pub skip: u32,
    pub limit: u32,
    pub address_filter: Option<String>,
    pub location_id: Option<String>,
    pub time_aggregation: TimeAggregation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsAverages {
    pub people_count: Option<f64>,
    pub vehicle_count: Option<f64>,
}

/// One row of the series: a raw sample or one aggregated bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsPoint {
    pub timestamp: String,
    pub source_id: String,
    pub address: String,
    pub people_count: Option<f64>,
    pub vehicle_count: Option<f64>,
    pub sample_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pagination {
    pub skip: u32,
    pub limit: u32,
    pub total: i64,
    pub has_more: bool,
}

impl Pagination {
    fn new(skip: u32, limit: u32, total: i64) -> Self {
        Self {
            skip,
            limit,
            total,
            has_more: i64::from(skip) + i64::from(limit) < total,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsReport {
    pub averages: MetricsAverages,
    pub timeseries: Vec<MetricsPoint>,
    pub pagination: Pagination,
    pub aggregation: TimeAggregation,
}

/// Check a page size, returning a message suitable for the caller.
pub fn validate_limit(limit: u32) -> std::result::Result<u32, String> {
    if (1..=MAX_LIMIT).contains(&limit) {
        Ok(limit)
    } else {
        Err(format!("limit must be between 1 and {}", MAX_LIMIT))
    }
}

/// Substring pattern for `LIKE ... ESCAPE '\'` against `LOWER(address)`.
///
/// SQLite's `LOWER` folds ASCII only, so the filter is folded the same way:
/// ASCII letters match case-insensitively, other letters must match exactly.
fn like_pattern(filter: Option<&str>) -> Option<String> {
    let filter = filter.map(str::trim).filter(|f| !f.is_empty())?;
    let mut pattern = String::with_capacity(filter.len() + 2);
    pattern.push('%');
    for ch in filter.chars().map(|c| c.to_ascii_lowercase()) {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    Some(pattern)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Shared join and filter. `?1` is the address pattern, `?2` the location id.
const SAMPLE_SCOPE: &str = r#"
    FROM timeseries_analytics t
    LEFT JOIN locations l ON l.id = t.source_id
    WHERE l.address IS NOT NULL
      AND (?1 IS NULL OR LOWER(l.address) LIKE ?1 ESCAPE '\')
      AND (?2 IS NULL OR t.source_id = ?2)
"#;

fn series_sql(aggregation: TimeAggregation) -> String {
    match aggregation.bucket_format() {
        None => format!(
            r#"
            SELECT t.timestamp, t.source_id, l.address,
                   CAST(t.people_ct AS REAL), CAST(t.vehicle_ct AS REAL), 1
            {SAMPLE_SCOPE}
            ORDER BY t.timestamp DESC, t.id DESC
            LIMIT ?3 OFFSET ?4
            "#
        ),
        Some(format) => format!(
            r#"
            SELECT strftime('{format}', t.timestamp) AS bucket, t.source_id, l.address,
                   AVG(t.people_ct), AVG(t.vehicle_ct), COUNT(*)
            {SAMPLE_SCOPE}
            GROUP BY bucket, t.source_id, l.address
            ORDER BY bucket DESC, t.source_id, l.address
            LIMIT ?3 OFFSET ?4
            "#
        ),
    }
}

fn count_sql(aggregation: TimeAggregation) -> String {
    match aggregation.bucket_format() {
        None => format!("SELECT COUNT(*) {SAMPLE_SCOPE}"),
        Some(format) => format!(
            r#"
            SELECT COUNT(*) FROM (
                SELECT strftime('{format}', t.timestamp) AS bucket
                {SAMPLE_SCOPE}
                GROUP BY bucket, t.source_id, l.address
            )
            "#
        ),
    }
}

/// Averaged, optionally bucketed metrics over all matching samples.
///
/// Averages cover every matching sample; the series is paged after
/// aggregation and ordered newest first.
pub fn get_metrics(db: &Database, query: &MetricsQuery) -> Result<MetricsReport> {
    let conn = db.conn()?;
    let pattern = like_pattern(query.address_filter.as_deref());
    let location_id = non_empty(query.location_id.as_deref());
    let aggregation = query.time_aggregation;

    let averages = conn.query_row(
        &format!("SELECT AVG(t.people_ct), AVG(t.vehicle_ct) {SAMPLE_SCOPE}"),
        params![pattern, location_id],
        |row| {
            Ok(MetricsAverages {
                people_count: row.get(0)?,
                vehicle_count: row.get(1)?,
            })
        },
    )?;

    let total: i64 = conn.query_row(
        &count_sql(aggregation),
        params![pattern, location_id],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(&series_sql(aggregation))?;
    let timeseries = stmt
        .query_map(
            params![pattern, location_id, query.limit, query.skip],
            |row| {
                Ok(MetricsPoint {
                    timestamp: row.get(0)?,
                    source_id: row.get(1)?,
                    address: row.get(2)?,
                    people_count: row.get(3)?,
                    vehicle_count: row.get(4)?,
                    sample_count: row.get(5)?,
                })
            },
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(MetricsReport {
        averages,
        timeseries,
        pagination: Pagination::new(query.skip, query.limit, total),
        aggregation,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationSample {
    pub timestamp: String,
    pub people_count: Option<i64>,
    pub vehicle_count: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationMetrics {
    pub location_id: String,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub sample_count: i64,
    pub total_people: Option<i64>,
    pub total_vehicles: Option<i64>,
    pub latest_timestamp: Option<String>,
    pub timeseries: Vec<LocationSample>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsFilters {
    pub location_id: Option<String>,
    pub address_filter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationMetricsReport {
    pub locations: Vec<LocationMetrics>,
    pub filters: MetricsFilters,
    pub pagination: Pagination,
}

const LOCATION_SCOPE: &str = r#"
    FROM locations l
    WHERE (?1 IS NULL OR LOWER(l.address) LIKE ?1 ESCAPE '\')
      AND (?2 IS NULL OR l.id = ?2)
"#;

fn location_series(conn: &Connection, location_id: &str) -> rusqlite::Result<Vec<LocationSample>> {
    let mut stmt = conn.prepare_cached(
        r#"
        SELECT timestamp, people_ct, vehicle_ct
        FROM timeseries_analytics
        WHERE source_id = ?1
        ORDER BY timestamp DESC, id DESC
        "#,
    )?;
    let rows = stmt.query_map([location_id], |row| {
        Ok(LocationSample {
            timestamp: row.get(0)?,
            people_count: row.get(1)?,
            vehicle_count: row.get(2)?,
        })
    })?;
    rows.collect()
}

/// One row per location with totals, each carrying its full raw series.
///
/// Locations are ordered by their newest sample; locations without samples
/// come last.
pub fn get_metrics_by_location(
    db: &Database,
    location_id: Option<&str>,
    address_filter: Option<&str>,
    skip: u32,
    limit: u32,
) -> Result<LocationMetricsReport> {
    let conn = db.conn()?;
    let pattern = like_pattern(address_filter);
    let location_id = non_empty(location_id);

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) {LOCATION_SCOPE}"),
        params![pattern, location_id],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(
        r#"
        SELECT l.id, l.address, l.latitude, l.longitude,
               COUNT(t.id), SUM(t.people_ct), SUM(t.vehicle_ct), MAX(t.timestamp) AS latest
        FROM locations l
        LEFT JOIN timeseries_analytics t ON t.source_id = l.id
        WHERE (?1 IS NULL OR LOWER(l.address) LIKE ?1 ESCAPE '\')
          AND (?2 IS NULL OR l.id = ?2)
        GROUP BY l.id, l.address, l.latitude, l.longitude
        ORDER BY latest DESC NULLS LAST, l.id
        LIMIT ?3 OFFSET ?4
        "#,
    )?;
    let mut locations = stmt
        .query_map(params![pattern, location_id, limit, skip], |row| {
            Ok(LocationMetrics {
                location_id: row.get(0)?,
                address: row.get(1)?,
                latitude: row.get(2)?,
                longitude: row.get(3)?,
                sample_count: row.get(4)?,
                total_people: row.get(5)?,
                total_vehicles: row.get(6)?,
                latest_timestamp: row.get(7)?,
                timeseries: Vec::new(),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    for location in &mut locations {
        location.timeseries = location_series(&conn, &location.location_id)?;
    }

    Ok(LocationMetricsReport {
        locations,
        filters: MetricsFilters {
            location_id: location_id.map(str::to_string),
            address_filter: non_empty(address_filter).map(str::to_string),
        },
        pagination: Pagination::new(skip, limit, total),
    })
}
