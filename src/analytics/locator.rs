//! Selects the images to analyze for one hour bucket.

use anyhow::Result;
use chrono::{DateTime, Duration, DurationRound, Utc};

use crate::db::{Database, TimeSeriesSample};

/// Upper bound on images analyzed per hour.
pub const MAX_IMAGES_PER_HOUR: usize = 5;

/// How far back a batch may be requested, in hours.
pub const MAX_HOURS_AGO: i64 = 24 * 365;

/// Truncate a timestamp to the start of its hour.
pub fn truncate_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(Duration::hours(1)).unwrap_or(ts)
}

/// Keep at most `count` items at a constant stride, preserving order.
///
/// With `n > count` the stride is `n / count` and index `i` maps to
/// `floor(i * stride)`; the first item is always kept.
pub fn evenly_spaced<T>(items: Vec<T>, count: usize) -> Vec<T> {
    let n = items.len();
    if n <= count || count == 0 {
        return items;
    }

    let stride = n as f64 / count as f64;
    let mut wanted = (0..count).map(|i| (i as f64 * stride).floor() as usize).peekable();

    items
        .into_iter()
        .enumerate()
        .filter_map(|(idx, item)| {
            if wanted.peek() == Some(&idx) {
                wanted.next();
                Some(item)
            } else {
                None
            }
        })
        .collect()
}

/// Samples with imagery in the hour starting at `hour_start`, downsampled
/// to at most [`MAX_IMAGES_PER_HOUR`] in ascending time order.
pub fn locate(db: &Database, hour_start: DateTime<Utc>) -> Result<Vec<TimeSeriesSample>> {
    let start = truncate_to_hour(hour_start);
    let end = start + Duration::hours(1);
    let samples = db.samples_with_images_between(start, end)?;
    let total = samples.len();
    let selected = evenly_spaced(samples, MAX_IMAGES_PER_HOUR);

    tracing::debug!(hour = %start, total, selected = selected.len(), "Located hourly images");
    Ok(selected)
}
