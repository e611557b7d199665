//! Watermark-based delta computation for cumulative daily counters.
//!
//! The external counter may be re-reported any number of times and may even
//! shrink when the source corrects its samples.  Only growth past the
//! watermark is ever credited, and the watermark never moves down.

use chrono::NaiveDate;
use tracing::debug;

use crate::error::SyncError;
use crate::schema::DailyWatermark;

/// Compute the not-yet-credited part of `raw_count` and advance `watermark`.
///
/// `raw_count` is today's cumulative counter.  Call
/// [`day_boundary::normalize`](crate::day_boundary::normalize) first so a
/// stale watermark from a previous day never clamps today's counter.
pub fn reconcile(
    watermark: &mut DailyWatermark,
    raw_count: i64,
    today: NaiveDate,
) -> Result<u64, SyncError> {
    let raw = u64::try_from(raw_count).map_err(|_| SyncError::InvalidInput {
        what: "cumulative step count",
        value: raw_count,
    })?;

    let delta = raw.saturating_sub(watermark.last_absorbed_count);
    if delta > 0 {
        watermark.last_absorbed_count = raw;
        watermark.as_of_date = today;
    } else if raw < watermark.last_absorbed_count {
        debug!(
            raw,
            watermark = watermark.last_absorbed_count,
            "counter regressed below watermark; holding"
        );
    }
    Ok(delta)
}
