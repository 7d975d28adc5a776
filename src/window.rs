//! Half-open reporting windows and the fixed 60-point sparkline grid.

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime, UtcOffset};

use crate::{ProfileError, ProfileResult};

/// Number of points in every reconstructed series.
pub const N_POINTS: usize = 60;

/// `[begin, end)` at second resolution, normalized to UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    #[serde(with = "time::serde::rfc3339")]
    pub begin: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end: OffsetDateTime,
}

impl TimeWindow {
    pub fn new(begin: OffsetDateTime, end: OffsetDateTime) -> ProfileResult<Self> {
        let begin = truncate_to_second(begin)?;
        let end = truncate_to_second(end)?;
        if end <= begin {
            return Err(ProfileError::InvalidWindow(format!(
                "end {end} must be after begin {begin}"
            )));
        }
        Ok(Self { begin, end })
    }

    pub fn from_unix(begin: i64, end: i64) -> ProfileResult<Self> {
        let parse = |ts: i64| {
            OffsetDateTime::from_unix_timestamp(ts)
                .map_err(|e| ProfileError::InvalidWindow(format!("timestamp {ts}: {e}")))
        };
        Self::new(parse(begin)?, parse(end)?)
    }

    /// Length of the window; the divisor for QPS and load.
    pub fn interval_seconds(&self) -> f64 {
        (self.end - self.begin).as_seconds_f64()
    }

    /// `start ∈ [begin, end)`
    pub fn contains(&self, start: OffsetDateTime) -> bool {
        start >= self.begin && start < self.end
    }

    /// `[start, end)` shares at least one second with the window.
    pub fn overlaps(&self, start: OffsetDateTime, end: OffsetDateTime) -> bool {
        start < self.end && end > self.begin
    }

    pub fn grid(&self) -> BucketGrid {
        let end_ts = self.end.unix_timestamp();
        let span = (end_ts - self.begin.unix_timestamp()) / (N_POINTS as i64 - 1);
        BucketGrid {
            end: self.end,
            end_ts,
            span: span.max(1),
        }
    }
}

fn truncate_to_second(ts: OffsetDateTime) -> ProfileResult<OffsetDateTime> {
    ts.to_offset(UtcOffset::UTC)
        .replace_nanosecond(0)
        .map_err(|e| ProfileError::InvalidWindow(e.to_string()))
}

/// Bucket boundaries shared by every series of one profile request.
///
/// Point 0 anchors on the window end; point `i` anchors `i * span` seconds earlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketGrid {
    end: OffsetDateTime,
    end_ts: i64,
    span: i64,
}

impl BucketGrid {
    pub fn end_ts(&self) -> i64 {
        self.end_ts
    }

    pub fn span_seconds(&self) -> i64 {
        self.span
    }

    /// Point index a bucket starting at `start_ts` falls into, if it lies on the grid.
    pub fn point_of(&self, start_ts: i64) -> Option<usize> {
        let offset = self.end_ts - start_ts;
        if offset < 0 {
            return None;
        }
        let point = (offset / self.span) as usize;
        (point < N_POINTS).then_some(point)
    }

    pub fn anchor_ts(&self, point: usize) -> i64 {
        self.end_ts - point as i64 * self.span
    }

    pub fn anchor(&self, point: usize) -> OffsetDateTime {
        self.end
            .saturating_sub(Duration::seconds(point as i64 * self.span))
    }
}
