//! The metric store contract the profile engine reads from.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use std::collections::BTreeSet;

use crate::{
    AggregateQuery, BucketGrid, ClassFilter, InstanceId, QueryClassId, SeriesTarget, TimeWindow,
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("unknown metric column {0:?}")]
    UnknownMetric(String),

    #[error("decode error: {0}")]
    Decode(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Instance-wide totals for a window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScalarRow {
    /// Sum of bucket durations, zero when nothing was recorded.
    pub covered_seconds: u64,
    pub count: u64,
    /// One value per `AggregateQuery::exprs`.
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassRow {
    pub query_class_id: QueryClassId,
    pub count: u64,
    pub values: Vec<Option<f64>>,
}

/// Aggregate of every bucket mapped onto one grid point.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketRow {
    pub point: usize,
    pub start: OffsetDateTime,
    pub count: u64,
    pub sum: f64,
    pub avg: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryClassMeta {
    pub id: QueryClassId,
    pub checksum: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub fingerprint: String,
}

/// Read-only aggregate surface over pre-aggregated metric buckets.
///
/// Per-class queries read the class bucket table; `scalar_aggregate` and the
/// `AllClasses` series read the instance-wide table. Windows select buckets by
/// `start ∈ [begin, end)` unless stated otherwise.
pub trait MetricStore: Send + Sync {
    /// Instance-wide totals. Always yields a row; empty windows coalesce to zero.
    fn scalar_aggregate(&self, query: &AggregateQuery) -> StoreResult<ScalarRow>;

    /// Per-class aggregates grouped by class id, ordered descending by
    /// `query.order_by` and paged by `query.page`.
    fn grouped_aggregate(&self, query: &AggregateQuery) -> StoreResult<Vec<ClassRow>>;

    /// Query-time count/sum/avg per grid point for `target`.
    fn bucket_aggregate(
        &self,
        instance_id: InstanceId,
        window: &TimeWindow,
        target: SeriesTarget,
        grid: &BucketGrid,
    ) -> StoreResult<Vec<BucketRow>>;

    fn count_distinct_classes(
        &self,
        instance_id: InstanceId,
        window: &TimeWindow,
        filter: &ClassFilter,
    ) -> StoreResult<u64>;

    fn lookup_metadata(&self, ids: &[QueryClassId]) -> StoreResult<Vec<QueryClassMeta>>;

    /// Classes with a bucket overlapping `window` whose checksum equals `text`,
    /// whose abstract starts with it, or whose fingerprint contains it.
    fn search_class_ids(
        &self,
        instance_id: InstanceId,
        window: &TimeWindow,
        text: &str,
    ) -> StoreResult<BTreeSet<QueryClassId>>;
}
