//! In-process `MetricStore` over a JSON dataset of pre-aggregated buckets.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Mutex;

use crate::{
    AggregateExpr, AggregateQuery, BucketGrid, BucketRow, CLASS_COUNT_COLUMN, ClassFilter,
    ClassRow, GLOBAL_COUNT_COLUMN, InstanceId, MetricStore, ProfileResult, QueryClassId,
    QueryClassMeta, SERIES_METRIC, ScalarRow, SeriesTarget, StoreError, StoreResult, TimeWindow,
};

/// Per-class bucket; `metrics` maps `<metric>_<stat>` columns to values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassBucket {
    pub instance_id: InstanceId,
    pub query_class_id: QueryClassId,
    #[serde(with = "time::serde::rfc3339")]
    pub start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end: OffsetDateTime,
    pub query_count: u64,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

/// Instance-wide bucket covering every class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalBucket {
    pub instance_id: InstanceId,
    #[serde(with = "time::serde::rfc3339")]
    pub start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end: OffsetDateTime,
    pub total_query_count: u64,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub query_classes: Vec<QueryClassMeta>,
    #[serde(default)]
    pub class_metrics: Vec<ClassBucket>,
    #[serde(default)]
    pub global_metrics: Vec<GlobalBucket>,
}

trait BucketColumns {
    fn start(&self) -> OffsetDateTime;
    fn end(&self) -> OffsetDateTime;
    fn count(&self) -> u64;
    fn metric(&self, column: &str) -> Option<f64>;

    fn column(&self, name: &str, count_column: &str) -> Option<f64> {
        if name == count_column {
            Some(self.count() as f64)
        } else {
            self.metric(name)
        }
    }
}

impl BucketColumns for ClassBucket {
    fn start(&self) -> OffsetDateTime {
        self.start
    }
    fn end(&self) -> OffsetDateTime {
        self.end
    }
    fn count(&self) -> u64 {
        self.query_count
    }
    fn metric(&self, column: &str) -> Option<f64> {
        self.metrics.get(column).copied()
    }
}

impl BucketColumns for GlobalBucket {
    fn start(&self) -> OffsetDateTime {
        self.start
    }
    fn end(&self) -> OffsetDateTime {
        self.end
    }
    fn count(&self) -> u64 {
        self.total_query_count
    }
    fn metric(&self, column: &str) -> Option<f64> {
        self.metrics.get(column).copied()
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Dataset,
    failing: Option<&'static str>,
    calls: Mutex<Vec<&'static str>>,
}

impl MemoryStore {
    pub fn new(data: Dataset) -> Self {
        Self {
            data,
            failing: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn load(path: &Path) -> ProfileResult<Self> {
        let bytes = std::fs::read(path)?;
        let data: Dataset = serde_json::from_slice(&bytes)?;
        Ok(Self::new(data))
    }

    /// Makes the named store operation fail with `StoreError::Unavailable`.
    pub fn fail_on(mut self, op: &'static str) -> Self {
        self.failing = Some(op);
        self
    }

    /// Store operations served so far, in call order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn dataset(&self) -> &Dataset {
        &self.data
    }

    fn enter(&self, op: &'static str) -> StoreResult<()> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(op);
        }
        if self.failing == Some(op) {
            return Err(StoreError::Unavailable(format!("{op} failed")));
        }
        Ok(())
    }

    fn class_buckets<'a>(
        &'a self,
        instance_id: InstanceId,
        window: &'a TimeWindow,
        filter: &'a ClassFilter,
    ) -> impl Iterator<Item = &'a ClassBucket> + 'a {
        self.data.class_metrics.iter().filter(move |b| {
            b.instance_id == instance_id
                && window.contains(b.start)
                && filter.admits(b.query_class_id)
        })
    }

    fn global_buckets<'a>(
        &'a self,
        instance_id: InstanceId,
        window: &'a TimeWindow,
    ) -> impl Iterator<Item = &'a GlobalBucket> + 'a {
        self.data
            .global_metrics
            .iter()
            .filter(move |b| b.instance_id == instance_id && window.contains(b.start))
    }

    fn check_columns(&self, query: &AggregateQuery) -> StoreResult<()> {
        let known = |column: &str| {
            column == CLASS_COUNT_COLUMN
                || column == GLOBAL_COUNT_COLUMN
                || self.data.class_metrics.iter().any(|b| b.metrics.contains_key(column))
                || self.data.global_metrics.iter().any(|b| b.metrics.contains_key(column))
        };
        let empty = self.data.class_metrics.is_empty() && self.data.global_metrics.is_empty();
        for expr in query.exprs.iter().chain(query.order_by.iter()) {
            if let Some(column) = expr.columns().into_iter().find(|c| !empty && !known(c)) {
                return Err(StoreError::UnknownMetric(column.to_string()));
            }
        }
        Ok(())
    }
}

fn evaluate<B: BucketColumns>(
    expr: &AggregateExpr,
    rows: &[&B],
    count_column: &str,
) -> Option<f64> {
    let values = |column: &str| {
        rows.iter()
            .filter_map(|r| r.column(column, count_column))
            .collect::<Vec<_>>()
    };
    match expr {
        AggregateExpr::Sum(c) => {
            let v = values(c);
            (!v.is_empty()).then(|| v.iter().sum())
        }
        AggregateExpr::Min(c) => values(c).into_iter().reduce(f64::min),
        AggregateExpr::Max(c) => values(c).into_iter().reduce(f64::max),
        AggregateExpr::Mean(c) => {
            let v = values(c);
            (!v.is_empty()).then(|| v.iter().sum::<f64>() / v.len() as f64)
        }
        AggregateExpr::Ratio(num, den) => {
            let num = evaluate(num, rows, count_column)?;
            let den = evaluate(den, rows, count_column)?;
            (den != 0.0).then(|| num / den)
        }
    }
}

fn summarize<B: BucketColumns>(query: &AggregateQuery, rows: &[&B]) -> (u64, Vec<Option<f64>>) {
    let count = rows.iter().map(|r| r.count()).sum();
    let values = query
        .exprs
        .iter()
        .map(|e| evaluate(e, rows, &query.count_column))
        .collect();
    (count, values)
}

fn covered_seconds<B: BucketColumns>(rows: &[&B]) -> u64 {
    rows.iter()
        .map(|r| (r.end() - r.start()).whole_seconds().max(0) as u64)
        .sum()
}

/// Descending, nulls last.
fn descending(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn matches_search(meta: &QueryClassMeta, text: &str) -> bool {
    let needle = text.to_ascii_lowercase();
    meta.checksum.eq_ignore_ascii_case(text)
        || meta.abstract_text.to_ascii_lowercase().starts_with(&needle)
        || meta.fingerprint.to_ascii_lowercase().contains(&needle)
}

impl MetricStore for MemoryStore {
    fn scalar_aggregate(&self, query: &AggregateQuery) -> StoreResult<ScalarRow> {
        self.enter("scalar_aggregate")?;
        self.check_columns(query)?;
        let (covered, (count, values)) = match &query.filter {
            ClassFilter::All => {
                let rows = self
                    .global_buckets(query.instance_id, &query.window)
                    .collect::<Vec<_>>();
                (covered_seconds(&rows), summarize(query, &rows))
            }
            ClassFilter::Only(_) => {
                let rows = self
                    .class_buckets(query.instance_id, &query.window, &query.filter)
                    .collect::<Vec<_>>();
                (covered_seconds(&rows), summarize(query, &rows))
            }
        };
        Ok(ScalarRow {
            covered_seconds: covered,
            count,
            values,
        })
    }

    fn grouped_aggregate(&self, query: &AggregateQuery) -> StoreResult<Vec<ClassRow>> {
        self.enter("grouped_aggregate")?;
        self.check_columns(query)?;
        let mut groups = BTreeMap::<QueryClassId, Vec<&ClassBucket>>::new();
        for b in self.class_buckets(query.instance_id, &query.window, &query.filter) {
            groups.entry(b.query_class_id).or_default().push(b);
        }

        let mut rows = groups
            .into_iter()
            .map(|(id, buckets)| {
                let order = query
                    .order_by
                    .as_ref()
                    .and_then(|e| evaluate(e, &buckets, &query.count_column));
                let (count, values) = summarize(query, &buckets);
                (
                    order,
                    ClassRow {
                        query_class_id: id,
                        count,
                        values,
                    },
                )
            })
            .collect::<Vec<_>>();
        if query.order_by.is_some() {
            rows.sort_by(|a, b| descending(a.0, b.0));
        }

        let rows = rows.into_iter().map(|(_, row)| row);
        Ok(match query.page {
            Some(page) => rows
                .skip(page.offset as usize)
                .take(page.limit as usize)
                .collect(),
            None => rows.collect(),
        })
    }

    fn bucket_aggregate(
        &self,
        instance_id: InstanceId,
        window: &TimeWindow,
        target: SeriesTarget,
        grid: &BucketGrid,
    ) -> StoreResult<Vec<BucketRow>> {
        self.enter("bucket_aggregate")?;
        let sum_column = format!("{SERIES_METRIC}_sum");
        let avg_column = format!("{SERIES_METRIC}_avg");

        // (count, sum, avg total, avg samples)
        let mut points = BTreeMap::<usize, (u64, f64, f64, u64)>::new();
        let mut add = |start: OffsetDateTime, count: u64, sum: Option<f64>, avg: Option<f64>| {
            let Some(point) = grid.point_of(start.unix_timestamp()) else {
                return;
            };
            let acc = points.entry(point).or_default();
            acc.0 += count;
            acc.1 += sum.unwrap_or(0.0);
            if let Some(avg) = avg {
                acc.2 += avg;
                acc.3 += 1;
            }
        };
        match target {
            SeriesTarget::AllClasses => {
                for b in self.global_buckets(instance_id, window) {
                    add(b.start, b.total_query_count, b.metric(&sum_column), b.metric(&avg_column));
                }
            }
            SeriesTarget::Class(id) => {
                let only = ClassFilter::Only(BTreeSet::from([id]));
                for b in self.class_buckets(instance_id, window, &only) {
                    add(b.start, b.query_count, b.metric(&sum_column), b.metric(&avg_column));
                }
            }
        }

        Ok(points
            .into_iter()
            .map(|(point, (count, sum, avg_total, avg_samples))| BucketRow {
                point,
                start: grid.anchor(point),
                count,
                sum,
                avg: if avg_samples == 0 {
                    0.0
                } else {
                    avg_total / avg_samples as f64
                },
            })
            .collect())
    }

    fn count_distinct_classes(
        &self,
        instance_id: InstanceId,
        window: &TimeWindow,
        filter: &ClassFilter,
    ) -> StoreResult<u64> {
        self.enter("count_distinct_classes")?;
        let ids = self
            .class_buckets(instance_id, window, filter)
            .map(|b| b.query_class_id)
            .collect::<BTreeSet<_>>();
        Ok(ids.len() as u64)
    }

    fn lookup_metadata(&self, ids: &[QueryClassId]) -> StoreResult<Vec<QueryClassMeta>> {
        self.enter("lookup_metadata")?;
        let wanted = ids.iter().copied().collect::<BTreeSet<_>>();
        Ok(self
            .data
            .query_classes
            .iter()
            .filter(|m| wanted.contains(&m.id))
            .cloned()
            .collect())
    }

    fn search_class_ids(
        &self,
        instance_id: InstanceId,
        window: &TimeWindow,
        text: &str,
    ) -> StoreResult<BTreeSet<QueryClassId>> {
        self.enter("search_class_ids")?;
        let active = self
            .data
            .class_metrics
            .iter()
            .filter(|b| b.instance_id == instance_id && window.overlaps(b.start, b.end))
            .map(|b| b.query_class_id)
            .collect::<BTreeSet<_>>();
        Ok(self
            .data
            .query_classes
            .iter()
            .filter(|m| active.contains(&m.id) && matches_search(m, text))
            .map(|m| m.id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, CLASS_A, CLASS_B, INSTANCE};
    use crate::{QueryShape, StandardResolver, requested_statistics};

    fn scalar(store: &MemoryStore, filter: &ClassFilter) -> ScalarRow {
        let names = requested_statistics(&StandardResolver);
        let query = QueryShape::new(
            INSTANCE,
            fixtures::window(),
            "query_time",
            GLOBAL_COUNT_COLUMN,
        )
        .statistics(&names)
        .filter(filter)
        .compile(&StandardResolver);
        store.scalar_aggregate(&query).expect("scalar")
    }

    #[test]
    fn unfiltered_scalar_reads_the_instance_table() {
        let store = MemoryStore::new(fixtures::two_classes());
        let row = scalar(&store, &ClassFilter::All);
        assert_eq!(row.covered_seconds, 900);
        assert_eq!(row.count, 15);
        assert_eq!(row.values[0], Some(150.0));
    }

    #[test]
    fn filtered_scalar_sums_only_admitted_classes() {
        let mut data = fixtures::two_classes();
        // Instance-wide rows must not leak into a filtered scalar.
        data.global_metrics.push(fixtures::global_bucket(INSTANCE, 1500, 99, 9900.0));
        let store = MemoryStore::new(data);

        let row = scalar(&store, &ClassFilter::Only(BTreeSet::from([CLASS_B])));
        assert_eq!(row.covered_seconds, 5 * 60);
        assert_eq!(row.count, 5);
        // sum, min, avg, med, p95, max
        assert_eq!(row.values[0], Some(50.0));
        assert_eq!(row.values[1], Some(5.0));
        // avg divides by the total count column, read from the class bucket's query_count.
        assert_eq!(row.values[2], Some(10.0));
        assert_eq!(row.values[5], Some(20.0));

        let both = scalar(&store, &ClassFilter::Only(BTreeSet::from([CLASS_A, CLASS_B])));
        assert_eq!(both.covered_seconds, 15 * 60);
        assert_eq!(both.count, 15);
        assert_eq!(both.values[0], Some(150.0));
    }

    #[test]
    fn checksum_search_ignores_case() {
        let store = MemoryStore::new(fixtures::two_classes());
        let ids = store
            .search_class_ids(INSTANCE, &fixtures::window(), "3a1f0c5e77d2b9a4")
            .expect("search");
        assert_eq!(ids, BTreeSet::from([CLASS_A]));
    }
}
