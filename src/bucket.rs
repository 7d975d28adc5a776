//! Fixed-cardinality sparkline reconstruction.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    BucketGrid, InstanceId, MetricStore, N_POINTS, ProfileError, ProfileResult, RequestScope,
    SeriesTarget, TimeWindow,
};

/// Metric every sparkline plots.
pub const SERIES_METRIC: &str = "query_time";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketPoint {
    pub point_index: usize,
    #[serde(with = "time::serde::rfc3339")]
    pub bucket_start: OffsetDateTime,
    pub count: u64,
    pub sum: f64,
    pub avg: f64,
}

impl BucketPoint {
    fn placeholder(point_index: usize, grid: &BucketGrid) -> Self {
        Self {
            point_index,
            bucket_start: grid.anchor(point_index),
            count: 0,
            sum: 0.0,
            avg: 0.0,
        }
    }
}

/// Builds series for one request; every series shares the same grid.
#[derive(Clone, Copy)]
pub struct Bucketizer<'a> {
    store: &'a dyn MetricStore,
    scope: &'a RequestScope,
    instance_id: InstanceId,
    window: TimeWindow,
    grid: BucketGrid,
}

impl<'a> Bucketizer<'a> {
    pub fn new(
        store: &'a dyn MetricStore,
        scope: &'a RequestScope,
        instance_id: InstanceId,
        window: TimeWindow,
    ) -> Self {
        Self {
            store,
            scope,
            instance_id,
            window,
            grid: window.grid(),
        }
    }

    pub fn grid(&self) -> &BucketGrid {
        &self.grid
    }

    /// Exactly `N_POINTS` points ordered by index; missing points are zero placeholders.
    pub fn series(&self, target: SeriesTarget) -> ProfileResult<Vec<BucketPoint>> {
        self.scope.check("series")?;
        tracing::debug!(instance_id = self.instance_id, ?target, "bucket aggregate");
        let rows = self
            .store
            .bucket_aggregate(self.instance_id, &self.window, target, &self.grid)
            .map_err(ProfileError::store("series"))?;

        let mut points: [BucketPoint; N_POINTS] =
            std::array::from_fn(|i| BucketPoint::placeholder(i, &self.grid));
        for row in rows {
            let Some(slot) = points.get_mut(row.point) else {
                tracing::warn!(point = row.point, ?target, "store row outside the sparkline grid");
                continue;
            };
            *slot = BucketPoint {
                point_index: row.point,
                bucket_start: row.start,
                count: row.count,
                sum: row.sum,
                avg: row.avg,
            };
        }
        Ok(points.into())
    }
}

/// One-off series outside a profile request.
pub fn series(
    store: &dyn MetricStore,
    instance_id: InstanceId,
    window: &TimeWindow,
    target: SeriesTarget,
) -> ProfileResult<Vec<BucketPoint>> {
    let scope = RequestScope::unbounded();
    Bucketizer::new(store, &scope, instance_id, *window).series(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, CLASS_A, CLASS_B, INSTANCE, T0};
    use crate::{BucketRow, MemoryStore, StoreError};

    fn assert_uniform(points: &[BucketPoint]) {
        assert_eq!(points.len(), N_POINTS);
        for (i, p) in points.iter().enumerate() {
            assert_eq!(p.point_index, i);
        }
    }

    #[test]
    fn sparse_class_series_is_gap_filled() {
        let store = MemoryStore::new(fixtures::two_classes());
        let points = series(&store, INSTANCE, &fixtures::window(), SeriesTarget::Class(CLASS_B))
            .expect("series");
        assert_uniform(&points);

        let filled = points.iter().filter(|p| p.count > 0).collect::<Vec<_>>();
        assert_eq!(filled.len(), 5);
        assert_eq!(filled.iter().map(|p| p.sum).sum::<f64>(), 50.0);

        // B's bucket at T0 + 60 is 3480s before the end: point 58.
        assert_eq!(points[58].count, 1);
        assert_eq!(points[58].bucket_start.unix_timestamp(), T0 + 60);
    }

    #[test]
    fn placeholders_carry_grid_anchors() {
        let store = MemoryStore::new(fixtures::two_classes());
        let window = fixtures::window();
        let points =
            series(&store, INSTANCE, &window, SeriesTarget::Class(CLASS_A)).expect("series");
        let end = window.end.unix_timestamp();
        for p in points.iter().filter(|p| p.count == 0) {
            assert_eq!(p.bucket_start.unix_timestamp(), end - p.point_index as i64 * 60);
            assert_eq!(p.sum, 0.0);
            assert_eq!(p.avg, 0.0);
        }
        assert_eq!(points[0].bucket_start.unix_timestamp(), end);
        assert_eq!(points[59].bucket_start.unix_timestamp(), T0);
    }

    #[test]
    fn global_series_reads_instance_table() {
        let store = MemoryStore::new(fixtures::two_classes());
        let points = series(&store, INSTANCE, &fixtures::window(), SeriesTarget::AllClasses)
            .expect("series");
        assert_uniform(&points);
        assert_eq!(points.iter().map(|p| p.count).sum::<u64>(), 15);
        assert_eq!(points.iter().map(|p| p.sum).sum::<f64>(), 150.0);
    }

    #[test]
    fn empty_store_still_yields_sixty_points() {
        let store = MemoryStore::default();
        let points = series(&store, INSTANCE, &fixtures::window(), SeriesTarget::AllClasses)
            .expect("series");
        assert_uniform(&points);
        assert!(points.iter().all(|p| p.count == 0));
    }

    struct OffGrid;

    impl MetricStore for OffGrid {
        fn scalar_aggregate(
            &self,
            _: &crate::AggregateQuery,
        ) -> crate::StoreResult<crate::ScalarRow> {
            Err(StoreError::Unavailable("unused".to_string()))
        }
        fn grouped_aggregate(
            &self,
            _: &crate::AggregateQuery,
        ) -> crate::StoreResult<Vec<crate::ClassRow>> {
            Err(StoreError::Unavailable("unused".to_string()))
        }
        fn bucket_aggregate(
            &self,
            _: InstanceId,
            _: &TimeWindow,
            _: SeriesTarget,
            grid: &BucketGrid,
        ) -> crate::StoreResult<Vec<BucketRow>> {
            Ok(vec![
                BucketRow {
                    point: 3,
                    start: grid.anchor(3),
                    count: 2,
                    sum: 4.0,
                    avg: 2.0,
                },
                BucketRow {
                    point: 75,
                    start: grid.anchor(75),
                    count: 9,
                    sum: 9.0,
                    avg: 1.0,
                },
            ])
        }
        fn count_distinct_classes(
            &self,
            _: InstanceId,
            _: &TimeWindow,
            _: &crate::ClassFilter,
        ) -> crate::StoreResult<u64> {
            Ok(0)
        }
        fn lookup_metadata(&self, _: &[u64]) -> crate::StoreResult<Vec<crate::QueryClassMeta>> {
            Ok(Vec::new())
        }
        fn search_class_ids(
            &self,
            _: InstanceId,
            _: &TimeWindow,
            _: &str,
        ) -> crate::StoreResult<std::collections::BTreeSet<u64>> {
            Ok(Default::default())
        }
    }

    #[test]
    fn rows_beyond_the_grid_are_dropped() {
        let points = series(&OffGrid, INSTANCE, &fixtures::window(), SeriesTarget::AllClasses)
            .expect("series");
        assert_uniform(&points);
        assert_eq!(points[3].count, 2);
        assert_eq!(points.iter().map(|p| p.count).sum::<u64>(), 2);
    }

    #[test]
    fn store_failure_is_annotated() {
        let store = MemoryStore::new(fixtures::two_classes()).fail_on("bucket_aggregate");
        let err = series(&store, INSTANCE, &fixtures::window(), SeriesTarget::AllClasses)
            .expect_err("should fail");
        assert!(matches!(err, ProfileError::Store { op: "series", .. }));
    }
}
