//! Ranked, time-windowed query-class profiles.

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;

use crate::{
    AggregateResolver, BucketPoint, Bucketizer, CLASS_COUNT_COLUMN, ClassFilter, ClassRow,
    GLOBAL_COUNT_COLUMN, InstanceId, MetricStore, Page, ProfileError, ProfileResult,
    QueryClassId, QueryShape, RankBy, RequestScope, SeriesTarget, StandardResolver, Stat,
    TimeWindow, requested_statistics, resolve_search,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedEntry {
    /// 0 for the instance-wide entry, 1-based for ranked classes.
    pub rank: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_class_id: Option<QueryClassId>,
    pub stat: Stat,
    pub percentage: f64,
    pub qps: f64,
    pub load: f64,
    pub series: Vec<BucketPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_id: Option<String>,
    #[serde(rename = "abstract", skip_serializing_if = "Option::is_none")]
    pub abstract_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl RankedEntry {
    fn new(
        rank: u32,
        query_class_id: Option<QueryClassId>,
        stat: Stat,
        global_sum: f64,
        interval: f64,
    ) -> Self {
        let percentage = match query_class_id {
            None => 1.0,
            Some(_) if global_sum == 0.0 => 0.0,
            Some(_) => stat.sum / global_sum,
        };
        Self {
            rank,
            query_class_id,
            percentage,
            qps: stat.count as f64 / interval,
            load: stat.sum / interval,
            stat,
            series: Vec::new(),
            display_id: None,
            abstract_text: None,
            fingerprint: None,
        }
    }

    pub fn is_global(&self) -> bool {
        self.query_class_id.is_none()
    }

    fn target(&self) -> SeriesTarget {
        match self.query_class_id {
            Some(id) => SeriesTarget::Class(id),
            None => SeriesTarget::AllClasses,
        }
    }
}

/// `entries[0]` is the instance-wide entry; the rest are ranked classes.
/// An empty `entries` means the window holds no recorded activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub window: TimeWindow,
    pub rank_by: RankBy,
    pub total_query_classes: u64,
    pub total_time_seconds: u64,
    pub entries: Vec<RankedEntry>,
}

impl Profile {
    fn no_data(window: TimeWindow, rank_by: RankBy) -> Self {
        Self {
            window,
            rank_by,
            total_query_classes: 0,
            total_time_seconds: 0,
            entries: Vec::new(),
        }
    }

    pub fn has_data(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn ranked(&self) -> &[RankedEntry] {
        self.entries.get(1..).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileRequest {
    pub instance_id: InstanceId,
    pub window: TimeWindow,
    pub rank_by: RankBy,
    pub limit: u32,
    pub offset: u32,
    pub search: String,
}

impl ProfileRequest {
    pub fn new(instance_id: InstanceId, window: TimeWindow, rank_by: RankBy, limit: u32) -> Self {
        Self {
            instance_id,
            window,
            rank_by,
            limit,
            offset: 0,
            search: String::new(),
        }
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    pub fn search(mut self, search: impl Into<String>) -> Self {
        self.search = search.into();
        self
    }
}

pub struct ProfileBuilder<'a> {
    store: &'a dyn MetricStore,
    resolver: &'a dyn AggregateResolver,
    concurrent_series: bool,
}

impl<'a> ProfileBuilder<'a> {
    pub fn new(store: &'a dyn MetricStore) -> Self {
        Self {
            store,
            resolver: &StandardResolver,
            concurrent_series: false,
        }
    }

    pub fn resolver(mut self, resolver: &'a dyn AggregateResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Computes per-entry series on scoped threads, one per entry.
    pub fn concurrent_series(mut self, enabled: bool) -> Self {
        self.concurrent_series = enabled;
        self
    }

    pub fn profile(&self, req: &ProfileRequest, scope: &RequestScope) -> ProfileResult<Profile> {
        if req.limit == 0 {
            return Err(ProfileError::InvalidArgument("limit must be at least 1".to_string()));
        }
        let store = self.store;
        let window = req.window;

        let class_filter = if req.search.is_empty() {
            ClassFilter::All
        } else {
            let ids = resolve_search(store, scope, req.instance_id, &window, &req.search)?;
            if ids.is_empty() {
                return Err(ProfileError::NoMatch {
                    search: req.search.clone(),
                });
            }
            ClassFilter::Only(ids)
        };

        scope.check("profile.count_classes")?;
        let total_query_classes = store
            .count_distinct_classes(req.instance_id, &window, &class_filter)
            .map_err(ProfileError::store("profile.count_classes"))?;

        let names = requested_statistics(self.resolver);

        // The instance-wide row is never narrowed by the search filter.
        scope.check("profile.global_row")?;
        let global_query = QueryShape::new(
            req.instance_id,
            window,
            &req.rank_by.metric,
            GLOBAL_COUNT_COLUMN,
        )
        .statistics(&names)
        .compile(self.resolver);
        let global_row = store
            .scalar_aggregate(&global_query)
            .map_err(ProfileError::store("profile.global_row"))?;
        if global_row.covered_seconds == 0 {
            tracing::info!(instance_id = req.instance_id, "no recorded activity in window");
            return Ok(Profile::no_data(window, req.rank_by.clone()));
        }

        let interval = window.interval_seconds();
        let global_stat = Stat::decode(global_row.count, &names, &global_row.values)
            .map_err(ProfileError::store("profile.global_row"))?;
        let global_sum = global_stat.sum;
        let mut entries = vec![RankedEntry::new(0, None, global_stat, global_sum, interval)];

        scope.check("profile.ranked_rows")?;
        let ranked_query = QueryShape::new(
            req.instance_id,
            window,
            &req.rank_by.metric,
            CLASS_COUNT_COLUMN,
        )
        .statistics(&names)
        .filter(&class_filter)
        .ranked(
            req.rank_by.statistic,
            Page {
                limit: req.limit,
                offset: req.offset,
            },
        )
        .compile(self.resolver);
        let rows = store
            .grouped_aggregate(&ranked_query)
            .map_err(ProfileError::store("profile.ranked_rows"))?;
        if rows.is_empty() {
            return Err(ProfileError::EmptyRange);
        }

        let mut rank_of = BTreeMap::<QueryClassId, usize>::new();
        for (idx, ClassRow { query_class_id, count, values }) in rows.into_iter().enumerate() {
            let stat = Stat::decode(count, &names, &values)
                .map_err(ProfileError::store("profile.ranked_rows"))?;
            let rank = idx + 1;
            entries.push(RankedEntry::new(
                rank as u32,
                Some(query_class_id),
                stat,
                global_sum,
                interval,
            ));
            rank_of.insert(query_class_id, rank);
        }

        let bucketizer = Bucketizer::new(store, scope, req.instance_id, window);
        let series = if self.concurrent_series {
            concurrent_series(&bucketizer, &entries)?
        } else {
            entries
                .iter()
                .map(|e| bucketizer.series(e.target()))
                .collect::<ProfileResult<Vec<_>>>()?
        };
        for (entry, points) in entries.iter_mut().zip(series) {
            entry.series = points;
        }

        scope.check("profile.metadata")?;
        let ids = rank_of.keys().copied().collect::<Vec<_>>();
        let metadata = store
            .lookup_metadata(&ids)
            .map_err(ProfileError::store("profile.metadata"))?;
        for meta in metadata {
            let Some(&rank) = rank_of.get(&meta.id) else {
                continue;
            };
            let entry = &mut entries[rank];
            entry.display_id = Some(meta.checksum);
            entry.abstract_text = Some(meta.abstract_text);
            entry.fingerprint = Some(meta.fingerprint);
        }

        tracing::info!(
            instance_id = req.instance_id,
            ranked = entries.len() - 1,
            total_query_classes,
            "profile built"
        );
        Ok(Profile {
            window,
            rank_by: req.rank_by.clone(),
            total_query_classes,
            total_time_seconds: global_row.covered_seconds,
            entries,
        })
    }
}

/// Runs one series per entry in parallel and returns them in entry order.
fn concurrent_series(
    bucketizer: &Bucketizer<'_>,
    entries: &[RankedEntry],
) -> ProfileResult<Vec<Vec<BucketPoint>>> {
    std::thread::scope(|s| {
        let handles = entries
            .iter()
            .map(|e| {
                let target = e.target();
                let b = *bucketizer;
                s.spawn(move || b.series(target))
            })
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
            .collect()
    })
}

/// Profiles with the standard resolver, sequential series and no deadline.
pub fn profile(store: &dyn MetricStore, req: &ProfileRequest) -> ProfileResult<Profile> {
    ProfileBuilder::new(store).profile(req, &RequestScope::unbounded())
}
