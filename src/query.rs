//! Query shapes: which statistics, which classes, which ordering, which page.
//!
//! Shapes are plain data. A resolver compiles them into an `AggregateQuery`
//! the store evaluates, so no caller assembles query text by hand.

use std::collections::BTreeSet;

use crate::{AggregateExpr, AggregateResolver, StatName, TimeWindow};

pub type InstanceId = u64;
pub type QueryClassId = u64;

/// Restriction on which query classes participate in an aggregate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ClassFilter {
    #[default]
    All,
    Only(BTreeSet<QueryClassId>),
}

impl ClassFilter {
    pub fn admits(&self, id: QueryClassId) -> bool {
        match self {
            Self::All => true,
            Self::Only(ids) => ids.contains(&id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

/// What a sparkline is computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeriesTarget {
    AllClasses,
    Class(QueryClassId),
}

#[derive(Debug, Clone)]
pub struct QueryShape {
    instance_id: InstanceId,
    window: TimeWindow,
    metric: String,
    count_column: String,
    statistics: Vec<StatName>,
    filter: ClassFilter,
    ranking: Option<(StatName, Page)>,
}

impl QueryShape {
    pub fn new(
        instance_id: InstanceId,
        window: TimeWindow,
        metric: impl Into<String>,
        count_column: impl Into<String>,
    ) -> Self {
        Self {
            instance_id,
            window,
            metric: metric.into(),
            count_column: count_column.into(),
            statistics: Vec::new(),
            filter: ClassFilter::All,
            ranking: None,
        }
    }

    pub fn statistics(mut self, names: &[StatName]) -> Self {
        self.statistics = names.to_vec();
        self
    }

    pub fn filter(mut self, filter: &ClassFilter) -> Self {
        self.filter = filter.clone();
        self
    }

    /// Orders groups descending by `stat` of the shape's metric and keeps one page.
    pub fn ranked(mut self, stat: StatName, page: Page) -> Self {
        self.ranking = Some((stat, page));
        self
    }

    pub fn compile(&self, resolver: &dyn AggregateResolver) -> AggregateQuery {
        let expr = |stat| resolver.aggregate_expression(&self.metric, stat, &self.count_column);
        AggregateQuery {
            instance_id: self.instance_id,
            window: self.window,
            filter: self.filter.clone(),
            count_column: self.count_column.clone(),
            statistics: self.statistics.clone(),
            exprs: self.statistics.iter().map(|s| expr(*s)).collect(),
            order_by: self.ranking.map(|(stat, _)| expr(stat)),
            page: self.ranking.map(|(_, page)| page),
        }
    }
}

/// A compiled shape. `exprs[i]` computes `statistics[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateQuery {
    pub instance_id: InstanceId,
    pub window: TimeWindow,
    pub filter: ClassFilter,
    pub count_column: String,
    pub statistics: Vec<StatName>,
    pub exprs: Vec<AggregateExpr>,
    pub order_by: Option<AggregateExpr>,
    pub page: Option<Page>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{StandardResolver, requested_statistics};

    #[test]
    fn compile_resolves_every_statistic_and_the_ordering() {
        let window = TimeWindow::from_unix(0, 3540).expect("window");
        let names = requested_statistics(&StandardResolver);
        let q = QueryShape::new(7, window, "query_time", "query_count")
            .statistics(&names)
            .filter(&ClassFilter::Only(BTreeSet::from([3, 5])))
            .ranked(StatName::Max, Page { limit: 10, offset: 20 })
            .compile(&StandardResolver);

        assert_eq!(q.instance_id, 7);
        assert_eq!(q.exprs.len(), names.len());
        assert_eq!(q.exprs[0], AggregateExpr::Sum("query_time_sum".to_string()));
        assert_eq!(q.order_by, Some(AggregateExpr::Max("query_time_max".to_string())));
        assert_eq!(q.page, Some(Page { limit: 10, offset: 20 }));
        assert!(q.filter.admits(5));
        assert!(!q.filter.admits(4));
    }

    #[test]
    fn unranked_shape_has_no_order_or_page() {
        let window = TimeWindow::from_unix(0, 60).expect("window");
        let q = QueryShape::new(1, window, "query_time", "total_query_count")
            .compile(&StandardResolver);
        assert!(q.order_by.is_none());
        assert!(q.page.is_none());
        assert!(q.filter.admits(42));
    }
}
