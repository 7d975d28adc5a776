//! Statistic names, the per-metric `Stat` summary and aggregate resolution.

use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;

use crate::{ProfileError, StoreError, StoreResult};

/// Count column of the instance-wide bucket table.
pub const GLOBAL_COUNT_COLUMN: &str = "total_query_count";

/// Count column of the per-class bucket table.
pub const CLASS_COUNT_COLUMN: &str = "query_count";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatName {
    Sum,
    Min,
    Avg,
    P5,
    Med,
    P95,
    Max,
}

/// Canonical statistic order.
pub const STAT_NAMES: [StatName; 7] = [
    StatName::Sum,
    StatName::Min,
    StatName::Avg,
    StatName::P5,
    StatName::Med,
    StatName::P95,
    StatName::Max,
];

/// Never requested when building a `Stat`; `p95` still is.
pub const EXCLUDED_STAT: StatName = StatName::P5;

impl StatName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Avg => "avg",
            Self::P5 => "p5",
            Self::Med => "med",
            Self::P95 => "p95",
            Self::Max => "max",
        }
    }
}

impl fmt::Display for StatName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatName {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        STAT_NAMES
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| ProfileError::InvalidArgument(format!("unknown statistic {s:?}")))
    }
}

/// Statistical summary of one metric over a window.
///
/// `count` and `sum` are coalesced to zero; the rest stay `None` when no bucket contributed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stat {
    pub count: u64,
    pub sum: f64,
    pub min: Option<f64>,
    pub avg: Option<f64>,
    pub median: Option<f64>,
    pub p95: Option<f64>,
    pub max: Option<f64>,
}

impl Stat {
    /// Decodes store values returned in the order of `names`.
    pub fn decode(count: u64, names: &[StatName], values: &[Option<f64>]) -> StoreResult<Self> {
        if names.len() != values.len() {
            return Err(StoreError::Decode(format!(
                "expected {} statistic values, got {}",
                names.len(),
                values.len()
            )));
        }
        let mut stat = Stat {
            count,
            ..Stat::default()
        };
        for (name, value) in names.iter().zip(values) {
            match name {
                StatName::Sum => stat.sum = value.unwrap_or(0.0),
                StatName::Min => stat.min = *value,
                StatName::Avg => stat.avg = *value,
                StatName::Med => stat.median = *value,
                StatName::P95 => stat.p95 = *value,
                StatName::Max => stat.max = *value,
                StatName::P5 => {}
            }
        }
        Ok(stat)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankBy {
    pub metric: String,
    #[serde(rename = "stat")]
    pub statistic: StatName,
}

impl RankBy {
    pub fn new(metric: impl Into<String>, statistic: StatName) -> Self {
        Self {
            metric: metric.into(),
            statistic,
        }
    }

    pub fn query_time(statistic: StatName) -> Self {
        Self::new("query_time", statistic)
    }
}

/// Typed aggregate the store evaluates over the buckets selected by a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregateExpr {
    Sum(String),
    Min(String),
    Max(String),
    /// Unweighted mean of a per-bucket column.
    Mean(String),
    Ratio(Box<AggregateExpr>, Box<AggregateExpr>),
}

impl AggregateExpr {
    /// Columns the expression reads, in evaluation order.
    pub fn columns(&self) -> Vec<&str> {
        match self {
            Self::Sum(c) | Self::Min(c) | Self::Max(c) | Self::Mean(c) => vec![c.as_str()],
            Self::Ratio(num, den) => {
                let mut out = num.columns();
                out.extend(den.columns());
                out
            }
        }
    }
}

impl fmt::Display for AggregateExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sum(c) => write!(f, "SUM({c})"),
            Self::Min(c) => write!(f, "MIN({c})"),
            Self::Max(c) => write!(f, "MAX({c})"),
            Self::Mean(c) => write!(f, "AVG({c})"),
            Self::Ratio(num, den) => write!(f, "{num}/{den}"),
        }
    }
}

/// Maps `(metric, statistic, count column)` onto an aggregate the store understands.
pub trait AggregateResolver {
    fn aggregate_expression(&self, metric: &str, stat: StatName, count_column: &str)
    -> AggregateExpr;

    fn statistic_names(&self) -> &[StatName] {
        &STAT_NAMES
    }
}

/// Statistics a `Stat` is built from: every name the resolver knows except `EXCLUDED_STAT`.
pub fn requested_statistics(resolver: &dyn AggregateResolver) -> Vec<StatName> {
    resolver
        .statistic_names()
        .iter()
        .copied()
        .filter(|name| *name != EXCLUDED_STAT)
        .collect()
}

/// Resolver for bucket tables that store `<metric>_<stat>` columns per bucket.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardResolver;

impl AggregateResolver for StandardResolver {
    fn aggregate_expression(
        &self,
        metric: &str,
        stat: StatName,
        count_column: &str,
    ) -> AggregateExpr {
        let column = |s: StatName| format!("{metric}_{s}");
        match stat {
            StatName::Sum => AggregateExpr::Sum(column(StatName::Sum)),
            StatName::Min => AggregateExpr::Min(column(StatName::Min)),
            StatName::Max => AggregateExpr::Max(column(StatName::Max)),
            StatName::Avg => AggregateExpr::Ratio(
                Box::new(AggregateExpr::Sum(column(StatName::Sum))),
                Box::new(AggregateExpr::Sum(count_column.to_string())),
            ),
            StatName::P5 | StatName::Med | StatName::P95 => AggregateExpr::Mean(column(stat)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requested_statistics_skip_p5_only() {
        let names = requested_statistics(&StandardResolver);
        assert_eq!(
            names,
            vec![
                StatName::Sum,
                StatName::Min,
                StatName::Avg,
                StatName::Med,
                StatName::P95,
                StatName::Max
            ]
        );
    }

    #[test]
    fn stat_names_parse_and_reject_unknown() {
        assert_eq!("p95".parse::<StatName>().expect("p95"), StatName::P95);
        assert_eq!("med".parse::<StatName>().expect("med"), StatName::Med);
        assert!(matches!(
            "median".parse::<StatName>(),
            Err(ProfileError::InvalidArgument(_))
        ));
    }

    #[test]
    fn standard_resolver_weights_avg_by_count_column() {
        let expr =
            StandardResolver.aggregate_expression("query_time", StatName::Avg, "query_count");
        assert_eq!(expr.to_string(), "SUM(query_time_sum)/SUM(query_count)");
        assert_eq!(expr.columns(), vec!["query_time_sum", "query_count"]);

        let p95 = StandardResolver.aggregate_expression("lock_time", StatName::P95, "query_count");
        assert_eq!(p95, AggregateExpr::Mean("lock_time_p95".to_string()));
    }

    #[test]
    fn decode_coalesces_sum_and_keeps_null_stats() {
        let names = requested_statistics(&StandardResolver);
        let stat = Stat::decode(0, &names, &[None, None, None, None, None, None]).expect("decode");
        assert_eq!(stat.sum, 0.0);
        assert_eq!(stat.min, None);
        assert_eq!(stat.max, None);

        let stat = Stat::decode(
            4,
            &names,
            &[Some(8.0), Some(1.0), Some(2.0), Some(1.5), Some(3.5), Some(4.0)],
        )
        .expect("decode");
        assert_eq!(stat.count, 4);
        assert_eq!(stat.median, Some(1.5));
        assert_eq!(stat.p95, Some(3.5));
        assert_eq!(stat.max, Some(4.0));
    }

    #[test]
    fn decode_rejects_arity_mismatch() {
        let names = requested_statistics(&StandardResolver);
        assert!(matches!(
            Stat::decode(1, &names, &[Some(1.0)]),
            Err(StoreError::Decode(_))
        ));
    }
}
