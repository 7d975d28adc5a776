//! Shared datasets for unit tests.

use time::{Duration, OffsetDateTime};

use std::collections::BTreeMap;

use crate::{ClassBucket, Dataset, GlobalBucket, QueryClassMeta, TimeWindow};

pub const T0: i64 = 1_700_000_000;
pub const INSTANCE: u64 = 1;
pub const OTHER_INSTANCE: u64 = 2;
pub const CLASS_A: u64 = 11;
pub const CLASS_B: u64 = 22;
pub const CLASS_IDLE: u64 = 33;

pub fn ts(offset: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(T0 + offset).expect("timestamp")
}

/// `[T0, T0 + 3540s)`: 59 minutes, so the grid span is 60s.
pub fn window() -> TimeWindow {
    TimeWindow::from_unix(T0, T0 + 3540).expect("window")
}

fn metrics(sum: f64, min: f64, max: f64, count: u64) -> BTreeMap<String, f64> {
    let avg = sum / count as f64;
    BTreeMap::from([
        ("query_time_sum".to_string(), sum),
        ("query_time_min".to_string(), min),
        ("query_time_max".to_string(), max),
        ("query_time_avg".to_string(), avg),
        ("query_time_med".to_string(), avg),
        ("query_time_p95".to_string(), max),
        ("query_time_p5".to_string(), min),
    ])
}

pub fn class_bucket(instance_id: u64, id: u64, offset: i64, count: u64, sum: f64) -> ClassBucket {
    ClassBucket {
        instance_id,
        query_class_id: id,
        start: ts(offset),
        end: ts(offset) + Duration::seconds(60),
        query_count: count,
        metrics: metrics(sum, sum / count as f64 / 2.0, sum / count as f64 * 2.0, count),
    }
}

pub fn global_bucket(instance_id: u64, offset: i64, count: u64, sum: f64) -> GlobalBucket {
    GlobalBucket {
        instance_id,
        start: ts(offset),
        end: ts(offset) + Duration::seconds(60),
        total_query_count: count,
        metrics: metrics(sum, sum / count as f64 / 2.0, sum / count as f64 * 2.0, count),
    }
}

pub fn meta(id: u64, checksum: &str, abstract_text: &str, fingerprint: &str) -> QueryClassMeta {
    QueryClassMeta {
        id,
        checksum: checksum.to_string(),
        abstract_text: abstract_text.to_string(),
        fingerprint: fingerprint.to_string(),
    }
}

/// Class A: ten buckets (count 10, sum 100). Class B: five buckets (count 5, sum 50).
/// The global table holds one bucket per active minute (count 15, sum 150).
pub fn two_classes() -> Dataset {
    let a_offsets = (0..10).map(|i| i * 300).collect::<Vec<_>>();
    let b_offsets = (0..5).map(|i| 60 + i * 600).collect::<Vec<_>>();

    let mut class_metrics = Vec::new();
    let mut global_metrics = Vec::new();
    for &o in &a_offsets {
        class_metrics.push(class_bucket(INSTANCE, CLASS_A, o, 1, 10.0));
        global_metrics.push(global_bucket(INSTANCE, o, 1, 10.0));
    }
    for &o in &b_offsets {
        class_metrics.push(class_bucket(INSTANCE, CLASS_B, o, 1, 10.0));
        global_metrics.push(global_bucket(INSTANCE, o, 1, 10.0));
    }
    // Outside the window and on another instance: never counted.
    class_metrics.push(class_bucket(INSTANCE, CLASS_IDLE, -7200, 3, 900.0));
    global_metrics.push(global_bucket(INSTANCE, -7200, 3, 900.0));
    class_metrics.push(class_bucket(OTHER_INSTANCE, CLASS_A, 120, 40, 4000.0));
    global_metrics.push(global_bucket(OTHER_INSTANCE, 120, 40, 4000.0));

    Dataset {
        query_classes: vec![
            meta(
                CLASS_A,
                "3A1F0C5E77D2B9A4",
                "SELECT orders",
                "select * from orders where id = ?",
            ),
            meta(
                CLASS_B,
                "9B7E2D41C0F3A6E8",
                "UPDATE users",
                "update users set name = ? where id = ?",
            ),
            meta(
                CLASS_IDLE,
                "55D0E1B2C3A49F76",
                "DELETE sessions",
                "delete from sessions where expires < ?",
            ),
        ],
        class_metrics,
        global_metrics,
    }
}
