use chrono::{DateTime, TimeDelta, TimeZone, Utc};

use super::*;
use crate::model::{TimedValue, Value};

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn filled(times: &[i64]) -> TimeSeriesBuffer {
    let mut buf = TimeSeriesBuffer::new();
    for &t in times {
        assert!(buf.append(TimedValue::new(ts(t), t as f64)).is_appended());
    }
    buf
}

fn times(buf: &TimeSeriesBuffer) -> Vec<i64> {
    buf.iter()
        .map(|v| v.timestamp.timestamp() - 1_700_000_000)
        .collect()
}

// -- 1. append_rejects_out_of_order -----------------------------------------

#[test]
fn append_rejects_out_of_order() {
    let mut buf = filled(&[10, 20, 30]);
    let snapshot = buf.clone();

    let outcome = buf.append(TimedValue::new(ts(15), 1.0));
    assert_eq!(outcome, AppendOutcome::DroppedLate { last: ts(30) });
    assert_eq!(buf, snapshot);
}

#[test]
fn append_rejects_duplicate_timestamp() {
    let mut buf = filled(&[10, 20]);
    let outcome = buf.append(TimedValue::new(ts(20), 99.0));
    assert!(matches!(outcome, AppendOutcome::DroppedLate { .. }));
    assert_eq!(buf.latest().unwrap().value, Value::Double(20.0));
}

#[test]
fn append_rejects_non_finite() {
    let mut buf = filled(&[10]);
    assert_eq!(
        buf.append(TimedValue::new(ts(11), f64::NAN)),
        AppendOutcome::DroppedMalformed
    );
    assert_eq!(buf.len(), 1);
}

// -- 2. max_count_keeps_latest ------------------------------------------------

#[test]
fn max_count_keeps_latest_oldest_first() {
    let mut buf = filled(&[1, 2, 3, 4, 5]);
    let limits = BufferLimits {
        max_age: None,
        max_count: 3,
    };
    assert_eq!(buf.apply_limits(ts(5), &limits), 2);
    assert_eq!(times(&buf), vec![3, 4, 5]);
}

// -- 3. max_age_then_count -----------------------------------------------------

#[test]
fn age_eviction_runs_before_count() {
    let mut buf = filled(&[0, 100, 200, 300, 400]);
    let limits = BufferLimits {
        max_age: Some(TimeDelta::seconds(250)),
        max_count: 10,
    };
    // cutoff = 150
    assert_eq!(buf.apply_limits(ts(400), &limits), 2);
    assert_eq!(times(&buf), vec![200, 300, 400]);

    let tight = BufferLimits {
        max_age: Some(TimeDelta::seconds(250)),
        max_count: 1,
    };
    buf.apply_limits(ts(400), &tight);
    assert_eq!(times(&buf), vec![400]);
}

#[test]
fn limits_bound_holds_after_mixed_sequence() {
    let limits = BufferLimits {
        max_age: Some(TimeDelta::seconds(60)),
        max_count: 4,
    };
    let mut buf = TimeSeriesBuffer::new();
    let mut now = ts(0);
    for t in [5, 3, 9, 9, 12, 40, 41, 30, 70, 95, 96, 97, 98, 99] {
        buf.append(TimedValue::new(ts(t), true));
        now = now.max(ts(t));
        buf.apply_limits(now, &limits);
        assert!(buf.is_strictly_ordered());
        assert!(buf.len() <= 4);
        if let Some(oldest) = buf.oldest() {
            assert!(now - oldest.timestamp <= TimeDelta::seconds(60));
        }
    }
    assert_eq!(times(&buf), vec![96, 97, 98, 99]);
}

// -- 4. remove_after_and_value_at -------------------------------------------

#[test]
fn remove_after_truncates_tail() {
    let mut buf = filled(&[1, 2, 3, 4]);
    assert_eq!(buf.remove_after(ts(2)), 2);
    assert_eq!(times(&buf), vec![1, 2]);
    // appends resume after the cut
    assert!(buf.append(TimedValue::new(ts(3), 0.0)).is_appended());
}

#[test]
fn value_at_returns_newest_not_after() {
    let buf = filled(&[10, 20, 30]);
    assert!(buf.value_at(ts(5)).is_none());
    assert_eq!(buf.value_at(ts(20)).unwrap().timestamp, ts(20));
    assert_eq!(buf.value_at(ts(29)).unwrap().timestamp, ts(20));
    assert_eq!(buf.value_at(ts(99)).unwrap().timestamp, ts(30));
}

#[test]
fn count_between_half_open() {
    let buf = filled(&[10, 20, 30, 40]);
    assert_eq!(buf.count_between(None, ts(30)), 3);
    assert_eq!(buf.count_between(Some(ts(10)), ts(30)), 2);
    assert_eq!(buf.count_between(Some(ts(40)), ts(50)), 0);
}
