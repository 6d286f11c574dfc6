use chrono::{DateTime, Utc};

use super::buffer::BufferLimits;
use super::store::TimeSeriesStore;

// ---------------------------------------------------------------------------
// EvictReport
// ---------------------------------------------------------------------------

/// Summary of a single [`Evictor::run_once`] call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EvictReport {
    pub points_scanned: usize,
    pub values_evicted: usize,
    /// Points left with an empty buffer. Their entries stay, so status
    /// still reports them offline rather than unknown.
    pub points_emptied: usize,
}

// ---------------------------------------------------------------------------
// Evictor
// ---------------------------------------------------------------------------

/// Periodic age/count eviction across every buffer in a [`TimeSeriesStore`].
pub struct Evictor {
    limits: BufferLimits,
}

impl Evictor {
    pub fn new(limits: BufferLimits) -> Self {
        Self { limits }
    }

    /// Apply the limits to every buffer with `now` as the reference instant.
    pub fn run_once(&self, store: &TimeSeriesStore, now: DateTime<Utc>) -> EvictReport {
        let mut report = EvictReport::default();
        for mut shard in store.lock_all() {
            for entry in shard.values_mut() {
                report.points_scanned += 1;
                let evicted = entry.buffer.apply_limits(now, &self.limits);
                report.values_evicted += evicted;
                if evicted > 0 && entry.buffer.is_empty() {
                    report.points_emptied += 1;
                }
            }
        }
        report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TelemetryPoint;
    use crate::timeseries::PointHealth;
    use chrono::{TimeDelta, TimeZone};

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn run_once_evicts_by_age_and_count() {
        let store = TimeSeriesStore::new();
        for t in 0..10 {
            store.append(&TelemetryPoint::new("busy", ts(t * 10), t as f64));
        }
        store.append(&TelemetryPoint::new("old", ts(0), 1.0));

        let evictor = Evictor::new(BufferLimits {
            max_age: Some(TimeDelta::seconds(60)),
            max_count: 3,
        });
        let report = evictor.run_once(&store, ts(90));

        assert_eq!(report.points_scanned, 2);
        // busy: 0..=20 aged out (3), then 30..=60 over count (4); old: 1
        assert_eq!(report.values_evicted, 8);
        assert_eq!(report.points_emptied, 1);
        assert_eq!(store.point_ids(), vec!["busy", "old"]);
        let (_, buf) = &store.snapshot(None)[0];
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.oldest().unwrap().timestamp, ts(70));
    }

    #[test]
    fn emptied_point_reports_offline_not_unknown() {
        let store = TimeSeriesStore::new();
        store.append(&TelemetryPoint::new("old", ts(0), 1.0));
        store.append(&TelemetryPoint::new("old", ts(-5), 0.0)); // late
        let evictor = Evictor::new(BufferLimits {
            max_age: Some(TimeDelta::seconds(60)),
            max_count: 10,
        });
        assert_eq!(evictor.run_once(&store, ts(3600)).points_emptied, 1);
        // nothing left to evict, so it is not counted again
        assert_eq!(evictor.run_once(&store, ts(3600)).points_emptied, 0);

        let ids = vec!["old".to_string()];
        let status = &store.check_status(&ids, ts(3600), TimeDelta::minutes(30))[0];
        assert_eq!(status.health, PointHealth::Offline);
        assert_eq!(status.last_seen, Some(ts(0)));
        assert_eq!(status.value_count, 0);
        assert_eq!(status.rejected, 1);
    }
}
