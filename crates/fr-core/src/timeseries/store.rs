use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{TelemetryPoint, Value};

use super::buffer::{AppendOutcome, TimeSeriesBuffer};

const SHARDS: usize = 16;

#[derive(Debug, Default)]
pub(super) struct PointEntry {
    pub(super) buffer: TimeSeriesBuffer,
    last_seen: Option<DateTime<Utc>>,
    rejected: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointHealth {
    Online,
    Offline,
    /// Never seen by this process.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointStatus {
    pub point_id: String,
    pub health: PointHealth,
    pub last_seen: Option<DateTime<Utc>>,
    pub value_count: usize,
    pub latest: Option<Value>,
    pub rejected: u64,
}

/// Shared per-point buffers, keyed by point id.
///
/// Sharded so that status sweeps and persistence do not serialize the
/// execution workers behind one lock.
pub struct TimeSeriesStore {
    shards: Vec<Mutex<HashMap<String, PointEntry>>>,
}

impl Default for TimeSeriesStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSeriesStore {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, point_id: &str) -> MutexGuard<'_, HashMap<String, PointEntry>> {
        let mut h = DefaultHasher::new();
        point_id.hash(&mut h);
        let idx = (h.finish() as usize) % self.shards.len();
        self.shards[idx]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn lock_all(&self) -> impl Iterator<Item = MutexGuard<'_, HashMap<String, PointEntry>>> {
        self.shards
            .iter()
            .map(|s| s.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn append(&self, point: &TelemetryPoint) -> AppendOutcome {
        let mut shard = self.shard(&point.point_id);
        let entry = shard.entry(point.point_id.clone()).or_default();
        let outcome = entry.buffer.append(point.timed_value());
        match outcome {
            AppendOutcome::Appended => {
                entry.last_seen = Some(
                    entry
                        .last_seen
                        .map_or(point.timestamp, |s| s.max(point.timestamp)),
                );
            }
            AppendOutcome::DroppedLate { last } => {
                entry.rejected += 1;
                log::debug!(
                    "point {} at {} not after stored {}; dropped ({} rejected so far)",
                    point.point_id,
                    point.timestamp.to_rfc3339(),
                    last.to_rfc3339(),
                    entry.rejected
                );
            }
            AppendOutcome::DroppedMalformed => {
                entry.rejected += 1;
                log::debug!(
                    "point {} at {} has a malformed value; dropped ({} rejected so far)",
                    point.point_id,
                    point.timestamp.to_rfc3339(),
                    entry.rejected
                );
            }
        }
        outcome
    }

    /// Point health as of `now`. Ids never seen are reported `Unknown`.
    pub fn check_status(
        &self,
        ids: &[String],
        now: DateTime<Utc>,
        offline_after: TimeDelta,
    ) -> Vec<PointStatus> {
        ids.iter()
            .map(|id| {
                let shard = self.shard(id);
                match shard.get(id) {
                    None => PointStatus {
                        point_id: id.clone(),
                        health: PointHealth::Unknown,
                        last_seen: None,
                        value_count: 0,
                        latest: None,
                        rejected: 0,
                    },
                    Some(entry) => {
                        let health = match entry.last_seen {
                            Some(seen) if now - seen <= offline_after => PointHealth::Online,
                            Some(_) => PointHealth::Offline,
                            None => PointHealth::Unknown,
                        };
                        PointStatus {
                            point_id: id.clone(),
                            health,
                            last_seen: entry.last_seen,
                            value_count: entry.buffer.len(),
                            latest: entry.buffer.latest().map(|v| v.value.clone()),
                            rejected: entry.rejected,
                        }
                    }
                }
            })
            .collect()
    }

    /// Copy of the buffers for `ids` (all when `None`), sorted by id.
    pub fn snapshot(&self, ids: Option<&[String]>) -> Vec<(String, TimeSeriesBuffer)> {
        let mut out: Vec<(String, TimeSeriesBuffer)> = match ids {
            Some(ids) => ids
                .iter()
                .filter_map(|id| {
                    self.shard(id)
                        .get(id)
                        .map(|e| (id.clone(), e.buffer.clone()))
                })
                .collect(),
            None => self
                .lock_all()
                .flat_map(|shard| {
                    shard
                        .iter()
                        .map(|(id, e)| (id.clone(), e.buffer.clone()))
                        .collect::<Vec<_>>()
                })
                .collect(),
        };
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn restore(&self, point_id: String, buffer: TimeSeriesBuffer) {
        let last_seen = buffer.latest().map(|v| v.timestamp);
        let mut shard = self.shard(&point_id);
        shard.insert(
            point_id,
            PointEntry {
                buffer,
                last_seen,
                rejected: 0,
            },
        );
    }

    /// Drop the values of `point_id` newer than `t`.
    pub fn remove_after(&self, point_id: &str, t: DateTime<Utc>) -> usize {
        let mut shard = self.shard(point_id);
        let Some(entry) = shard.get_mut(point_id) else {
            return 0;
        };
        let removed = entry.buffer.remove_after(t);
        entry.last_seen = entry.buffer.latest().map(|v| v.timestamp);
        removed
    }

    pub fn remove(&self, point_id: &str) -> bool {
        self.shard(point_id).remove(point_id).is_some()
    }

    pub fn point_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .lock_all()
            .flat_map(|shard| shard.keys().cloned().collect::<Vec<_>>())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.lock_all().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Newest timestamp held by any point.
    pub fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.lock_all()
            .filter_map(|shard| shard.values().filter_map(|e| e.last_seen).max())
            .max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn status_online_offline_unknown() {
        let store = TimeSeriesStore::new();
        store.append(&TelemetryPoint::new("a", ts(0), 1.0));
        store.append(&TelemetryPoint::new("b", ts(3000), 2.0));
        store.append(&TelemetryPoint::new("b", ts(10), 0.0)); // late

        let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let status = store.check_status(&ids, ts(3600), TimeDelta::minutes(30));
        assert_eq!(status[0].health, PointHealth::Offline);
        assert_eq!(status[1].health, PointHealth::Online);
        assert_eq!(status[1].rejected, 1);
        assert_eq!(status[1].latest, Some(Value::Double(2.0)));
        assert_eq!(status[2].health, PointHealth::Unknown);
    }

    #[test]
    fn duplicate_and_malformed_are_counted_not_stored() {
        let store = TimeSeriesStore::new();
        assert!(store.append(&TelemetryPoint::new("a", ts(5), 1.0)).is_appended());
        assert!(matches!(
            store.append(&TelemetryPoint::new("a", ts(5), 2.0)),
            AppendOutcome::DroppedLate { last } if last == ts(5)
        ));
        assert_eq!(
            store.append(&TelemetryPoint::new("a", ts(6), f64::NAN)),
            AppendOutcome::DroppedMalformed
        );

        let ids = vec!["a".to_string()];
        let status = &store.check_status(&ids, ts(6), TimeDelta::minutes(30))[0];
        assert_eq!(status.rejected, 2);
        assert_eq!(status.value_count, 1);
        assert_eq!(status.last_seen, Some(ts(5)));
    }

    #[test]
    fn snapshot_restore_remove() {
        let store = TimeSeriesStore::new();
        for (id, t) in [("z", 1), ("a", 2), ("m", 3)] {
            store.append(&TelemetryPoint::new(id, ts(t), true));
        }
        let snap = store.snapshot(None);
        assert_eq!(
            snap.iter().map(|(id, _)| id.as_str()).collect::<Vec<_>>(),
            vec!["a", "m", "z"]
        );
        assert_eq!(store.latest_timestamp(), Some(ts(3)));

        let other = TimeSeriesStore::new();
        for (id, buf) in snap {
            other.restore(id, buf);
        }
        assert_eq!(other.point_ids(), vec!["a", "m", "z"]);
        assert!(other.remove("m"));
        assert!(!other.remove("m"));
        assert_eq!(other.len(), 2);
    }
}
