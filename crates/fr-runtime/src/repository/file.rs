use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use orion_error::compat_prelude::*;
use orion_error::prelude::*;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use fr_core::actor::ActorState;
use fr_core::error::{CoreReason, CoreResult};
use fr_core::model::{Rule, RuleInstance};
use fr_core::ports::{
    ActorRepository, RuleInstanceRepository, RuleRepository, TimeSeriesRepository,
};
use fr_core::timeseries::TimeSeriesBuffer;

/// One JSON document per table, rewritten whole on every change.
struct Table<T> {
    path: PathBuf,
    rows: Mutex<BTreeMap<String, T>>,
}

impl<T: Serialize + DeserializeOwned + Clone> Table<T> {
    async fn open(dir: &Path, name: &str) -> CoreResult<Self> {
        let path = dir.join(format!("{name}.json"));
        let rows = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                StructError::from(CoreReason::DataFormat)
                    .with_detail(format!("{}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(StructError::from(CoreReason::Dependency)
                    .with_detail(format!("{}: {e}", path.display())));
            }
        };
        Ok(Self {
            path,
            rows: Mutex::new(rows),
        })
    }

    /// Apply `change` and write the table through a temp file plus rename,
    /// so a crash never leaves a half-written document behind.
    async fn update(&self, change: impl FnOnce(&mut BTreeMap<String, T>)) -> CoreResult<()> {
        let mut rows = self.rows.lock().await;
        let mut next = rows.clone();
        change(&mut next);
        let bytes = serde_json::to_vec(&next).owe(CoreReason::DataFormat)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await.map_err(|e| {
            StructError::from(CoreReason::Dependency).with_detail(format!("{}: {e}", tmp.display()))
        })?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            StructError::from(CoreReason::Dependency)
                .with_detail(format!("{}: {e}", self.path.display()))
        })?;
        *rows = next;
        Ok(())
    }

    async fn get(&self, id: &str) -> Option<T> {
        self.rows.lock().await.get(id).cloned()
    }

    async fn values(&self) -> Vec<T> {
        self.rows.lock().await.values().cloned().collect()
    }
}

/// Rules, rule instances, actors and point buffers kept as JSON files in a
/// state directory, so a restarted engine resumes where it stopped.
pub struct FileStateStore {
    dir: PathBuf,
    rules: Table<Rule>,
    instances: Table<Vec<RuleInstance>>,
    actors: Table<ActorState>,
    buffers: Table<TimeSeriesBuffer>,
}

impl FileStateStore {
    pub async fn open(dir: impl Into<PathBuf>) -> CoreResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            StructError::from(CoreReason::Dependency).with_detail(format!("{}: {e}", dir.display()))
        })?;
        Ok(Self {
            rules: Table::open(&dir, "rules").await?,
            instances: Table::open(&dir, "instances").await?,
            actors: Table::open(&dir, "actors").await?,
            buffers: Table::open(&dir, "buffers").await?,
            dir,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl RuleRepository for FileStateStore {
    async fn upsert_rule(&self, rule: &Rule) -> CoreResult<()> {
        self.rules
            .update(|rows| {
                rows.insert(rule.id.clone(), rule.clone());
            })
            .await
    }

    async fn get_rule(&self, id: &str) -> CoreResult<Option<Rule>> {
        Ok(self.rules.get(id).await)
    }

    async fn list_rules(&self) -> CoreResult<Vec<Rule>> {
        Ok(self.rules.values().await)
    }
}

#[async_trait]
impl RuleInstanceRepository for FileStateStore {
    async fn replace_instances(&self, rule_id: &str, instances: &[RuleInstance]) -> CoreResult<()> {
        self.instances
            .update(|rows| {
                if instances.is_empty() {
                    rows.remove(rule_id);
                } else {
                    rows.insert(rule_id.to_string(), instances.to_vec());
                }
            })
            .await
    }

    async fn list_instances(&self) -> CoreResult<Vec<RuleInstance>> {
        Ok(self.instances.values().await.into_iter().flatten().collect())
    }
}

#[async_trait]
impl ActorRepository for FileStateStore {
    async fn upsert_actors(&self, actors: &[ActorState]) -> CoreResult<()> {
        self.actors
            .update(|rows| {
                for actor in actors {
                    rows.insert(actor.id.clone(), actor.clone());
                }
            })
            .await
    }

    async fn get_actor(&self, id: &str) -> CoreResult<Option<ActorState>> {
        Ok(self.actors.get(id).await)
    }

    async fn list_actors(&self) -> CoreResult<Vec<ActorState>> {
        Ok(self.actors.values().await)
    }

    async fn remove_actors(&self, ids: &[String]) -> CoreResult<()> {
        self.actors
            .update(|rows| {
                for id in ids {
                    rows.remove(id);
                }
            })
            .await
    }
}

#[async_trait]
impl TimeSeriesRepository for FileStateStore {
    async fn upsert_buffers(&self, buffers: &[(String, TimeSeriesBuffer)]) -> CoreResult<()> {
        self.buffers
            .update(|rows| {
                for (id, buffer) in buffers {
                    rows.insert(id.clone(), buffer.clone());
                }
            })
            .await
    }

    async fn list_buffers(&self) -> CoreResult<Vec<(String, TimeSeriesBuffer)>> {
        Ok(self
            .buffers
            .rows
            .lock()
            .await
            .iter()
            .map(|(id, b)| (id.clone(), b.clone()))
            .collect())
    }
}
