use std::path::{Path, PathBuf};

use async_trait::async_trait;
use orion_error::prelude::*;

use fr_core::binding::{ModelDef, OntologySnapshot};
use fr_core::error::{CoreReason, CoreResult};
use fr_core::ports::OntologyService;

/// Ontology snapshot kept in a JSON file (`models`, `nodes`, `edges`).
///
/// The file is read on every fetch, so edits are picked up once the cached
/// graph expires.
pub struct FileOntology {
    path: PathBuf,
}

impl FileOntology {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> CoreResult<OntologySnapshot> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            StructError::from(CoreReason::Dependency)
                .with_detail(format!("read {}: {e}", self.path.display()))
        })?;
        serde_json::from_slice(&bytes).map_err(|e| {
            StructError::from(CoreReason::DataFormat)
                .with_detail(format!("parse {}: {e}", self.path.display()))
        })
    }
}

#[async_trait]
impl OntologyService for FileOntology {
    async fn equipment_graph(&self) -> CoreResult<OntologySnapshot> {
        self.read().await
    }

    async fn model(&self, id: &str) -> CoreResult<Option<ModelDef>> {
        Ok(self.read().await?.models.into_iter().find(|m| m.id == id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRAPH: &str = r#"{
        "models": [{"id": "AHU"}, {"id": "FanAlarm", "extends": ["Alarm"]}],
        "nodes": [
            {"id": "ahu-1", "model": "AHU"},
            {"id": "ahu-1.alarm", "model": "FanAlarm"}
        ],
        "edges": [
            {"source": "ahu-1", "target": "ahu-1.alarm", "relationship": "hasCapability"}
        ]
    }"#;

    #[tokio::test]
    async fn reads_snapshot_and_models() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ontology.json");
        std::fs::write(&path, GRAPH).unwrap();

        let ontology = FileOntology::new(&path);
        let snapshot = ontology.equipment_graph().await.unwrap();
        assert_eq!(snapshot.nodes.len(), 2);
        assert_eq!(snapshot.edges[0].relationship, "hasCapability");

        let alarm = ontology.model("FanAlarm").await.unwrap().unwrap();
        assert_eq!(alarm.extends, vec!["Alarm".to_string()]);
        assert!(ontology.model("Chiller").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_and_malformed_files_fail() {
        let dir = tempfile::tempdir().unwrap();
        let missing = FileOntology::new(dir.path().join("nope.json"));
        assert!(missing.equipment_graph().await.is_err());

        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = FileOntology::new(&path).equipment_graph().await.unwrap_err();
        assert!(err.to_string().contains("bad.json"), "{err}");
    }
}
