use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::types::HumanDuration;

/// File-backed collaborators used when the engine runs standalone.
///
/// Every path is relative to the config file's directory unless absolute.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// Ontology snapshot (JSON: models, nodes, edges).
    pub ontology: Option<PathBuf>,
    /// Glob of rule definition files (JSON, one rule or an array per file).
    pub rules: Option<String>,
    /// Glob of telemetry replay files (`.jsonl` or Arrow IPC `.arrow`).
    pub telemetry: Option<String>,
    /// Directory holding persisted actors, buffers and rule instances.
    pub state_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How long a fetched ontology graph is reused before re-fetching.
    pub ontology_ttl: HumanDuration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ontology_ttl: HumanDuration::from(Duration::from_secs(600)),
        }
    }
}

/// Resolve `path` against `base_dir` unless it is already absolute.
pub fn resolve_path(path: &Path, base_dir: &Path) -> PathBuf {
    if path.is_relative() {
        base_dir.join(path)
    } else {
        path.to_path_buf()
    }
}

/// Expand a glob pattern relative to `base_dir`. Results are sorted.
pub fn resolve_glob(pattern: &str, base_dir: &Path) -> Result<Vec<PathBuf>> {
    let full = resolve_path(Path::new(pattern), base_dir);
    let full_str = full
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("non UTF-8 glob pattern: {}", full.display()))?;
    let mut paths = Vec::new();
    for entry in
        glob::glob(full_str).map_err(|e| anyhow::anyhow!("invalid glob {pattern:?}: {e}"))?
    {
        paths.push(entry.map_err(|e| anyhow::anyhow!("glob {pattern:?}: {e}"))?);
    }
    paths.sort();
    Ok(paths)
}
