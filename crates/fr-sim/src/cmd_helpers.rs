use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};

use fr_config::EngineConfig;
use fr_core::binding::OntologySnapshot;
use fr_core::model::Rule;

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum RuleFile {
    Many(Vec<Rule>),
    One(Box<Rule>),
}

pub(crate) fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(p) => EngineConfig::load(p).with_context(|| format!("loading config: {}", p.display())),
        None => Ok(EngineConfig::default()),
    }
}

pub(crate) fn load_ontology(path: &Path) -> anyhow::Result<OntologySnapshot> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading ontology: {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing ontology: {}", path.display()))
}

/// Rules from every file in order; a later definition of an id replaces
/// the earlier one.
pub(crate) fn load_rules(paths: &[PathBuf]) -> anyhow::Result<Vec<Rule>> {
    let mut rules: Vec<Rule> = Vec::new();
    for path in paths {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading rules: {}", path.display()))?;
        let parsed: RuleFile = serde_json::from_str(&content)
            .with_context(|| format!("parsing rules: {}", path.display()))?;
        let batch = match parsed {
            RuleFile::Many(v) => v,
            RuleFile::One(r) => vec![*r],
        };
        for rule in batch {
            match rules.iter_mut().find(|r| r.id == rule.id) {
                Some(existing) => *existing = rule,
                None => rules.push(rule),
            }
        }
    }
    Ok(rules)
}

pub(crate) fn parse_time(s: &str, what: &str) -> anyhow::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("{what} is not an RFC 3339 time: {s:?}"))
}
