use std::collections::HashMap;
use std::path::PathBuf;

use orion_error::prelude::*;
use serde::Deserialize;

use fr_core::model::Rule;

use crate::error::{RuntimeReason, RuntimeResult};

#[derive(Deserialize)]
#[serde(untagged)]
enum RuleFile {
    Many(Vec<Rule>),
    One(Box<Rule>),
}

/// Read rule definitions from JSON files, each holding one rule or an
/// array of rules. A rule id defined twice keeps the later definition.
pub fn load_rule_files(paths: &[PathBuf]) -> RuntimeResult<Vec<Rule>> {
    let mut order: Vec<String> = Vec::new();
    let mut by_id: HashMap<String, Rule> = HashMap::new();
    for path in paths {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StructError::from(RuntimeReason::Bootstrap)
                .with_detail(format!("read {}: {e}", path.display()))
        })?;
        let parsed: RuleFile = serde_json::from_str(&content).map_err(|e| {
            StructError::from(RuntimeReason::Bootstrap)
                .with_detail(format!("parse {}: {e}", path.display()))
        })?;
        let rules = match parsed {
            RuleFile::Many(rules) => rules,
            RuleFile::One(rule) => vec![*rule],
        };
        for rule in rules {
            if by_id.contains_key(&rule.id) {
                fr_warn!(conf, rule = %rule.id, file = %path.display(), "rule redefined, later definition wins");
            } else {
                order.push(rule.id.clone());
            }
            by_id.insert(rule.id.clone(), rule);
        }
    }
    fr_debug!(conf, files = paths.len(), rules = order.len(), "rule files loaded");
    Ok(order
        .into_iter()
        .filter_map(|id| by_id.remove(&id))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE: &str = r#"{
        "id": "fan-fault",
        "equipment_model": "AHU",
        "parameters": [{"name": "alarm", "model": "FanAlarm"}],
        "condition": {"op": "is_true", "param": "alarm"},
        "fault_text": "Fan alarm active"
    }"#;

    const MANY: &str = r#"[
        {
            "id": "hot-supply",
            "equipment_model": "AHU",
            "parameters": [{"name": "sat", "model": "SupplyAirTemp"}],
            "condition": {"op": "compare", "param": "sat", "cmp": "gt", "threshold": 30.0}
        },
        {
            "id": "fan-fault",
            "equipment_model": "AHU",
            "category": "command",
            "command": {"action": "restart_fan"},
            "parameters": [{"name": "alarm", "model": "FanAlarm"}],
            "condition": {"op": "is_true", "param": "alarm"}
        }
    ]"#;

    #[test]
    fn single_and_array_files_merge_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.json");
        let b = dir.path().join("b.json");
        std::fs::write(&a, ONE).unwrap();
        std::fs::write(&b, MANY).unwrap();

        let rules = load_rule_files(&[a, b]).unwrap();
        let ids: Vec<&str> = rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["fan-fault", "hot-supply"]);
        // redefinition from b.json replaced the first one
        assert_eq!(rules[0].command.as_ref().unwrap().action, "restart_fan");
    }

    #[test]
    fn malformed_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("broken.json");
        std::fs::write(&bad, r#"{"id": "x"}"#).unwrap();
        let err = load_rule_files(&[bad]).unwrap_err();
        assert!(err.to_string().contains("broken.json"), "{err}");
    }
}
