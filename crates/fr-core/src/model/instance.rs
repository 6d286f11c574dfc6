use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// A rule bound to one equipment and its concrete points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleInstance {
    pub id: String,
    pub rule_id: String,
    pub equipment_id: String,
    /// parameter name → point ids, in binding order.
    pub bindings: BTreeMap<String, Vec<String>>,
}

impl RuleInstance {
    pub fn new(
        rule_id: impl Into<String>,
        equipment_id: impl Into<String>,
        bindings: BTreeMap<String, Vec<String>>,
    ) -> Self {
        let rule_id = rule_id.into();
        let equipment_id = equipment_id.into();
        Self {
            id: Self::instance_id(&equipment_id, &rule_id),
            rule_id,
            equipment_id,
            bindings,
        }
    }

    /// Exactly one instance exists per (rule, equipment), so the pair is the id.
    pub fn instance_id(equipment_id: &str, rule_id: &str) -> String {
        format!("{equipment_id}_{rule_id}")
    }

    /// Every bound point id, sorted and de-duplicated.
    pub fn point_ids(&self) -> BTreeSet<&str> {
        self.bindings
            .values()
            .flat_map(|ids| ids.iter().map(String::as_str))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_and_points() {
        let mut bindings = BTreeMap::new();
        bindings.insert("temp".to_string(), vec!["p2".to_string(), "p1".to_string()]);
        bindings.insert("flow".to_string(), vec!["p1".to_string()]);
        let inst = RuleInstance::new("high-temp", "ahu-1", bindings);
        assert_eq!(inst.id, "ahu-1_high-temp");
        assert_eq!(inst.point_ids().into_iter().collect::<Vec<_>>(), vec!["p1", "p2"]);
    }
}
