use std::collections::BTreeSet;

use orion_error::StructError;
use serde::{Deserialize, Serialize};

use crate::error::{CoreReason, CoreResult};
use crate::rule::Condition;

/// What a rule produces when it faults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    /// Insights only.
    #[default]
    Fault,
    /// Insights plus one remediation command per faulted period.
    Command,
}

/// Remediation action attached to a `command` rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandTemplate {
    pub action: String,
    #[serde(default)]
    pub setpoint: Option<f64>,
}

/// How a parameter reaches its points from the equipment node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BindingRole {
    /// Walk capability edges only.
    #[default]
    Capability,
    /// Walk capability edges plus the named relationship kinds.
    Related { relationships: Vec<String> },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Multiplicity {
    /// Nearest match by graph distance, ties broken by identifier.
    #[default]
    One,
    /// Every match.
    Many,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleParameter {
    pub name: String,
    /// Type constraint: the point's model must be this model or inherit it.
    pub model: String,
    #[serde(default)]
    pub role: BindingRole,
    #[serde(default)]
    pub multiplicity: Multiplicity,
}

/// A published, compiled rule. Never mutated in place; a new version is
/// a new upsert under the same id followed by a rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Primary equipment model the rule applies to.
    pub equipment_model: String,
    #[serde(default)]
    pub category: RuleCategory,
    #[serde(default)]
    pub command: Option<CommandTemplate>,
    pub parameters: Vec<RuleParameter>,
    pub condition: Condition,
    #[serde(default)]
    pub fault_text: String,
    /// Overrides `execution.min_points` for this rule.
    #[serde(default)]
    pub min_points: Option<usize>,
}

impl Rule {
    pub fn parameter(&self, name: &str) -> Option<&RuleParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Structural checks run before a rule is accepted for binding.
    pub fn validate(&self) -> CoreResult<()> {
        if self.id.trim().is_empty() {
            return Err(StructError::from(CoreReason::RuleBind).with_detail("rule id is empty".to_string()));
        }
        let mut names = BTreeSet::new();
        for p in &self.parameters {
            if !names.insert(p.name.as_str()) {
                return Err(StructError::from(CoreReason::RuleBind).with_detail(format!(
                    "rule {:?}: duplicate parameter {:?}",
                    self.id, p.name
                )));
            }
        }
        for used in self.condition.parameters() {
            if !names.contains(used) {
                return Err(StructError::from(CoreReason::RuleBind).with_detail(format!(
                    "rule {:?}: condition references undeclared parameter {used:?}",
                    self.id
                )));
            }
        }
        if self.category == RuleCategory::Command && self.command.is_none() {
            return Err(StructError::from(CoreReason::RuleBind).with_detail(format!(
                "rule {:?}: command rules need a `command` template",
                self.id
            )));
        }
        Ok(())
    }
}
