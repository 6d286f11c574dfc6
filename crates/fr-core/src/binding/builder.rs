use std::collections::{BTreeMap, HashSet, VecDeque};

use orion_error::StructError;
use serde::Serialize;

use crate::error::{CoreReason, CoreResult};
use crate::model::{BindingRole, Multiplicity, Rule, RuleInstance, RuleParameter};

use super::graph::OntologyGraph;

/// Relationship kinds every parameter may traverse.
pub const CAPABILITY_RELATIONSHIPS: [&str; 2] = ["isCapabilityOf", "hasCapability"];

/// One equipment that could not be bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindFailure {
    pub rule_id: String,
    pub equipment_id: String,
    pub parameter: String,
    pub reason: String,
}

/// Outcome of binding one rule against the graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub rule_id: String,
    pub instances: Vec<RuleInstance>,
    pub failures: Vec<BindFailure>,
}

/// Binds rule parameters to concrete points by walking the equipment graph.
pub struct RuleInstanceBuilder<'g> {
    graph: &'g OntologyGraph,
    max_depth: usize,
}

impl<'g> RuleInstanceBuilder<'g> {
    pub fn new(graph: &'g OntologyGraph, max_depth: usize) -> Self {
        Self {
            graph,
            max_depth: max_depth.max(1),
        }
    }

    /// Build one instance per equipment of the rule's model.
    ///
    /// A parameter that cannot be resolved fails only its equipment; the
    /// failure is reported and the other equipment still bind.
    pub fn build(&self, rule: &Rule) -> CoreResult<BuildReport> {
        rule.validate()?;
        if rule.parameters.is_empty() {
            return Err(StructError::from(CoreReason::RuleBind)
                .with_detail(format!("rule {:?} declares no parameters", rule.id)));
        }

        let mut report = BuildReport {
            rule_id: rule.id.clone(),
            ..Default::default()
        };
        'equipment: for equipment in self.graph.nodes_of_model(&rule.equipment_model) {
            let mut bindings = BTreeMap::new();
            for param in &rule.parameters {
                match self.resolve(equipment, param) {
                    Ok(points) => {
                        bindings.insert(param.name.clone(), points);
                    }
                    Err(reason) => {
                        log::debug!(
                            "rule {} equipment {equipment}: parameter {} unresolved: {reason}",
                            rule.id,
                            param.name
                        );
                        report.failures.push(BindFailure {
                            rule_id: rule.id.clone(),
                            equipment_id: equipment.to_string(),
                            parameter: param.name.clone(),
                            reason,
                        });
                        continue 'equipment;
                    }
                }
            }
            report
                .instances
                .push(RuleInstance::new(&rule.id, equipment, bindings));
        }
        Ok(report)
    }

    /// Breadth-first walk from `equipment` over the relationship kinds the
    /// parameter allows, collecting nodes of the parameter's model ordered by
    /// (distance, id).
    fn resolve(&self, equipment: &str, param: &RuleParameter) -> Result<Vec<String>, String> {
        let mut allowed: HashSet<&str> = CAPABILITY_RELATIONSHIPS.into_iter().collect();
        if let BindingRole::Related { relationships } = &param.role {
            allowed.extend(relationships.iter().map(String::as_str));
        }

        let mut seen: HashSet<&str> = HashSet::from([equipment]);
        let mut queue: VecDeque<(&str, usize)> = VecDeque::from([(equipment, 0)]);
        let mut found: Vec<(usize, &str)> = Vec::new();

        while let Some((node, dist)) = queue.pop_front() {
            if dist >= self.max_depth {
                continue;
            }
            for (rel, next) in self.graph.neighbours(node) {
                if !allowed.contains(rel.as_str()) || !seen.insert(next.as_str()) {
                    continue;
                }
                if self
                    .graph
                    .node_model(next)
                    .is_some_and(|m| self.graph.is_a(m, &param.model))
                {
                    found.push((dist + 1, next.as_str()));
                }
                queue.push_back((next.as_str(), dist + 1));
            }
        }

        found.sort_unstable();
        if found.is_empty() {
            return Err(format!(
                "no {} node within {} hops",
                param.model, self.max_depth
            ));
        }
        Ok(match param.multiplicity {
            Multiplicity::One => vec![found[0].1.to_string()],
            Multiplicity::Many => found.into_iter().map(|(_, id)| id.to_string()).collect(),
        })
    }
}
