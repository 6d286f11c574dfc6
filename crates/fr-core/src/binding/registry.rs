use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::model::RuleInstance;

/// What [`InstanceRegistry::replace`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaceOutcome {
    pub added: Vec<String>,
    pub changed: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged: usize,
}

/// Current rule instances, keyed by instance id.
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    inner: RwLock<BTreeMap<String, Arc<RuleInstance>>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap the full instance set of `rule_id` in one step.
    pub fn replace(&self, rule_id: &str, instances: Vec<RuleInstance>) -> ReplaceOutcome {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let mut outcome = ReplaceOutcome::default();

        let incoming: BTreeMap<String, RuleInstance> =
            instances.into_iter().map(|i| (i.id.clone(), i)).collect();

        let existing: Vec<String> = map
            .values()
            .filter(|i| i.rule_id == rule_id)
            .map(|i| i.id.clone())
            .collect();
        for id in existing {
            if !incoming.contains_key(&id) {
                map.remove(&id);
                outcome.removed.push(id);
            }
        }

        for (id, inst) in incoming {
            match map.get(&id) {
                Some(old) if **old == inst => outcome.unchanged += 1,
                Some(_) => {
                    map.insert(id.clone(), Arc::new(inst));
                    outcome.changed.push(id);
                }
                None => {
                    map.insert(id.clone(), Arc::new(inst));
                    outcome.added.push(id);
                }
            }
        }
        outcome
    }

    /// Drop every instance of `rule_id`. Returns the removed ids.
    pub fn remove_rule(&self, rule_id: &str) -> Vec<String> {
        self.replace(rule_id, Vec::new()).removed
    }

    /// Drop every instance bound to `equipment_id`.
    pub fn remove_equipment(&self, equipment_id: &str) -> Vec<Arc<RuleInstance>> {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let ids: Vec<String> = map
            .values()
            .filter(|i| i.equipment_id == equipment_id)
            .map(|i| i.id.clone())
            .collect();
        ids.iter().filter_map(|id| map.remove(id)).collect()
    }

    pub fn get(&self, instance_id: &str) -> Option<Arc<RuleInstance>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(instance_id)
            .cloned()
    }

    /// All instances, sorted by id.
    pub fn all(&self) -> Vec<Arc<RuleInstance>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn for_rule(&self, rule_id: &str) -> Vec<Arc<RuleInstance>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|i| i.rule_id == rule_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
