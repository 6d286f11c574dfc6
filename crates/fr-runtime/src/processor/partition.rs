use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use fr_core::model::RuleInstance;

/// Instances grouped so that every point id belongs to exactly one worker.
#[derive(Debug, Default)]
pub(crate) struct PartitionPlan {
    pub workers: Vec<Vec<Arc<RuleInstance>>>,
    /// point id → worker index
    pub routes: HashMap<String, usize>,
}

impl PartitionPlan {
    pub(crate) fn route(&self, point_id: &str) -> Option<usize> {
        self.routes.get(point_id).copied()
    }
}

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // smaller index wins so roots are stable
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}

/// Union instances that share any point id, then spread the groups over at
/// most `parallelism` workers, largest group first onto the least loaded.
pub(crate) fn plan(instances: &[Arc<RuleInstance>], parallelism: usize) -> PartitionPlan {
    if instances.is_empty() {
        return PartitionPlan::default();
    }

    let mut sets = DisjointSet::new(instances.len());
    let mut owner: HashMap<&str, usize> = HashMap::new();
    for (idx, inst) in instances.iter().enumerate() {
        for point in inst.point_ids() {
            match owner.get(point) {
                Some(&first) => sets.union(first, idx),
                None => {
                    owner.insert(point, idx);
                }
            }
        }
    }

    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for idx in 0..instances.len() {
        groups.entry(sets.find(idx)).or_default().push(idx);
    }
    let mut groups: Vec<Vec<usize>> = groups.into_values().collect();
    // stable: equal sizes keep root order
    groups.sort_by(|a, b| b.len().cmp(&a.len()));

    let n_workers = parallelism.max(1).min(groups.len());
    let mut workers: Vec<Vec<Arc<RuleInstance>>> = vec![Vec::new(); n_workers];
    let mut load = vec![0usize; n_workers];
    let mut routes = HashMap::new();
    for group in groups {
        let target = (0..n_workers)
            .min_by_key(|w| (load[*w], *w))
            .unwrap_or(0);
        load[target] += group.len();
        for idx in group {
            let inst = &instances[idx];
            for point in inst.point_ids() {
                routes.insert(point.to_string(), target);
            }
            workers[target].push(Arc::clone(inst));
        }
    }

    PartitionPlan { workers, routes }
}
