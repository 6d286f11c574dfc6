use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDef {
    pub id: String,
    #[serde(default)]
    pub extends: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDef {
    pub id: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDef {
    pub source: String,
    pub target: String,
    pub relationship: String,
}

/// Wire form of the equipment graph as delivered by the ontology service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OntologySnapshot {
    #[serde(default)]
    pub models: Vec<ModelDef>,
    #[serde(default)]
    pub nodes: Vec<NodeDef>,
    #[serde(default)]
    pub edges: Vec<EdgeDef>,
}

/// Indexed, read-only view of an [`OntologySnapshot`].
///
/// Model inheritance is precomputed as an ancestor closure so that type
/// checks during traversal are set lookups.
#[derive(Debug, Default)]
pub struct OntologyGraph {
    /// model → itself plus every ancestor
    ancestors: HashMap<String, BTreeSet<String>>,
    /// node → model
    nodes: HashMap<String, String>,
    /// node → (relationship, neighbour), both edge directions
    adjacency: HashMap<String, Vec<(String, String)>>,
}

impl OntologyGraph {
    pub fn build(snapshot: &OntologySnapshot) -> Self {
        let parents: HashMap<&str, &[String]> = snapshot
            .models
            .iter()
            .map(|m| (m.id.as_str(), m.extends.as_slice()))
            .collect();

        let mut ancestors = HashMap::new();
        for m in &snapshot.models {
            let mut closure = BTreeSet::new();
            collect_ancestors(&m.id, &parents, &mut closure);
            ancestors.insert(m.id.clone(), closure);
        }

        let nodes = snapshot
            .nodes
            .iter()
            .map(|n| (n.id.clone(), n.model.clone()))
            .collect();

        let mut adjacency: HashMap<String, Vec<(String, String)>> = HashMap::new();
        for e in &snapshot.edges {
            adjacency
                .entry(e.source.clone())
                .or_default()
                .push((e.relationship.clone(), e.target.clone()));
            adjacency
                .entry(e.target.clone())
                .or_default()
                .push((e.relationship.clone(), e.source.clone()));
        }
        for list in adjacency.values_mut() {
            list.sort();
            list.dedup();
        }

        Self {
            ancestors,
            nodes,
            adjacency,
        }
    }

    /// True when `model` is `ancestor` or inherits from it. Models missing
    /// from the snapshot only match themselves.
    pub fn is_a(&self, model: &str, ancestor: &str) -> bool {
        if model == ancestor {
            return true;
        }
        self.ancestors
            .get(model)
            .is_some_and(|set| set.contains(ancestor))
    }

    pub fn node_model(&self, node: &str) -> Option<&str> {
        self.nodes.get(node).map(String::as_str)
    }

    pub fn contains_node(&self, node: &str) -> bool {
        self.nodes.contains_key(node)
    }

    /// Nodes whose model is or inherits `model`, sorted by id.
    pub fn nodes_of_model(&self, model: &str) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .nodes
            .iter()
            .filter(|(_, m)| self.is_a(m, model))
            .map(|(id, _)| id.as_str())
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn neighbours(&self, node: &str) -> &[(String, String)] {
        self.adjacency.get(node).map_or(&[], Vec::as_slice)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

fn collect_ancestors(model: &str, parents: &HashMap<&str, &[String]>, out: &mut BTreeSet<String>) {
    // `out` doubles as the visited set, so inheritance cycles terminate.
    if !out.insert(model.to_string()) {
        return;
    }
    if let Some(ps) = parents.get(model) {
        for p in ps.iter() {
            collect_ancestors(p, parents, out);
        }
    }
}
