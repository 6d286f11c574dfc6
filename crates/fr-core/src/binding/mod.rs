mod builder;
mod graph;
mod registry;

#[cfg(test)]
mod tests;

pub use builder::{BindFailure, BuildReport, CAPABILITY_RELATIONSHIPS, RuleInstanceBuilder};
pub use graph::{EdgeDef, ModelDef, NodeDef, OntologyGraph, OntologySnapshot};
pub use registry::{InstanceRegistry, ReplaceOutcome};
