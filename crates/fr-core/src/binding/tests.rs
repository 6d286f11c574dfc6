use super::*;
use crate::model::{BindingRole, Multiplicity, Rule, RuleCategory, RuleInstance, RuleParameter};
use crate::rule::Condition;

fn model(id: &str, extends: &[&str]) -> ModelDef {
    ModelDef {
        id: id.into(),
        extends: extends.iter().map(|s| s.to_string()).collect(),
    }
}

fn node(id: &str, model: &str) -> NodeDef {
    NodeDef {
        id: id.into(),
        model: model.into(),
    }
}

fn edge(source: &str, rel: &str, target: &str) -> EdgeDef {
    EdgeDef {
        source: source.into(),
        target: target.into(),
        relationship: rel.into(),
    }
}

/// Two air handlers. ahu-1 has a supply temp sensor directly and two fan
/// status points; ahu-2 only reaches a temp sensor through its zone.
fn sample_graph() -> OntologyGraph {
    OntologyGraph::build(&OntologySnapshot {
        models: vec![
            model("Equipment", &[]),
            model("AHU", &["Equipment"]),
            model("RooftopUnit", &["AHU"]),
            model("Sensor", &[]),
            model("TempSensor", &["Sensor"]),
            model("SupplyTempSensor", &["TempSensor"]),
            model("FanStatus", &["Sensor"]),
            model("Zone", &[]),
            // cycle must not hang the closure
            model("LoopA", &["LoopB"]),
            model("LoopB", &["LoopA"]),
        ],
        nodes: vec![
            node("ahu-1", "AHU"),
            node("ahu-2", "RooftopUnit"),
            node("sat-1", "SupplyTempSensor"),
            node("fan-1b", "FanStatus"),
            node("fan-1a", "FanStatus"),
            node("zone-2", "Zone"),
            node("zt-2", "TempSensor"),
        ],
        edges: vec![
            edge("sat-1", "isCapabilityOf", "ahu-1"),
            edge("fan-1b", "isCapabilityOf", "ahu-1"),
            edge("ahu-1", "hasCapability", "fan-1a"),
            edge("ahu-2", "feeds", "zone-2"),
            edge("zt-2", "isCapabilityOf", "zone-2"),
        ],
    })
}

fn param(name: &str, model: &str, role: BindingRole, multiplicity: Multiplicity) -> RuleParameter {
    RuleParameter {
        name: name.into(),
        model: model.into(),
        role,
        multiplicity,
    }
}

fn rule(parameters: Vec<RuleParameter>) -> Rule {
    let condition = Condition::IsTrue {
        param: parameters[0].name.clone(),
    };
    Rule {
        id: "r1".into(),
        name: "r1".into(),
        equipment_model: "AHU".into(),
        category: RuleCategory::Fault,
        command: None,
        parameters,
        condition,
        fault_text: String::new(),
        min_points: None,
    }
}

// -- 1. ancestor_closure ------------------------------------------------------

#[test]
fn ancestor_closure_and_cycles() {
    let g = sample_graph();
    assert!(g.is_a("SupplyTempSensor", "Sensor"));
    assert!(g.is_a("RooftopUnit", "Equipment"));
    assert!(!g.is_a("Sensor", "TempSensor"));
    assert!(g.is_a("LoopA", "LoopB") && g.is_a("LoopB", "LoopA"));
    assert!(g.is_a("Unknown", "Unknown"));
    assert_eq!(g.nodes_of_model("AHU"), vec!["ahu-1", "ahu-2"]);
}

// -- 2. capability_binding ------------------------------------------------------

#[test]
fn one_takes_first_by_distance_then_id() {
    let g = sample_graph();
    let r = rule(vec![param("fan", "FanStatus", BindingRole::Capability, Multiplicity::One)]);
    let report = RuleInstanceBuilder::new(&g, 3).build(&r).unwrap();

    assert_eq!(report.instances.len(), 1);
    let inst = &report.instances[0];
    assert_eq!(inst.id, "ahu-1_r1");
    assert_eq!(inst.bindings["fan"], vec!["fan-1a"]);

    // ahu-2 has no capability path to a fan status
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].equipment_id, "ahu-2");
    assert_eq!(report.failures[0].parameter, "fan");
}

#[test]
fn many_collects_all_matches() {
    let g = sample_graph();
    let r = rule(vec![param("fans", "FanStatus", BindingRole::Capability, Multiplicity::Many)]);
    let report = RuleInstanceBuilder::new(&g, 3).build(&r).unwrap();
    assert_eq!(report.instances[0].bindings["fans"], vec!["fan-1a", "fan-1b"]);
}

// -- 3. relationship_roles ----------------------------------------------------

#[test]
fn related_role_walks_named_relationships() {
    let g = sample_graph();
    let capability_only = rule(vec![param("temp", "TempSensor", BindingRole::Capability, Multiplicity::One)]);
    let report = RuleInstanceBuilder::new(&g, 3).build(&capability_only).unwrap();
    assert_eq!(
        report.instances.iter().map(|i| i.equipment_id.as_str()).collect::<Vec<_>>(),
        vec!["ahu-1"]
    );

    let via_zone = rule(vec![param(
        "temp",
        "TempSensor",
        BindingRole::Related {
            relationships: vec!["feeds".into()],
        },
        Multiplicity::One,
    )]);
    let report = RuleInstanceBuilder::new(&g, 3).build(&via_zone).unwrap();
    assert_eq!(report.instances.len(), 2);
    assert_eq!(report.instances[1].bindings["temp"], vec!["zt-2"]);

    // zt-2 is two hops away
    let shallow = RuleInstanceBuilder::new(&g, 1).build(&via_zone).unwrap();
    assert_eq!(shallow.instances.len(), 1);
    assert!(shallow.failures[0].reason.contains("within 1 hops"));
}

// -- 4. no_partial_instances --------------------------------------------------

#[test]
fn unresolved_parameter_fails_whole_instance() {
    let g = sample_graph();
    let r = rule(vec![
        param("temp", "TempSensor", BindingRole::Capability, Multiplicity::One),
        param("missing", "Zone", BindingRole::Capability, Multiplicity::One),
    ]);
    let report = RuleInstanceBuilder::new(&g, 3).build(&r).unwrap();
    assert!(report.instances.is_empty());
    assert_eq!(report.failures.len(), 2);
}

#[test]
fn invalid_rule_is_rejected() {
    let g = sample_graph();
    let mut r = rule(vec![param("temp", "TempSensor", BindingRole::Capability, Multiplicity::One)]);
    r.condition = Condition::IsTrue {
        param: "nope".into(),
    };
    assert!(RuleInstanceBuilder::new(&g, 3).build(&r).is_err());
}

// -- 5. registry_replace ------------------------------------------------------

#[test]
fn registry_replace_is_a_full_swap() {
    let reg = InstanceRegistry::new();
    let mk = |eq: &str, point: &str| {
        let mut b = std::collections::BTreeMap::new();
        b.insert("p".to_string(), vec![point.to_string()]);
        RuleInstance::new("r1", eq, b)
    };
    let out = reg.replace("r1", vec![mk("a", "x"), mk("b", "y")]);
    assert_eq!(out.added, vec!["a_r1", "b_r1"]);

    let mut other = std::collections::BTreeMap::new();
    other.insert("p".to_string(), vec!["z".to_string()]);
    reg.replace("r2", vec![RuleInstance::new("r2", "a", other)]);

    let out = reg.replace("r1", vec![mk("b", "y2"), mk("c", "w")]);
    assert_eq!(out.removed, vec!["a_r1"]);
    assert_eq!(out.changed, vec!["b_r1"]);
    assert_eq!(out.added, vec!["c_r1"]);
    assert_eq!(reg.len(), 3);
    assert_eq!(reg.for_rule("r2").len(), 1);

    let removed = reg.remove_equipment("a");
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].id, "a_r2");
    assert!(reg.get("b_r1").is_some());
}
