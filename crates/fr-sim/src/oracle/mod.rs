
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fr_core::actor::{ActorSettings, ActorState, Transition};
use fr_core::binding::{BindFailure, OntologyGraph, OntologySnapshot, RuleInstanceBuilder};
use fr_core::insight::{Command, Insight, Occurrence, coalesce};
use fr_core::model::{Rule, RuleInstance, TelemetryPoint};

/// Output occurrences per rule instance id.
pub type Timelines = BTreeMap<String, Vec<Occurrence>>;

/// Half-open replay window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SimWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t < self.end
    }
}

/// Result of one reference replay.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OracleResult {
    /// Final output timeline of every simulated instance.
    pub timelines: Timelines,
    /// Committed transitions per instance.
    pub transitions: BTreeMap<String, u64>,
    /// Insight updates folded by id.
    pub insights: Vec<Insight>,
    /// Command updates folded by id.
    pub commands: Vec<Command>,
    /// Points inside the window that reached at least one actor.
    pub points_applied: u64,
}

impl OracleResult {
    /// Timelines of the instances that changed output at least once.
    ///
    /// A fresh actor's first segment is not a transition, so an instance
    /// that never changed has no insight to compare against.
    pub fn reported(&self) -> Timelines {
        self.timelines
            .iter()
            .filter(|(id, _)| self.transitions.get(*id).is_some_and(|n| *n > 0))
            .map(|(id, occ)| (id.clone(), occ.clone()))
            .collect()
    }
}

/// Bind every rule against the graph, independently of any registry.
///
/// Rules that fail validation are returned as failures with an empty
/// parameter name; equipment-level failures come straight from the builder.
pub fn bind(
    snapshot: &OntologySnapshot,
    rules: &[Rule],
    max_depth: usize,
) -> (Vec<RuleInstance>, Vec<BindFailure>) {
    let graph = OntologyGraph::build(snapshot);
    let builder = RuleInstanceBuilder::new(&graph, max_depth);
    let mut instances = Vec::new();
    let mut failures = Vec::new();
    for rule in rules {
        match builder.build(rule) {
            Ok(report) => {
                instances.extend(report.instances);
                failures.extend(report.failures);
            }
            Err(e) => failures.push(BindFailure {
                rule_id: rule.id.clone(),
                equipment_id: String::new(),
                parameter: String::new(),
                reason: e.to_string(),
            }),
        }
    }
    (instances, failures)
}

struct SimActor<'a> {
    rule: &'a Rule,
    instance: &'a RuleInstance,
    state: ActorState,
    transitions: u64,
}

/// Replay `points` over `window` on fresh actors, feeding every point to
/// every actor in `(timestamp, point_id)` order.
///
/// Instances whose rule is not in `rules` are skipped.
pub fn simulate(
    rules: &[Rule],
    instances: &[RuleInstance],
    points: &[TelemetryPoint],
    window: SimWindow,
    settings: &ActorSettings,
) -> OracleResult {
    let by_id: HashMap<&str, &Rule> = rules.iter().map(|r| (r.id.as_str(), r)).collect();
    let mut actors: Vec<SimActor<'_>> = instances
        .iter()
        .filter_map(|instance| {
            by_id.get(instance.rule_id.as_str()).copied().map(|rule| SimActor {
                rule,
                instance,
                state: ActorState::new(instance),
                transitions: 0,
            })
        })
        .collect();

    let mut feed: Vec<&TelemetryPoint> = points
        .iter()
        .filter(|p| window.contains(p.timestamp))
        .collect();
    feed.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.point_id.cmp(&b.point_id))
    });

    let mut insights = Vec::new();
    let mut commands = Vec::new();
    let mut points_applied = 0u64;

    for point in feed {
        let mut reached = false;
        for actor in actors.iter_mut() {
            let Some(step) =
                actor
                    .state
                    .apply_point(actor.rule, actor.instance, point, settings)
            else {
                continue;
            };
            reached = true;
            if let Some(t) = step.transition {
                collect(actor, &t, &mut insights, &mut commands);
            }
        }
        if reached {
            points_applied += 1;
        }
    }

    for actor in actors.iter_mut() {
        if let Some(t) = actor
            .state
            .finish_pass(actor.rule, actor.instance, settings)
        {
            collect(actor, &t, &mut insights, &mut commands);
        }
    }

    OracleResult {
        timelines: actors
            .iter()
            .map(|a| {
                let occurrences = a.state.timeline.segments().iter().map(Occurrence::from);
                (a.state.id.clone(), occurrences.collect())
            })
            .collect(),
        transitions: actors
            .iter()
            .map(|a| (a.state.id.clone(), a.transitions))
            .collect(),
        insights: coalesce(insights),
        commands: coalesce(commands),
        points_applied,
    }
}

fn collect(
    actor: &mut SimActor<'_>,
    t: &Transition,
    insights: &mut Vec<Insight>,
    commands: &mut Vec<Command>,
) {
    actor.transitions += 1;
    insights.push(Insight::from_transition(&actor.state, t));
    if let Some(cmd) = Command::from_transition(actor.rule, &actor.state, t) {
        commands.push(cmd);
    }
}
