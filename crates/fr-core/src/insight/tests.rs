use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};

use super::*;
use crate::actor::{ActorSettings, ActorState, Transition};
use crate::model::{CommandTemplate, Rule, RuleCategory, RuleInstance, RuleParameter, TelemetryPoint};
use crate::ports::{CommandRepository, InsightRepository};
use crate::rule::Condition;

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn command_rule() -> Rule {
    Rule {
        id: "valve".into(),
        name: "Valve stuck".into(),
        equipment_model: "AHU".into(),
        category: RuleCategory::Command,
        command: Some(CommandTemplate {
            action: "close_valve".into(),
            setpoint: Some(0.0),
        }),
        parameters: vec![RuleParameter {
            name: "stuck".into(),
            model: "ValveStatus".into(),
            role: Default::default(),
            multiplicity: Default::default(),
        }],
        condition: Condition::IsTrue {
            param: "stuck".into(),
        },
        fault_text: "Valve stuck open".into(),
        min_points: None,
    }
}

fn run(rule: &Rule, values: &[(i64, bool)]) -> (ActorState, Vec<Transition>) {
    let mut bindings = BTreeMap::new();
    bindings.insert("stuck".to_string(), vec!["v1".to_string()]);
    let inst = RuleInstance::new(&rule.id, "ahu-1", bindings);
    let settings = ActorSettings::default();
    let mut actor = ActorState::new(&inst);
    let mut transitions = Vec::new();
    for &(t, v) in values {
        let p = TelemetryPoint::new("v1", ts(t), v);
        if let Some(step) = actor.apply_point(rule, &inst, &p, &settings) {
            transitions.extend(step.transition);
        }
    }
    transitions.extend(actor.finish_pass(rule, &inst, &settings));
    (actor, transitions)
}

// -- 1. insight_from_transitions ---------------------------------------------

#[test]
fn merged_insight_mirrors_timeline() {
    let rule = command_rule();
    let (actor, transitions) = run(&rule, &[(0, false), (1, false), (2, true), (3, true), (4, false)]);
    assert_eq!(transitions.len(), 2);

    let updates: Vec<Insight> = transitions
        .iter()
        .map(|t| Insight::from_transition(&actor, t))
        .collect();
    assert_eq!(updates[0].status, InsightStatus::Open);
    assert_eq!(updates[1].status, InsightStatus::Resolved);
    assert_eq!(updates[0].id, insight_id("ahu-1_valve"));

    let merged = coalesce(updates);
    assert_eq!(merged.len(), 1);
    let expected: Vec<Occurrence> = actor
        .timeline
        .segments()
        .iter()
        .map(Occurrence::from)
        .collect();
    assert_eq!(merged[0].occurrences, expected);
    assert!(!merged[0].is_faulted);
    assert_eq!(merged[0].last_updated, ts(4));
}

#[test]
fn merge_is_order_tolerant_for_redelivery() {
    let rule = command_rule();
    let (actor, transitions) = run(&rule, &[(0, false), (2, true), (4, false)]);
    let first = Insight::from_transition(&actor, &transitions[0]);
    let second = Insight::from_transition(&actor, &transitions[1]);

    let mut a = first.clone();
    a.merge(second.clone());
    let mut b = second;
    b.merge(first.clone());
    // redelivery of an older update must not regress the summary
    b.merge(first);
    assert_eq!(a, b);
}

// -- 2. commands --------------------------------------------------------------

#[test]
fn one_command_per_faulted_period() {
    let rule = command_rule();
    let (actor, transitions) = run(
        &rule,
        &[(0, false), (2, true), (4, false), (6, true), (8, true)],
    );
    let commands: Vec<Command> = transitions
        .iter()
        .filter_map(|t| Command::from_transition(&rule, &actor, t))
        .collect();
    assert_eq!(commands.len(), 3);
    let merged = coalesce(commands);
    assert_eq!(merged.len(), 2);
    assert_eq!(merged[0].started, ts(2));
    assert_eq!(merged[0].ended, Some(ts(4)));
    assert_eq!(merged[1].started, ts(6));
    assert_eq!(merged[1].ended, None);
    assert_eq!(merged[1].action, "close_valve");
}

#[test]
fn fault_rules_emit_no_commands() {
    let mut rule = command_rule();
    rule.category = RuleCategory::Fault;
    let (actor, transitions) = run(&rule, &[(0, false), (2, true)]);
    assert!(Command::from_transition(&rule, &actor, &transitions[0]).is_none());
}

// -- 3. rewind -------------------------------------------------------------------

fn reported(rule: &Rule, actor: &ActorState, transitions: &[Transition]) -> (Insight, Vec<Command>) {
    let insights = transitions
        .iter()
        .map(|t| Insight::from_transition(actor, t))
        .collect();
    let commands = transitions
        .iter()
        .filter_map(|t| Command::from_transition(rule, actor, t))
        .collect();
    (coalesce(insights).remove(0), coalesce(commands))
}

#[test]
fn rewind_reopens_covering_occurrence_and_drops_later_ones() {
    let rule = command_rule();
    let (mut actor, transitions) =
        run(&rule, &[(0, false), (1, false), (2, true), (3, true), (4, false)]);
    let (mut insight, mut commands) = reported(&rule, &actor, &transitions);
    assert_eq!(commands[0].ended, Some(ts(4)));

    let before = actor.timeline.segments().to_vec();
    let cut = ts(3);
    actor.remove_after(cut);

    let fix = Insight::rewound(&actor, &before, cut).unwrap();
    assert_eq!(fix.truncate_after, Some(cut));
    insight.merge(fix);
    let expected: Vec<Occurrence> = actor.timeline.segments().iter().map(Occurrence::from).collect();
    assert_eq!(insight.occurrences, expected);
    assert_eq!(insight.occurrences[1].ended, None);
    assert!(insight.is_faulted);
    assert_eq!(insight.status, InsightStatus::Open);

    let fixes = Command::rewound(&rule, &actor, &before, cut);
    assert_eq!(fixes.len(), 1);
    assert_eq!(fixes[0].revision, Some(CommandRevision::Revised));
    commands[0].absorb(fixes[0].clone());
    assert_eq!(commands[0].ended, None);
    assert!(!commands[0].is_withdrawn());
}

#[test]
fn rewind_before_a_fault_withdraws_its_command() {
    let rule = command_rule();
    let (mut actor, transitions) = run(&rule, &[(0, false), (2, true), (4, false)]);
    let (mut insight, mut commands) = reported(&rule, &actor, &transitions);

    let before = actor.timeline.segments().to_vec();
    let cut = ts(1);
    actor.remove_after(cut);

    insight.merge(Insight::rewound(&actor, &before, cut).unwrap());
    assert_eq!(insight.occurrences.len(), 1);
    assert!(!insight.is_faulted);
    assert_eq!(insight.status, InsightStatus::Resolved);

    let fixes = Command::rewound(&rule, &actor, &before, cut);
    assert_eq!(fixes.len(), 1);
    commands[0].absorb(fixes[0].clone());
    assert!(commands[0].is_withdrawn());

    // the same period issued again by the replay comes back as revised
    let (replayed, transitions) = run(&rule, &[(0, false), (2, true)]);
    let again = Command::from_transition(&rule, &replayed, &transitions[0]).unwrap();
    commands[0].absorb(again);
    assert!(!commands[0].is_withdrawn());
    assert_eq!(commands[0].revision, Some(CommandRevision::Revised));
    assert_eq!(commands[0].ended, None);
}

#[test]
fn truncation_overrides_a_newer_summary() {
    let rule = command_rule();
    let (mut actor, transitions) = run(&rule, &[(0, false), (2, true), (4, false), (6, true)]);
    let (mut insight, _) = reported(&rule, &actor, &transitions);
    assert_eq!(insight.last_updated, ts(6));

    let before = actor.timeline.segments().to_vec();
    actor.remove_after(ts(3));
    insight.merge(Insight::rewound(&actor, &before, ts(3)).unwrap());
    assert_eq!(insight.last_updated, ts(3));
    assert!(insight.is_faulted);
    assert_eq!(insight.occurrences.len(), 2);

    // a later update from the replay merges normally on top
    let closing = Insight {
        occurrences: vec![Occurrence {
            started: ts(2),
            ended: Some(ts(5)),
            is_faulted: true,
            is_valid: true,
            text: "Valve stuck open".into(),
        }],
        is_faulted: false,
        last_updated: ts(5),
        status: InsightStatus::Resolved,
        truncate_after: None,
        ..insight.clone()
    };
    insight.merge(closing);
    assert_eq!(insight.occurrences[1].ended, Some(ts(5)));
    assert_eq!(insight.status, InsightStatus::Resolved);
}

#[test]
fn untouched_actor_needs_no_correction() {
    let rule = command_rule();
    let (mut quiet, _) = run(&rule, &[(0, false), (1, false)]);
    let before = quiet.timeline.segments().to_vec();
    quiet.remove_after(ts(0));
    assert!(Insight::rewound(&quiet, &before, ts(0)).is_none());

    let (mut actor, _) = run(&rule, &[(0, false), (2, true)]);
    let before = actor.timeline.segments().to_vec();
    actor.remove_after(ts(5));
    assert!(Insight::rewound(&actor, &before, ts(5)).is_none());
    assert!(Command::rewound(&rule, &actor, &before, ts(5)).is_empty());
}

// -- 4. jsonl_sink --------------------------------------------------------------

#[tokio::test]
async fn jsonl_sink_appends_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out/insights.jsonl");
    let rule = command_rule();
    let (actor, transitions) = run(&rule, &[(0, false), (2, true), (4, false)]);
    let insights: Vec<Insight> = transitions
        .iter()
        .map(|t| Insight::from_transition(&actor, t))
        .collect();
    let commands: Vec<Command> = transitions
        .iter()
        .filter_map(|t| Command::from_transition(&rule, &actor, t))
        .collect();

    {
        let sink = JsonlSink::open(&path).unwrap();
        sink.append_insights(&insights).await.unwrap();
        sink.append_commands(&commands).await.unwrap();
    }

    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 4);
    let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(parsed["rule_instance_id"], "ahu-1_valve");
    assert_eq!(parsed["status"], "open");
    let cmd: serde_json::Value = serde_json::from_str(lines[3]).unwrap();
    assert_eq!(cmd["action"], "close_valve");
}
