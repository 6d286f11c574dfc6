use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};

use super::*;
use crate::model::{Rule, RuleCategory, RuleInstance, RuleParameter, TelemetryPoint, Value};
use crate::rule::{CmpOp, Condition};
use crate::timeseries::AppendOutcome;

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn bool_rule() -> Rule {
    Rule {
        id: "fan-fault".into(),
        name: "Fan fault".into(),
        equipment_model: "AHU".into(),
        category: RuleCategory::Fault,
        command: None,
        parameters: vec![RuleParameter {
            name: "alarm".into(),
            model: "FanAlarm".into(),
            role: Default::default(),
            multiplicity: Default::default(),
        }],
        condition: Condition::IsTrue {
            param: "alarm".into(),
        },
        fault_text: "Fan alarm active".into(),
        min_points: None,
    }
}

fn instance(bindings: &[(&str, &[&str])]) -> RuleInstance {
    let map: BTreeMap<String, Vec<String>> = bindings
        .iter()
        .map(|(p, ids)| (p.to_string(), ids.iter().map(|s| s.to_string()).collect()))
        .collect();
    RuleInstance::new("fan-fault", "ahu-1", map)
}

fn feed(
    actor: &mut ActorState,
    rule: &Rule,
    inst: &RuleInstance,
    points: &[TelemetryPoint],
    settings: &ActorSettings,
) -> Vec<Transition> {
    let mut out = Vec::new();
    for p in points {
        if let Some(step) = actor.apply_point(rule, inst, p, settings) {
            out.extend(step.transition);
        }
    }
    out.extend(actor.finish_pass(rule, inst, settings));
    out
}

fn scenario_points() -> Vec<TelemetryPoint> {
    [(0, false), (1, false), (2, true), (3, true), (4, false)]
        .iter()
        .map(|&(t, v)| TelemetryPoint::new("alarm-1", ts(t), v))
        .collect()
}

fn summary(timeline: &OutputTimeline) -> Vec<(i64, Option<i64>, &'static str)> {
    timeline
        .segments()
        .iter()
        .map(|s| {
            (
                s.start.timestamp() - 1_700_000_000,
                s.end.map(|e| e.timestamp() - 1_700_000_000),
                s.status.label(),
            )
        })
        .collect()
}

// -- 1. five_point_scenario --------------------------------------------------

#[test]
fn five_point_scenario() {
    let rule = bool_rule();
    let inst = instance(&[("alarm", &["alarm-1"])]);
    let settings = ActorSettings::default();
    let mut actor = ActorState::new(&inst);

    let transitions = feed(&mut actor, &rule, &inst, &scenario_points(), &settings);

    assert_eq!(
        summary(&actor.timeline),
        vec![
            (0, Some(2), "healthy"),
            (2, Some(4), "faulted"),
            (4, None, "healthy"),
        ]
    );
    assert_eq!(transitions.len(), 2);
    assert!(transitions[0].opened.status.is_active_fault());
    assert_eq!(transitions[0].opened.status.text, "Fan alarm active");
    assert_eq!(transitions[1].closed.end, Some(ts(4)));
    assert_eq!(actor.trigger_count, 1);
    assert_eq!(actor.last_changed, Some(ts(4)));
    assert!(!actor.timeline.has_overlaps());
}

// -- 2. idempotent_replay -----------------------------------------------------

#[test]
fn replaying_same_batch_is_a_noop() {
    let rule = bool_rule();
    let inst = instance(&[("alarm", &["alarm-1"])]);
    let settings = ActorSettings::default();
    let mut actor = ActorState::new(&inst);

    feed(&mut actor, &rule, &inst, &scenario_points(), &settings);
    let once = actor.clone();
    let again = feed(&mut actor, &rule, &inst, &scenario_points(), &settings);

    assert!(again.is_empty());
    assert_eq!(actor, once);
}

// -- 3. out_of_order_point ----------------------------------------------------

#[test]
fn out_of_order_point_is_dropped_not_reordered() {
    let rule = bool_rule();
    let inst = instance(&[("alarm", &["alarm-1"])]);
    let settings = ActorSettings::default();
    let mut actor = ActorState::new(&inst);
    feed(&mut actor, &rule, &inst, &scenario_points()[..3], &settings);
    let before = actor.buffers["alarm-1"].clone();

    let step = actor
        .apply_point(
            &rule,
            &inst,
            &TelemetryPoint::new("alarm-1", ts(1), true),
            &settings,
        )
        .unwrap();

    assert_eq!(step.appended, AppendOutcome::DroppedLate { last: ts(2) });
    assert_eq!(actor.buffers["alarm-1"], before);
}

#[test]
fn unbound_point_is_ignored() {
    let rule = bool_rule();
    let inst = instance(&[("alarm", &["alarm-1"])]);
    let mut actor = ActorState::new(&inst);
    let step = actor.apply_point(
        &rule,
        &inst,
        &TelemetryPoint::new("other", ts(0), true),
        &ActorSettings::default(),
    );
    assert!(step.is_none());
}

// -- 4. settling_same_timestamp ---------------------------------------------

#[test]
fn points_sharing_a_timestamp_settle_together() {
    // faulted when either alarm is on; at t=1 one turns off while the other
    // turns on, so the output never changes.
    let mut rule = bool_rule();
    rule.parameters[0].multiplicity = crate::model::Multiplicity::Many;
    let inst = instance(&[("alarm", &["a", "b"])]);
    let settings = ActorSettings::default();
    let mut actor = ActorState::new(&inst);

    let points = vec![
        TelemetryPoint::new("a", ts(0), true),
        TelemetryPoint::new("b", ts(0), false),
        TelemetryPoint::new("a", ts(1), false),
        TelemetryPoint::new("b", ts(1), true),
        TelemetryPoint::new("b", ts(2), false),
    ];
    let transitions = feed(&mut actor, &rule, &inst, &points, &settings);

    assert_eq!(
        summary(&actor.timeline),
        vec![(0, Some(2), "faulted"), (2, None, "healthy")]
    );
    assert_eq!(transitions.len(), 1);
}

// -- 5. validity_transitions ------------------------------------------------

#[test]
fn insufficient_data_then_valid() {
    let mut rule = bool_rule();
    rule.min_points = Some(3);
    let inst = instance(&[("alarm", &["alarm-1"])]);
    let settings = ActorSettings::default();
    let mut actor = ActorState::new(&inst);

    feed(&mut actor, &rule, &inst, &scenario_points(), &settings);

    let segs = actor.timeline.segments();
    assert!(!segs[0].status.is_valid);
    assert!(segs[0].status.text.starts_with("Insufficient data"));
    assert_eq!(segs[1].start, ts(2));
    assert!(segs[1].status.is_active_fault());
}

#[test]
fn stale_value_turns_invalid() {
    let rule = bool_rule();
    let inst = instance(&[("alarm", &["alarm-1", "alarm-2"])]);
    let settings = ActorSettings::default();
    let mut actor = ActorState::new(&inst);

    let points = vec![
        TelemetryPoint::new("alarm-1", ts(0), false),
        TelemetryPoint::new("alarm-2", ts(0), false),
        // alarm-2 goes quiet for over 30 minutes
        TelemetryPoint::new("alarm-1", ts(3600), false),
    ];
    feed(&mut actor, &rule, &inst, &points, &settings);

    let current = actor.timeline.current().unwrap();
    assert_eq!(current.start, ts(3600));
    assert!(!current.status.is_valid);
    assert!(current.status.text.starts_with("Missing value: alarm-2"));
}

// -- 6. timeline_compaction ---------------------------------------------------

#[test]
fn timeline_limits_drop_oldest_closed_segments() {
    let rule = bool_rule();
    let inst = instance(&[("alarm", &["alarm-1"])]);
    let mut settings = ActorSettings::default();
    settings.timeline = TimelineLimits {
        compaction_trigger: 4,
        max_age: None,
        max_count: 3,
    };
    let mut actor = ActorState::new(&inst);

    let points: Vec<_> = (0..20)
        .map(|t| TelemetryPoint::new("alarm-1", ts(t), t % 2 == 1))
        .collect();
    feed(&mut actor, &rule, &inst, &points, &settings);

    assert!(actor.timeline.len() <= 4);
    let current = actor.timeline.current().unwrap();
    assert_eq!(current.start, ts(19));
    assert!(current.end.is_none());
    assert!(!actor.timeline.has_overlaps());
}

#[test]
fn compaction_merges_equal_neighbours_and_keeps_open_segment() {
    let mut tl = OutputTimeline::new();
    tl.record(ts(0), OutputStatus::healthy());
    tl.record(ts(10), OutputStatus::faulted("x"));
    tl.record(ts(20), OutputStatus::healthy());
    // reopen the faulted segment, then close it at 30
    tl.remove_after(ts(10));
    tl.record(ts(30), OutputStatus::healthy());
    assert_eq!(tl.len(), 3);

    let limits = TimelineLimits {
        compaction_trigger: 0,
        max_age: Some(TimeDelta::seconds(5)),
        max_count: 10,
    };
    // cutoff 25 drops [0,10)
    let removed = tl.compact(ts(30), &limits);
    assert_eq!(removed, 1);
    assert_eq!(tl.segments()[0].start, ts(10));
    assert!(tl.current().unwrap().end.is_none());
}

#[test]
fn records_at_or_before_open_start_are_ignored() {
    let mut tl = OutputTimeline::new();
    assert!(tl.record(ts(5), OutputStatus::healthy()).is_none());
    assert!(tl.record(ts(5), OutputStatus::faulted("f")).is_none());
    assert!(tl.record(ts(1), OutputStatus::faulted("f")).is_none());
    assert_eq!(tl.len(), 1);
    assert!(tl.record(ts(6), OutputStatus::healthy()).is_none());
}

// -- 7. remove_after ----------------------------------------------------------

#[test]
fn remove_after_allows_regeneration() {
    let rule = bool_rule();
    let inst = instance(&[("alarm", &["alarm-1"])]);
    let settings = ActorSettings::default();
    let mut actor = ActorState::new(&inst);
    feed(&mut actor, &rule, &inst, &scenario_points(), &settings);
    let full = actor.clone();

    actor.remove_after(ts(2));
    assert_eq!(
        summary(&actor.timeline),
        vec![(0, Some(2), "healthy"), (2, None, "faulted")]
    );
    assert_eq!(actor.buffers["alarm-1"].len(), 3);

    feed(&mut actor, &rule, &inst, &scenario_points(), &settings);
    assert_eq!(actor.timeline, full.timeline);
}

// -- 8. sync_bindings ---------------------------------------------------------

#[test]
fn sync_bindings_adds_and_drops_buffers() {
    let inst = instance(&[("alarm", &["a", "b"])]);
    let mut actor = ActorState::new(&inst);
    assert_eq!(actor.buffers.len(), 2);

    let rebuilt = instance(&[("alarm", &["b", "c"])]);
    actor.sync_bindings(&rebuilt);
    assert_eq!(
        actor.buffers.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["b", "c"]
    );
}

#[test]
fn numeric_rule_uses_threshold() {
    let mut rule = bool_rule();
    rule.condition = Condition::Compare {
        param: "alarm".into(),
        cmp: CmpOp::Ge,
        threshold: Value::Double(80.0),
    };
    let inst = instance(&[("alarm", &["alarm-1"])]);
    let settings = ActorSettings::default();
    let mut actor = ActorState::new(&inst);
    let points: Vec<_> = [70.0, 85.0, 79.0]
        .iter()
        .enumerate()
        .map(|(i, v)| TelemetryPoint::new("alarm-1", ts(i as i64 * 60), *v))
        .collect();
    let transitions = feed(&mut actor, &rule, &inst, &points, &settings);
    assert_eq!(transitions.len(), 2);
}
