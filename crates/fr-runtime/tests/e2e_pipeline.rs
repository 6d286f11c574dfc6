//! End-to-end tests driven by `fr-sim`.
//!
//! Generated telemetry → rules host (batch and live passes) → insight sink,
//! checked against the simulation oracle replaying the same window on its
//! own actors.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use fr_config::{EngineConfig, HumanDuration};
use fr_core::actor::ActorSettings;
use fr_core::binding::{EdgeDef, ModelDef, NodeDef, OntologySnapshot};
use fr_core::memory::{MemoryOutputs, MemoryStore, MemoryTelemetry};
use fr_core::model::{
    CommandTemplate, ExecutionRequest, Rule, RuleCategory, RuleParameter, TelemetryPoint, Value,
};
use fr_core::rule::{CmpOp, Condition};
use fr_runtime::lifecycle::RulesHost;
use fr_runtime::service::{Collaborators, StreamScope};
use fr_runtime::source::FileTelemetry;
use fr_runtime::tracing_init::DomainFormat;
use fr_sim::datagen::{GenOptions, generate, signals_for};
use fr_sim::oracle::{OracleResult, SimWindow, Timelines, bind, simulate};
use fr_sim::output::arrow_ipc::write_points_arrow;
use fr_sim::verify::{VerifyReport, timelines_from_actors, timelines_from_insights, verify};

const EQUIPMENT: [&str; 3] = ["ahu-1", "ahu-2", "ahu-3"];

fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .event_format(DomainFormat::new())
                .with_test_writer()
                .with_filter(EnvFilter::try_new("info").unwrap()),
        )
        .try_init();
}

fn artifact_dir() -> PathBuf {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let dir = manifest_dir.join("../../target/test-artifacts/e2e_pipeline");
    std::fs::create_dir_all(&dir).expect("failed to create artifact dir");
    dir
}

fn start_time() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn graph() -> OntologySnapshot {
    let mut snapshot = OntologySnapshot {
        models: ["AHU", "FanAlarm", "SupplyTemp"]
            .iter()
            .map(|id| ModelDef {
                id: id.to_string(),
                extends: vec![],
            })
            .collect(),
        nodes: vec![],
        edges: vec![],
    };
    for eq in EQUIPMENT {
        snapshot.nodes.push(NodeDef {
            id: eq.to_string(),
            model: "AHU".into(),
        });
        for (suffix, model) in [("alarm", "FanAlarm"), ("temp", "SupplyTemp")] {
            let point = format!("{eq}.{suffix}");
            snapshot.nodes.push(NodeDef {
                id: point.clone(),
                model: model.into(),
            });
            snapshot.edges.push(EdgeDef {
                source: eq.to_string(),
                target: point,
                relationship: "hasCapability".into(),
            });
        }
    }
    snapshot
}

fn param(name: &str, model: &str) -> RuleParameter {
    RuleParameter {
        name: name.into(),
        model: model.into(),
        role: Default::default(),
        multiplicity: Default::default(),
    }
}

fn rules() -> Vec<Rule> {
    vec![
        Rule {
            id: "fan-fault".into(),
            name: "Fan fault".into(),
            equipment_model: "AHU".into(),
            category: RuleCategory::Fault,
            command: None,
            parameters: vec![param("alarm", "FanAlarm")],
            condition: Condition::IsTrue {
                param: "alarm".into(),
            },
            fault_text: "Fan alarm active".into(),
            min_points: None,
        },
        Rule {
            id: "supply-hot".into(),
            name: "Supply air too hot".into(),
            equipment_model: "AHU".into(),
            category: RuleCategory::Command,
            command: Some(CommandTemplate {
                action: "lower_setpoint".into(),
                setpoint: Some(18.0),
            }),
            parameters: vec![param("temp", "SupplyTemp")],
            condition: Condition::Compare {
                param: "temp".into(),
                cmp: CmpOp::Gt,
                threshold: Value::Double(24.0),
            },
            fault_text: "Supply temperature above 24".into(),
            min_points: Some(3),
        },
    ]
}

fn engine_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.runtime.realtime_interval = HumanDuration::from(Duration::ZERO);
    config.runtime.parallelism = 3;
    config.retry.max_attempts = 1;
    // gaps of three samples or more read as missing values
    config.execution.stale_after = HumanDuration::from(Duration::from_secs(150));
    config
}

fn gen_options(seed: u64) -> GenOptions {
    GenOptions {
        seed,
        start: start_time(),
        interval: TimeDelta::minutes(1),
        samples: 240,
        gap_ratio: 0.15,
        jitter: 0.3,
    }
}

/// Generated telemetry plus the oracle's view of it.
struct Scenario {
    points: Vec<TelemetryPoint>,
    window: SimWindow,
    oracle: OracleResult,
}

fn scenario(seed: u64, config: &EngineConfig) -> Scenario {
    let rules = rules();
    let (instances, failures) = bind(&graph(), &rules, config.execution.max_binding_depth);
    assert!(failures.is_empty(), "{failures:?}");
    assert_eq!(instances.len(), 6);

    let opts = gen_options(seed);
    let generated = generate(&signals_for(&rules, &instances), &opts).unwrap();
    let window = SimWindow::new(opts.start, opts.end());
    let oracle = simulate(
        &rules,
        &instances,
        &generated.points,
        window,
        &ActorSettings::from_config(&config.execution),
    );
    assert!(
        oracle.transitions.values().sum::<u64>() > 0,
        "generated telemetry never changed an output"
    );
    Scenario {
        points: generated.points,
        window,
        oracle,
    }
}

struct Running {
    host: RulesHost,
    outputs: Arc<MemoryOutputs>,
}

async fn start_host(points: Vec<TelemetryPoint>, config: EngineConfig) -> Running {
    let outputs = Arc::new(MemoryOutputs::new());
    let collab = Collaborators::in_memory(
        Arc::new(MemoryTelemetry::new(points)),
        graph(),
        Arc::new(MemoryStore::new()),
        Arc::clone(&outputs),
    );
    let host = RulesHost::start_with(config, collab, rules()).await.unwrap();
    Running { host, outputs }
}

fn actor_timelines(host: &RulesHost, ids: &Timelines) -> Timelines {
    let service = host.service();
    let actors: Vec<_> = ids.keys().filter_map(|id| service.actor(id)).collect();
    timelines_from_actors(&actors)
}

fn assert_pass(report: &VerifyReport, name: &str) {
    let md = report.to_markdown();
    let path = artifact_dir().join(format!("{name}.md"));
    std::fs::write(&path, &md)
        .unwrap_or_else(|e| panic!("failed to write report to {}: {e}", path.display()));
    assert!(report.passed(), "verify report {name} failed:\n{md}");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn batch_pass_matches_oracle() {
    init_tracing();
    let config = engine_config();
    let sc = scenario(11, &config);
    let running = start_host(sc.points.clone(), config).await;

    running
        .host
        .handle()
        .execute(
            ExecutionRequest::process_range(sc.window.start, sc.window.end),
            false,
        )
        .await
        .unwrap();

    let actors = actor_timelines(&running.host, &sc.oracle.timelines);
    running.host.shutdown();
    tokio::time::timeout(Duration::from_secs(10), running.host.wait())
        .await
        .expect("host did not stop")
        .unwrap();

    assert_pass(&verify(&sc.oracle.timelines, &actors), "batch_actors");
    let insights = timelines_from_insights(running.outputs.insights());
    assert_pass(&verify(&sc.oracle.reported(), &insights), "batch_insights");

    let command_keys = |cmds: &[fr_core::insight::Command]| {
        let mut keys: Vec<_> = cmds
            .iter()
            .map(|c| (c.rule_instance_id.clone(), c.started, c.ended))
            .collect();
        keys.sort();
        keys
    };
    assert_eq!(
        command_keys(&running.outputs.commands()),
        command_keys(&sc.oracle.commands)
    );
}

#[tokio::test]
async fn live_stream_matches_oracle() {
    init_tracing();
    let config = engine_config();
    let sc = scenario(23, &config);
    // the stream reads from the channel, not the source
    let running = start_host(Vec::new(), config).await;
    let service = running.host.service();

    let (tx, rx) = mpsc::channel(64);
    let stream = tokio::spawn({
        let service = Arc::clone(&service);
        async move {
            service
                .run_stream(&StreamScope::all(), rx, CancellationToken::new())
                .await
        }
    });
    for point in sc.points.iter().cloned() {
        tx.send(point).await.unwrap();
    }
    drop(tx);
    let report = tokio::time::timeout(Duration::from_secs(10), stream)
        .await
        .expect("stream pass did not finish")
        .unwrap()
        .unwrap();
    assert!(!report.cancelled);

    let actors = actor_timelines(&running.host, &sc.oracle.timelines);
    running.host.shutdown();
    running.host.wait().await.unwrap();

    assert_pass(&verify(&sc.oracle.timelines, &actors), "stream_actors");
    let insights = timelines_from_insights(running.outputs.insights());
    assert_pass(&verify(&sc.oracle.reported(), &insights), "stream_insights");
}

#[tokio::test]
async fn five_point_scenario_through_host() {
    init_tracing();
    let t = |s: i64| start_time() + TimeDelta::seconds(s);
    let points: Vec<_> = [(0, false), (1, false), (2, true), (3, true), (4, false)]
        .iter()
        .map(|&(s, v)| TelemetryPoint::new("ahu-1.alarm", t(s), v))
        .collect();
    let running = start_host(points, engine_config()).await;
    running
        .host
        .handle()
        .execute(ExecutionRequest::process_range(t(0), t(10)), false)
        .await
        .unwrap();
    running.host.shutdown();
    running.host.wait().await.unwrap();

    let insight = running.outputs.insight_for("ahu-1_fan-fault").unwrap();
    let shape: Vec<_> = insight
        .occurrences
        .iter()
        .map(|o| (o.started, o.ended, o.is_faulted))
        .collect();
    assert_eq!(
        shape,
        vec![
            (t(0), Some(t(2)), false),
            (t(2), Some(t(4)), true),
            (t(4), None, false),
        ]
    );
    assert!(!insight.is_faulted);
}

#[tokio::test]
async fn replaying_a_window_is_idempotent() {
    init_tracing();
    let config = engine_config();
    let sc = scenario(37, &config);
    let running = start_host(sc.points.clone(), config).await;
    let handle = running.host.handle();
    let range = ExecutionRequest::process_range(sc.window.start, sc.window.end);

    handle.execute(range.clone(), false).await.unwrap();
    let first = actor_timelines(&running.host, &sc.oracle.timelines);

    // same window again: every point is at or before what the actors hold
    handle.execute(range.clone(), false).await.unwrap();
    let second = actor_timelines(&running.host, &sc.oracle.timelines);
    assert_eq!(first, second);

    // regenerate from a clean slate
    handle.execute(range.with_reset(), false).await.unwrap();
    let regenerated = actor_timelines(&running.host, &sc.oracle.timelines);

    running.host.shutdown();
    running.host.wait().await.unwrap();

    assert_pass(&verify(&sc.oracle.timelines, &regenerated), "replay_actors");
    let insights = timelines_from_insights(running.outputs.insights());
    assert_pass(&verify(&sc.oracle.reported(), &insights), "replay_insights");
}

#[tokio::test]
async fn arrow_replay_file_feeds_the_same_result() {
    init_tracing();
    let config = engine_config();
    let sc = scenario(41, &config);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("telemetry.arrow");
    assert_eq!(write_points_arrow(&sc.points, &path).unwrap(), sc.points.len());

    let telemetry = FileTelemetry::load(&[path]).unwrap();
    assert_eq!(telemetry.len(), sc.points.len());

    let outputs = Arc::new(MemoryOutputs::new());
    let collab = Collaborators::in_memory(
        Arc::new(telemetry),
        graph(),
        Arc::new(MemoryStore::new()),
        Arc::clone(&outputs),
    );
    let host = RulesHost::start_with(config, collab, rules()).await.unwrap();
    host.handle()
        .execute(
            ExecutionRequest::process_range(sc.window.start, sc.window.end),
            false,
        )
        .await
        .unwrap();
    let actors = actor_timelines(&host, &sc.oracle.timelines);
    host.shutdown();
    host.wait().await.unwrap();

    assert_pass(&verify(&sc.oracle.timelines, &actors), "arrow_actors");
}
