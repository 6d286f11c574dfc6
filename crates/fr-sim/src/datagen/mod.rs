
use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use fr_core::model::{Rule, RuleInstance, TelemetryPoint, Value};
use fr_core::rule::Condition;

/// Shape of one synthetic signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalKind {
    /// Flips state with the given probability per sample.
    Boolean { flip_probability: f64 },
    /// Bounded random walk in `[low, high]`.
    Analog { low: f64, high: f64, step: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSpec {
    pub point_id: String,
    #[serde(flatten)]
    pub kind: SignalKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenOptions {
    pub seed: u64,
    pub start: DateTime<Utc>,
    pub interval: TimeDelta,
    /// Samples per signal, gaps included.
    pub samples: usize,
    /// Probability that a sample is skipped.
    pub gap_ratio: f64,
    /// Largest random offset, as a fraction of `interval`, added to each
    /// sample's slot. Kept below 1 so samples never swap slots.
    pub jitter: f64,
}

impl Default for GenOptions {
    fn default() -> Self {
        Self {
            seed: 42,
            start: DateTime::UNIX_EPOCH,
            interval: TimeDelta::minutes(1),
            samples: 60,
            gap_ratio: 0.0,
            jitter: 0.0,
        }
    }
}

/// Generated telemetry, sorted by `(timestamp, point_id)`.
#[derive(Debug, Clone, Default)]
pub struct GenResult {
    pub points: Vec<TelemetryPoint>,
    pub gaps: usize,
}

impl GenOptions {
    /// End of the generated range: one interval past the last slot.
    pub fn end(&self) -> DateTime<Utc> {
        self.start + self.interval * (self.samples as i32)
    }
}

/// Generate seeded telemetry for every signal.
///
/// The same seed and options always produce the same points.
pub fn generate(signals: &[SignalSpec], opts: &GenOptions) -> anyhow::Result<GenResult> {
    if opts.interval <= TimeDelta::zero() {
        anyhow::bail!("interval must be positive");
    }
    if !(0.0..1.0).contains(&opts.gap_ratio) {
        anyhow::bail!("gap_ratio must be in [0, 1), got {}", opts.gap_ratio);
    }
    if !(0.0..1.0).contains(&opts.jitter) {
        anyhow::bail!("jitter must be in [0, 1), got {}", opts.jitter);
    }
    let slot_ms = opts.interval.num_milliseconds();

    let mut rng = StdRng::seed_from_u64(opts.seed);
    let mut result = GenResult::default();
    for signal in signals {
        let mut state = initial_state(&signal.kind, &mut rng);
        for i in 0..opts.samples {
            state = next_state(&signal.kind, state, &mut rng);
            if opts.gap_ratio > 0.0 && rng.random_bool(opts.gap_ratio) {
                result.gaps += 1;
                continue;
            }
            let offset_ms = if opts.jitter > 0.0 {
                (rng.random_range(0.0..opts.jitter) * slot_ms as f64) as i64
            } else {
                0
            };
            let at = opts.start + opts.interval * (i as i32) + TimeDelta::milliseconds(offset_ms);
            result.points.push(TelemetryPoint::new(
                signal.point_id.clone(),
                at,
                to_value(&signal.kind, state),
            ));
        }
    }
    result.points.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.point_id.cmp(&b.point_id))
    });
    Ok(result)
}

fn initial_state(kind: &SignalKind, rng: &mut StdRng) -> f64 {
    match kind {
        SignalKind::Boolean { .. } => 0.0,
        SignalKind::Analog { low, high, .. } => {
            if high > low {
                rng.random_range(*low..*high)
            } else {
                *low
            }
        }
    }
}

fn next_state(kind: &SignalKind, state: f64, rng: &mut StdRng) -> f64 {
    match kind {
        SignalKind::Boolean { flip_probability } => {
            if rng.random_bool(flip_probability.clamp(0.0, 1.0)) {
                1.0 - state
            } else {
                state
            }
        }
        SignalKind::Analog { low, high, step } => {
            let delta = if *step > 0.0 {
                rng.random_range(-*step..*step)
            } else {
                0.0
            };
            (state + delta).clamp(*low, high.max(*low))
        }
    }
}

fn to_value(kind: &SignalKind, state: f64) -> Value {
    match kind {
        SignalKind::Boolean { .. } => Value::Bool(state != 0.0),
        SignalKind::Analog { .. } => Value::Double((state * 1000.0).round() / 1000.0),
    }
}

/// Derive one signal per bound point from the conditions that read it.
///
/// A point read by an `is_true` leaf becomes a boolean that flips about
/// once every ten samples; a point compared against a numeric threshold
/// becomes a walk that straddles the threshold. Anything else is a
/// boolean.
pub fn signals_for(rules: &[Rule], instances: &[RuleInstance]) -> Vec<SignalSpec> {
    let by_id: BTreeMap<&str, &Rule> = rules.iter().map(|r| (r.id.as_str(), r)).collect();
    let mut signals: BTreeMap<String, SignalKind> = BTreeMap::new();
    for instance in instances {
        let Some(rule) = by_id.get(instance.rule_id.as_str()) else {
            continue;
        };
        for (param, ids) in &instance.bindings {
            let kind = signal_kind(&rule.condition, param);
            for id in ids {
                signals.entry(id.clone()).or_insert_with(|| kind.clone());
            }
        }
    }
    signals
        .into_iter()
        .map(|(point_id, kind)| SignalSpec { point_id, kind })
        .collect()
}

fn signal_kind(condition: &Condition, param: &str) -> SignalKind {
    find_threshold(condition, param)
        .map(|t| {
            let spread = t.abs().max(1.0) * 0.5;
            SignalKind::Analog {
                low: t - spread,
                high: t + spread,
                step: spread / 4.0,
            }
        })
        .unwrap_or(SignalKind::Boolean {
            flip_probability: 0.1,
        })
}

fn find_threshold(condition: &Condition, param: &str) -> Option<f64> {
    match condition {
        Condition::Compare {
            param: p,
            threshold,
            ..
        } if p == param => threshold.as_f64(),
        Condition::IsTrue { .. } | Condition::Compare { .. } => None,
        Condition::All { of } | Condition::Any { of } => {
            of.iter().find_map(|c| find_threshold(c, param))
        }
        Condition::Not { of } => find_threshold(of, param),
    }
}
