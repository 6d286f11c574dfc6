use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};

use crate::actor::OutputStatus;
use crate::model::{Rule, TimedValue};

use super::condition::LatestValues;

/// Longest text an output segment carries.
pub const MAX_TEXT_CHARS: usize = 500;
/// Points named in a text before it is summarised as "and N more".
pub const MAX_NAMED_POINTS: usize = 10;

/// Thresholds that decide validity before the condition runs.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalLimits {
    pub min_points: usize,
    /// `None` disables the staleness check.
    pub stale_after: Option<TimeDelta>,
}

/// What the evaluator needs to know about one bound point.
#[derive(Debug, Clone)]
pub struct PointInput<'a> {
    pub point_id: &'a str,
    pub count: usize,
    pub latest: Option<&'a TimedValue>,
}

/// Compute the output triple for `rule` at instant `at`.
///
/// The first failing check wins: insufficient data, then stale values, then
/// values the condition cannot interpret.
pub fn evaluate(
    rule: &Rule,
    inputs: &BTreeMap<&str, Vec<PointInput<'_>>>,
    at: DateTime<Utc>,
    limits: &EvalLimits,
) -> OutputStatus {
    let min_points = rule.min_points.unwrap_or(limits.min_points).max(1);

    let mut short = Vec::new();
    for p in &rule.parameters {
        match inputs.get(p.name.as_str()) {
            None => short.push(format!("{} (unbound)", p.name)),
            Some(points) if points.is_empty() => short.push(format!("{} (unbound)", p.name)),
            Some(points) => {
                for pi in points {
                    if pi.count < min_points {
                        short.push(format!("{} (< {min_points} points)", pi.point_id));
                    }
                }
            }
        }
    }
    if !short.is_empty() {
        return OutputStatus::invalid(truncate(&format!(
            "Insufficient data: {}",
            name_points(&short)
        )));
    }

    if let Some(stale_after) = limits.stale_after {
        let mut stale = Vec::new();
        for points in inputs.values() {
            for pi in points {
                let Some(tv) = pi.latest else { continue };
                if at - tv.timestamp > stale_after {
                    stale.push(format!("{} (last {})", pi.point_id, tv.timestamp.to_rfc3339()));
                }
            }
        }
        if !stale.is_empty() {
            return OutputStatus::invalid(truncate(&format!(
                "Missing value: {}",
                name_points(&stale)
            )));
        }
    }

    let latest: LatestValues<'_> = inputs
        .iter()
        .map(|(param, points)| {
            let values = points
                .iter()
                .filter_map(|pi| pi.latest.map(|tv| (pi.point_id, &tv.value)))
                .collect();
            (*param, values)
        })
        .collect();

    match rule.condition.eval(&latest) {
        Ok(true) => OutputStatus::faulted(truncate(&rule.fault_text)),
        Ok(false) => OutputStatus::healthy(),
        Err(m) => {
            let text = match (m.point_id, m.value) {
                (Some(point), Some(value)) => {
                    format!("Invalid value: {point} = {value} for {}", m.param)
                }
                _ => format!("Invalid value: no points for {}", m.param),
            };
            OutputStatus::invalid(truncate(&text))
        }
    }
}

fn name_points(items: &[String]) -> String {
    let mut text = items
        .iter()
        .take(MAX_NAMED_POINTS)
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");
    if items.len() > MAX_NAMED_POINTS {
        text.push_str(&format!(" and {} more", items.len() - MAX_NAMED_POINTS));
    }
    text
}

/// Cut `text` to [`MAX_TEXT_CHARS`] characters.
pub fn truncate(text: &str) -> String {
    match text.char_indices().nth(MAX_TEXT_CHARS) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
