mod matching;
mod types;


use std::collections::{BTreeMap, BTreeSet};

use fr_core::actor::ActorState;
use fr_core::insight::{Insight, Occurrence};

use crate::oracle::Timelines;

pub use types::{MismatchDetail, OccurrenceDetail, VerifyReport, VerifySummary};

use matching::match_by_start;

/// Compare actual output timelines against oracle (expected) timelines.
///
/// Algorithm:
/// 1. Take the union of rule instance ids from both sides.
/// 2. Within each instance, pair occurrences by `started`.
/// 3. Paired occurrences that differ in `ended`, `is_faulted`, `is_valid`
///    or `text` count as field_mismatch.
/// 4. Unpaired expected → missing, unpaired actual → unexpected.
/// 5. Status = "pass" iff nothing is missing, unexpected or mismatched and
///    every instance has the same occurrence count on both sides.
pub fn verify(expected: &Timelines, actual: &Timelines) -> VerifyReport {
    let mut summary = VerifySummary {
        instances_expected: expected.len(),
        instances_actual: actual.len(),
        oracle_total: expected.values().map(Vec::len).sum(),
        actual_total: actual.values().map(Vec::len).sum(),
        ..Default::default()
    };
    let mut missing_details = Vec::new();
    let mut unexpected_details = Vec::new();
    let mut mismatch_details = Vec::new();

    let ids: BTreeSet<&String> = expected.keys().chain(actual.keys()).collect();
    let empty: Vec<Occurrence> = Vec::new();
    for id in ids {
        let exp = expected.get(id).unwrap_or(&empty);
        let act = actual.get(id).unwrap_or(&empty);
        if exp.len() != act.len() {
            summary.count_mismatch += 1;
        }

        let result = match_by_start(exp, act);
        summary.matched += result.matched;
        summary.missing += result.missing.len();
        summary.unexpected += result.unexpected.len();
        summary.field_mismatch += result.mismatches.len();

        missing_details.extend(result.missing.into_iter().map(|o| OccurrenceDetail {
            rule_instance_id: id.clone(),
            occurrence: o.clone(),
        }));
        unexpected_details.extend(result.unexpected.into_iter().map(|o| OccurrenceDetail {
            rule_instance_id: id.clone(),
            occurrence: o.clone(),
        }));
        mismatch_details.extend(result.mismatches.into_iter().map(|(e, a, fields)| {
            MismatchDetail {
                rule_instance_id: id.clone(),
                started: e.started,
                fields,
                expected: e.clone(),
                actual: a.clone(),
            }
        }));
    }

    let clean = summary.missing == 0
        && summary.unexpected == 0
        && summary.field_mismatch == 0
        && summary.count_mismatch == 0;
    VerifyReport {
        status: if clean { "pass" } else { "fail" }.to_string(),
        summary,
        missing_details,
        unexpected_details,
        mismatch_details,
    }
}

/// Rebuild per-instance timelines from insight updates, merging repeated
/// deliveries by occurrence start.
pub fn timelines_from_insights(insights: impl IntoIterator<Item = Insight>) -> Timelines {
    let mut merged: BTreeMap<String, Insight> = BTreeMap::new();
    for insight in insights {
        match merged.get_mut(&insight.rule_instance_id) {
            Some(existing) => existing.merge(insight),
            None => {
                merged.insert(insight.rule_instance_id.clone(), insight);
            }
        }
    }
    merged
        .into_iter()
        .map(|(id, insight)| (id, insight.occurrences))
        .collect()
}

/// Current timelines of live actors.
pub fn timelines_from_actors<'a>(actors: impl IntoIterator<Item = &'a ActorState>) -> Timelines {
    actors
        .into_iter()
        .map(|a| {
            let occurrences = a.timeline.segments().iter().map(Occurrence::from);
            (a.id.clone(), occurrences.collect())
        })
        .collect()
}
