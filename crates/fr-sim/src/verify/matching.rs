use std::collections::BTreeMap;

use fr_core::insight::Occurrence;

/// Outcome of pairing one instance's occurrences.
pub(super) struct MatchResult<'a> {
    pub matched: usize,
    /// `(expected, actual, differing fields)`
    pub mismatches: Vec<(&'a Occurrence, &'a Occurrence, Vec<String>)>,
    pub missing: Vec<&'a Occurrence>,
    pub unexpected: Vec<&'a Occurrence>,
}

/// Pair occurrences by exact start instant and compare the remaining
/// fields. Unpaired expected occurrences are missing, unpaired actual ones
/// unexpected.
pub(super) fn match_by_start<'a>(
    expected: &'a [Occurrence],
    actual: &'a [Occurrence],
) -> MatchResult<'a> {
    let mut by_start: BTreeMap<_, &Occurrence> = actual.iter().map(|o| (o.started, o)).collect();
    let mut result = MatchResult {
        matched: 0,
        mismatches: Vec::new(),
        missing: Vec::new(),
        unexpected: Vec::new(),
    };

    for exp in expected {
        let Some(act) = by_start.remove(&exp.started) else {
            result.missing.push(exp);
            continue;
        };
        let fields = differing_fields(exp, act);
        if fields.is_empty() {
            result.matched += 1;
        } else {
            result.mismatches.push((exp, act, fields));
        }
    }
    result.unexpected = by_start.into_values().collect();
    result
}

fn differing_fields(a: &Occurrence, b: &Occurrence) -> Vec<String> {
    let mut fields = Vec::new();
    if a.ended != b.ended {
        fields.push("ended".to_string());
    }
    if a.is_faulted != b.is_faulted {
        fields.push("is_faulted".to_string());
    }
    if a.is_valid != b.is_valid {
        fields.push("is_valid".to_string());
    }
    if a.text != b.text {
        fields.push("text".to_string());
    }
    fields
}
