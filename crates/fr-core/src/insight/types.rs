use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::actor::{ActorState, OutputStatus, Segment, Transition};
use crate::model::{Rule, RuleCategory};

/// Hex prefix length of generated ids.
const ID_HEX_LEN: usize = 16;

fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>()
        .chars()
        .take(ID_HEX_LEN)
        .collect()
}

/// Insight ids are stable per rule instance.
pub fn insight_id(rule_instance_id: &str) -> String {
    short_hash(rule_instance_id)
}

/// Command ids are stable per rule instance and faulted period.
pub fn command_id(rule_instance_id: &str, started: DateTime<Utc>) -> String {
    short_hash(&format!("{rule_instance_id}|{}", started.to_rfc3339()))
}

/// One committed output segment, as persisted on an insight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    pub started: DateTime<Utc>,
    pub ended: Option<DateTime<Utc>>,
    pub is_faulted: bool,
    pub is_valid: bool,
    pub text: String,
}

impl From<&Segment> for Occurrence {
    fn from(seg: &Segment) -> Self {
        Self {
            started: seg.start,
            ended: seg.end,
            is_faulted: seg.status.is_faulted,
            is_valid: seg.status.is_valid,
            text: seg.status.text.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightStatus {
    Open,
    Resolved,
}

/// Derived record of an actor's status transitions.
///
/// Each transition produces an update holding the closed occurrence and the
/// newly opened one; updates merge by occurrence start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Insight {
    pub id: String,
    pub rule_id: String,
    pub rule_instance_id: String,
    pub equipment_id: String,
    pub occurrences: Vec<Occurrence>,
    pub is_faulted: bool,
    pub is_valid: bool,
    pub last_updated: DateTime<Utc>,
    pub status: InsightStatus,
    /// Set on updates sent after the actor was rewound: occurrences that
    /// start after this instant are void, and the summary fields are
    /// authoritative regardless of `last_updated`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncate_after: Option<DateTime<Utc>>,
}

impl Insight {
    pub fn from_transition(actor: &ActorState, t: &Transition) -> Self {
        let opened = &t.opened.status;
        Self {
            id: insight_id(&actor.id),
            rule_id: actor.rule_id.clone(),
            rule_instance_id: actor.id.clone(),
            equipment_id: actor.equipment_id.clone(),
            occurrences: vec![Occurrence::from(&t.closed), Occurrence::from(&t.opened)],
            is_faulted: opened.is_faulted,
            is_valid: opened.is_valid,
            last_updated: t.at,
            status: status_of(opened),
            truncate_after: None,
        }
    }

    /// Correction for an actor whose timeline was rewound to `cut`.
    ///
    /// `before` is the timeline prior to the rewind. Returns `None` when
    /// nothing reported so far lies after `cut`, or when the actor never
    /// left its first segment and so has no insight to correct.
    pub fn rewound(actor: &ActorState, before: &[Segment], cut: DateTime<Utc>) -> Option<Self> {
        if before.len() < 2 || !touches_after(before, cut) {
            return None;
        }
        let current = actor.timeline.current();
        Some(Self {
            id: insight_id(&actor.id),
            rule_id: actor.rule_id.clone(),
            rule_instance_id: actor.id.clone(),
            equipment_id: actor.equipment_id.clone(),
            occurrences: current.map(Occurrence::from).into_iter().collect(),
            is_faulted: current.is_some_and(|s| s.status.is_faulted),
            is_valid: current.is_some_and(|s| s.status.is_valid),
            last_updated: cut,
            status: current.map_or(InsightStatus::Resolved, |s| status_of(&s.status)),
            truncate_after: Some(cut),
        })
    }

    /// Upsert `other`'s occurrences by start and adopt its summary fields
    /// when it is at least as recent.
    ///
    /// A truncating update first drops every occurrence starting after its
    /// cut, then overwrites by start even where that reopens an occurrence.
    pub fn merge(&mut self, other: Insight) {
        if let Some(cut) = other.truncate_after {
            self.occurrences.retain(|o| o.started <= cut);
            self.truncate_after = Some(self.truncate_after.map_or(cut, |c| c.min(cut)));
            for occ in other.occurrences {
                match self
                    .occurrences
                    .binary_search_by(|o| o.started.cmp(&occ.started))
                {
                    Ok(idx) => self.occurrences[idx] = occ,
                    Err(idx) => self.occurrences.insert(idx, occ),
                }
            }
            self.is_faulted = other.is_faulted;
            self.is_valid = other.is_valid;
            self.status = other.status;
            self.last_updated = other.last_updated;
            return;
        }
        for occ in other.occurrences {
            match self
                .occurrences
                .binary_search_by(|o| o.started.cmp(&occ.started))
            {
                // a closed occurrence never reopens on redelivery
                Ok(idx) => {
                    if self.occurrences[idx].ended.is_none() || occ.ended.is_some() {
                        self.occurrences[idx] = occ;
                    }
                }
                Err(idx) => self.occurrences.insert(idx, occ),
            }
        }
        if other.last_updated >= self.last_updated {
            self.is_faulted = other.is_faulted;
            self.is_valid = other.is_valid;
            self.status = other.status;
            self.last_updated = other.last_updated;
        }
    }
}

fn status_of(status: &OutputStatus) -> InsightStatus {
    if status.is_active_fault() {
        InsightStatus::Open
    } else {
        InsightStatus::Resolved
    }
}

/// Whether any segment of `timeline` starts or ends after `cut`.
fn touches_after(timeline: &[Segment], cut: DateTime<Utc>) -> bool {
    timeline
        .iter()
        .any(|s| s.start > cut || s.end.is_some_and(|e| e > cut))
}

/// How a command update relates to what was issued before a rewind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandRevision {
    /// Supersedes the stored command, including an earlier `ended`.
    Revised,
    /// The faulted period no longer exists.
    Withdrawn,
}

/// Remediation derived from a `command` rule: one per faulted period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: String,
    pub rule_id: String,
    pub rule_instance_id: String,
    pub equipment_id: String,
    pub action: String,
    pub setpoint: Option<f64>,
    pub started: DateTime<Utc>,
    pub ended: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<CommandRevision>,
}

impl Command {
    /// A command opens when the actor enters an active fault and closes
    /// when it leaves one. Other transitions and fault rules yield nothing.
    pub fn from_transition(rule: &Rule, actor: &ActorState, t: &Transition) -> Option<Self> {
        if rule.category != RuleCategory::Command {
            return None;
        }
        let template = rule.command.as_ref()?;
        let (started, ended) = if t.opened.status.is_active_fault() {
            (t.at, None)
        } else if t.closed.status.is_active_fault() {
            (t.closed.start, Some(t.at))
        } else {
            return None;
        };
        Some(Self {
            id: command_id(&actor.id, started),
            rule_id: actor.rule_id.clone(),
            rule_instance_id: actor.id.clone(),
            equipment_id: actor.equipment_id.clone(),
            action: template.action.clone(),
            setpoint: template.setpoint,
            started,
            ended,
            revision: None,
        })
    }

    /// Corrections for commands issued from segments of `before` once the
    /// actor was rewound to `cut`: periods starting after `cut` are
    /// withdrawn, and a period closed after `cut` is reopened.
    ///
    /// The first segment of `before` never issued a command, so it is
    /// skipped.
    pub fn rewound(
        rule: &Rule,
        actor: &ActorState,
        before: &[Segment],
        cut: DateTime<Utc>,
    ) -> Vec<Self> {
        let Some(template) = rule.command.as_ref() else {
            return Vec::new();
        };
        if rule.category != RuleCategory::Command {
            return Vec::new();
        }
        before
            .iter()
            .skip(1)
            .filter(|s| s.status.is_active_fault())
            .filter_map(|s| {
                let revision = if s.start > cut {
                    CommandRevision::Withdrawn
                } else if s.end.is_some_and(|e| e > cut) {
                    CommandRevision::Revised
                } else {
                    return None;
                };
                Some(Self {
                    id: command_id(&actor.id, s.start),
                    rule_id: actor.rule_id.clone(),
                    rule_instance_id: actor.id.clone(),
                    equipment_id: actor.equipment_id.clone(),
                    action: template.action.clone(),
                    setpoint: template.setpoint,
                    started: s.start,
                    ended: match revision {
                        CommandRevision::Withdrawn => s.end,
                        CommandRevision::Revised => None,
                    },
                    revision: Some(revision),
                })
            })
            .collect()
    }

    pub fn is_withdrawn(&self) -> bool {
        self.revision == Some(CommandRevision::Withdrawn)
    }
}
