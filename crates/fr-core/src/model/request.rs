use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

static NEXT_REQUEST: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestCommand {
    BuildRule,
    ProcessDateRange,
}

/// The unit of work the orchestrator schedules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub id: String,
    pub command: RequestCommand,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    /// Restrict to one rule. `None` means every rule.
    #[serde(default)]
    pub rule_id: Option<String>,
    /// Restrict to these equipment. Empty means all equipment.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub equipment_ids: Vec<String>,
    /// Rebuild actors in scope from a clean slate before processing.
    #[serde(default)]
    pub reset: bool,
    pub requested_at: DateTime<Utc>,
}

impl ExecutionRequest {
    fn new(command: RequestCommand) -> Self {
        let seq = NEXT_REQUEST.fetch_add(1, Ordering::Relaxed);
        let requested_at = Utc::now();
        Self {
            id: format!("req-{}-{seq}", requested_at.timestamp_millis()),
            command,
            start: None,
            end: None,
            rule_id: None,
            equipment_ids: Vec::new(),
            reset: false,
            requested_at,
        }
    }

    pub fn build_rules(rule_id: Option<String>) -> Self {
        Self {
            rule_id,
            ..Self::new(RequestCommand::BuildRule)
        }
    }

    pub fn process_range(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
            ..Self::new(RequestCommand::ProcessDateRange)
        }
    }

    /// A live request: the range is resolved from the watermark when run.
    pub fn realtime() -> Self {
        Self::new(RequestCommand::ProcessDateRange)
    }

    pub fn with_rule(mut self, rule_id: impl Into<String>) -> Self {
        self.rule_id = Some(rule_id.into());
        self
    }

    pub fn with_equipment<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.equipment_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_reset(mut self) -> Self {
        self.reset = true;
        self
    }
}

impl fmt::Display for ExecutionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.id, self.command)?;
        if let Some(rule) = &self.rule_id {
            write!(f, " rule={rule}")?;
        }
        if !self.equipment_ids.is_empty() {
            write!(f, " equipment={}", self.equipment_ids.join(","))?;
        }
        if let (Some(s), Some(e)) = (self.start, self.end) {
            write!(f, " [{}, {})", s.to_rfc3339(), e.to_rfc3339())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = ExecutionRequest::realtime();
        let b = ExecutionRequest::realtime();
        assert_ne!(a.id, b.id);
        assert_eq!(a.command, RequestCommand::ProcessDateRange);
        assert!(a.start.is_none());
    }

    #[test]
    fn deserialize_minimal() {
        let req: ExecutionRequest = serde_json::from_str(
            r#"{"id":"r1","command":"build_rule","requested_at":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(req.command, RequestCommand::BuildRule);
        assert!(!req.reset);
        assert!(req.rule_id.is_none());
        assert!(req.equipment_ids.is_empty());
    }

    #[test]
    fn equipment_scope_shows_in_display() {
        let req = ExecutionRequest::process_range(Utc::now(), Utc::now())
            .with_rule("fan-fault")
            .with_equipment(["ahu-1", "ahu-2"]);
        let shown = req.to_string();
        assert!(shown.contains("rule=fan-fault equipment=ahu-1,ahu-2"), "{shown}");
    }
}
