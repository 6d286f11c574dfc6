use fr_core::ports::{EngineEvent, EventEmitter};

/// Logs engine events. The default emitter when no external bus is wired.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEmitter;

impl EventEmitter for TracingEmitter {
    fn emit(&self, event: EngineEvent) {
        match event {
            EngineEvent::PassCompleted {
                request_id,
                mode,
                actors,
                points,
                transitions,
                elapsed_ms,
            } => fr_info!(
                pipe,
                request = %request_id,
                mode = ?mode,
                actors,
                points,
                transitions,
                elapsed_ms,
                "pass completed"
            ),
            EngineEvent::StateChanged {
                rule_instance_id,
                at,
                is_valid,
                is_faulted,
            } => fr_debug!(
                pipe,
                instance = %rule_instance_id,
                at = %at,
                is_valid,
                is_faulted,
                "state changed"
            ),
            EngineEvent::RulesRebuilt {
                rule_id,
                instances,
                failures,
            } => fr_info!(conf, rule = %rule_id, instances, failures, "rule instances rebuilt"),
        }
    }
}
