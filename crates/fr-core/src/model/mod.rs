mod instance;
mod request;
mod rule;
mod value;

pub use instance::RuleInstance;
pub use request::{ExecutionRequest, RequestCommand};
pub use rule::{BindingRole, CommandTemplate, Multiplicity, Rule, RuleCategory, RuleParameter};
pub use value::{TelemetryPoint, TimedValue, Value};
