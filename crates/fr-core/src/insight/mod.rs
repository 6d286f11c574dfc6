mod coalesce;
mod sink;
mod types;

#[cfg(test)]
mod tests;

pub use coalesce::{Coalesce, coalesce};
pub use sink::JsonlSink;
pub use types::{
    Command, CommandRevision, Insight, InsightStatus, Occurrence, command_id, insight_id,
};
