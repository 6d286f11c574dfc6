mod state;
mod timeline;

#[cfg(test)]
mod tests;

pub use state::{ActorSettings, ActorState, Step};
pub use timeline::{OutputStatus, OutputTimeline, Segment, TimelineLimits, Transition};
