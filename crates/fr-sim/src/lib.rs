//! Reference re-execution and verification tooling.
//!
//! [`oracle`] replays rule instances over a time range on private actors,
//! [`verify`] diffs two sets of output timelines, and [`datagen`] produces
//! seeded synthetic telemetry to drive both.

pub mod datagen;
pub mod oracle;
pub mod output;
pub mod verify;
