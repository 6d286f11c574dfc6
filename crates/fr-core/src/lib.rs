//! Core domain of the fault reactor: rule binding, per-instance actors,
//! time-series buffering and insight derivation. Everything here is
//! runtime-agnostic; scheduling and I/O live in `fr-runtime`.

pub mod actor;
pub mod binding;
pub mod cache;
pub mod error;
pub mod insight;
pub mod memory;
pub mod model;
pub mod ports;
pub mod retry;
pub mod rule;
pub mod timeseries;
