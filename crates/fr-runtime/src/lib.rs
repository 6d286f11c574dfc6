//! Async runtime of the fault reactor: the Execution Processor, the Rule
//! Orchestrator, sink queues, maintenance tasks, file adapters and the host
//! lifecycle.

#[macro_use]
mod log_macros;

pub mod actor_store;
pub mod emitter;
pub mod error;
pub mod health;
pub mod lifecycle;
mod maintenance_task;
pub mod metrics;
pub mod orchestrator;
pub mod processor;
pub mod repository;
pub mod service;
pub mod sink_task;
pub mod source;
pub mod tracing_init;
