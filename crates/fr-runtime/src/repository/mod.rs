//! Persistence backends for the engine's repositories.

mod file;

pub use file::FileStateStore;
