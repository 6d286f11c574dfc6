pub mod buffer;
pub mod evictor;
pub mod store;

pub use buffer::{AppendOutcome, BufferLimits, TimeSeriesBuffer};
pub use evictor::{EvictReport, Evictor};
pub use store::{PointHealth, PointStatus, TimeSeriesStore};
