mod condition;
mod evaluate;


pub use condition::{CmpOp, Condition, LatestValues, Mismatch};
pub use evaluate::{EvalLimits, MAX_NAMED_POINTS, MAX_TEXT_CHARS, PointInput, evaluate, truncate};
