use derive_more::From;
use orion_error::{ErrorCode, StructError, UvsReason};

#[derive(Debug, Clone, PartialEq, thiserror::Error, From)]
pub enum CoreReason {
    #[error("rule binding error")]
    RuleBind,
    #[error("rule execution error")]
    Execution,
    #[error("sink error")]
    Sink,
    #[error("data format error")]
    DataFormat,
    #[error("dependency error")]
    Dependency,
    #[error("{0}")]
    Uvs(UvsReason),
}

impl ErrorCode for CoreReason {
    fn error_code(&self) -> i32 {
        match self {
            Self::RuleBind => 1001,
            Self::Execution => 1002,
            Self::Sink => 1003,
            Self::DataFormat => 1004,
            Self::Dependency => 1005,
            Self::Uvs(u) => u.error_code(),
        }
    }
}

pub type CoreError = StructError<CoreReason>;
pub type CoreResult<T> = Result<T, CoreError>;
