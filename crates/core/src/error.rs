use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure recorded on a task.
///
/// The variant decides how far the failure reaches: the whole pool, the
/// task's lineage, or (for non-root tasks) just the parent as data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Unrecoverable scheduler condition. Halts the pool permanently.
    #[error("pool panic: {0}")]
    Panic(String),

    /// Broken instruction or family bookkeeping. Tears down the lineage.
    #[error("programming defect: {0}")]
    Defect(String),

    /// Ordinary failure raised by user code.
    #[error("task failed: {0}")]
    Failed(String),
}

/// Severity class of a [`TaskError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClass {
    PoolFatal,
    Defect,
    Ordinary,
}

impl TaskError {
    pub fn panic(msg: impl Into<String>) -> Self {
        Self::Panic(msg.into())
    }

    pub fn defect(msg: impl Into<String>) -> Self {
        Self::Defect(msg.into())
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Panic(_) => ErrorClass::PoolFatal,
            Self::Defect(_) => ErrorClass::Defect,
            Self::Failed(_) => ErrorClass::Ordinary,
        }
    }

    /// Whether this error destroys the lineage of the task carrying it.
    ///
    /// Defects always do. Ordinary failures only do on a root, since there
    /// is no parent left to hand them to.
    pub fn is_lineage_fatal(&self, on_root: bool) -> bool {
        match self.class() {
            ErrorClass::PoolFatal => false,
            ErrorClass::Defect => true,
            ErrorClass::Ordinary => on_root,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes() {
        assert_eq!(TaskError::panic("x").class(), ErrorClass::PoolFatal);
        assert_eq!(TaskError::defect("x").class(), ErrorClass::Defect);
        assert_eq!(TaskError::failed("x").class(), ErrorClass::Ordinary);
    }

    #[test]
    fn lineage_fatal_depends_on_root_for_ordinary() {
        assert!(TaskError::defect("x").is_lineage_fatal(false));
        assert!(TaskError::defect("x").is_lineage_fatal(true));
        assert!(TaskError::failed("x").is_lineage_fatal(true));
        assert!(!TaskError::failed("x").is_lineage_fatal(false));
        assert!(!TaskError::panic("x").is_lineage_fatal(true));
    }

    #[test]
    fn display() {
        assert_eq!(TaskError::failed("boom").to_string(), "task failed: boom");
        assert_eq!(TaskError::panic("id").to_string(), "pool panic: id");
    }
}
