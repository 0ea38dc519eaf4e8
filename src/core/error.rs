//! # Error Taxonomy Module / 错误分类模块
//!
//! Context-, module- and boundary-level failures are surfaced to the caller
//! through [`RunnerError`]. A failing test case is never an error: it is
//! recorded as a failed [`CaseResult`](crate::core::models::CaseResult).
//!
//! 上下文、模块和边界级别的失败通过 [`RunnerError`] 报告给调用者。
//! 失败的测试用例从不是错误：它被记录为失败的 `CaseResult`。

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// A type intended to cross the isolation boundary failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{type_name} is not an acceptable {site} because it will not successfully cross the isolation boundary")]
pub struct BoundarySafetyViolation {
    /// The offending type, in `TypeRef` text form.
    pub type_name: String,
    /// Where the type was used, e.g. "message type for bus" or
    /// "parameter type for method a::Listener.case_completed".
    pub site: String,
}

/// A test module could not be loaded inside the isolated context.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("failed to load test module {}: {reason}", path.display())]
pub struct ModuleLoadError {
    pub path: PathBuf,
    pub reason: String,
}

impl ModuleLoadError {
    pub fn new(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors surfaced by the environment, the bus and the boundary.
/// 由执行环境、总线和边界报告的错误。
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The isolated execution context could not be constructed.
    #[error("failed to create isolated execution context for {}: {reason}", path.display())]
    ContextCreation { path: PathBuf, reason: String },

    /// The module could not be loaded; the context stays usable.
    #[error(transparent)]
    ModuleLoad(#[from] ModuleLoadError),

    #[error(transparent)]
    BoundarySafety(#[from] BoundarySafetyViolation),

    /// The listener failed while receiving an event.
    #[error("listener failed to receive event: {0}")]
    ListenerDelivery(String),

    #[error("bus is closed; no further events can be published")]
    BusClosed,

    #[error("execution environment is closed")]
    ContextClosed,

    /// The context went away (aborted or crashed) before replying.
    #[error("isolated execution context terminated before replying")]
    ContextTerminated,

    #[error("failed to marshal value across the isolation boundary: {0}")]
    Marshal(String),
}

impl RunnerError {
    pub fn context_creation(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        RunnerError::ContextCreation {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<serde_json::Error> for RunnerError {
    fn from(e: serde_json::Error) -> Self {
        RunnerError::Marshal(e.to_string())
    }
}
