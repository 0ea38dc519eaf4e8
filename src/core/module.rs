//! # Test Module Abstractions / 测试模块抽象
//!
//! A test module exposes its reflection metadata and knows how to invoke one
//! of its methods. Modules are produced by a [`ModuleLoader`] inside the
//! isolated context and never leave it.
//!
//! 测试模块公开其反射元数据，并知道如何调用其方法。
//! 模块由隔离上下文内的 [`ModuleLoader`] 生成，且永远不会离开该上下文。

use std::path::Path;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use crate::core::error::ModuleLoadError;
use crate::core::models::ExceptionInfo;
use crate::infra::config::ContextConfig;
use crate::reflect::{MethodMetadata, ModuleMetadata, TypeMetadata};

/// What an invoked method produced: its captured output and its failures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    pub output: String,
    pub failures: Vec<ExceptionInfo>,
}

impl Invocation {
    pub fn passed(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            failures: Vec::new(),
        }
    }

    pub fn failed(output: impl Into<String>, failure: ExceptionInfo) -> Self {
        Self {
            output: output.into(),
            failures: vec![failure],
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The invocation was cut short because the context is being destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

/// Everything the isolated context lends to a method while it runs.
/// 隔离上下文在方法运行期间提供给它的一切。
pub struct InvocationScope<'a> {
    /// The context's own runtime, for methods that run asynchronous work.
    pub runtime: &'a Runtime,
    /// The context's application base directory (the module's directory).
    pub application_base: &'a Path,
    pub config: &'a ContextConfig,
    pub cancellation: &'a CancellationToken,
}

pub trait TestModule {
    fn metadata(&self) -> &ModuleMetadata;

    /// Runs `method` of `class`. Failures of the method itself are data in
    /// the returned [`Invocation`]; only an abort yields `Err`.
    fn invoke(
        &mut self,
        class: &TypeMetadata,
        method: &MethodMetadata,
        scope: &InvocationScope<'_>,
    ) -> Result<Invocation, Interrupted>;
}

/// Loads test modules from a path. Called inside the isolated context.
pub trait ModuleLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Box<dyn TestModule>, ModuleLoadError>;
}

impl<F> ModuleLoader for F
where
    F: Fn(&Path) -> Result<Box<dyn TestModule>, ModuleLoadError> + Send + Sync,
{
    fn load(&self, path: &Path) -> Result<Box<dyn TestModule>, ModuleLoadError> {
        self(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocation_succeeds_only_without_failures() {
        assert!(Invocation::passed("ok\n").is_success());
        assert!(Invocation::default().is_success());

        let failed = Invocation::failed("", ExceptionInfo::new("Error", "boom"));
        assert!(!failed.is_success());
        assert_eq!(failed.failures.len(), 1);
    }
}
