//! # Isolation Runner Library / Isolation Runner 库
//!
//! This library is the execution core of a convention-based test runner.
//! It loads a test module into an isolated execution context, discovers
//! candidate test methods through a composable filtering pipeline, executes
//! them, and streams structured results back across the isolation boundary
//! to a host-side listener.
//!
//! 此库是基于约定的测试运行器的执行核心。
//! 它将测试模块加载到隔离的执行上下文中，通过可组合的过滤管道发现候选测试方法，
//! 执行它们，并将结构化结果跨隔离边界流式传回宿主端的监听器。
//!
//! ## Modules / 模块
//!
//! - `reflect` - Reflection metadata model (types, methods, binding flags)
//! - `core` - Data models, method filter, boundary safety, conventions and test modules
//! - `execution` - Isolated contexts, execution proxy, result bus and the environment
//! - `infra` - Infrastructure services like command execution and file system operations
//!
//! - `reflect` - 反射元数据模型（类型、方法、绑定标志）
//! - `core` - 数据模型、方法过滤器、边界安全、约定和测试模块
//! - `execution` - 隔离上下文、执行代理、结果总线和执行环境
//! - `infra` - 基础设施服务，如命令执行和文件系统操作
//!
//! ## Example / 示例
//!
//! ```no_run
//! use isolation_runner::{ExecutionEnvironment, Options, RecordingListener};
//!
//! # fn main() -> Result<(), isolation_runner::RunnerError> {
//! let mut environment = ExecutionEnvironment::open("target/tests/calculator.toml")?;
//! let mut listener = RecordingListener::default();
//! let result = environment.run_assembly_with(&Options::new(), &mut listener)?;
//! println!("{} passed, {} failed", result.passed, result.failed);
//! environment.close();
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod execution;
pub mod infra;
pub mod reflect;

// Re-export commonly used items
pub use core::error::{BoundarySafetyViolation, ModuleLoadError, RunnerError};
pub use core::models::{
    AssemblyInfo, AssemblyResult, CaseResult, CaseStatus, ClassResult, CompoundException,
    ExceptionInfo, MethodGroup, Options, ResultEvent,
};
pub use core::convention::{Convention, DefaultConvention};
pub use core::filter::MethodFilter;
pub use core::manifest::ManifestLoader;
pub use core::module::{ModuleLoader, TestModule};
pub use core::native::{CaseContext, NativeModule};
pub use execution::bus::{Bus, Listener, RecordingListener};
pub use execution::environment::{AbortHandle, ExecutionEnvironment};
pub use reflect::{BindingFlags, TypeRef};
