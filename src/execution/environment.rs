//! # Execution Environment Module / 执行环境模块
//!
//! The isolation boundary manager. An [`ExecutionEnvironment`] owns one
//! isolated context for one test module, switches the process working
//! directory to the module's directory for its lifetime, and exposes
//! discovery and execution as plain blocking calls.
//!
//! 隔离边界管理器。[`ExecutionEnvironment`] 为一个测试模块拥有一个隔离上下文，
//! 在其生命周期内将进程工作目录切换到模块所在目录，
//! 并以普通阻塞调用的形式提供发现和执行功能。
//!
//! The working directory is process-global. Two environments must not be
//! open at the same time in one process without external coordination.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::core::convention::{Convention, DefaultConvention};
use crate::core::error::RunnerError;
use crate::core::manifest::ManifestLoader;
use crate::core::models::{AssemblyResult, MethodGroup, Options, ResultEvent};
use crate::core::module::ModuleLoader;
use crate::execution::bus::{Bus, Listener};
use crate::execution::context::{CallbackSink, ContextSetup, IsolatedContext, ProxyCall};
use crate::infra::config::ContextConfig;
use crate::infra::fs::{
    WorkingDirectoryGuard, absolute_file_path, containing_directory, optional_config_path,
};

/// Aborts an environment's in-flight work from any thread.
///
/// Aborting is treated like a crash of the context: the running call fails
/// with [`RunnerError::ContextTerminated`], no [`AssemblyResult`] is produced
/// and the environment can only be closed afterwards.
///
/// 从任意线程中止执行环境正在进行的工作。
/// 中止被视为上下文崩溃：正在运行的调用以 `ContextTerminated` 失败，
/// 不会生成 `AssemblyResult`，之后只能关闭该环境。
#[derive(Debug, Clone)]
pub struct AbortHandle {
    token: CancellationToken,
}

impl AbortHandle {
    pub fn abort(&self) {
        tracing::info!("aborting isolated execution context");
        self.token.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Configures the loader and convention of an environment before opening it.
pub struct ExecutionEnvironmentBuilder {
    module_path: PathBuf,
    loader: Arc<dyn ModuleLoader>,
    convention: Arc<dyn Convention>,
}

impl ExecutionEnvironmentBuilder {
    pub fn loader(mut self, loader: impl ModuleLoader + 'static) -> Self {
        self.loader = Arc::new(loader);
        self
    }

    pub fn convention(mut self, convention: impl Convention + 'static) -> Self {
        self.convention = Arc::new(convention);
        self
    }

    /// Resolves the module, enters its directory and starts the context.
    /// On failure the working directory is left as it was.
    #[tracing::instrument(skip_all, fields(module = %self.module_path.display()))]
    pub fn open(self) -> Result<ExecutionEnvironment, RunnerError> {
        let requested = self.module_path;
        let creation_error = |e: anyhow::Error| RunnerError::context_creation(&requested, format!("{e:#}"));

        let module_path = absolute_file_path(&requested).map_err(creation_error)?;
        let application_base = containing_directory(&module_path).map_err(creation_error)?;

        let working_directory = WorkingDirectoryGuard::enter(&application_base)
            .map_err(|e| RunnerError::context_creation(&requested, e))?;

        // Any early return from here on drops the guard, which restores the
        // previous working directory.
        let configuration_file = optional_config_path(&module_path);
        let config = ContextConfig::load_optional(configuration_file.as_deref()).map_err(creation_error)?;

        let setup = ContextSetup::new(application_base, configuration_file);
        let context = IsolatedContext::create(setup, config, self.loader, self.convention)?;
        let abort = AbortHandle {
            token: context.cancellation_token().clone(),
        };

        tracing::info!(
            module = %module_path.display(),
            application = %context.setup().application_name,
            "opened execution environment"
        );
        Ok(ExecutionEnvironment {
            module_path,
            context: Some(context),
            working_directory: Some(working_directory),
            abort,
        })
    }
}

/// One test module loaded into its own isolated execution context.
/// 加载到其独立隔离执行上下文中的一个测试模块。
pub struct ExecutionEnvironment {
    module_path: PathBuf,
    context: Option<IsolatedContext>,
    working_directory: Option<WorkingDirectoryGuard>,
    abort: AbortHandle,
}

impl ExecutionEnvironment {
    /// Opens `module_path` with the manifest loader and the default convention.
    pub fn open(module_path: impl AsRef<Path>) -> Result<Self, RunnerError> {
        Self::builder(module_path).open()
    }

    pub fn builder(module_path: impl AsRef<Path>) -> ExecutionEnvironmentBuilder {
        ExecutionEnvironmentBuilder {
            module_path: module_path.as_ref().to_path_buf(),
            loader: Arc::new(ManifestLoader),
            convention: Arc::new(DefaultConvention),
        }
    }

    /// The absolute path of the module under test.
    pub fn module_path(&self) -> &Path {
        &self.module_path
    }

    /// The unique name of the isolated context, `None` once closed.
    pub fn application_name(&self) -> Option<&str> {
        self.context
            .as_ref()
            .map(|context| context.setup().application_name.as_str())
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.context.is_none()
    }

    /// The test method groups the convention selects, in execution order.
    #[tracing::instrument(skip_all, fields(module = %self.module_path.display()))]
    pub fn discover_test_method_groups(&mut self, options: &Options) -> Result<Vec<MethodGroup>, RunnerError> {
        let call = ProxyCall::Discover {
            module_path: self.module_path.clone(),
            options: options.clone(),
        };
        self.context_mut()?.create_proxy()?.invoke(&call, None)
    }

    /// Runs every case without a listener.
    #[tracing::instrument(skip_all, fields(module = %self.module_path.display()))]
    pub fn run_assembly(&mut self, options: &Options) -> Result<AssemblyResult, RunnerError> {
        let call = ProxyCall::RunAssembly {
            module_path: self.module_path.clone(),
            options: options.clone(),
            bus: None,
        };
        self.context_mut()?.create_proxy()?.invoke(&call, None)
    }

    /// Runs every case, streaming each result to `listener` as it completes.
    #[tracing::instrument(skip_all, fields(module = %self.module_path.display()))]
    pub fn run_assembly_with(
        &mut self,
        options: &Options,
        listener: &mut dyn Listener,
    ) -> Result<AssemblyResult, RunnerError> {
        let mut bus = Bus::<ResultEvent>::new(listener)?;
        let call = ProxyCall::RunAssembly {
            module_path: self.module_path.clone(),
            options: options.clone(),
            bus: Some(bus.remote_ref()),
        };
        self.run_on_bus(&call, &mut bus)
    }

    /// Runs only the cases named by `method_groups`.
    #[tracing::instrument(skip_all, fields(module = %self.module_path.display(), groups = method_groups.len()))]
    pub fn run_methods(
        &mut self,
        options: &Options,
        listener: &mut dyn Listener,
        method_groups: &[MethodGroup],
    ) -> Result<AssemblyResult, RunnerError> {
        let mut bus = Bus::<ResultEvent>::new(listener)?;
        let call = ProxyCall::RunMethods {
            module_path: self.module_path.clone(),
            options: options.clone(),
            bus: Some(bus.remote_ref()),
            method_groups: method_groups.to_vec(),
        };
        self.run_on_bus(&call, &mut bus)
    }

    fn run_on_bus(
        &mut self,
        call: &ProxyCall,
        bus: &mut Bus<'_, ResultEvent>,
    ) -> Result<AssemblyResult, RunnerError> {
        let result = {
            let mut proxy = self.context_mut()?.create_proxy()?;
            proxy.invoke(call, Some(&mut *bus as &mut dyn CallbackSink))
        };
        bus.close();
        result
    }

    /// Stops the context and then restores the working directory. Idempotent.
    pub fn close(&mut self) {
        if let Some(mut context) = self.context.take() {
            context.shutdown();
            tracing::info!(module = %self.module_path.display(), "closed execution environment");
        }
        if let Some(working_directory) = self.working_directory.take() {
            let previous = working_directory.previous().to_path_buf();
            if let Err(e) = working_directory.restore() {
                tracing::warn!(directory = %previous.display(), error = %e, "failed to restore working directory");
            }
        }
    }

    fn context_mut(&mut self) -> Result<&mut IsolatedContext, RunnerError> {
        self.context.as_mut().ok_or(RunnerError::ContextClosed)
    }
}

impl Drop for ExecutionEnvironment {
    fn drop(&mut self) {
        self.close();
    }
}
