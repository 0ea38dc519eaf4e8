//! # Execution Proxy Module / 执行代理模块
//!
//! The execution proxy lives inside the isolated context. It loads the test
//! module, applies the convention, runs the selected cases one at a time and
//! publishes every result as soon as it is known.
//!
//! 执行代理位于隔离上下文内。它加载测试模块、应用约定、逐个运行选中的用例，
//! 并在每个结果产生后立即发布。

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::core::boundary::Described;
use crate::core::convention::Convention;
use crate::core::models::{
    AssemblyInfo, AssemblyRecorder, AssemblyResult, CaseResult, CompoundException, MethodGroup,
    Options, ResultEvent,
};
use crate::core::module::{Interrupted, InvocationScope, ModuleLoader, TestModule};
use crate::execution::bus::Bus;
use crate::execution::context::RemoteFault;
use crate::reflect::{MethodMetadata, TypeMetadata, TypeRef};

/// Where the proxy publishes events. Inside a context this is the remote end
/// of a host bus.
pub trait EventSink {
    fn publish(&mut self, event: ResultEvent) -> Result<(), RemoteFault>;
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&mut self, _event: ResultEvent) -> Result<(), RemoteFault> {
        Ok(())
    }
}

impl From<Interrupted> for RemoteFault {
    fn from(_: Interrupted) -> Self {
        RemoteFault::Interrupted
    }
}

pub struct ExecutionProxy {
    loader: Arc<dyn ModuleLoader>,
    convention: Arc<dyn Convention>,
}

impl ExecutionProxy {
    pub fn new(loader: Arc<dyn ModuleLoader>, convention: Arc<dyn Convention>) -> Self {
        Self { loader, convention }
    }

    /// The proxy's boundary interface. Every by-value parameter and return
    /// type listed here crosses the isolation boundary.
    pub fn interface() -> TypeMetadata {
        let path = PathBuf::type_ref();
        let options = Options::type_ref();
        let groups = Vec::<MethodGroup>::type_ref();
        let bus = TypeRef::of::<Bus<'static, ResultEvent>>();
        TypeMetadata::new(TypeRef::of::<ExecutionProxy>().to_string())
            .method(
                MethodMetadata::new("", "discover_test_method_groups")
                    .parameter("module_path", path.clone())
                    .parameter("options", options.clone())
                    .returns(groups.clone()),
            )
            .method(
                MethodMetadata::new("", "run_assembly")
                    .parameter("module_path", path.clone())
                    .parameter("options", options.clone())
                    .capability("bus", bus.clone())
                    .returns(AssemblyResult::type_ref()),
            )
            .method(
                MethodMetadata::new("", "run_methods")
                    .parameter("module_path", path.clone())
                    .parameter("options", options.clone())
                    .capability("bus", bus)
                    .parameter("method_groups", groups)
                    .returns(AssemblyResult::type_ref()),
            )
    }

    /// One group per distinct method name, in class order and then in
    /// declaration order.
    pub fn discover_test_method_groups(
        &self,
        module_path: &Path,
        options: &Options,
    ) -> Result<Vec<MethodGroup>, RemoteFault> {
        let module = self.loader.load(module_path)?;
        let metadata = module.metadata();

        let mut seen = HashSet::new();
        let mut groups = Vec::new();
        for class in self.convention.classes(metadata, options) {
            for method in self.convention.cases(class, options) {
                let group = MethodGroup::new(class.full_name.clone(), method.name.clone());
                if seen.insert(group.clone()) {
                    groups.push(group);
                }
            }
        }
        tracing::debug!(module = %metadata.name, groups = groups.len(), "discovered method groups");
        Ok(groups)
    }

    pub fn run_assembly(
        &self,
        module_path: &Path,
        options: &Options,
        scope: &InvocationScope<'_>,
        sink: &mut dyn EventSink,
    ) -> Result<AssemblyResult, RemoteFault> {
        self.run(module_path, options, None, scope, sink)
    }

    /// Runs only the cases named by `method_groups`. Groups that resolve to
    /// no case are logged and ignored.
    pub fn run_methods(
        &self,
        module_path: &Path,
        options: &Options,
        method_groups: &[MethodGroup],
        scope: &InvocationScope<'_>,
        sink: &mut dyn EventSink,
    ) -> Result<AssemblyResult, RemoteFault> {
        let selected: HashSet<&MethodGroup> = method_groups.iter().collect();
        self.run(module_path, options, Some(&selected), scope, sink)
    }

    fn run(
        &self,
        module_path: &Path,
        options: &Options,
        selected: Option<&HashSet<&MethodGroup>>,
        scope: &InvocationScope<'_>,
        sink: &mut dyn EventSink,
    ) -> Result<AssemblyResult, RemoteFault> {
        let mut module = self.loader.load(module_path)?;
        let metadata = module.metadata().clone();

        sink.publish(ResultEvent::AssemblyStarted(AssemblyInfo {
            name: metadata.name.clone(),
            location: module_path.display().to_string(),
        }))?;

        let mut recorder = AssemblyRecorder::start(metadata.name.clone());
        let mut resolved = HashSet::new();

        for class in self.convention.classes(&metadata, options) {
            for method in self.convention.cases(class, options) {
                let group = MethodGroup::new(class.full_name.clone(), method.name.clone());
                if let Some(selected) = selected {
                    if !selected.contains(&group) {
                        continue;
                    }
                    resolved.insert(group.clone());
                }

                if scope.cancellation.is_cancelled() {
                    return Err(RemoteFault::Interrupted);
                }

                let case = self.execute(module.as_mut(), class, method, group, options, scope)?;
                recorder.record(&case);
                sink.publish(ResultEvent::CaseCompleted(case))?;
            }
        }

        if let Some(selected) = selected {
            for group in selected.iter().filter(|group| !resolved.contains(**group)) {
                tracing::warn!(method_group = %group, "method group matches no test case; ignoring it");
            }
        }

        let result = recorder.finish();
        tracing::info!(
            module = %result.name,
            passed = result.passed,
            failed = result.failed,
            skipped = result.skipped,
            "assembly completed"
        );
        sink.publish(ResultEvent::AssemblyCompleted(result.clone()))?;
        Ok(result)
    }

    fn execute(
        &self,
        module: &mut dyn TestModule,
        class: &TypeMetadata,
        method: &MethodMetadata,
        group: MethodGroup,
        options: &Options,
        scope: &InvocationScope<'_>,
    ) -> Result<CaseResult, Interrupted> {
        if let Some(reason) = self.convention.skip_reason(method, options) {
            return Ok(CaseResult::skipped(group, reason));
        }

        let start = Instant::now();
        let invocation = module.invoke(class, method, scope)?;
        let duration = start.elapsed();

        Ok(match CompoundException::from_list(invocation.failures) {
            None => CaseResult::passed(group, invocation.output, duration),
            Some(exceptions) => CaseResult::failed(group, invocation.output, duration, exceptions),
        })
    }
}
