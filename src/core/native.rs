//! # Native Test Modules / 原生测试模块
//!
//! In-process test modules whose case bodies are Rust closures. Panics and
//! returned errors are captured as failures of the case.
//!
//! 用例主体为 Rust 闭包的进程内测试模块。panic 和返回的错误会被捕获为用例的失败。

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::error::ModuleLoadError;
use crate::core::models::ExceptionInfo;
use crate::core::module::{Interrupted, Invocation, InvocationScope, ModuleLoader, TestModule};
use crate::infra::config::ContextConfig;
use crate::reflect::{MethodMetadata, ModuleMetadata, TypeMetadata};

/// The body of a native case.
pub type CaseBody = Arc<dyn Fn(&mut CaseContext<'_>) -> anyhow::Result<()> + Send + Sync>;

/// Handed to a native case while it runs: an output buffer, the context
/// configuration, and a place to record additional failures.
pub struct CaseContext<'a> {
    output: String,
    config: &'a ContextConfig,
    application_base: &'a Path,
    failures: Vec<ExceptionInfo>,
}

impl<'a> CaseContext<'a> {
    fn new(config: &'a ContextConfig, application_base: &'a Path) -> Self {
        Self {
            output: String::new(),
            config,
            application_base,
            failures: Vec::new(),
        }
    }

    pub fn write_line(&mut self, line: impl AsRef<str>) {
        self.output.push_str(line.as_ref());
        self.output.push('\n');
    }

    pub fn setting(&self, key: &str) -> Option<&str> {
        self.config.setting(key)
    }

    pub fn application_base(&self) -> &Path {
        self.application_base
    }

    /// Records a failure without stopping the case, e.g. from a cleanup step.
    pub fn record_failure(&mut self, failure: ExceptionInfo) {
        self.failures.push(failure);
    }
}

impl fmt::Write for CaseContext<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.output.push_str(s);
        Ok(())
    }
}

/// A test module assembled in code.
pub struct NativeModule {
    metadata: ModuleMetadata,
    bodies: HashMap<(String, String), CaseBody>,
}

impl NativeModule {
    pub fn builder(name: impl Into<String>) -> NativeModuleBuilder {
        NativeModuleBuilder {
            name: name.into(),
            location: PathBuf::new(),
            types: Vec::new(),
            bodies: HashMap::new(),
        }
    }

    /// A loader producing a fresh module from `factory` on every load.
    pub fn loader<F>(factory: F) -> impl ModuleLoader
    where
        F: Fn(&Path) -> NativeModule + Send + Sync + 'static,
    {
        move |path: &Path| -> Result<Box<dyn TestModule>, ModuleLoadError> {
            Ok(Box::new(factory(path)))
        }
    }
}

impl fmt::Debug for NativeModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeModule")
            .field("metadata", &self.metadata)
            .field("bodies", &self.bodies.len())
            .finish()
    }
}

impl TestModule for NativeModule {
    fn metadata(&self) -> &ModuleMetadata {
        &self.metadata
    }

    fn invoke(
        &mut self,
        class: &TypeMetadata,
        method: &MethodMetadata,
        scope: &InvocationScope<'_>,
    ) -> Result<Invocation, Interrupted> {
        if scope.cancellation.is_cancelled() {
            return Err(Interrupted);
        }

        let key = (class.full_name.clone(), method.name.clone());
        let Some(body) = self.bodies.get(&key).cloned() else {
            return Ok(Invocation::failed(
                "",
                ExceptionInfo::new(
                    "MissingBody",
                    format!("{}.{} has no executable body", class.full_name, method.name),
                ),
            ));
        };

        let mut context = CaseContext::new(scope.config, scope.application_base);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(&mut context)));

        let mut failures = Vec::new();
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(error)) => failures.push(ExceptionInfo::from_error(&error)),
            Err(payload) => failures.push(ExceptionInfo::new("Panic", panic_message(payload.as_ref()))),
        }
        failures.append(&mut context.failures);

        Ok(Invocation {
            output: context.output,
            failures,
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}

pub struct NativeModuleBuilder {
    name: String,
    location: PathBuf,
    types: Vec<TypeMetadata>,
    bodies: HashMap<(String, String), CaseBody>,
}

impl NativeModuleBuilder {
    pub fn location(mut self, location: impl Into<PathBuf>) -> Self {
        self.location = location.into();
        self
    }

    /// Declares a type. `build` adds its methods and case bodies.
    pub fn class(mut self, full_name: &str, build: impl FnOnce(ClassBuilder) -> ClassBuilder) -> Self {
        let class = build(ClassBuilder {
            ty: TypeMetadata::new(full_name),
            bodies: Vec::new(),
        });
        for (method, body) in class.bodies {
            self.bodies.insert((full_name.to_string(), method), body);
        }
        self.types.push(class.ty);
        self
    }

    pub fn build(self) -> NativeModule {
        NativeModule {
            metadata: ModuleMetadata {
                name: self.name,
                location: self.location,
                types: self.types,
            },
            bodies: self.bodies,
        }
    }
}

pub struct ClassBuilder {
    ty: TypeMetadata,
    bodies: Vec<(String, CaseBody)>,
}

impl ClassBuilder {
    /// A public, instance, parameterless `void` method with a body.
    pub fn case<F>(self, name: &str, body: F) -> Self
    where
        F: Fn(&mut CaseContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let method = MethodMetadata::new(self.ty.full_name.clone(), name);
        self.method_with_body(method, body)
    }

    /// A case carrying a `Skip` attribute; its body fails if it ever runs.
    pub fn skipped_case(self, name: &str, reason: Option<&str>) -> Self {
        let method = MethodMetadata::new(self.ty.full_name.clone(), name)
            .attribute(crate::core::convention::SKIP_ATTRIBUTE, reason.map(str::to_string));
        self.method_with_body(method, |_| anyhow::bail!("skipped case was executed"))
    }

    /// Metadata only; invoking it reports a missing body.
    pub fn method(mut self, method: MethodMetadata) -> Self {
        self.ty = self.ty.method(method);
        self
    }

    pub fn method_with_body<F>(mut self, method: MethodMetadata, body: F) -> Self
    where
        F: Fn(&mut CaseContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.bodies.push((method.name.clone(), Arc::new(body)));
        self.ty = self.ty.method(method);
        self
    }
}
