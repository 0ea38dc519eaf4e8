//! # Manifest Test Modules / 清单测试模块
//!
//! The default module format: a TOML manifest describing test types and
//! their methods, where each executable method is backed by a command that
//! runs in the module directory.
//!
//! 默认的模块格式：描述测试类型及其方法的 TOML 清单，
//! 其中每个可执行方法都由在模块目录中运行的命令支撑。
//!
//! ```toml
//! name = "calculator"
//!
//! [[types]]
//! name = "calculator::CalculatorTests"
//!
//! [[types.methods]]
//! name = "adds_numbers"
//! command = "sh -c 'exit 0'"
//! timeout_secs = 5
//! ```

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

use crate::core::convention::SKIP_ATTRIBUTE;
use crate::core::error::ModuleLoadError;
use crate::core::models::ExceptionInfo;
use crate::core::module::{Interrupted, Invocation, InvocationScope, ModuleLoader, TestModule};
use crate::infra::command::{Termination, parse_command_line, spawn_and_capture};
use crate::reflect::{MethodMetadata, ModuleMetadata, TypeMetadata, TypeRef};

/// The on-disk manifest.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub name: String,
    #[serde(default)]
    pub types: Vec<ManifestType>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestType {
    /// Full type name, e.g. `calculator::CalculatorTests`.
    pub name: String,
    #[serde(default)]
    pub methods: Vec<ManifestMethod>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestMethod {
    pub name: String,
    #[serde(default = "default_public")]
    pub public: bool,
    #[serde(default, rename = "static")]
    pub is_static: bool,
    /// Parameter types in `TypeRef` text form.
    #[serde(default)]
    pub parameters: Vec<TypeRef>,
    #[serde(default = "TypeRef::void")]
    pub returns: TypeRef,
    /// Marks the method as skipped; the value is the reason.
    #[serde(default)]
    pub skip: Option<String>,
    /// The command backing this method. Without one, invoking it fails.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_public() -> bool {
    true
}

impl ManifestMethod {
    fn metadata(&self, declaring_type: &str) -> MethodMetadata {
        let mut method = MethodMetadata::new(declaring_type, self.name.clone()).returns(self.returns.clone());
        if !self.public {
            method = method.non_public();
        }
        if self.is_static {
            method = method.as_static();
        }
        for (index, ty) in self.parameters.iter().enumerate() {
            method = method.parameter(format!("arg{index}"), ty.clone());
        }
        if let Some(reason) = &self.skip {
            let argument = (!reason.is_empty()).then(|| reason.clone());
            method = method.attribute(SKIP_ATTRIBUTE, argument);
        }
        method
    }
}

/// Loads [`Manifest`] files.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestLoader;

impl ModuleLoader for ManifestLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn TestModule>, ModuleLoadError> {
        let content = fs::read_to_string(path).map_err(|e| ModuleLoadError::new(path, e))?;
        let manifest: Manifest = toml::from_str(&content).map_err(|e| ModuleLoadError::new(path, e))?;
        Ok(Box::new(ManifestModule::new(path, manifest)))
    }
}

/// A loaded manifest.
#[derive(Debug)]
pub struct ManifestModule {
    metadata: ModuleMetadata,
    manifest: Manifest,
}

impl ManifestModule {
    pub fn new(path: &Path, manifest: Manifest) -> Self {
        let types = manifest
            .types
            .iter()
            .map(|ty| {
                ty.methods
                    .iter()
                    .fold(TypeMetadata::new(ty.name.clone()), |meta, method| {
                        meta.method(method.metadata(&ty.name))
                    })
            })
            .collect();

        Self {
            metadata: ModuleMetadata {
                name: manifest.name.clone(),
                location: path.to_path_buf(),
                types,
            },
            manifest,
        }
    }

    fn find_method(&self, class: &str, method: &str) -> Option<&ManifestMethod> {
        self.manifest
            .types
            .iter()
            .find(|ty| ty.name == class)?
            .methods
            .iter()
            .find(|m| m.name == method)
    }
}

impl TestModule for ManifestModule {
    fn metadata(&self) -> &ModuleMetadata {
        &self.metadata
    }

    fn invoke(
        &mut self,
        class: &TypeMetadata,
        method: &MethodMetadata,
        scope: &InvocationScope<'_>,
    ) -> Result<Invocation, Interrupted> {
        let Some((command_line, timeout_secs)) = self
            .find_method(&class.full_name, &method.name)
            .and_then(|m| m.command.as_deref().map(|c| (c, m.timeout_secs)))
        else {
            return Ok(Invocation::failed(
                "",
                ExceptionInfo::new(
                    "MissingCommand",
                    format!("{}.{} has no command", class.full_name, method.name),
                ),
            ));
        };

        let (program, args) = match parse_command_line(command_line) {
            Ok(parsed) => parsed,
            Err(e) => return Ok(Invocation::failed("", ExceptionInfo::from_error(&e))),
        };

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .current_dir(scope.application_base)
            .envs(&scope.config.settings);

        let timeout = timeout_secs
            .map(Duration::from_secs)
            .or_else(|| scope.config.default_timeout());

        tracing::debug!(command = %command_line, ?timeout, "running command-backed method");
        let (termination, output) = scope
            .runtime
            .block_on(spawn_and_capture(cmd, scope.cancellation, timeout));

        match termination {
            Ok(Termination::Exited(status)) if status.success() => Ok(Invocation::passed(output)),
            Ok(Termination::Exited(status)) => {
                let message = match status.code() {
                    Some(code) => format!("`{command_line}` exited with code {code}"),
                    None => format!("`{command_line}` was terminated by a signal"),
                };
                Ok(Invocation::failed(output, ExceptionInfo::new("NonZeroExit", message)))
            }
            Ok(Termination::TimedOut(after)) => Ok(Invocation::failed(
                output,
                ExceptionInfo::new(
                    "Timeout",
                    format!("`{command_line}` did not finish within {}s", after.as_secs()),
                ),
            )),
            Ok(Termination::Cancelled) => Err(Interrupted),
            Err(e) => Ok(Invocation::failed(
                output,
                ExceptionInfo::new("SpawnFailed", format!("failed to start `{program}`: {e}")),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
name = "calculator"

[[types]]
name = "calculator::CalculatorTests"

[[types.methods]]
name = "adds_numbers"
command = "sh -c 'exit 0'"

[[types.methods]]
name = "helper"
public = false
parameters = ["i32", "list<string>"]
returns = "string"

[[types.methods]]
name = "flaky"
skip = "tracked separately"
"#;

    #[test]
    fn builds_method_metadata_from_manifest() {
        let manifest: Manifest = toml::from_str(MANIFEST).unwrap();
        let module = ManifestModule::new(Path::new("calculator.toml"), manifest);
        let class = &module.metadata().types[0];

        assert_eq!(class.full_name, "calculator::CalculatorTests");
        assert_eq!(class.methods.len(), 3);

        let helper = &class.methods[1];
        assert!(!helper.is_public);
        assert_eq!(helper.parameters.len(), 2);
        assert_eq!(helper.parameters[1].ty, TypeRef::list(TypeRef::string()));
        assert_eq!(helper.return_type, TypeRef::string());

        let flaky = &class.methods[2];
        let skip = flaky.find_attribute(SKIP_ATTRIBUTE).unwrap();
        assert_eq!(skip.argument.as_deref(), Some("tracked separately"));
    }

    #[test]
    fn rejects_unknown_fields() {
        let parsed = toml::from_str::<Manifest>("name = \"x\"\nlanguage = \"en\"");
        assert!(parsed.is_err());
    }
}
