// Shared test helpers for integration tests
#![allow(dead_code)]

use isolation_runner::NativeModule;
use isolation_runner::reflect::{MethodMetadata, TypeRef};
use lazy_static::lazy_static;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tempfile::{TempDir, tempdir};
use tracing_subscriber::EnvFilter;

lazy_static! {
    static ref WORKING_DIRECTORY_LOCK: Mutex<()> = Mutex::new(());
}

/// Every environment switches the process working directory, so tests that
/// open one hold this lock for their whole body.
pub fn lock_working_directory() -> MutexGuard<'static, ()> {
    WORKING_DIRECTORY_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Creates a temporary directory holding one module file.
pub fn module_dir(file_name: &str, content: &str) -> (TempDir, PathBuf) {
    let temp_dir = tempdir().expect("Failed to create temporary directory");
    let module_path = temp_dir.path().join(file_name);
    fs::write(&module_path, content).expect("Failed to write module file");
    (temp_dir, module_path)
}

/// Writes `<module>.config` next to `module_path`.
pub fn write_config(module_path: &Path, content: &str) {
    let mut config = module_path.as_os_str().to_owned();
    config.push(".config");
    fs::write(PathBuf::from(config), content).expect("Failed to write configuration file");
}

pub fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).expect("Failed to canonicalize path")
}

/// A small native module:
///
/// - `calculator::CalculatorTests`: adds (passes), divides_by_zero (error),
///   overflows (panic), flaky (skipped), plus a private helper and a method
///   taking arguments that are never cases;
/// - `calculator::Helpers`: not a test class;
/// - `calculator::StringTests`: concatenates (passes), reads_setting and
///   reports_directory (pass, write to output).
pub fn calculator_module(location: &Path) -> NativeModule {
    NativeModule::builder("calculator")
        .location(location)
        .class("calculator::CalculatorTests", |c| {
            c.case("adds", |ctx| {
                ctx.write_line(format!("2 + 2 = {}", 2 + 2));
                Ok(())
            })
            .case("divides_by_zero", |_| anyhow::bail!("attempted to divide by zero"))
            .case("overflows", |_| panic!("arithmetic overflow"))
            .skipped_case("flaky", Some("tracked separately"))
            .method(MethodMetadata::new("", "helper").non_public())
            .method(MethodMetadata::new("", "with_input").parameter("x", TypeRef::named("i32")))
        })
        .class("calculator::Helpers", |c| c.case("not_a_case", |_| Ok(())))
        .class("calculator::StringTests", |c| {
            c.case("concatenates", |_| {
                anyhow::ensure!(format!("{}{}", "a", "b") == "ab");
                Ok(())
            })
            .case("reads_setting", |ctx| {
                let greeting = ctx.setting("greeting").unwrap_or("none").to_string();
                ctx.write_line(greeting);
                Ok(())
            })
            .case("reports_directory", |ctx| {
                let current = std::env::current_dir()?;
                ctx.write_line(current.display().to_string());
                Ok(())
            })
        })
        .build()
}
