//! # Execution Environment Integration Tests / 执行环境集成测试
//!
//! End-to-end tests of the isolation boundary manager: discovery, streamed
//! runs, teardown and the failure modes around the isolated context.
//!
//! 隔离边界管理器的端到端测试：发现、流式运行、拆除以及隔离上下文相关的失败模式。

mod common;

use common::{calculator_module, canonical, init_tracing, lock_working_directory, module_dir, write_config};
use isolation_runner::core::module::TestModule;
use isolation_runner::{
    CaseResult, CaseStatus, ExecutionEnvironment, Listener, MethodGroup, ModuleLoadError, NativeModule,
    Options, RecordingListener, ResultEvent, RunnerError,
};
use predicates::prelude::*;
use std::env;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

fn open_calculator(module_path: &Path) -> ExecutionEnvironment {
    ExecutionEnvironment::builder(module_path)
        .loader(NativeModule::loader(calculator_module))
        .open()
        .expect("Failed to open execution environment")
}

fn group(class_name: &str, method_name: &str) -> MethodGroup {
    MethodGroup::new(class_name, method_name)
}

/// Fails on the first case it receives.
struct RefusingListener;

impl Listener for RefusingListener {
    fn case_completed(&mut self, _result: &CaseResult) -> anyhow::Result<()> {
        anyhow::bail!("listener refused the result")
    }
}

/// Counts the cases it has received.
struct CountingListener {
    seen: Arc<AtomicUsize>,
}

impl Listener for CountingListener {
    fn case_completed(&mut self, _result: &CaseResult) -> anyhow::Result<()> {
        self.seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Panics on the first case it receives.
struct PanickingListener;

impl Listener for PanickingListener {
    fn case_completed(&mut self, result: &CaseResult) -> anyhow::Result<()> {
        panic!("listener crashed on {}", result.name)
    }
}

#[cfg(test)]
mod discovery_tests {
    use super::*;

    #[test]
    fn test_discovery_follows_class_then_declaration_order() {
        init_tracing();
        let _lock = lock_working_directory();
        let (_dir, module_path) = module_dir("calculator.mod", "");

        let mut environment = open_calculator(&module_path);
        let groups = environment.discover_test_method_groups(&Options::new()).unwrap();

        assert_eq!(
            groups,
            vec![
                group("calculator::CalculatorTests", "adds"),
                group("calculator::CalculatorTests", "divides_by_zero"),
                group("calculator::CalculatorTests", "overflows"),
                group("calculator::CalculatorTests", "flaky"),
                group("calculator::StringTests", "concatenates"),
                group("calculator::StringTests", "reads_setting"),
                group("calculator::StringTests", "reports_directory"),
            ]
        );
    }

    #[test]
    fn test_discovery_honors_convention_options() {
        let _lock = lock_working_directory();
        let (_dir, module_path) = module_dir("calculator.mod", "");

        let mut environment = open_calculator(&module_path);
        let options = Options::new().with("include", "con").with("class-suffix", "StringTests");
        let groups = environment.discover_test_method_groups(&options).unwrap();

        assert_eq!(groups, vec![group("calculator::StringTests", "concatenates")]);
    }

    #[test]
    fn test_discovery_is_repeatable() {
        let _lock = lock_working_directory();
        let (_dir, module_path) = module_dir("calculator.mod", "");

        let mut environment = open_calculator(&module_path);
        let first = environment.discover_test_method_groups(&Options::new()).unwrap();
        let second = environment.discover_test_method_groups(&Options::new()).unwrap();
        assert_eq!(first, second);
    }
}

#[cfg(test)]
mod run_tests {
    use super::*;

    #[test]
    fn test_results_stream_in_completion_order() {
        init_tracing();
        let _lock = lock_working_directory();
        let (_dir, module_path) = module_dir("calculator.mod", "");

        let mut environment = open_calculator(&module_path);
        let mut listener = RecordingListener::default();
        let result = environment
            .run_assembly_with(&Options::new(), &mut listener)
            .unwrap();

        let events = listener.events();
        assert!(matches!(events.first(), Some(ResultEvent::AssemblyStarted(info)) if info.name == "calculator"));
        assert!(matches!(events.last(), Some(ResultEvent::AssemblyCompleted(_))));
        assert_eq!(events.len(), 7 + 2);

        let names: Vec<&str> = listener.cases().map(|case| case.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "calculator::CalculatorTests.adds",
                "calculator::CalculatorTests.divides_by_zero",
                "calculator::CalculatorTests.overflows",
                "calculator::CalculatorTests.flaky",
                "calculator::StringTests.concatenates",
                "calculator::StringTests.reads_setting",
                "calculator::StringTests.reports_directory",
            ]
        );

        assert_eq!(result.passed, 4);
        assert_eq!(result.failed, 2);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.total(), listener.cases().count());
        assert_eq!(listener.assembly(), Some(&result));

        let classes: Vec<(&str, usize)> = result.classes.iter().map(|c| (c.name.as_str(), c.total())).collect();
        assert_eq!(
            classes,
            vec![("calculator::CalculatorTests", 4), ("calculator::StringTests", 3)]
        );
    }

    #[test]
    fn test_each_result_reaches_listener_before_next_case_runs() {
        let _lock = lock_working_directory();
        let (_dir, module_path) = module_dir("streaming.mod", "");
        let seen = Arc::new(AtomicUsize::new(0));

        let observed = Arc::clone(&seen);
        let mut environment = ExecutionEnvironment::builder(&module_path)
            .loader(NativeModule::loader(move |path: &Path| {
                let observed = Arc::clone(&observed);
                NativeModule::builder("streaming")
                    .location(path)
                    .class("streaming::StreamingTests", move |c| {
                        c.case("first", |_| Ok(())).case("second", move |_| {
                            let delivered = observed.load(Ordering::SeqCst);
                            anyhow::ensure!(delivered == 1, "listener had seen {delivered} results before the second case");
                            Ok(())
                        })
                    })
                    .build()
            }))
            .open()
            .unwrap();

        let mut listener = CountingListener {
            seen: Arc::clone(&seen),
        };
        let result = environment
            .run_assembly_with(&Options::new(), &mut listener)
            .unwrap();

        assert_eq!(result.passed, 2, "second case saw a batched result stream");
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_case_outcomes_are_captured() {
        let _lock = lock_working_directory();
        let (_dir, module_path) = module_dir("calculator.mod", "");

        let mut environment = open_calculator(&module_path);
        let mut listener = RecordingListener::default();
        environment
            .run_assembly_with(&Options::new(), &mut listener)
            .unwrap();
        let cases: Vec<&CaseResult> = listener.cases().collect();

        let adds = cases[0];
        assert_eq!(adds.status, CaseStatus::Passed);
        assert_eq!(adds.output, "2 + 2 = 4\n");
        assert!(adds.exceptions.is_none());

        let divides = cases[1];
        assert_eq!(divides.status, CaseStatus::Failed);
        let exceptions = divides.exceptions.as_ref().unwrap();
        assert_eq!(exceptions.count(), 1);
        assert!(predicate::str::contains("divide by zero").eval(&exceptions.primary.message));

        let overflows = cases[2];
        assert_eq!(overflows.status, CaseStatus::Failed);
        let primary = &overflows.exceptions.as_ref().unwrap().primary;
        assert_eq!(primary.type_name, "Panic");
        assert_eq!(primary.message, "arithmetic overflow");

        let flaky = cases[3];
        assert_eq!(flaky.status, CaseStatus::Skipped);
        assert_eq!(flaky.duration, Duration::ZERO);
        assert_eq!(flaky.skip_reason.as_deref(), Some("tracked separately"));
    }

    #[test]
    fn test_run_without_listener_returns_aggregate() {
        let _lock = lock_working_directory();
        let (_dir, module_path) = module_dir("calculator.mod", "");

        let mut environment = open_calculator(&module_path);
        let result = environment.run_assembly(&Options::new()).unwrap();
        assert_eq!(result.name, "calculator");
        assert_eq!(result.total(), 7);
        assert!(!result.is_success());
    }

    #[test]
    fn test_run_methods_runs_only_selected_groups() {
        let _lock = lock_working_directory();
        let (_dir, module_path) = module_dir("calculator.mod", "");

        let mut environment = open_calculator(&module_path);
        let mut listener = RecordingListener::default();
        let selected = [
            group("calculator::StringTests", "concatenates"),
            group("calculator::CalculatorTests", "adds"),
            group("calculator::Missing", "nothing"),
        ];
        let result = environment
            .run_methods(&Options::new(), &mut listener, &selected)
            .unwrap();

        let names: Vec<&str> = listener.cases().map(|case| case.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["calculator::CalculatorTests.adds", "calculator::StringTests.concatenates"]
        );
        assert_eq!(result.passed, 2);
        assert_eq!(result.total(), 2);
    }

    #[test]
    fn test_configuration_settings_reach_cases() {
        let _lock = lock_working_directory();
        let (_dir, module_path) = module_dir("calculator.mod", "");
        write_config(&module_path, "[settings]\ngreeting = \"hello\"\n");

        let mut environment = open_calculator(&module_path);
        let mut listener = RecordingListener::default();
        environment
            .run_methods(
                &Options::new(),
                &mut listener,
                &[group("calculator::StringTests", "reads_setting")],
            )
            .unwrap();

        let case = listener.cases().next().unwrap();
        assert_eq!(case.output, "hello\n");
    }

    #[test]
    fn test_cases_run_in_module_directory() {
        let _lock = lock_working_directory();
        let (dir, module_path) = module_dir("calculator.mod", "");

        let mut environment = open_calculator(&module_path);
        let mut listener = RecordingListener::default();
        environment
            .run_methods(
                &Options::new(),
                &mut listener,
                &[group("calculator::StringTests", "reports_directory")],
            )
            .unwrap();

        let case = listener.cases().next().unwrap();
        assert_eq!(Path::new(case.output.trim_end()), canonical(dir.path()));
    }
}

#[cfg(test)]
mod failure_tests {
    use super::*;

    #[test]
    fn test_listener_failure_aborts_run_and_keeps_context_usable() {
        let _lock = lock_working_directory();
        let (_dir, module_path) = module_dir("calculator.mod", "");

        let mut environment = open_calculator(&module_path);
        let error = environment
            .run_assembly_with(&Options::new(), &mut RefusingListener)
            .unwrap_err();

        match error {
            RunnerError::ListenerDelivery(message) => {
                assert!(predicate::str::contains("listener refused the result").eval(&message));
            }
            other => panic!("Expected ListenerDelivery, got {other:?}"),
        }

        let result = environment.run_assembly(&Options::new()).unwrap();
        assert_eq!(result.total(), 7);
    }

    #[test]
    fn test_missing_module_leaves_working_directory_untouched() {
        let _lock = lock_working_directory();
        let before = env::current_dir().unwrap();
        let dir = tempfile::tempdir().unwrap();

        let error = match ExecutionEnvironment::open(dir.path().join("missing.toml")) {
            Ok(_) => panic!("Expected opening a missing module to fail"),
            Err(error) => error,
        };

        assert!(matches!(error, RunnerError::ContextCreation { .. }));
        assert_eq!(env::current_dir().unwrap(), before);
    }

    #[test]
    fn test_invalid_configuration_fails_creation_and_restores_directory() {
        let _lock = lock_working_directory();
        let before = env::current_dir().unwrap();
        let (_dir, module_path) = module_dir("calculator.mod", "");
        write_config(&module_path, "retries = 3\n");

        let result = ExecutionEnvironment::builder(&module_path)
            .loader(NativeModule::loader(calculator_module))
            .open();

        assert!(matches!(result, Err(RunnerError::ContextCreation { .. })));
        assert_eq!(env::current_dir().unwrap(), before);
    }

    #[test]
    fn test_module_load_failure_is_reported_and_context_survives() {
        let _lock = lock_working_directory();
        let (_dir, module_path) = module_dir("calculator.mod", "");
        let failed_once = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&failed_once);
        let loader = move |path: &Path| -> Result<Box<dyn TestModule>, ModuleLoadError> {
            if !flag.swap(true, Ordering::SeqCst) {
                return Err(ModuleLoadError::new(path, "corrupt module image"));
            }
            Ok(Box::new(calculator_module(path)))
        };

        let mut environment = ExecutionEnvironment::builder(&module_path)
            .loader(loader)
            .open()
            .unwrap();

        let error = environment.run_assembly(&Options::new()).unwrap_err();
        match error {
            RunnerError::ModuleLoad(e) => assert_eq!(e.reason, "corrupt module image"),
            other => panic!("Expected ModuleLoad, got {other:?}"),
        }

        let groups = environment.discover_test_method_groups(&Options::new()).unwrap();
        assert_eq!(groups.len(), 7);
    }

    #[test]
    fn test_abort_terminates_in_flight_run() {
        let _lock = lock_working_directory();
        let before = env::current_dir().unwrap();
        let (_dir, module_path) = module_dir("slow.mod", "");

        let mut environment = ExecutionEnvironment::builder(&module_path)
            .loader(NativeModule::loader(|path: &Path| {
                NativeModule::builder("slow")
                    .location(path)
                    .class("slow::SlowTests", |c| {
                        c.case("sleeps", |_| {
                            thread::sleep(Duration::from_millis(500));
                            Ok(())
                        })
                        .case("never_runs", |_| Ok(()))
                    })
                    .build()
            }))
            .open()
            .unwrap();

        let abort = environment.abort_handle();
        let aborter = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            abort.abort();
        });

        let mut listener = RecordingListener::default();
        let error = environment
            .run_assembly_with(&Options::new(), &mut listener)
            .unwrap_err();
        aborter.join().unwrap();

        assert!(matches!(error, RunnerError::ContextTerminated));
        assert!(listener.assembly().is_none());
        assert!(listener.cases().all(|case| case.name != "slow::SlowTests.never_runs"));
        assert!(matches!(
            environment.discover_test_method_groups(&Options::new()),
            Err(RunnerError::ContextTerminated)
        ));

        environment.close();
        assert_eq!(env::current_dir().unwrap(), before);
    }
}

#[cfg(test)]
mod teardown_tests {
    use super::*;

    #[test]
    fn test_open_enters_module_directory_and_close_restores_it() {
        let _lock = lock_working_directory();
        let before = env::current_dir().unwrap();
        let (dir, module_path) = module_dir("calculator.mod", "");

        let mut environment = open_calculator(&module_path);
        assert_eq!(env::current_dir().unwrap(), canonical(dir.path()));
        assert_eq!(environment.module_path(), canonical(&module_path));
        assert!(environment.application_name().is_some());

        environment.close();
        assert_eq!(env::current_dir().unwrap(), before);
        assert!(environment.is_closed());
    }

    #[test]
    fn test_close_is_idempotent() {
        let _lock = lock_working_directory();
        let before = env::current_dir().unwrap();
        let (_dir, module_path) = module_dir("calculator.mod", "");

        let mut environment = open_calculator(&module_path);
        environment.close();
        environment.close();
        assert_eq!(env::current_dir().unwrap(), before);

        assert!(matches!(
            environment.run_assembly(&Options::new()),
            Err(RunnerError::ContextClosed)
        ));
    }

    #[test]
    fn test_drop_restores_working_directory() {
        let _lock = lock_working_directory();
        let before = env::current_dir().unwrap();
        let (_dir, module_path) = module_dir("calculator.mod", "");

        {
            let mut environment = open_calculator(&module_path);
            environment.run_assembly(&Options::new()).unwrap();
        }
        assert_eq!(env::current_dir().unwrap(), before);
    }

    #[test]
    fn test_listener_panic_still_tears_down_context() {
        let _lock = lock_working_directory();
        let before = env::current_dir().unwrap();
        let (_dir, module_path) = module_dir("calculator.mod", "");

        let (done_tx, done_rx) = mpsc::channel();
        let runner = thread::spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                let mut environment = open_calculator(&module_path);
                let _ = environment.run_assembly_with(&Options::new(), &mut PanickingListener);
            }));
            let _ = done_tx.send(outcome.is_err());
        });

        let panicked = done_rx
            .recv_timeout(Duration::from_secs(10))
            .expect("Environment teardown hung after listener panic");
        runner.join().unwrap();

        assert!(panicked);
        assert_eq!(env::current_dir().unwrap(), before);
    }

    #[test]
    fn test_each_environment_gets_a_fresh_context() {
        let _lock = lock_working_directory();
        let (_dir, module_path) = module_dir("calculator.mod", "");

        let first = open_calculator(&module_path);
        let first_name = first.application_name().map(str::to_string);
        drop(first);

        let second = open_calculator(&module_path);
        assert_ne!(second.application_name().map(str::to_string), first_name);
    }
}
