//! # Models Module Unit Tests / Models 模块单元测试
//!
//! This module contains unit tests for the `models.rs` module,
//! testing the boundary data structures and their behavior.
//!
//! 此模块包含 `models.rs` 模块的单元测试，
//! 测试边界数据结构及其行为。

use isolation_runner::core::models::AssemblyRecorder;
use isolation_runner::{
    CaseResult, CaseStatus, CompoundException, ExceptionInfo, MethodGroup, Options,
};
use std::time::Duration;

/// Helper function to create a method group / 创建方法组的辅助函数
fn group(class_name: &str, method_name: &str) -> MethodGroup {
    MethodGroup::new(class_name, method_name)
}

#[cfg(test)]
mod method_group_tests {
    use super::*;

    #[test]
    fn test_display_joins_class_and_method() {
        let group = group("calculator::CalculatorTests", "adds");
        assert_eq!(group.to_string(), "calculator::CalculatorTests.adds");
        assert_eq!(group.full_name(), "calculator::CalculatorTests.adds");
    }

    #[test]
    fn test_parse_splits_at_last_dot() {
        let parsed = MethodGroup::parse("outer.Inner.method").unwrap();
        assert_eq!(parsed, group("outer.Inner", "method"));

        assert_eq!(MethodGroup::parse("no_dot"), None);
        assert_eq!(MethodGroup::parse("trailing."), None);
        assert_eq!(MethodGroup::parse(".leading"), None);
    }
}

#[cfg(test)]
mod options_tests {
    use super::*;

    #[test]
    fn test_keys_keep_insertion_order_and_values_accumulate() {
        let mut options = Options::new();
        options.add("include", "adds").add("class-suffix", "Tests").add("include", "divides");

        assert_eq!(options.keys().collect::<Vec<_>>(), vec!["include", "class-suffix"]);
        assert_eq!(options.values("include"), ["adds", "divides"]);
        assert_eq!(options.first("class-suffix"), Some("Tests"));
        assert_eq!(options.len(), 2);
    }

    #[test]
    fn test_missing_key_has_no_values() {
        let options = Options::new();
        assert!(options.values("include").is_empty());
        assert!(!options.contains("include"));
        assert!(options.is_empty());
    }

    #[test]
    fn test_options_survive_serialization() {
        let options: Options = [("include", "a"), ("include", "b"), ("tag", "fast")]
            .into_iter()
            .collect();
        let json = serde_json::to_string(&options).unwrap();
        let restored: Options = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, options);
    }
}

#[cfg(test)]
mod case_result_tests {
    use super::*;

    #[test]
    fn test_skipped_case_has_zero_duration() {
        let result = CaseResult::skipped(group("a::ATests", "later"), Some("wip".into()));
        assert_eq!(result.status, CaseStatus::Skipped);
        assert_eq!(result.duration, Duration::ZERO);
        assert_eq!(result.skip_reason.as_deref(), Some("wip"));
        assert!(!result.is_failure());
    }

    #[test]
    fn test_only_failed_cases_count_as_failures() {
        let passed = CaseResult::passed(group("a::ATests", "ok"), String::new(), Duration::from_millis(1));
        let failed = CaseResult::failed(
            group("a::ATests", "broken"),
            String::new(),
            Duration::from_millis(1),
            CompoundException::new(ExceptionInfo::new("Error", "boom")),
        );
        assert!(!passed.is_failure());
        assert!(failed.is_failure());
    }

    #[test]
    fn test_compound_exception_keeps_failure_order() {
        let compound = CompoundException::from_list(vec![
            ExceptionInfo::new("Error", "first"),
            ExceptionInfo::new("Cleanup", "second"),
        ])
        .unwrap();

        assert_eq!(compound.count(), 2);
        assert_eq!(compound.primary.message, "first");
        assert_eq!(compound.to_string(), "Error: first\n  also: Cleanup: second");
        assert!(CompoundException::from_list(Vec::new()).is_none());
    }

    #[test]
    fn test_exception_info_captures_cause_chain() {
        let error = anyhow::anyhow!("disk full").context("failed to write report");
        let info = ExceptionInfo::from_error(&error);
        assert_eq!(info.message, "failed to write report");
        assert_eq!(info.details, vec!["disk full".to_string()]);
    }
}

#[cfg(test)]
mod recorder_tests {
    use super::*;

    #[test]
    fn test_recorder_groups_consecutive_cases_by_class() {
        let mut recorder = AssemblyRecorder::start("calculator");
        recorder.record(&CaseResult::passed(group("c::ATests", "one"), String::new(), Duration::from_millis(5)));
        recorder.record(&CaseResult::failed(
            group("c::ATests", "two"),
            String::new(),
            Duration::from_millis(7),
            CompoundException::new(ExceptionInfo::new("Error", "boom")),
        ));
        recorder.record(&CaseResult::skipped(group("c::BTests", "three"), None));

        let result = recorder.finish();
        assert_eq!(result.name, "calculator");
        assert_eq!((result.passed, result.failed, result.skipped), (1, 1, 1));
        assert_eq!(result.total(), 3);
        assert!(!result.is_success());

        assert_eq!(result.classes.len(), 2);
        assert_eq!(result.classes[0].name, "c::ATests");
        assert_eq!(result.classes[0].duration, Duration::from_millis(12));
        assert_eq!(result.classes[1].total(), 1);
    }

    #[test]
    fn test_empty_run_is_successful() {
        let result = AssemblyRecorder::start("empty").finish();
        assert_eq!(result.total(), 0);
        assert!(result.is_success());
        assert!(result.classes.is_empty());
    }
}
