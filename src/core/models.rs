//! # Data Models Module / 数据模型模块
//!
//! This module defines the by-value data that crosses the isolation boundary:
//! method groups, options, case and assembly results, exception records and
//! the bus events that carry them.
//!
//! 此模块定义了跨越隔离边界的按值数据：
//! 方法组、选项、用例与程序集结果、异常记录以及承载它们的总线事件。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

use crate::core::boundary::{Described, TypeCatalog};

/// Identifies a test method by its declaring type's full name and its name.
/// All overloads of a method name share one group.
///
/// 通过声明类型的完整名称和方法名称标识一个测试方法。
/// 同名方法的所有重载共享一个方法组。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodGroup {
    pub class_name: String,
    pub method_name: String,
}

impl MethodGroup {
    pub fn new(class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            method_name: method_name.into(),
        }
    }

    /// Parses `"{class}.{method}"`, splitting at the last `.`.
    pub fn parse(full_name: &str) -> Option<Self> {
        let (class_name, method_name) = full_name.rsplit_once('.')?;
        if class_name.is_empty() || method_name.is_empty() {
            return None;
        }
        Some(Self::new(class_name, method_name))
    }

    pub fn full_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for MethodGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class_name, self.method_name)
    }
}

impl Described for MethodGroup {
    fn describe(catalog: &mut TypeCatalog) {
        catalog.transferable::<Self>(|t| {
            t.property::<String>("class_name")
                .property::<String>("method_name")
        });
    }
}

/// One key of [`Options`] with its values, in insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionEntry {
    pub key: String,
    pub values: Vec<String>,
}

impl Described for OptionEntry {
    fn describe(catalog: &mut TypeCatalog) {
        catalog.transferable::<Self>(|t| t.property::<String>("key").property::<Vec<String>>("values"));
    }
}

/// An ordered mapping from string keys to string lists, handed unchanged
/// from the host to the isolated context.
///
/// 一个从字符串键到字符串列表的有序映射，原样从宿主传递到隔离上下文。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    entries: Vec<OptionEntry>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `value` to `key`'s list, creating the key if needed.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|e| e.key == key) {
            Some(entry) => entry.values.push(value),
            None => self.entries.push(OptionEntry {
                key,
                values: vec![value],
            }),
        }
        self
    }

    /// Builder form of [`Options::add`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.add(key, value);
        self
    }

    /// All values of `key`, or an empty slice.
    pub fn values(&self, key: &str) -> &[String] {
        self.entries
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.values.as_slice())
            .unwrap_or(&[])
    }

    pub fn first(&self, key: &str) -> Option<&str> {
        self.values(key).first().map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|e| e.key == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|e| (e.key.as_str(), e.values.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Options {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut options = Options::new();
        for (key, value) in iter {
            options.add(key, value);
        }
        options
    }
}

impl Described for Options {
    fn describe(catalog: &mut TypeCatalog) {
        catalog.transferable::<Self>(|t| t.non_public_property::<Vec<OptionEntry>>("entries"));
    }
}

/// The outcome of one executed case.
/// 单个已执行用例的结果状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaseStatus {
    Passed,
    Failed,
    Skipped,
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CaseStatus::Passed => "Passed",
            CaseStatus::Failed => "Failed",
            CaseStatus::Skipped => "Skipped",
        };
        f.write_str(text)
    }
}

impl Described for CaseStatus {
    fn describe(catalog: &mut TypeCatalog) {
        catalog.transferable::<Self>(|t| t);
    }
}

/// A flattened, boundary-safe record of one failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    /// The kind of failure, e.g. "Panic", "Timeout" or "NonZeroExit".
    pub type_name: String,
    pub message: String,
    /// Supporting lines: the cause chain, or captured diagnostics.
    #[serde(default)]
    pub details: Vec<String>,
}

impl ExceptionInfo {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.details.push(detail.into());
        self
    }

    /// Captures an error together with its cause chain.
    pub fn from_error(error: &anyhow::Error) -> Self {
        Self {
            type_name: "Error".to_string(),
            message: error.to_string(),
            details: error.chain().skip(1).map(|cause| cause.to_string()).collect(),
        }
    }
}

impl fmt::Display for ExceptionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)
    }
}

impl Described for ExceptionInfo {
    fn describe(catalog: &mut TypeCatalog) {
        catalog.transferable::<Self>(|t| {
            t.property::<String>("type_name")
                .property::<String>("message")
                .property::<Vec<String>>("details")
        });
    }
}

/// The primary failure of a case plus any further failures raised after it.
/// 用例的主要失败以及其后引发的其他失败。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompoundException {
    pub primary: ExceptionInfo,
    #[serde(default)]
    pub secondary: Vec<ExceptionInfo>,
}

impl CompoundException {
    pub fn new(primary: ExceptionInfo) -> Self {
        Self {
            primary,
            secondary: Vec::new(),
        }
    }

    pub fn with_secondary(mut self, exception: ExceptionInfo) -> Self {
        self.secondary.push(exception);
        self
    }

    /// Builds a compound exception from a list; `None` when the list is empty.
    pub fn from_list(mut exceptions: Vec<ExceptionInfo>) -> Option<Self> {
        if exceptions.is_empty() {
            return None;
        }
        let primary = exceptions.remove(0);
        Some(Self {
            primary,
            secondary: exceptions,
        })
    }

    pub fn all(&self) -> impl Iterator<Item = &ExceptionInfo> {
        std::iter::once(&self.primary).chain(self.secondary.iter())
    }

    pub fn count(&self) -> usize {
        1 + self.secondary.len()
    }
}

impl fmt::Display for CompoundException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.primary)?;
        for secondary in &self.secondary {
            write!(f, "\n  also: {secondary}")?;
        }
        Ok(())
    }
}

impl Described for CompoundException {
    fn describe(catalog: &mut TypeCatalog) {
        catalog.transferable::<Self>(|t| {
            t.property::<ExceptionInfo>("primary")
                .property::<Vec<ExceptionInfo>>("secondary")
        });
    }
}

/// The outcome of one executed method.
///
/// 单个已执行方法的结果。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseResult {
    pub status: CaseStatus,
    /// Display name, `"{class}.{method}"`.
    pub name: String,
    pub method_group: MethodGroup,
    /// Output captured while the case ran.
    pub output: String,
    pub duration: Duration,
    pub exceptions: Option<CompoundException>,
    pub skip_reason: Option<String>,
}

impl CaseResult {
    pub fn passed(method_group: MethodGroup, output: String, duration: Duration) -> Self {
        Self {
            status: CaseStatus::Passed,
            name: method_group.to_string(),
            method_group,
            output,
            duration,
            exceptions: None,
            skip_reason: None,
        }
    }

    pub fn failed(
        method_group: MethodGroup,
        output: String,
        duration: Duration,
        exceptions: CompoundException,
    ) -> Self {
        Self {
            status: CaseStatus::Failed,
            name: method_group.to_string(),
            method_group,
            output,
            duration,
            exceptions: Some(exceptions),
            skip_reason: None,
        }
    }

    pub fn skipped(method_group: MethodGroup, reason: Option<String>) -> Self {
        Self {
            status: CaseStatus::Skipped,
            name: method_group.to_string(),
            method_group,
            output: String::new(),
            duration: Duration::ZERO,
            exceptions: None,
            skip_reason: reason,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status == CaseStatus::Failed
    }
}

impl Described for CaseResult {
    fn describe(catalog: &mut TypeCatalog) {
        catalog.transferable::<Self>(|t| {
            t.property::<CaseStatus>("status")
                .property::<String>("name")
                .property::<MethodGroup>("method_group")
                .property::<String>("output")
                .property::<Duration>("duration")
                .property::<Option<CompoundException>>("exceptions")
                .property::<Option<String>>("skip_reason")
        });
    }
}

/// Aggregate counts for one test class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassResult {
    pub name: String,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration: Duration,
}

impl ClassResult {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: 0,
            failed: 0,
            skipped: 0,
            duration: Duration::ZERO,
        }
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped
    }

    fn record(&mut self, case: &CaseResult) {
        match case.status {
            CaseStatus::Passed => self.passed += 1,
            CaseStatus::Failed => self.failed += 1,
            CaseStatus::Skipped => self.skipped += 1,
        }
        self.duration += case.duration;
    }
}

impl Described for ClassResult {
    fn describe(catalog: &mut TypeCatalog) {
        catalog.transferable::<Self>(|t| {
            t.property::<String>("name")
                .property::<usize>("passed")
                .property::<usize>("failed")
                .property::<usize>("skipped")
                .property::<Duration>("duration")
        });
    }
}

/// Announced once when a run starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyInfo {
    pub name: String,
    pub location: String,
}

impl Described for AssemblyInfo {
    fn describe(catalog: &mut TypeCatalog) {
        catalog.transferable::<Self>(|t| t.property::<String>("name").property::<String>("location"));
    }
}

/// The aggregate outcome of a run. Produced once, immutable afterwards.
/// 一次运行的汇总结果。只生成一次，之后不可变。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyResult {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub classes: Vec<ClassResult>,
}

impl AssemblyResult {
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped
    }

    /// `true` when no case failed.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

impl Described for AssemblyResult {
    fn describe(catalog: &mut TypeCatalog) {
        catalog.transferable::<Self>(|t| {
            t.property::<String>("name")
                .property::<DateTime<Utc>>("started_at")
                .property::<Duration>("duration")
                .property::<usize>("passed")
                .property::<usize>("failed")
                .property::<usize>("skipped")
                .property::<Vec<ClassResult>>("classes")
        });
    }
}

/// Accumulates case results into an [`AssemblyResult`].
/// Consecutive cases of the same class share one [`ClassResult`].
#[derive(Debug)]
pub struct AssemblyRecorder {
    name: String,
    started_at: DateTime<Utc>,
    start: Instant,
    classes: Vec<ClassResult>,
}

impl AssemblyRecorder {
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            started_at: Utc::now(),
            start: Instant::now(),
            classes: Vec::new(),
        }
    }

    pub fn record(&mut self, case: &CaseResult) {
        let class_name = &case.method_group.class_name;
        match self.classes.last_mut() {
            Some(class) if class.name == *class_name => class.record(case),
            _ => {
                let mut class = ClassResult::new(class_name.clone());
                class.record(case);
                self.classes.push(class);
            }
        }
    }

    pub fn finish(self) -> AssemblyResult {
        let passed = self.classes.iter().map(|c| c.passed).sum();
        let failed = self.classes.iter().map(|c| c.failed).sum();
        let skipped = self.classes.iter().map(|c| c.skipped).sum();
        AssemblyResult {
            name: self.name,
            started_at: self.started_at,
            duration: self.start.elapsed(),
            passed,
            failed,
            skipped,
            classes: self.classes,
        }
    }
}

/// The messages a result bus carries from the context to the host listener.
/// 结果总线从上下文传递到宿主监听器的消息。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultEvent {
    AssemblyStarted(AssemblyInfo),
    CaseCompleted(CaseResult),
    AssemblyCompleted(AssemblyResult),
}

impl Described for ResultEvent {
    fn describe(catalog: &mut TypeCatalog) {
        catalog.transferable::<Self>(|t| {
            t.property::<AssemblyInfo>("assembly_started")
                .property::<CaseResult>("case_completed")
                .property::<AssemblyResult>("assembly_completed")
        });
    }
}
