//! # Convention Module / 约定模块
//!
//! A convention decides which types of a module are test classes, which of
//! their methods are cases, and which cases are skipped. The runner only
//! depends on the [`Convention`] trait; [`DefaultConvention`] is provided so
//! the crate is usable on its own.
//!
//! 约定决定模块中的哪些类型是测试类、其中哪些方法是用例，以及哪些用例被跳过。
//! 运行器只依赖 [`Convention`] trait；提供 [`DefaultConvention`] 以便 crate 可以独立使用。

use crate::core::filter::MethodFilter;
use crate::core::models::Options;
use crate::reflect::{BindingFlags, MethodMetadata, ModuleMetadata, TypeMetadata};

/// Option key: simple-name suffix that marks a test class.
pub const CLASS_SUFFIX_OPTION: &str = "class-suffix";
/// Option key: substrings, one of which a case's method name must contain.
pub const INCLUDE_OPTION: &str = "include";
/// Attribute that marks a case as skipped; its argument is the reason.
pub const SKIP_ATTRIBUTE: &str = "Skip";

const DEFAULT_CLASS_SUFFIX: &str = "Tests";

pub trait Convention: Send + Sync {
    /// The test classes of `module`, in execution order.
    fn classes<'m>(&self, module: &'m ModuleMetadata, options: &Options) -> Vec<&'m TypeMetadata>;

    /// The case methods of `class`, in execution order.
    fn cases<'t>(&self, class: &'t TypeMetadata, options: &Options) -> Vec<&'t MethodMetadata>;

    /// `Some` when `method` must not run. The inner value is the reason.
    fn skip_reason(&self, method: &MethodMetadata, options: &Options) -> Option<Option<String>>;
}

/// Classes whose simple name ends with `class-suffix` (default `Tests`);
/// cases are their public, instance, void, parameterless methods, narrowed by
/// the `include` option; a `Skip` attribute skips a case.
#[derive(Debug, Clone, Default)]
pub struct DefaultConvention;

impl DefaultConvention {
    fn case_filter(options: &Options) -> MethodFilter {
        let filter = MethodFilter::new()
            .visibility(BindingFlags::PUBLIC | BindingFlags::INSTANCE)
            .void()
            .zero_parameters();

        let includes = options.values(INCLUDE_OPTION).to_vec();
        if includes.is_empty() {
            filter
        } else {
            filter.matching(move |method| includes.iter().any(|needle| method.name.contains(needle.as_str())))
        }
    }
}

impl Convention for DefaultConvention {
    fn classes<'m>(&self, module: &'m ModuleMetadata, options: &Options) -> Vec<&'m TypeMetadata> {
        let suffix = options
            .first(CLASS_SUFFIX_OPTION)
            .unwrap_or(DEFAULT_CLASS_SUFFIX);
        module
            .types
            .iter()
            .filter(|ty| ty.simple_name().ends_with(suffix))
            .collect()
    }

    fn cases<'t>(&self, class: &'t TypeMetadata, options: &Options) -> Vec<&'t MethodMetadata> {
        Self::case_filter(options).filter(class)
    }

    fn skip_reason(&self, method: &MethodMetadata, _options: &Options) -> Option<Option<String>> {
        method
            .find_attribute(SKIP_ATTRIBUTE)
            .map(|attribute| attribute.argument.clone())
    }
}
