//! # Method Filter Module / 方法过滤模块
//!
//! A composable predicate pipeline over the methods declared on a type.
//! Visibility is selected first, then every configured predicate must hold.
//!
//! 一个基于类型上声明的方法的可组合谓词管道。
//! 首先按可见性选择，然后所有配置的谓词都必须成立。

use std::fmt;
use std::sync::Arc;

use crate::reflect::{BindingFlags, MethodMetadata, TypeMetadata};

type Condition = Arc<dyn Fn(&MethodMetadata) -> bool + Send + Sync>;

/// Selects the methods of a type that satisfy a visibility set and a list of
/// predicates, preserving declaration order.
///
/// A fresh filter has an empty visibility set and matches nothing; callers
/// must opt in with [`MethodFilter::visibility`].
///
/// 选择满足可见性集合和谓词列表的类型方法，保留声明顺序。
/// 新建的过滤器的可见性集合为空，不匹配任何方法；调用者必须通过
/// [`MethodFilter::visibility`] 显式选择。
#[derive(Clone, Default)]
pub struct MethodFilter {
    flags: BindingFlags,
    conditions: Vec<Condition>,
}

impl MethodFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the visibility set.
    pub fn visibility(mut self, flags: BindingFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Adds one more predicate; all predicates must hold.
    pub fn matching<F>(mut self, condition: F) -> Self
    where
        F: Fn(&MethodMetadata) -> bool + Send + Sync + 'static,
    {
        self.conditions.push(Arc::new(condition));
        self
    }

    /// Requires the method to return `void`.
    pub fn void(self) -> Self {
        self.matching(MethodMetadata::is_void)
    }

    /// Requires the method to take no parameters.
    pub fn zero_parameters(self) -> Self {
        self.matching(|method| method.parameters.is_empty())
    }

    /// Applies the visibility set and then every predicate, in the order they
    /// were added, to the methods declared on `ty`.
    pub fn filter<'t>(&self, ty: &'t TypeMetadata) -> Vec<&'t MethodMetadata> {
        ty.methods
            .iter()
            .filter(|method| method.declaring_type == ty.full_name)
            .filter(|method| self.is_visible(method))
            .filter(|method| self.conditions.iter().all(|condition| condition(method)))
            .collect()
    }

    fn is_visible(&self, method: &MethodMetadata) -> bool {
        self.flags.contains(method.binding_flags())
    }
}

impl fmt::Debug for MethodFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodFilter")
            .field("flags", &self.flags)
            .field("conditions", &self.conditions.len())
            .finish()
    }
}
