//! # Core Module / 核心模块
//!
//! This module contains the core functionality of the runner: data models,
//! the method filter, the boundary safety validator, conventions and the
//! test module abstractions with their two built-in implementations.
//!
//! 此模块包含运行器的核心功能：数据模型、方法过滤器、边界安全验证器、
//! 约定以及测试模块抽象及其两种内置实现。

pub mod boundary;
pub mod convention;
pub mod error;
pub mod filter;
pub mod manifest;
pub mod models;
pub mod module;
pub mod native;

// Re-exports
pub use boundary::{BoundarySafety, Described, TypeCatalog};
pub use convention::{Convention, DefaultConvention};
pub use filter::MethodFilter;
pub use module::{ModuleLoader, TestModule};
