//! # Infrastructure Module / 基础设施模块
//!
//! This module provides infrastructure services for the runner:
//! command execution with output capture, file system helpers including the
//! scoped working-directory guard, and the context configuration file.
//!
//! 此模块为运行器提供基础设施服务：
//! 带输出捕获的命令执行、包括作用域工作目录守卫在内的文件系统辅助功能，
//! 以及上下文配置文件。

pub mod command;
pub mod config;
pub mod fs;
