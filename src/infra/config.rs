//! # Context Configuration Module / 上下文配置模块
//!
//! The optional configuration file that sits next to a test module
//! (`<module>.config`). Its absence is not an error.
//!
//! 位于测试模块旁边的可选配置文件（`<module>.config`）。文件不存在不是错误。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Configuration of one isolated execution context.
///
/// ```toml
/// default_timeout_secs = 30
///
/// [settings]
/// database_url = "sqlite::memory:"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ContextConfig {
    /// Timeout applied to command-backed methods that declare none.
    /// 应用于未声明超时的命令型方法的超时时间。
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,
    /// String settings made visible to running cases. Command-backed methods
    /// receive them as environment variables.
    /// 对运行中的用例可见的字符串设置。命令型方法以环境变量的形式接收它们。
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

impl ContextConfig {
    /// Reads and parses a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse configuration file: {}", path.display()))
    }

    /// Loads `path` if given, otherwise returns the empty configuration.
    pub fn load_optional(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_secs.map(Duration::from_secs)
    }
}
